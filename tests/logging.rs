#![cfg(not(loom))]
//! Log output emitted by sessions, captured through the `log` bridge.

use log::Level;
use peertalk::transport::Transport;
use peertalk_testing::{LoggerHandle, SessionPair, logger, negotiated_pair};
use rstest::rstest;
use serial_test::serial;

#[rstest]
#[serial]
fn malformed_frames_are_reported(mut logger: LoggerHandle, mut negotiated_pair: SessionPair) {
    negotiated_pair
        .a
        .transport_mut()
        .try_write(b"not a frame")
        .expect("pipe open");
    negotiated_pair.pump(4).expect("pumped");
    assert!(logger.contains(Level::Warn, "dropping malformed frame"));
}

#[rstest]
#[serial]
fn disconnects_are_logged(mut logger: LoggerHandle, mut negotiated_pair: SessionPair) {
    negotiated_pair.a.close();
    negotiated_pair.pump(4).expect("pumped");
    assert!(logger.contains(Level::Info, "peer disconnected"));
}
