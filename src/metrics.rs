//! Metric helpers for `peertalk`.
//!
//! This module defines metric names and simple helper functions wrapping
//! the [`metrics`](https://docs.rs/metrics) crate. Without the `metrics`
//! feature every helper compiles to nothing.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking frames written and decoded.
pub const FRAMES_PROCESSED: &str = "peertalk_frames_processed_total";
/// Name of the counter tracking messages dropped by the engine.
pub const MESSAGES_DROPPED: &str = "peertalk_messages_dropped_total";
/// Name of the counter tracking queued messages replaced by coalescing.
pub const MESSAGES_COALESCED: &str = "peertalk_messages_coalesced_total";
/// Name of the counter tracking messages rebuilt from fragments.
pub const MESSAGES_REASSEMBLED: &str = "peertalk_messages_reassembled_total";
/// Name of the counter tracking frames rejected by the decoder.
pub const DECODE_ERRORS: &str = "peertalk_decode_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames decoded from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "used only by metric labels"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Why a message was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The message could not fit an empty batch.
    BatchOverflow,
    /// The transport failed while the message was being written.
    Network,
    /// A fragment broke the reassembly sequence or expired.
    Reassembly,
    /// An unfragmented message did not fit the receive buffer.
    Oversize,
}

impl DropReason {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "used only by metric labels"))]
    fn as_str(self) -> &'static str {
        match self {
            DropReason::BatchOverflow => "batch_overflow",
            DropReason::Network => "network",
            DropReason::Reassembly => "reassembly",
            DropReason::Oversize => "oversize",
        }
    }
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record `count` dropped messages.
pub fn inc_dropped(reason: DropReason, count: u64) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DROPPED, "reason" => reason.as_str()).increment(count);
    #[cfg(not(feature = "metrics"))]
    let _ = (reason, count);
}

/// Record a coalesced message.
pub fn inc_coalesced() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_COALESCED).increment(1);
}

/// Record a reassembled message.
pub fn inc_reassembled() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_REASSEMBLED).increment(1);
}

/// Record a frame rejected by the decoder.
pub fn inc_decode_errors() {
    #[cfg(feature = "metrics")]
    counter!(DECODE_ERRORS).increment(1);
}
