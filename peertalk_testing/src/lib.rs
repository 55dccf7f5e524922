//! Utilities for exercising [`peertalk`] sessions in tests.
//!
//! [`SessionPair`] joins two sessions over a
//! [`MemoryTransport`](peertalk::transport::MemoryTransport) and polls them
//! until traffic settles, [`logger`] serialises access to captured log
//! records, and [`metrics::capture`] records metrics emitted by a closure.
//!
//! ```rust
//! use peertalk::{Priority, SessionConfig};
//! use peertalk_testing::{SessionPair, pattern};
//!
//! let config = SessionConfig::default();
//! let mut pair = SessionPair::new(&config, &config).expect("pair");
//! pair.negotiate().expect("negotiated");
//! pair.a.send(&pattern(64), Priority::Normal).expect("queued");
//! pair.pump(8).expect("pumped");
//! assert_eq!(pair.b_inbox.messages, [pattern(64)]);
//! ```

pub mod logging;
pub mod metrics;
pub mod pair;

pub use logging::{LoggerHandle, logger};
pub use pair::{Inbox, SessionPair, negotiated_pair, pattern};
