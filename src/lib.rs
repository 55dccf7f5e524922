#![doc(html_root_url = "https://docs.rs/peertalk/latest")]
//! Public API for the `peertalk` library.
//!
//! This crate provides the messaging core of a peer-to-peer link: a
//! priority ring queue with coalescing for small messages, a direct buffer
//! for large ones, batching of small messages into shared frames,
//! capability negotiation, fragmentation with reassembly, and flow control
//! driven by both sides' buffer pressure.
//!
//! [`Session`] ties these together for one connected peer over any
//! non-blocking [`Transport`](transport::Transport).
//!
//! # Examples
//!
//! ```
//! use peertalk::{
//!     Priority,
//!     session::{PeerId, Session, SessionConfig},
//!     transport::MemoryTransport,
//! };
//!
//! let (left, right) = MemoryTransport::pair();
//! let config = SessionConfig::default();
//! let mut alice = Session::new(PeerId::new(1), left, &config).expect("alice");
//! let mut bob = Session::new(PeerId::new(2), right, &config).expect("bob");
//!
//! alice.send(b"hello", Priority::Normal).expect("queued");
//! alice.poll(&mut |_: PeerId, _: &[u8]| {}).expect("alice polls");
//!
//! let mut received = Vec::new();
//! bob.poll(&mut |_: PeerId, payload: &[u8]| received.push(payload.to_vec()))
//!     .expect("bob polls");
//! assert_eq!(received, [b"hello".to_vec()]);
//! ```

pub mod batch;
pub mod byte_order;
pub mod capability;
pub mod direct;
pub mod error;
pub mod flow;
pub mod fragment;
pub mod frame;
pub mod metrics;
pub mod priority;
pub mod queue;
pub mod session;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
pub use priority::Priority;
pub use session::{MessageHandler, PeerId, PollSummary, Session, SessionConfig, SessionState};
