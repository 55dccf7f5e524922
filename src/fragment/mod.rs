//! Fragmentation and reassembly of messages larger than the negotiated
//! ceiling.
//!
//! Oversized messages are split into fragments that each fit one Tier-1
//! queue slot. Every fragment carries a fixed 8-byte big-endian
//! [`FragmentHeader`] ahead of its body and travels in an envelope flagged
//! `FRAGMENT`. The receiving side feeds fragments to a single-slot
//! [`Reassembler`] that accumulates them in the peer's receive buffer and
//! delivers the message once the last fragment arrives.

pub mod error;
pub mod fragmenter;
pub mod header;
pub mod id;
pub mod reassembler;

pub use error::{FragmentationError, ReassemblyError};
pub use fragmenter::{Fragment, FragmentChunks, Fragmenter, chunk_body_len, fragment_count};
pub use header::{FRAGMENT_HEADER_LEN, FragmentFlags, FragmentHeader};
pub use id::MessageId;
pub use reassembler::{DEFAULT_REASSEMBLY_TIMEOUT, ReassemblyState, Reassembler};

#[cfg(test)]
mod tests;
