//! Per-session configuration.
//!
//! [`SessionConfig`] deserialises with `serde`, filling absent fields from
//! [`SessionConfig::default`], so it can be embedded in an application's own
//! configuration file. [`SessionConfigBuilder`] offers the same settings
//! fluently. Both paths validate through [`SessionConfig::validate`] before
//! a [`Session`](super::Session) is constructed.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::{
    batch::{BATCH_ENTRY_HEADER, BATCH_MAX},
    capability::{
        CapabilityFlags,
        DEFAULT_PREFERRED_CHUNK,
        LocalCapabilities,
        MAX_MESSAGE_SIZE,
        MIN_MESSAGE_SIZE,
    },
    direct::{DIRECT_DEFAULT_CAPACITY, DIRECT_MAX_CAPACITY, DIRECT_MIN_CAPACITY},
    error::ErrorKind,
    fragment::FRAGMENT_HEADER_LEN,
    queue::{MAX_QUEUE_CAPACITY, SLOT_SIZE},
};

/// Errors returned when a configuration is invalid.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A queue capacity is zero, not a power of two or too large.
    #[error("invalid {queue} queue capacity {capacity}; must be a power of two up to {max}", max = MAX_QUEUE_CAPACITY)]
    InvalidQueueCapacity {
        /// Which queue was misconfigured.
        queue: &'static str,
        /// Configured capacity.
        capacity: usize,
    },
    /// The direct buffer capacity is out of range.
    #[error(
        "invalid direct capacity {0}; must be between {min} and {max}",
        min = DIRECT_MIN_CAPACITY,
        max = DIRECT_MAX_CAPACITY
    )]
    InvalidDirectCapacity(usize),
    /// The local maximum message size is out of range.
    #[error(
        "invalid max message size {0}; must be between {min} and {max}",
        min = MIN_MESSAGE_SIZE,
        max = MAX_MESSAGE_SIZE
    )]
    InvalidMaxMessageSize(u16),
    /// The preferred chunk leaves no room for a fragment body.
    #[error("invalid preferred chunk {0}; must exceed {min}", min = FRAGMENT_HEADER_LEN)]
    InvalidPreferredChunk(u16),
    /// The batch limit is out of range.
    #[error(
        "invalid batch limit {0}; must be between {min} and {max}",
        min = SLOT_SIZE + BATCH_ENTRY_HEADER,
        max = BATCH_MAX
    )]
    InvalidBatchLimit(usize),
    /// The read chunk is zero.
    #[error("read chunk must be non-zero")]
    InvalidReadChunk,
}

impl ConfigError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind { ErrorKind::Param }
}

/// Settings for one [`Session`](super::Session).
///
/// # Examples
///
/// ```
/// use peertalk::session::SessionConfig;
///
/// let config = SessionConfig::default();
/// assert_eq!(config.queue_capacity, 64);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Slots in the Tier-1 send queue.
    pub queue_capacity: usize,
    /// Slots in the queue fed by an asynchronous receive callback.
    pub receive_queue_capacity: usize,
    /// Size of the Tier-2 send buffer.
    pub direct_capacity: usize,
    /// Largest unfragmented frame payload accepted from the peer. Longer
    /// messages arrive fragmented.
    pub max_message_size: u16,
    /// Preferred fragment size advertised to the peer.
    pub preferred_chunk: u16,
    /// Capability bits advertised to the peer.
    pub capability_flags: u16,
    /// Largest batch frame payload.
    pub batch_limit: usize,
    /// Milliseconds a partial message may wait for its fragments.
    pub reassembly_timeout_ms: u64,
    /// Consecutive failed critical sends before the peer is reported
    /// unresponsive.
    pub unresponsive_after: u32,
    /// Bytes requested from the transport per read.
    pub read_chunk: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            receive_queue_capacity: 16,
            direct_capacity: DIRECT_DEFAULT_CAPACITY,
            max_message_size: MAX_MESSAGE_SIZE,
            preferred_chunk: DEFAULT_PREFERRED_CHUNK,
            capability_flags: CapabilityFlags::FRAGMENTATION.bits(),
            batch_limit: BATCH_MAX,
            reassembly_timeout_ms: 5_000,
            unresponsive_after: 8,
            read_chunk: 1_500,
        }
    }
}

fn valid_queue_capacity(capacity: usize) -> bool {
    capacity.is_power_of_two() && capacity <= MAX_QUEUE_CAPACITY
}

impl SessionConfig {
    /// Start a [`SessionConfigBuilder`] from the defaults.
    #[must_use]
    pub fn builder() -> SessionConfigBuilder { SessionConfigBuilder::default() }

    /// Check every setting against its supported range.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] for the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !valid_queue_capacity(self.queue_capacity) {
            return Err(ConfigError::InvalidQueueCapacity {
                queue: "send",
                capacity: self.queue_capacity,
            });
        }
        if !valid_queue_capacity(self.receive_queue_capacity) {
            return Err(ConfigError::InvalidQueueCapacity {
                queue: "receive",
                capacity: self.receive_queue_capacity,
            });
        }
        if !(DIRECT_MIN_CAPACITY..=DIRECT_MAX_CAPACITY).contains(&self.direct_capacity) {
            return Err(ConfigError::InvalidDirectCapacity(self.direct_capacity));
        }
        if !(MIN_MESSAGE_SIZE..=MAX_MESSAGE_SIZE).contains(&self.max_message_size) {
            return Err(ConfigError::InvalidMaxMessageSize(self.max_message_size));
        }
        if usize::from(self.preferred_chunk) <= FRAGMENT_HEADER_LEN {
            return Err(ConfigError::InvalidPreferredChunk(self.preferred_chunk));
        }
        if !(SLOT_SIZE + BATCH_ENTRY_HEADER..=BATCH_MAX).contains(&self.batch_limit) {
            return Err(ConfigError::InvalidBatchLimit(self.batch_limit));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::InvalidReadChunk);
        }
        Ok(())
    }

    /// Reassembly timeout as a [`Duration`].
    #[must_use]
    pub const fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    /// Limits advertised during capability negotiation.
    #[must_use]
    pub const fn local_capabilities(&self) -> LocalCapabilities {
        LocalCapabilities {
            max_message_size: self.max_message_size,
            preferred_chunk: self.preferred_chunk,
            flags: CapabilityFlags::from_bits_retain(self.capability_flags),
        }
    }
}

/// Builder for [`SessionConfig`].
///
/// # Examples
///
/// ```
/// use peertalk::session::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .queue_capacity(64)
///     .max_message_size(512)
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.max_message_size, 512);
///
/// assert!(SessionConfig::builder().queue_capacity(48).build().is_err());
/// ```
#[derive(Clone, Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the Tier-1 send queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the receive-callback queue capacity.
    #[must_use]
    pub fn receive_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.receive_queue_capacity = capacity;
        self
    }

    /// Set the Tier-2 buffer size.
    #[must_use]
    pub fn direct_capacity(mut self, capacity: usize) -> Self {
        self.config.direct_capacity = capacity;
        self
    }

    /// Set the local maximum message size.
    #[must_use]
    pub fn max_message_size(mut self, size: u16) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the preferred fragment size.
    #[must_use]
    pub fn preferred_chunk(mut self, chunk: u16) -> Self {
        self.config.preferred_chunk = chunk;
        self
    }

    /// Set the advertised capability bits.
    #[must_use]
    pub fn capability_flags(mut self, flags: CapabilityFlags) -> Self {
        self.config.capability_flags = flags.bits();
        self
    }

    /// Set the batch payload limit.
    #[must_use]
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.config.batch_limit = limit;
        self
    }

    /// Set the reassembly timeout.
    #[must_use]
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.config.reassembly_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set how many consecutive failed critical sends mark the peer
    /// unresponsive.
    #[must_use]
    pub fn unresponsive_after(mut self, failures: u32) -> Self {
        self.config.unresponsive_after = failures;
        self
    }

    /// Set the transport read size.
    #[must_use]
    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.config.read_chunk = bytes;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any setting is out of range.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
