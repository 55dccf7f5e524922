//! Two sessions joined by an in-memory transport.

use peertalk::{
    MessageHandler,
    PeerId,
    Result,
    Session,
    SessionConfig,
    transport::MemoryTransport,
};
use rstest::fixture;

/// Messages and disconnect notices delivered to one side of a pair.
#[derive(Debug, Default)]
pub struct Inbox {
    /// Payloads in delivery order.
    pub messages: Vec<Vec<u8>>,
    /// Number of disconnect notifications.
    pub disconnects: usize,
}

impl MessageHandler for Inbox {
    fn on_message(&mut self, _peer: PeerId, payload: &[u8]) { self.messages.push(payload.to_vec()); }

    fn on_disconnect(&mut self, _peer: PeerId) { self.disconnects += 1; }
}

/// Peer A and peer B, each with its own inbox.
pub struct SessionPair {
    /// Session owned by peer A, talking to B.
    pub a: Session<MemoryTransport>,
    /// Session owned by peer B, talking to A.
    pub b: Session<MemoryTransport>,
    /// What A has received.
    pub a_inbox: Inbox,
    /// What B has received.
    pub b_inbox: Inbox,
}

impl SessionPair {
    /// Connect two sessions configured by `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Session::new`].
    pub fn new(a: &SessionConfig, b: &SessionConfig) -> Result<Self> {
        let (left, right) = MemoryTransport::pair();
        Ok(Self {
            a: Session::new(PeerId::new(2), left, a)?,
            b: Session::new(PeerId::new(1), right, b)?,
            a_inbox: Inbox::default(),
            b_inbox: Inbox::default(),
        })
    }

    /// Poll both sides once. Returns whether any frame moved.
    ///
    /// # Errors
    ///
    /// Returns the first poll error.
    pub fn poll(&mut self) -> Result<bool> {
        let a = self.a.poll(&mut self.a_inbox)?;
        let b = self.b.poll(&mut self.b_inbox)?;
        Ok(a.frames_sent + a.delivered + b.frames_sent + b.delivered > 0)
    }

    /// Poll until a round moves nothing, at most `rounds` times.
    ///
    /// # Errors
    ///
    /// Returns the first poll error.
    pub fn pump(&mut self, rounds: usize) -> Result<()> {
        for _ in 0..rounds {
            if !self.poll()? {
                break;
            }
        }
        Ok(())
    }

    /// Poll until both sides have seen the other's capabilities.
    ///
    /// # Errors
    ///
    /// Returns the first poll error.
    pub fn negotiate(&mut self) -> Result<()> {
        while !(self.a.negotiator().peer().exchanged() && self.b.negotiator().peer().exchanged()) {
            if !self.poll()? {
                break;
            }
        }
        Ok(())
    }
}

/// Deterministic payload of `len` bytes.
#[must_use]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap_or_default())
        .collect()
}

/// A negotiated pair using default configuration on both sides.
///
/// # Panics
///
/// Panics if the default configuration is rejected or polling fails.
#[fixture]
pub fn negotiated_pair() -> SessionPair {
    let config = SessionConfig::default();
    let mut pair = SessionPair::new(&config, &config).expect("default configuration");
    pair.negotiate().expect("negotiation");
    pair
}
