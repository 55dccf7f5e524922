//! Non-blocking byte transports a [`Session`](crate::session::Session)
//! writes frames to and reads frames from.
//!
//! The session never waits. A transport either accepts a whole frame or
//! reports [`io::ErrorKind::WouldBlock`], and reads return whatever bytes are
//! available. [`MemoryTransport`] connects two sessions in-process with
//! switches for simulating a stalled or failing link. [`TcpTransport`]
//! adapts a `tokio` TCP stream.

use std::{cell::RefCell, collections::VecDeque, io, rc::Rc};

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;

/// Non-blocking byte transport.
pub trait Transport {
    /// Hand one complete frame to the transport.
    ///
    /// Acceptance is all-or-nothing: on success the whole frame will be
    /// delivered in order, and on error nothing was taken.
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::WouldBlock`] means the transport has no room right
    /// now; any other error is a network failure.
    fn try_write(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Read available bytes into `buf`.
    ///
    /// `Ok(0)` means the peer closed the connection.
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::WouldBlock`] means nothing is available; any other
    /// error is a network failure.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Push out bytes of previously accepted frames still held by the
    /// transport. Called at the start of every drain.
    ///
    /// # Errors
    ///
    /// Returns a network failure. Having nothing writable yet is not an
    /// error.
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn try_write(&mut self, frame: &[u8]) -> io::Result<()> { (**self).try_write(frame) }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> { (**self).try_read(buf) }

    fn flush(&mut self) -> io::Result<()> { (**self).flush() }
}

fn would_block() -> io::Error { io::Error::from(io::ErrorKind::WouldBlock) }

#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-process byte pipe.
///
/// # Examples
///
/// ```
/// use peertalk::transport::{MemoryTransport, Transport};
///
/// let (mut a, mut b) = MemoryTransport::pair();
/// a.try_write(b"hello").expect("accepted");
/// let mut buf = [0u8; 8];
/// assert_eq!(b.try_read(&mut buf).expect("data"), 5);
/// assert_eq!(&buf[..5], b"hello");
/// ```
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: Rc<RefCell<Pipe>>,
    outbound: Rc<RefCell<Pipe>>,
    write_stalled: bool,
    write_failing: bool,
    frames_written: usize,
}

impl MemoryTransport {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = Rc::new(RefCell::new(Pipe::default()));
        let b_to_a = Rc::new(RefCell::new(Pipe::default()));
        (
            Self::new(Rc::clone(&b_to_a), Rc::clone(&a_to_b)),
            Self::new(a_to_b, b_to_a),
        )
    }

    fn new(inbound: Rc<RefCell<Pipe>>, outbound: Rc<RefCell<Pipe>>) -> Self {
        Self {
            inbound,
            outbound,
            write_stalled: false,
            write_failing: false,
            frames_written: 0,
        }
    }

    /// While stalled, every write reports would-block.
    pub fn set_write_stalled(&mut self, stalled: bool) { self.write_stalled = stalled; }

    /// While failing, every write reports a broken pipe.
    pub fn set_write_failing(&mut self, failing: bool) { self.write_failing = failing; }

    /// Close this end; the peer reads end-of-stream once drained.
    pub fn close(&mut self) { self.outbound.borrow_mut().closed = true; }

    /// Frames accepted so far.
    #[must_use]
    pub const fn frames_written(&self) -> usize { self.frames_written }

    /// Bytes written by the peer and not yet read.
    #[must_use]
    pub fn pending_inbound(&self) -> usize { self.inbound.borrow().bytes.len() }

    /// Inject raw bytes as if the peer had written them.
    pub fn inject_inbound(&mut self, bytes: &[u8]) {
        self.inbound.borrow_mut().bytes.extend(bytes.iter().copied());
    }
}

impl Transport for MemoryTransport {
    fn try_write(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.write_failing {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        if self.write_stalled {
            return Err(would_block());
        }
        let mut pipe = self.outbound.borrow_mut();
        if pipe.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        pipe.bytes.extend(frame.iter().copied());
        self.frames_written += 1;
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.inbound.borrow_mut();
        if pipe.bytes.is_empty() {
            return if pipe.closed { Ok(0) } else { Err(would_block()) };
        }
        let n = buf.len().min(pipe.bytes.len());
        for (dst, src) in buf.iter_mut().zip(pipe.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// TCP transport over a `tokio` stream.
///
/// The socket may accept only part of a frame. The remainder is kept and
/// written out by [`Transport::flush`] or the next write; until it has
/// gone, further writes report would-block, which preserves all-or-nothing
/// acceptance.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    pending: BytesMut,
}

impl TcpTransport {
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: BytesMut::new(),
        }
    }

    /// Whether part of a frame is still waiting for the socket.
    #[must_use]
    pub fn has_pending(&self) -> bool { !self.pending.is_empty() }

    /// Borrow the underlying stream.
    #[must_use]
    pub const fn get_ref(&self) -> &TcpStream { &self.stream }

    /// Write as much of the pending remainder as the socket accepts.
    ///
    /// # Errors
    ///
    /// Returns any error other than would-block reported by the socket.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        while !self.pending.is_empty() {
            match self.stream.try_write(&self.pending) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => self.pending.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Wait until the socket is readable, or writable while a remainder is
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns any readiness error reported by the socket.
    pub async fn ready(&self) -> io::Result<()> {
        if self.has_pending() {
            tokio::select! {
                res = self.stream.readable() => res,
                res = self.stream.writable() => res,
            }
        } else {
            self.stream.readable().await
        }
    }
}

impl Transport for TcpTransport {
    fn try_write(&mut self, frame: &[u8]) -> io::Result<()> {
        self.flush_pending()?;
        if self.has_pending() {
            return Err(would_block());
        }
        let written = self.stream.try_write(frame)?;
        if let Some(rest) = frame.get(written..) {
            self.pending.extend_from_slice(rest);
        }
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.stream.try_read(buf) }

    fn flush(&mut self) -> io::Result<()> { self.flush_pending() }
}
