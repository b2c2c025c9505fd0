use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::SerialPort;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 1024;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_WRITE_BACKOFF: Duration = Duration::from_millis(32);

/// Adapts a `Read + Write` stream to [`SerialPort`].
///
/// The stream must already be in non-blocking mode: `bytes_available` pulls
/// whatever the stream can hand over without waiting into an internal inbox
/// and reports its size. Reads are then served from the inbox only.
///
/// Writes back off while the stream reports `WouldBlock` and fail with
/// `TimedOut` once the write timeout (one second by default) has passed.
pub struct StreamPort<S> {
    inner: S,
    inbox: BytesMut,
    closed: bool,
    write_timeout: Duration,
}

impl<S: Read + Write> StreamPort<S> {
    /// Wrap a stream that is already non-blocking.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            inbox: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            closed: false,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Override how long a write may wait on a full stream.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// True once the remote end has hung up. Buffered bytes may remain.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the port and return the inner stream. Unread bytes are lost.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn fill_inbox(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while !self.closed {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    debug!(buffered = self.inbox.len(), "serial stream reached EOF");
                    self.closed = true;
                }
                Ok(n) => {
                    trace!(bytes = n, "pulled bytes from serial stream");
                    self.inbox.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }
}

/// Sleep-based retry for a stream that is momentarily not writable.
struct WriteBackoff {
    deadline: Instant,
    delay: Duration,
}

impl WriteBackoff {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            delay: Duration::from_millis(1),
        }
    }

    fn wait(&mut self) -> Result<()> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::TimedOut,
                "serial stream not writable before timeout",
            )));
        }
        thread::sleep(self.delay.min(self.deadline - now));
        self.delay = (self.delay * 2).min(MAX_WRITE_BACKOFF);
        Ok(())
    }
}

#[cfg(unix)]
impl StreamPort<std::os::unix::net::UnixStream> {
    /// Switch a Unix stream to non-blocking mode and wrap it.
    pub fn unix(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> SerialPort for StreamPort<S> {
    fn bytes_available(&mut self) -> Result<usize> {
        self.fill_inbox()?;
        if self.closed && self.inbox.is_empty() {
            return Err(TransportError::Closed);
        }
        Ok(self.inbox.len())
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.inbox.is_empty() {
            return Err(TransportError::Underrun {
                requested: 1,
                available: 0,
            });
        }
        Ok(self.inbox.get_u8())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.inbox.len());
        self.inbox.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut backoff = WriteBackoff::new(self.write_timeout);
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => backoff.wait()?,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => backoff.wait()?,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<S> std::fmt::Debug for StreamPort<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPort")
            .field("buffered", &self.inbox.len())
            .field("closed", &self.closed)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
