use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::SerialPort;

/// In-memory serial port.
///
/// Inbound bytes are queued with [`push`](Self::push) and handed out through
/// the [`SerialPort`] read methods. Every `write` is recorded as its own
/// entry so callers can check that a response went out in one operation.
#[derive(Debug, Default)]
pub struct LoopbackPort {
    inbound: BytesMut,
    writes: Vec<Bytes>,
}

impl LoopbackPort {
    /// Create an empty port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a port with `bytes` already queued for reading.
    pub fn with_input(bytes: &[u8]) -> Self {
        let mut port = Self::new();
        port.push(bytes);
        port
    }

    /// Queue bytes as if they had just arrived on the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Bytes queued but not yet read.
    pub fn pending(&self) -> &[u8] {
        &self.inbound
    }

    /// Each `write` call, in order.
    pub fn writes(&self) -> &[Bytes] {
        &self.writes
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.writes.iter().flat_map(|w| w.iter().copied()).collect()
    }

    /// Drain the recorded writes.
    pub fn take_writes(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.writes)
    }
}

impl SerialPort for LoopbackPort {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.inbound.len())
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.inbound.is_empty() {
            return Err(TransportError::Underrun {
                requested: 1,
                available: 0,
            });
        }
        Ok(self.inbound.get_u8())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.inbound.len());
        self.inbound.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes.push(Bytes::copy_from_slice(bytes));
        Ok(())
    }
}
