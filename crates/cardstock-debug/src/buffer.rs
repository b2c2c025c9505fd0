use bytes::BytesMut;
use cardstock_serial::SerialPort;

use crate::error::{DebugError, Result};

/// Fixed-capacity reassembly buffer for one packet payload.
///
/// Lengths are checked against the capacity before anything is written, so
/// a hostile length field can never grow or overrun the buffer. The contents
/// are replaced on every fill.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ReceiveBuffer {
    /// Allocate a buffer holding at most `capacity` payload bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum payload size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fail with [`DebugError::FrameTooLarge`] if `len` does not fit.
    pub fn check(&self, len: usize) -> Result<()> {
        if len > self.capacity {
            return Err(DebugError::FrameTooLarge {
                size: len,
                max: self.capacity,
            });
        }
        Ok(())
    }

    /// Replace the contents with exactly `len` bytes read from `port` in one
    /// bulk read.
    ///
    /// A short read leaves only the bytes that did arrive and reports
    /// [`DebugError::TransportReadFailure`].
    pub fn fill<P: SerialPort + ?Sized>(&mut self, port: &mut P, len: usize) -> Result<()> {
        self.check(len)?;
        self.buf.clear();
        self.buf.resize(len, 0);

        let read = match port.read_exact(&mut self.buf[..]) {
            Ok(read) => read,
            Err(err) => {
                self.buf.clear();
                return Err(DebugError::from_read(err));
            }
        };
        if read < len {
            self.buf.truncate(read);
            return Err(DebugError::TransportReadFailure {
                expected: len,
                actual: read,
            });
        }
        Ok(())
    }

    /// Bytes from the last fill.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Forget the last payload.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use cardstock_serial::{LoopbackPort, TransportError};

    use super::*;

    #[test]
    fn fill_reads_exactly_len() {
        let mut port = LoopbackPort::with_input(b"abcdef");
        let mut buffer = ReceiveBuffer::with_capacity(8);

        buffer.fill(&mut port, 4).unwrap();
        assert_eq!(buffer.as_slice(), b"abcd");
        assert_eq!(port.pending(), b"ef");
    }

    #[test]
    fn fill_up_to_capacity() {
        let mut port = LoopbackPort::with_input(&[0x5A; 8]);
        let mut buffer = ReceiveBuffer::with_capacity(8);

        buffer.fill(&mut port, 8).unwrap();
        assert_eq!(buffer.as_slice(), &[0x5A; 8]);
    }

    #[test]
    fn oversized_fill_is_rejected_before_reading() {
        let mut port = LoopbackPort::with_input(&[0u8; 16]);
        let mut buffer = ReceiveBuffer::with_capacity(8);

        let err = buffer.fill(&mut port, 9).unwrap_err();
        assert!(matches!(err, DebugError::FrameTooLarge { size: 9, max: 8 }));
        assert_eq!(port.pending().len(), 16);
        assert!(buffer.as_slice().is_empty());
    }

    #[test]
    fn short_read_is_a_read_failure() {
        let mut port = LoopbackPort::with_input(b"xy");
        let mut buffer = ReceiveBuffer::with_capacity(8);

        let err = buffer.fill(&mut port, 5).unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportReadFailure {
                expected: 5,
                actual: 2
            }
        ));
        assert_eq!(buffer.as_slice(), b"xy");
    }

    struct UnderrunPort;

    impl SerialPort for UnderrunPort {
        fn bytes_available(&mut self) -> cardstock_serial::Result<usize> {
            Ok(4)
        }

        fn read_byte(&mut self) -> cardstock_serial::Result<u8> {
            Err(TransportError::Underrun {
                requested: 1,
                available: 0,
            })
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> cardstock_serial::Result<usize> {
            Err(TransportError::Underrun {
                requested: buf.len(),
                available: 0,
            })
        }

        fn write(&mut self, _bytes: &[u8]) -> cardstock_serial::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn port_underrun_is_a_read_failure() {
        let mut buffer = ReceiveBuffer::with_capacity(8);

        let err = buffer.fill(&mut UnderrunPort, 4).unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportReadFailure {
                expected: 4,
                actual: 0
            }
        ));
        assert!(buffer.as_slice().is_empty());
    }

    #[test]
    fn other_port_errors_stay_transport_errors() {
        let err = DebugError::from_read(TransportError::Closed);
        assert!(matches!(err, DebugError::Transport(TransportError::Closed)));
    }

    #[test]
    fn refill_overwrites_previous_payload() {
        let mut port = LoopbackPort::with_input(b"longerzz");
        let mut buffer = ReceiveBuffer::with_capacity(8);

        buffer.fill(&mut port, 6).unwrap();
        buffer.fill(&mut port, 2).unwrap();
        assert_eq!(buffer.as_slice(), b"zz");

        buffer.clear();
        assert!(buffer.as_slice().is_empty());
    }
}
