use crate::error::Result;

/// A non-blocking serial byte source and sink.
///
/// Callers are expected to consult [`bytes_available`](Self::bytes_available)
/// before reading: `read_byte` is only issued when at least one byte is
/// buffered, and `read_exact` only when the whole slice can be filled.
/// Implementations must never block inside any of the read methods.
pub trait SerialPort {
    /// Number of bytes that can be read right now. May be zero.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read a single buffered byte.
    fn read_byte(&mut self) -> Result<u8>;

    /// Copy buffered bytes into `buf`, returning how many were copied.
    ///
    /// A return value smaller than `buf.len()` means the port broke the
    /// promise made by `bytes_available`; callers treat that as a failed read.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `bytes` to the link in one operation.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<P: SerialPort + ?Sized> SerialPort for &mut P {
    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read_byte(&mut self) -> Result<u8> {
        (**self).read_byte()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_exact(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }
}

impl<P: SerialPort + ?Sized> SerialPort for Box<P> {
    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read_byte(&mut self) -> Result<u8> {
        (**self).read_byte()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_exact(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }
}
