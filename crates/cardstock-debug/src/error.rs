use std::time::Duration;

use cardstock_serial::TransportError;

use crate::decoder::DecoderState;

/// Errors produced while decoding or dispatching debug packets.
///
/// Every variant raised by the decoder aborts only the packet in flight; the
/// decoder is already back to scanning for the next magic byte by the time
/// the error reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    /// The declared payload length does not fit the receive buffer.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The port handed over fewer bytes than it reported as available.
    #[error("transport read failure ({expected} bytes expected, {actual} read)")]
    TransportReadFailure { expected: usize, actual: usize },

    /// A partial packet sat waiting for more bytes longer than allowed.
    #[error("partial packet stalled in {state:?} for {age:?}")]
    TransportStall { state: DecoderState, age: Duration },

    /// Only the gated action commands accept custom handlers.
    #[error("command 0x{0:02X} is not an assignable action")]
    UnassignedCommand(u8),

    /// The underlying serial port failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl DebugError {
    /// Short machine-readable name for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            DebugError::FrameTooLarge { .. } => "frame_too_large",
            DebugError::TransportReadFailure { .. } => "transport_read_failure",
            DebugError::TransportStall { .. } => "transport_stall",
            DebugError::UnassignedCommand(_) => "unassigned_command",
            DebugError::Transport(_) => "transport",
        }
    }

    /// Classify a failed port read. An underrun means the port reported
    /// bytes it could not deliver.
    pub(crate) fn from_read(err: TransportError) -> Self {
        match err {
            TransportError::Underrun {
                requested,
                available,
            } => DebugError::TransportReadFailure {
                expected: requested,
                actual: available,
            },
            other => DebugError::Transport(other),
        }
    }
}

impl From<std::io::Error> for DebugError {
    fn from(err: std::io::Error) -> Self {
        DebugError::Transport(TransportError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, DebugError>;
