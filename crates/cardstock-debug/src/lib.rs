//! Serial debug protocol: incremental packet framing and command dispatch.
//!
//! Every packet on the wire looks like:
//! - a 1-byte magic value (`0xAA`) for stream synchronization
//! - a 1-byte command
//! - a 2-byte little-endian payload length
//! - a 1-byte checksum
//! - `length` payload bytes
//!
//! [`FrameDecoder`] reassembles packets from a non-blocking [`SerialPort`]
//! without ever waiting for bytes, [`PacketDispatcher`] runs the command
//! table, and [`DebugSession`] ties the two to one port for a host that
//! calls [`DebugSession::process_once`] once per loop iteration.
//!
//! [`SerialPort`]: cardstock_serial::SerialPort

pub mod buffer;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod session;

#[cfg(feature = "async")]
pub mod async_codec;

pub use buffer::ReceiveBuffer;
pub use codec::{
    compute_checksum, decode_packet, encode_packet, Packet, PacketHeader, PacketRef, ACK_COMMAND,
    ACK_FRAME, DEFAULT_BUFFER_CAPACITY, FRAME_OVERHEAD, HEADER_SIZE, MAGIC,
};
pub use config::{ChecksumPolicy, DebugConfig, OversizePolicy};
pub use decoder::{DecoderState, FrameDecoder};
pub use dispatcher::{
    ActionHandler, Command, Dispatch, PacketDispatcher, CMD_DISABLE_DEBUG, CMD_ENABLE_DEBUG,
    RESULT_REJECTED,
};
pub use error::{DebugError, Result};
pub use session::{DebugSession, Outcome};

#[cfg(feature = "async")]
pub use async_codec::DebugCodec;
