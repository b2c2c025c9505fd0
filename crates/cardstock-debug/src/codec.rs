use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DebugError, Result};

/// Packet synchronization byte.
pub const MAGIC: u8 = 0xAA;

/// Header bytes following the magic byte: command (1) + length (2) + checksum (1).
pub const HEADER_SIZE: usize = 4;

/// Magic byte plus header.
pub const FRAME_OVERHEAD: usize = 1 + HEADER_SIZE;

/// Default receive buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Command code reserved for acknowledgements.
pub const ACK_COMMAND: u8 = 0x06;

/// Acknowledgement sent in response to the debug-mode toggles: a zero-length
/// packet with the ack command and a zero checksum.
pub const ACK_FRAME: [u8; FRAME_OVERHEAD] = [MAGIC, ACK_COMMAND, 0x00, 0x00, 0x00];

/// The four header bytes that follow the magic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Operation code.
    pub command: u8,
    /// Payload size in bytes.
    pub length: u16,
    /// Checksum byte as sent.
    pub checksum: u8,
}

impl PacketHeader {
    /// Parse a header from its wire bytes.
    pub fn from_bytes(raw: [u8; HEADER_SIZE]) -> Self {
        Self {
            command: raw[0],
            length: u16::from_le_bytes([raw[1], raw[2]]),
            checksum: raw[3],
        }
    }

    /// Wire bytes of this header (without the magic byte).
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [lo, hi] = self.length.to_le_bytes();
        [self.command, lo, hi, self.checksum]
    }

    /// Header for `payload`, with a computed checksum.
    pub fn for_payload(command: u8, payload: &[u8]) -> Result<Self> {
        let length = u16::try_from(payload.len()).map_err(|_| DebugError::FrameTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        })?;
        Ok(Self {
            command,
            length,
            checksum: compute_checksum(command, length, payload),
        })
    }

    /// Payload size as a `usize`.
    pub fn payload_len(&self) -> usize {
        usize::from(self.length)
    }
}

/// XOR of the command, both length bytes and every payload byte.
pub fn compute_checksum(command: u8, length: u16, payload: &[u8]) -> u8 {
    let [lo, hi] = length.to_le_bytes();
    payload.iter().fold(command ^ lo ^ hi, |acc, &b| acc ^ b)
}

/// A decoded packet borrowing its payload from the decoder's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRef<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

impl PacketRef<'_> {
    /// Copy the payload out of the receive buffer.
    pub fn to_packet(&self) -> Packet {
        Packet {
            header: self.header,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// A decoded packet owning its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet with a computed checksum.
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        Ok(Self {
            header: PacketHeader::for_payload(command, &payload)?,
            payload,
        })
    }

    /// Borrowed view of this packet.
    pub fn view(&self) -> PacketRef<'_> {
        PacketRef {
            header: self.header,
            payload: &self.payload,
        }
    }

    /// Total wire size (magic + header + payload).
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Encode a packet into the wire format.
///
/// ```text
/// ┌───────┬─────────┬────────────┬──────────┬──────────────────┐
/// │ Magic │ Command │ Length     │ Checksum │ Payload          │
/// │ 0xAA  │ (1B)    │ (2B LE)    │ (1B)     │ (Length bytes)   │
/// └───────┴─────────┴────────────┴──────────┴──────────────────┘
/// ```
pub fn encode_packet(command: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = PacketHeader::for_payload(command, payload)?;
    dst.reserve(FRAME_OVERHEAD + payload.len());
    dst.put_u8(MAGIC);
    dst.put_slice(&header.to_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode one packet from an accumulated buffer.
///
/// Bytes before the first magic byte are dropped. Returns `Ok(None)` until a
/// complete packet is buffered, consuming it on success. A header declaring
/// more than `max_payload` bytes is consumed and reported as
/// [`DebugError::FrameTooLarge`], so the next call rescans from there.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<Packet>> {
    match src.iter().position(|&b| b == MAGIC) {
        Some(start) => src.advance(start),
        None => {
            src.clear();
            return Ok(None);
        }
    }

    if src.len() < FRAME_OVERHEAD {
        return Ok(None);
    }

    let header = PacketHeader::from_bytes([src[1], src[2], src[3], src[4]]);
    let len = header.payload_len();
    if len > max_payload {
        src.advance(FRAME_OVERHEAD);
        return Err(DebugError::FrameTooLarge {
            size: len,
            max: max_payload,
        });
    }

    if src.len() < FRAME_OVERHEAD + len {
        return Ok(None);
    }

    src.advance(FRAME_OVERHEAD);
    let payload = src.split_to(len).freeze();
    Ok(Some(Packet { header, payload }))
}
