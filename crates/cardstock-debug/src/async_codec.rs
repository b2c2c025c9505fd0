//! `tokio_util` codec for tooling that talks to a device over an async stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_packet, encode_packet, Packet, DEFAULT_BUFFER_CAPACITY};
use crate::error::DebugError;

/// Packet codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone)]
pub struct DebugCodec {
    max_payload: usize,
}

impl DebugCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for DebugCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl Decoder for DebugCodec {
    type Item = Packet;
    type Error = DebugError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_packet(src, self.max_payload)
    }
}

impl Encoder<Packet> for DebugCodec {
    type Error = DebugError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_packet(item.header.command, &item.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ACK_FRAME;

    #[test]
    fn decodes_ack_frame() {
        let mut codec = DebugCodec::default();
        let mut buf = BytesMut::from(&ACK_FRAME[..]);

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.header.command, 0x06);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn encoder_output_decodes() {
        let mut codec = DebugCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::new(0x02, &b"abc"[..]).unwrap(), &mut buf)
            .unwrap();

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.header.command, 0x02);
        assert_eq!(packet.payload.as_ref(), b"abc");
    }

    #[test]
    fn rejects_payload_over_limit() {
        let mut codec = DebugCodec::new(2);
        let mut buf = BytesMut::new();
        encode_packet(0x01, b"abc", &mut buf).unwrap();

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, DebugError::FrameTooLarge { size: 3, max: 2 }));
    }
}
