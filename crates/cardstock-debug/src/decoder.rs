use std::time::Instant;

use cardstock_serial::SerialPort;
use tracing::{debug, trace, warn};

use crate::buffer::ReceiveBuffer;
use crate::codec::{PacketHeader, PacketRef, HEADER_SIZE, MAGIC};
use crate::config::{DebugConfig, OversizePolicy};
use crate::error::{DebugError, Result};

const DISCARD_CHUNK_SIZE: usize = 256;

/// Where the decoder is within the current packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Scanning for the magic byte.
    Idle,
    /// Magic byte seen, waiting for all four header bytes.
    ReadingHeader,
    /// Header committed, waiting for the whole payload.
    ReadingPayload { header: PacketHeader },
    /// Swallowing the payload of a rejected oversized packet.
    Discarding { remaining: usize },
}

/// Incremental, non-blocking packet reassembler.
///
/// Each [`poll`](Self::poll) consumes what the port has buffered and returns
/// as soon as one packet completes or the input runs dry. Header and payload
/// are only read once they are fully available, so a suspended call never
/// consumes a partial header or payload.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    buffer: ReceiveBuffer,
    config: DebugConfig,
    packet_started: Option<Instant>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(DebugConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: DebugConfig) -> Self {
        Self {
            state: DecoderState::Idle,
            buffer: ReceiveBuffer::with_capacity(config.buffer_capacity),
            config,
            packet_started: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Current configuration.
    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Receive buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Drop any partial packet and go back to scanning for the magic byte.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.packet_started = None;
        self.buffer.clear();
    }

    /// Advance the state machine using the current time for stall detection.
    pub fn poll<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> Result<Option<PacketRef<'_>>> {
        self.poll_at(port, Instant::now())
    }

    /// Advance the state machine as of `now`.
    ///
    /// Returns `Ok(Some(packet))` for a completed packet, `Ok(None)` when the
    /// port ran out of bytes first, or an error that aborted the packet in
    /// flight. The decoder is always back in a resumable state afterwards.
    pub fn poll_at<P: SerialPort + ?Sized>(
        &mut self,
        port: &mut P,
        now: Instant,
    ) -> Result<Option<PacketRef<'_>>> {
        loop {
            match self.state {
                DecoderState::Idle => {
                    let available = self.available(port)?;
                    if available == 0 {
                        return Ok(None);
                    }
                    self.scan_for_magic(port, available, now)?;
                }
                DecoderState::ReadingHeader => {
                    if self.available(port)? < HEADER_SIZE {
                        return self.suspend(now);
                    }
                    let header = self.read_header(port)?;
                    self.commit_header(header)?;
                }
                DecoderState::ReadingPayload { header } => {
                    let len = header.payload_len();
                    if len > 0 && self.available(port)? < len {
                        return self.suspend(now);
                    }

                    self.state = DecoderState::Idle;
                    self.packet_started = None;
                    if let Err(err) = self.buffer.fill(port, len) {
                        return Err(self.abort(err));
                    }

                    debug!(command = header.command, length = len, "packet complete");
                    return Ok(Some(PacketRef {
                        header,
                        payload: self.buffer.as_slice(),
                    }));
                }
                DecoderState::Discarding { remaining } => {
                    let available = self.available(port)?;
                    if available == 0 {
                        return self.suspend(now);
                    }
                    self.discard(port, remaining, available.min(remaining))?;
                }
            }
        }
    }

    fn available<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> Result<usize> {
        port.bytes_available()
            .map_err(|err| self.abort(DebugError::Transport(err)))
    }

    fn scan_for_magic<P: SerialPort + ?Sized>(
        &mut self,
        port: &mut P,
        available: usize,
        now: Instant,
    ) -> Result<()> {
        for _ in 0..available {
            let byte = port.read_byte().map_err(|err| self.abort(DebugError::from_read(err)))?;
            if byte == MAGIC {
                trace!("magic byte received");
                self.state = DecoderState::ReadingHeader;
                self.packet_started = Some(now);
                return Ok(());
            }
            trace!(byte, "discarding noise byte");
        }
        Ok(())
    }

    fn read_header<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> Result<PacketHeader> {
        let mut raw = [0u8; HEADER_SIZE];
        let read = port
            .read_exact(&mut raw)
            .map_err(|err| self.abort(DebugError::from_read(err)))?;
        if read < HEADER_SIZE {
            return Err(self.abort(DebugError::TransportReadFailure {
                expected: HEADER_SIZE,
                actual: read,
            }));
        }

        let header = PacketHeader::from_bytes(raw);
        debug!(
            command = header.command,
            length = header.length,
            checksum = header.checksum,
            "packet header received"
        );
        Ok(header)
    }

    fn commit_header(&mut self, header: PacketHeader) -> Result<()> {
        let len = header.payload_len();
        if let Err(err) = self.buffer.check(len) {
            return Err(match self.config.oversize {
                OversizePolicy::Resync => self.abort(err),
                OversizePolicy::Discard => {
                    warn!(error = %err, remaining = len, "discarding oversized payload");
                    self.state = DecoderState::Discarding { remaining: len };
                    err
                }
            });
        }
        self.state = DecoderState::ReadingPayload { header };
        Ok(())
    }

    fn discard<P: SerialPort + ?Sized>(
        &mut self,
        port: &mut P,
        remaining: usize,
        count: usize,
    ) -> Result<()> {
        let mut scratch = [0u8; DISCARD_CHUNK_SIZE];
        let mut left = count;
        while left > 0 {
            let want = left.min(DISCARD_CHUNK_SIZE);
            let read = port
                .read_exact(&mut scratch[..want])
                .map_err(|err| self.abort(DebugError::from_read(err)))?;
            if read < want {
                return Err(self.abort(DebugError::TransportReadFailure {
                    expected: want,
                    actual: read,
                }));
            }
            left -= want;
        }

        let rest = remaining - count;
        if rest == 0 {
            debug!("oversized payload discarded");
            self.state = DecoderState::Idle;
            self.packet_started = None;
        } else {
            self.state = DecoderState::Discarding { remaining: rest };
        }
        Ok(())
    }

    /// Return control to the caller, unless the packet in flight has been
    /// waiting longer than `max_partial_packet_age`.
    fn suspend(&mut self, now: Instant) -> Result<Option<PacketRef<'_>>> {
        if let (Some(limit), Some(started)) =
            (self.config.max_partial_packet_age, self.packet_started)
        {
            let age = now.saturating_duration_since(started);
            if age > limit {
                let state = self.state;
                return Err(self.abort(DebugError::TransportStall { state, age }));
            }
        }
        Ok(None)
    }

    fn abort(&mut self, err: DebugError) -> DebugError {
        if self.state != DecoderState::Idle {
            warn!(error = %err, state = ?self.state, "aborting partial packet");
        }
        self.state = DecoderState::Idle;
        self.packet_started = None;
        err
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use cardstock_serial::LoopbackPort;

    use super::*;
    use crate::codec::{encode_packet, DEFAULT_BUFFER_CAPACITY};

    fn wire(command: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_packet(command, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    fn next_packet(decoder: &mut FrameDecoder, port: &mut LoopbackPort) -> (u8, Vec<u8>) {
        let packet = decoder
            .poll(port)
            .unwrap()
            .expect("a complete packet should be available");
        (packet.header.command, packet.payload.to_vec())
    }

    #[test]
    fn zero_length_packet_completes_immediately() {
        let mut port = LoopbackPort::with_input(&[0xAA, 0x04, 0x00, 0x00, 0x00]);
        let mut decoder = FrameDecoder::new();

        let packet = decoder.poll(&mut port).unwrap().unwrap();
        assert_eq!(packet.header.command, 0x04);
        assert_eq!(packet.header.length, 0);
        assert!(packet.payload.is_empty());
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn boundary_lengths_decode_exactly() {
        for len in [0, 1, DEFAULT_BUFFER_CAPACITY - 1, DEFAULT_BUFFER_CAPACITY] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut port = LoopbackPort::with_input(&wire(0x02, &payload));
            let mut decoder = FrameDecoder::new();

            let packet = decoder.poll(&mut port).unwrap().unwrap();
            assert_eq!(packet.header.length as usize, len);
            assert_eq!(packet.payload, payload.as_slice());
            assert!(port.pending().is_empty());
        }
    }

    #[test]
    fn noise_before_magic_is_discarded() {
        let mut input = vec![0x00, 0x13, 0xFF, 0x55];
        input.extend(wire(0x01, b"abc"));
        let mut port = LoopbackPort::with_input(&input);
        let mut decoder = FrameDecoder::new();

        assert_eq!(next_packet(&mut decoder, &mut port), (0x01, b"abc".to_vec()));
    }

    #[test]
    fn noise_only_leaves_decoder_idle() {
        let mut port = LoopbackPort::with_input(&[0x01, 0x02, 0x03]);
        let mut decoder = FrameDecoder::new();

        assert!(decoder.poll(&mut port).unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert!(port.pending().is_empty());
    }

    #[test]
    fn split_header_is_not_consumed_until_complete() {
        let bytes = wire(0x03, b"xyz");
        let mut port = LoopbackPort::with_input(&bytes[..3]);
        let mut decoder = FrameDecoder::new();

        assert!(decoder.poll(&mut port).unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::ReadingHeader);
        assert_eq!(port.pending(), &bytes[1..3]);

        port.push(&bytes[3..]);
        assert_eq!(next_packet(&mut decoder, &mut port), (0x03, b"xyz".to_vec()));
    }

    #[test]
    fn partial_payload_is_not_consumed() {
        let bytes = wire(0x01, b"0123456789");
        let mut port = LoopbackPort::with_input(&bytes[..9]);
        let mut decoder = FrameDecoder::new();

        assert!(decoder.poll(&mut port).unwrap().is_none());
        assert!(matches!(
            decoder.state(),
            DecoderState::ReadingPayload { header } if header.length == 10
        ));
        assert_eq!(port.pending().len(), 4);

        port.push(&bytes[9..]);
        assert_eq!(
            next_packet(&mut decoder, &mut port),
            (0x01, b"0123456789".to_vec())
        );
    }

    #[test]
    fn stops_after_first_completed_packet() {
        let mut input = wire(0x04, b"");
        input.extend(wire(0x05, b""));
        let mut port = LoopbackPort::with_input(&input);
        let mut decoder = FrameDecoder::new();

        assert_eq!(next_packet(&mut decoder, &mut port).0, 0x04);
        assert_eq!(port.pending().len(), 5);
        assert_eq!(next_packet(&mut decoder, &mut port).0, 0x05);
        assert!(decoder.poll(&mut port).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_rejected_and_decoder_recovers() {
        let mut input = vec![0xAA, 0x01, 0x01, 0x04, 0x00];
        input.extend(wire(0x02, b"ok"));
        let mut port = LoopbackPort::with_input(&input);
        let mut decoder = FrameDecoder::new();

        let err = decoder.poll(&mut port).unwrap_err();
        assert!(matches!(
            err,
            DebugError::FrameTooLarge {
                size: 1025,
                max: 1024
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);

        assert_eq!(next_packet(&mut decoder, &mut port), (0x02, b"ok".to_vec()));
    }

    #[test]
    fn max_u16_length_is_rejected() {
        let mut port = LoopbackPort::with_input(&[0xAA, 0x01, 0xFF, 0xFF, 0x00]);
        let mut decoder = FrameDecoder::new();

        let err = decoder.poll(&mut port).unwrap_err();
        assert!(matches!(err, DebugError::FrameTooLarge { size: 65535, .. }));
    }

    #[test]
    fn discard_policy_swallows_oversized_payload() {
        let config = DebugConfig {
            buffer_capacity: 4,
            oversize: OversizePolicy::Discard,
            ..DebugConfig::default()
        };
        let mut decoder = FrameDecoder::with_config(config);
        let mut port = LoopbackPort::with_input(&[0xAA, 0x01, 0x06, 0x00, 0x00, 0xAA, 0xAA]);

        let err = decoder.poll(&mut port).unwrap_err();
        assert!(matches!(err, DebugError::FrameTooLarge { size: 6, max: 4 }));

        assert!(decoder.poll(&mut port).unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::Discarding { remaining: 4 });

        let mut rest = vec![0xAA, 0xAA, 0xAA, 0xAA];
        rest.extend(wire(0x05, b""));
        port.push(&rest);
        assert_eq!(next_packet(&mut decoder, &mut port), (0x05, Vec::new()));
    }

    #[test]
    fn stalled_header_times_out() {
        let config = DebugConfig {
            max_partial_packet_age: Some(Duration::from_millis(100)),
            ..DebugConfig::default()
        };
        let mut decoder = FrameDecoder::with_config(config);
        let mut port = LoopbackPort::with_input(&[0xAA, 0x01]);
        let start = Instant::now();

        assert!(decoder.poll_at(&mut port, start).unwrap().is_none());
        assert!(decoder
            .poll_at(&mut port, start + Duration::from_millis(50))
            .unwrap()
            .is_none());

        let err = decoder
            .poll_at(&mut port, start + Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportStall {
                state: DecoderState::ReadingHeader,
                ..
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn stalled_payload_times_out() {
        let config = DebugConfig {
            max_partial_packet_age: Some(Duration::from_millis(100)),
            ..DebugConfig::default()
        };
        let mut decoder = FrameDecoder::with_config(config);
        let bytes = wire(0x02, b"late");
        let mut port = LoopbackPort::with_input(&bytes[..6]);
        let start = Instant::now();

        assert!(decoder.poll_at(&mut port, start).unwrap().is_none());
        assert!(matches!(
            decoder.state(),
            DecoderState::ReadingPayload { .. }
        ));

        let err = decoder
            .poll_at(&mut port, start + Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportStall {
                state: DecoderState::ReadingPayload { .. },
                ..
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(port.pending(), b"l");
    }

    #[test]
    fn stalled_discard_times_out() {
        let config = DebugConfig {
            buffer_capacity: 4,
            max_partial_packet_age: Some(Duration::from_millis(100)),
            oversize: OversizePolicy::Discard,
            ..DebugConfig::default()
        };
        let mut decoder = FrameDecoder::with_config(config);
        let mut port = LoopbackPort::with_input(&[0xAA, 0x01, 0x08, 0x00, 0x00, 0x10, 0x20]);
        let start = Instant::now();

        let err = decoder.poll_at(&mut port, start).unwrap_err();
        assert!(matches!(err, DebugError::FrameTooLarge { size: 8, max: 4 }));
        assert!(decoder.poll_at(&mut port, start).unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::Discarding { remaining: 6 });

        let err = decoder
            .poll_at(&mut port, start + Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportStall {
                state: DecoderState::Discarding { remaining: 6 },
                ..
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);

        port.push(&wire(0x04, b""));
        assert_eq!(next_packet(&mut decoder, &mut port), (0x04, Vec::new()));
    }

    #[test]
    fn late_payload_still_completes_when_it_arrives_in_time() {
        let config = DebugConfig {
            max_partial_packet_age: Some(Duration::from_millis(100)),
            ..DebugConfig::default()
        };
        let mut decoder = FrameDecoder::with_config(config);
        let bytes = wire(0x02, b"late");
        let mut port = LoopbackPort::with_input(&bytes[..6]);
        let start = Instant::now();

        assert!(decoder.poll_at(&mut port, start).unwrap().is_none());

        port.push(&bytes[6..]);
        let packet = decoder
            .poll_at(&mut port, start + Duration::from_millis(90))
            .unwrap()
            .unwrap();
        assert_eq!(packet.payload, b"late");
    }

    #[test]
    fn stall_timer_is_per_packet() {
        let config = DebugConfig {
            max_partial_packet_age: Some(Duration::from_millis(100)),
            ..DebugConfig::default()
        };
        let mut decoder = FrameDecoder::with_config(config);
        let mut port = LoopbackPort::with_input(&wire(0x04, b""));
        let start = Instant::now();

        assert!(decoder.poll_at(&mut port, start).unwrap().is_some());

        port.push(&[0xAA]);
        let later = start + Duration::from_secs(5);
        assert!(decoder.poll_at(&mut port, later).unwrap().is_none());
        assert!(decoder
            .poll_at(&mut port, later + Duration::from_millis(50))
            .unwrap()
            .is_none());
    }

    /// Claims more buffered bytes than it can hand over.
    struct OverpromisingPort {
        inner: LoopbackPort,
        claim: usize,
    }

    impl SerialPort for OverpromisingPort {
        fn bytes_available(&mut self) -> cardstock_serial::Result<usize> {
            Ok(self.claim.max(self.inner.pending().len()))
        }

        fn read_byte(&mut self) -> cardstock_serial::Result<u8> {
            self.inner.read_byte()
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> cardstock_serial::Result<usize> {
            self.inner.read_exact(buf)
        }

        fn write(&mut self, bytes: &[u8]) -> cardstock_serial::Result<()> {
            self.inner.write(bytes)
        }
    }

    #[test]
    fn short_payload_read_is_a_read_failure() {
        let mut port = OverpromisingPort {
            inner: LoopbackPort::with_input(&[0xAA, 0x01, 0x08, 0x00, 0x00, 1, 2, 3]),
            claim: 8,
        };
        let mut decoder = FrameDecoder::new();

        let err = decoder.poll(&mut port).unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportReadFailure {
                expected: 8,
                actual: 3
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);

        port.claim = 0;
        port.inner.push(&wire(0x05, b""));
        let packet = decoder.poll(&mut port).unwrap().unwrap();
        assert_eq!(packet.header.command, 0x05);
    }

    #[test]
    fn short_header_read_is_a_read_failure() {
        let mut port = OverpromisingPort {
            inner: LoopbackPort::with_input(&[0xAA, 0x01]),
            claim: 4,
        };
        let mut decoder = FrameDecoder::new();

        let err = decoder.poll(&mut port).unwrap_err();
        assert!(matches!(
            err,
            DebugError::TransportReadFailure {
                expected: 4,
                actual: 1
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn reset_drops_partial_packet() {
        let mut port = LoopbackPort::with_input(&[0xAA, 0x01, 0x10, 0x00, 0x00]);
        let mut decoder = FrameDecoder::new();

        assert!(decoder.poll(&mut port).unwrap().is_none());
        assert!(matches!(decoder.state(), DecoderState::ReadingPayload { .. }));

        decoder.reset();
        assert_eq!(decoder.state(), DecoderState::Idle);
    }
}
