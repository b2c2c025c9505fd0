use std::time::Instant;

use cardstock_serial::SerialPort;

use crate::config::DebugConfig;
use crate::decoder::{DecoderState, FrameDecoder};
use crate::dispatcher::{ActionHandler, Dispatch, PacketDispatcher};
use crate::error::{DebugError, Result};

/// Result of one [`DebugSession::process_once`] call.
#[derive(Debug)]
pub enum Outcome {
    /// No packet completed; call again later.
    Pending,
    /// A packet was decoded and dispatched.
    Completed(Dispatch),
    /// The packet in flight was aborted. The session is ready for the next one.
    Error(DebugError),
}

impl Outcome {
    /// Dispatch result byte, if a packet completed.
    pub fn code(&self) -> Option<u8> {
        match self {
            Outcome::Completed(dispatch) => Some(dispatch.code()),
            Outcome::Pending | Outcome::Error(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

/// One debug protocol session bound to one serial port.
///
/// The host calls [`process_once`](Self::process_once) once per main-loop
/// iteration. Each call drains what the port has buffered, stops at the
/// first completed packet, and never waits for more input.
#[derive(Debug)]
pub struct DebugSession<P> {
    port: P,
    decoder: FrameDecoder,
    dispatcher: PacketDispatcher,
}

impl<P: SerialPort> DebugSession<P> {
    /// Session with default configuration.
    pub fn new(port: P) -> Self {
        Self::with_config(port, DebugConfig::default())
    }

    /// Session with explicit configuration.
    pub fn with_config(port: P, config: DebugConfig) -> Self {
        let dispatcher = PacketDispatcher::with_checksum_policy(config.checksum);
        Self {
            port,
            decoder: FrameDecoder::with_config(config),
            dispatcher,
        }
    }

    /// Install the handler for one of the gated actions (0x01–0x03).
    pub fn register_action<H>(&mut self, command: u8, handler: H) -> Result<()>
    where
        H: ActionHandler + Send + 'static,
    {
        self.dispatcher.register_action(command, handler)
    }

    /// Decode and dispatch at most one packet.
    pub fn process_once(&mut self) -> Outcome {
        self.process_once_at(Instant::now())
    }

    /// [`process_once`](Self::process_once) with an explicit clock reading.
    pub fn process_once_at(&mut self, now: Instant) -> Outcome {
        let packet = match self.decoder.poll_at(&mut self.port, now) {
            Ok(Some(packet)) => packet,
            Ok(None) => return Outcome::Pending,
            Err(err) => return Outcome::Error(err),
        };

        match self.dispatcher.dispatch(packet, &mut self.port) {
            Ok(dispatch) => Outcome::Completed(dispatch),
            Err(err) => Outcome::Error(err),
        }
    }

    /// Process packets until the port runs dry.
    ///
    /// Stops early on a transport error or a short read, either of which
    /// would otherwise repeat on every call.
    pub fn process_available(&mut self) -> Vec<Outcome> {
        self.process_available_at(Instant::now())
    }

    /// [`process_available`](Self::process_available) with an explicit clock reading.
    pub fn process_available_at(&mut self, now: Instant) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.process_once_at(now) {
                Outcome::Pending => return outcomes,
                outcome @ Outcome::Error(
                    DebugError::Transport(_) | DebugError::TransportReadFailure { .. },
                ) => {
                    outcomes.push(outcome);
                    return outcomes;
                }
                outcome => outcomes.push(outcome),
            }
        }
    }

    /// Whether the gated actions are currently allowed.
    pub fn is_debug_mode(&self) -> bool {
        self.dispatcher.is_debug_mode()
    }

    /// Current decoder state.
    pub fn decoder_state(&self) -> DecoderState {
        self.decoder.state()
    }

    /// Current configuration.
    pub fn config(&self) -> &DebugConfig {
        self.decoder.config()
    }

    /// Borrow the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the port.
    pub fn into_port(self) -> P {
        self.port
    }
}
