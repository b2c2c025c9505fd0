use std::ops::RangeInclusive;

use cardstock_serial::SerialPort;
use tracing::{debug, info, warn};

use crate::codec::{compute_checksum, PacketRef, ACK_FRAME};
use crate::config::ChecksumPolicy;
use crate::error::{DebugError, Result};

/// Commands that only run while debug mode is enabled.
pub const ACTION_COMMANDS: RangeInclusive<u8> = 0x01..=0x03;

/// Turn debug mode on.
pub const CMD_ENABLE_DEBUG: u8 = 0x04;

/// Turn debug mode off.
pub const CMD_DISABLE_DEBUG: u8 = 0x05;

/// Result code for rejected, unknown and invalid packets.
pub const RESULT_REJECTED: u8 = 0x00;

/// A command byte, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// One of the gated actions, 0x01–0x03.
    Action(u8),
    EnableDebug,
    DisableDebug,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            c if ACTION_COMMANDS.contains(&c) => Command::Action(c),
            CMD_ENABLE_DEBUG => Command::EnableDebug,
            CMD_DISABLE_DEBUG => Command::DisableDebug,
            other => Command::Unknown(other),
        }
    }
}

impl Command {
    /// The wire code.
    pub fn code(self) -> u8 {
        match self {
            Command::Action(c) | Command::Unknown(c) => c,
            Command::EnableDebug => CMD_ENABLE_DEBUG,
            Command::DisableDebug => CMD_DISABLE_DEBUG,
        }
    }
}

/// What the dispatcher did with one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A gated action ran and reported `status`.
    Action { command: u8, status: u8 },
    /// A gated action arrived while debug mode was off.
    Rejected { command: u8 },
    /// Debug mode is now on; the ack was written.
    DebugEnabled,
    /// Debug mode is now off; the ack was written.
    DebugDisabled,
    /// No entry in the command table.
    Unknown { command: u8 },
    /// Checksum verification is on and the packet failed it.
    ChecksumMismatch { command: u8, expected: u8, actual: u8 },
}

impl Dispatch {
    /// The result byte reported to the host.
    pub fn code(&self) -> u8 {
        match self {
            Dispatch::Action { status, .. } => *status,
            Dispatch::DebugEnabled => CMD_ENABLE_DEBUG,
            Dispatch::DebugDisabled => CMD_DISABLE_DEBUG,
            Dispatch::Rejected { .. }
            | Dispatch::Unknown { .. }
            | Dispatch::ChecksumMismatch { .. } => RESULT_REJECTED,
        }
    }

    /// Command byte of the packet that produced this result.
    pub fn command(&self) -> u8 {
        match self {
            Dispatch::Action { command, .. }
            | Dispatch::Rejected { command }
            | Dispatch::Unknown { command }
            | Dispatch::ChecksumMismatch { command, .. } => *command,
            Dispatch::DebugEnabled => CMD_ENABLE_DEBUG,
            Dispatch::DebugDisabled => CMD_DISABLE_DEBUG,
        }
    }

    /// Short machine-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Dispatch::Action { .. } => "action",
            Dispatch::Rejected { .. } => "rejected",
            Dispatch::DebugEnabled => "debug_enabled",
            Dispatch::DebugDisabled => "debug_disabled",
            Dispatch::Unknown { .. } => "unknown",
            Dispatch::ChecksumMismatch { .. } => "checksum_mismatch",
        }
    }
}

/// Handler for one of the gated action commands.
///
/// Receives the packet payload and returns the status byte reported to the
/// host.
pub trait ActionHandler {
    fn run(&mut self, payload: &[u8]) -> u8;
}

impl<F> ActionHandler for F
where
    F: FnMut(&[u8]) -> u8,
{
    fn run(&mut self, payload: &[u8]) -> u8 {
        self(payload)
    }
}

type BoxedAction = Box<dyn ActionHandler + Send>;

/// Executes the command table against complete packets.
///
/// Owns the session's debug-mode flag. Gated actions without a registered
/// handler succeed with their own command code as status.
pub struct PacketDispatcher {
    debug_mode: bool,
    checksum: ChecksumPolicy,
    actions: [Option<BoxedAction>; 3],
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDispatcher {
    /// Dispatcher with debug mode off and checksums ignored.
    pub fn new() -> Self {
        Self::with_checksum_policy(ChecksumPolicy::default())
    }

    pub fn with_checksum_policy(checksum: ChecksumPolicy) -> Self {
        Self {
            debug_mode: false,
            checksum,
            actions: [None, None, None],
        }
    }

    /// Whether the gated actions are currently allowed.
    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Install the handler for a gated action (0x01–0x03), replacing any
    /// previous one.
    pub fn register_action<H>(&mut self, command: u8, handler: H) -> Result<()>
    where
        H: ActionHandler + Send + 'static,
    {
        let slot = action_slot(command).ok_or(DebugError::UnassignedCommand(command))?;
        self.actions[slot] = Some(Box::new(handler));
        Ok(())
    }

    /// Run one packet through the command table.
    ///
    /// The only transport traffic is the ack frame written by the debug-mode
    /// toggles, as a single write.
    pub fn dispatch<P: SerialPort + ?Sized>(
        &mut self,
        packet: PacketRef<'_>,
        port: &mut P,
    ) -> Result<Dispatch> {
        let header = packet.header;

        if self.checksum == ChecksumPolicy::Verify {
            let expected = compute_checksum(header.command, header.length, packet.payload);
            if expected != header.checksum {
                warn!(
                    command = header.command,
                    expected,
                    actual = header.checksum,
                    "checksum mismatch, packet ignored"
                );
                return Ok(Dispatch::ChecksumMismatch {
                    command: header.command,
                    expected,
                    actual: header.checksum,
                });
            }
        }

        let result = match Command::from(header.command) {
            Command::Action(command) if !self.debug_mode => {
                debug!(command, "action rejected: debug mode off");
                Dispatch::Rejected { command }
            }
            Command::Action(command) => {
                let status = match action_slot(command).and_then(|i| self.actions[i].as_mut()) {
                    Some(handler) => handler.run(packet.payload),
                    None => command,
                };
                debug!(command, status, "action executed");
                Dispatch::Action { command, status }
            }
            Command::EnableDebug => {
                self.debug_mode = true;
                info!("debug mode enabled");
                port.write(&ACK_FRAME)?;
                Dispatch::DebugEnabled
            }
            Command::DisableDebug => {
                self.debug_mode = false;
                info!("debug mode disabled");
                port.write(&ACK_FRAME)?;
                Dispatch::DebugDisabled
            }
            Command::Unknown(command) => {
                debug!(command, "unknown command ignored");
                Dispatch::Unknown { command }
            }
        };
        Ok(result)
    }
}

impl std::fmt::Debug for PacketDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<u8> = ACTION_COMMANDS
            .filter(|&c| action_slot(c).is_some_and(|i| self.actions[i].is_some()))
            .collect();
        f.debug_struct("PacketDispatcher")
            .field("debug_mode", &self.debug_mode)
            .field("checksum", &self.checksum)
            .field("registered_actions", &registered)
            .finish()
    }
}

fn action_slot(command: u8) -> Option<usize> {
    ACTION_COMMANDS
        .contains(&command)
        .then(|| usize::from(command - ACTION_COMMANDS.start()))
}
