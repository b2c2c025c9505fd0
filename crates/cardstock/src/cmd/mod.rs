use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use cardstock_debug::{ChecksumPolicy, DebugConfig, OversizePolicy, DEFAULT_BUFFER_CAPACITY};
use clap::{Args, Subcommand};

use crate::exit::{io_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod encode;
#[cfg(unix)]
pub mod listen;
pub mod replay;
#[cfg(unix)]
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a captured byte stream through a debug session.
    Replay(ReplayArgs),
    /// Encode one packet.
    Encode(EncodeArgs),
    /// Act as the device end of a socket serial line and print outcomes.
    #[cfg(unix)]
    Listen(ListenArgs),
    /// Send one packet to a listening device socket.
    #[cfg(unix)]
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Replay(args) => replay::run(args, format),
        Command::Encode(args) => encode::run(args),
        #[cfg(unix)]
        Command::Listen(args) => listen::run(args, format),
        #[cfg(unix)]
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Decoder and dispatcher settings shared by the session-running commands.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Receive buffer capacity in bytes.
    #[arg(long, env = "CARDSTOCK_BUFFER_CAPACITY", default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub buffer_capacity: usize,
    /// Abort a partial packet that waits longer than this (e.g. 2s, 500ms).
    #[arg(long, env = "CARDSTOCK_STALL_TIMEOUT")]
    pub stall_timeout: Option<String>,
    /// Ignore packets whose checksum byte does not match their contents.
    #[arg(long, env = "CARDSTOCK_VERIFY_CHECKSUM")]
    pub verify_checksum: bool,
    /// Swallow the payload of oversized packets instead of rescanning it.
    #[arg(long)]
    pub discard_oversized: bool,
}

impl SessionArgs {
    pub fn to_config(&self) -> CliResult<DebugConfig> {
        if self.buffer_capacity == 0 {
            return Err(CliError::usage("--buffer-capacity must be greater than zero"));
        }
        let max_partial_packet_age = self
            .stall_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        Ok(DebugConfig {
            buffer_capacity: self.buffer_capacity,
            max_partial_packet_age,
            checksum: if self.verify_checksum {
                ChecksumPolicy::Verify
            } else {
                ChecksumPolicy::Ignore
            },
            oversize: if self.discard_oversized {
                OversizePolicy::Discard
            } else {
                OversizePolicy::Resync
            },
        })
    }
}

/// Command byte and payload of a packet to build.
#[derive(Args, Debug)]
pub struct PacketArgs {
    /// Command byte (decimal or 0x-prefixed hex).
    #[arg(long, short = 'c', value_parser = parse_byte)]
    pub command: u8,
    /// Payload as a UTF-8 string.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Payload as hex digits (whitespace allowed).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
}

impl PacketArgs {
    pub fn payload(&self) -> CliResult<Vec<u8>> {
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(hex) = &self.hex {
            return parse_hex(hex);
        }
        if let Some(path) = &self.file {
            return fs::read(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
        }
        Ok(Vec::new())
    }
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Capture file holding the raw serial byte stream.
    pub file: PathBuf,
    /// Treat the capture file as hex text instead of raw bytes.
    #[arg(long)]
    pub hex_input: bool,
    /// Bytes delivered to the session per tick.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: u64,
    /// Simulated time between chunks, used for stall detection (e.g. 1ms).
    #[arg(long, default_value = "1ms")]
    pub chunk_interval: String,
    /// Exit with a data error if any packet was aborted.
    #[arg(long)]
    pub strict: bool,
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub packet: PacketArgs,
    /// Write raw bytes to stdout instead of hex text.
    #[arg(long)]
    pub raw: bool,
    /// Send a zero checksum byte, as senders that skip checksumming do.
    #[arg(long)]
    pub zero_checksum: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after N processed packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Delay between session ticks when no input is pending (e.g. 10ms).
    #[arg(long, default_value = "10ms")]
    pub tick: String,
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    #[command(flatten)]
    pub packet: PacketArgs,
    /// Wait for one response packet and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_byte(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse::<u8>(),
    };
    parsed.map_err(|_| format!("expected a byte (0-255 or 0x00-0xFF), got {input:?}"))
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::usage("hex input must have an even number of digits"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    CliError::usage(format!(
                        "invalid hex digits: {}",
                        String::from_utf8_lossy(pair)
                    ))
                })
        })
        .collect()
}
