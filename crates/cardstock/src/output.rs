use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use cardstock_debug::{Outcome, Packet};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One processed packet, or one aborted packet.
#[derive(Debug, Serialize)]
pub struct OutcomeRecord {
    pub seq: usize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub debug_mode: bool,
    pub acks_written: usize,
    pub timestamp: String,
}

impl OutcomeRecord {
    pub fn new(seq: usize, outcome: &Outcome, debug_mode: bool, acks_written: usize) -> Self {
        let mut record = Self {
            seq,
            status: "pending",
            result: None,
            command: None,
            code: None,
            error_kind: None,
            error: None,
            debug_mode,
            acks_written,
            timestamp: now_unix_seconds(),
        };
        match outcome {
            Outcome::Pending => {}
            Outcome::Completed(dispatch) => {
                record.status = "completed";
                record.result = Some(dispatch.name());
                record.command = Some(dispatch.command());
                record.code = Some(dispatch.code());
            }
            Outcome::Error(err) => {
                record.status = "error";
                record.error_kind = Some(err.kind());
                record.error = Some(err.to_string());
            }
        }
        record
    }

    fn detail(&self) -> String {
        match (&self.result, &self.error) {
            (_, Some(error)) => error.clone(),
            (Some(result), None) => result.to_string(),
            (None, None) => String::new(),
        }
    }
}

pub fn print_outcome(record: &OutcomeRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "STATUS", "COMMAND", "CODE", "DEBUG", "ACKS", "DETAIL"])
                .add_row(vec![
                    record.seq.to_string(),
                    record.status.to_string(),
                    hex_opt(record.command),
                    hex_opt(record.code),
                    record.debug_mode.to_string(),
                    record.acks_written.to_string(),
                    record.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "seq={} status={} command={} code={} debug={} acks={} {}",
                record.seq,
                record.status,
                hex_opt(record.command),
                hex_opt(record.code),
                record.debug_mode,
                record.acks_written,
                record.detail()
            );
        }
    }
}

#[derive(Debug, Serialize)]
struct PacketOutput<'a> {
    command: u8,
    command_name: &'a str,
    length: u16,
    checksum: u8,
    payload_hex: String,
    timestamp: String,
}

/// Print a packet received from a device (for example an ack).
pub fn print_packet(packet: &Packet, format: OutputFormat) {
    let out = PacketOutput {
        command: packet.header.command,
        command_name: command_name(packet.header.command),
        length: packet.header.length,
        checksum: packet.header.checksum,
        payload_hex: to_hex(&packet.payload),
        timestamp: now_unix_seconds(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "LENGTH", "CHECKSUM", "PAYLOAD"])
                .add_row(vec![
                    format!("0x{:02X} ({})", out.command, out.command_name),
                    out.length.to_string(),
                    format!("0x{:02X}", out.checksum),
                    out.payload_hex.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command=0x{:02X} ({}) length={} checksum=0x{:02X} payload={}",
                out.command, out.command_name, out.length, out.checksum, out.payload_hex
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn command_name(command: u8) -> &'static str {
    match command {
        0x01..=0x03 => "ACTION",
        0x04 => "ENABLE_DEBUG",
        0x05 => "DISABLE_DEBUG",
        0x06 => "ACK",
        _ => "UNKNOWN",
    }
}

/// Lowercase hex, space separated.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_opt(value: Option<u8>) -> String {
    value.map(|v| format!("0x{v:02X}")).unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use cardstock_debug::{DebugError, Dispatch};

    use super::*;

    #[test]
    fn record_for_completed_dispatch() {
        let outcome = Outcome::Completed(Dispatch::DebugEnabled);
        let record = OutcomeRecord::new(3, &outcome, true, 1);

        assert_eq!(record.status, "completed");
        assert_eq!(record.result, Some("debug_enabled"));
        assert_eq!(record.command, Some(0x04));
        assert_eq!(record.code, Some(0x04));
        assert_eq!(record.detail(), "debug_enabled");
    }

    #[test]
    fn record_for_error_carries_kind() {
        let outcome = Outcome::Error(DebugError::FrameTooLarge {
            size: 2000,
            max: 1024,
        });
        let record = OutcomeRecord::new(1, &outcome, false, 0);

        assert_eq!(record.status, "error");
        assert_eq!(record.error_kind, Some("frame_too_large"));
        assert!(record.detail().contains("2000"));

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("code").is_none());
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(to_hex(&[0xAA, 0x06, 0x00]), "aa 06 00");
        assert_eq!(to_hex(&[]), "");
        assert_eq!(hex_opt(None), "-");
        assert_eq!(hex_opt(Some(5)), "0x05");
    }
}
