use std::time::Duration;

use crate::codec::DEFAULT_BUFFER_CAPACITY;

/// Whether the header checksum byte is checked against the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// Parse the checksum but never compare it. Existing senders that leave
    /// the byte zeroed keep working.
    #[default]
    Ignore,
    /// Compare against [`compute_checksum`](crate::codec::compute_checksum);
    /// mismatching packets are answered with result `0x00` and not executed.
    Verify,
}

/// What the decoder does with the payload of a packet it rejected as too large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversizePolicy {
    /// Return to scanning for the magic byte right away.
    #[default]
    Resync,
    /// Silently swallow the declared number of payload bytes first.
    Discard,
}

/// Configuration for a debug session.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Receive buffer size in bytes. Default: 1024.
    pub buffer_capacity: usize,
    /// Abort a partial packet that has waited longer than this. Default: never.
    pub max_partial_packet_age: Option<Duration>,
    /// Checksum handling. Default: [`ChecksumPolicy::Ignore`].
    pub checksum: ChecksumPolicy,
    /// Oversized payload handling. Default: [`OversizePolicy::Resync`].
    pub oversize: OversizePolicy,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_partial_packet_age: None,
            checksum: ChecksumPolicy::default(),
            oversize: OversizePolicy::default(),
        }
    }
}
