//! Tunable limits of the engine. The defaults match bus transactions in the microsecond-to-millisecond range.

use crate::identity::NodeAddress;
use core::ops::RangeInclusive;

/// Settings for an [`Engine`](crate::engine::Engine).
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// How many empty polls of the acknowledgement channel a blocking wait tolerates before giving up with
    /// [`Error::Timeout`](crate::error::Error::Timeout). This is an iteration count, not a duration, so that the
    /// worst case is the same whether the engine runs in a task or next to an interrupt handler.
    pub ack_poll_limit: u32,
    /// How many times a blocking wait replays a request the slave answered with `Retry` before giving up with
    /// [`Error::Retry`](crate::error::Error::Retry).
    pub retry_limit: u8,
    /// Discovery settings.
    pub scan: ScanConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ack_poll_limit: 10_000,
            retry_limit: 16,
            scan: ScanConfig::default(),
        }
    }
}

/// Settings for slave discovery.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanConfig {
    /// The addresses to ping, inclusive on both ends.
    pub range: RangeInclusive<NodeAddress>,
    /// How many unanswered pings make an address count as empty.
    pub max_retries: u8,
    /// Poll budget for a single ping, usually much smaller than [`EngineConfig::ack_poll_limit`] so that one scan step
    /// stays short.
    pub ping_poll_limit: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            range: NodeAddress::MIN..=NodeAddress::MAX,
            max_retries: 32,
            ping_poll_limit: 1_000,
        }
    }
}
