//! Compile-time settings for this node. Every board on a bus is flashed with its own [`NODE_ADDRESS`].

use core::ops::RangeInclusive;
use embassy_time::Duration;
use mbnet::{EngineConfig, NodeAddress, NodeInfo, ScanConfig};

/// This node's bus address. A low nibble of zero makes the node a master, which scans the bus for slaves.
pub const NODE_ADDRESS: u8 = 0x10;

/// CAN bitrate shared by every node on the bus.
pub const BITRATE: u32 = 1_000_000;

/// What this node answers pings with.
pub const NODE_INFO: NodeInfo = NodeInfo::new(1, *b"CORE", 1, 0x0000);

/// Addresses a master looks for slaves at.
pub const SCAN_RANGE: RangeInclusive<NodeAddress> = NodeAddress::MIN..=NodeAddress::MAX;

/// How often the engine's periodic handler runs: answering requests and, on a master, pinging one address.
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

/// How often the status report is logged.
pub const STATUS_PERIOD: Duration = Duration::from_secs(10);

/// How fast the health LED blinks while the bus is in panic.
pub const PANIC_BLINK_PERIOD: Duration = Duration::from_millis(250);

/// Polls a scan ping waits for its answer. A poll of the CAN FIFOs takes about a microsecond, and a slave only answers
/// from its own handler every [`TICK_PERIOD`], so this has to span several ticks or live slaves get counted as misses.
pub const PING_POLL_LIMIT: u32 = 5_000;

/// Engine settings; anything not set here keeps the library's defaults.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        scan: ScanConfig {
            range: SCAN_RANGE,
            ping_poll_limit: PING_POLL_LIMIT,
            ..ScanConfig::default()
        },
        ..EngineConfig::default()
    }
}
