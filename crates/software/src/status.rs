//! A human-readable snapshot of a node, for an operator console or a periodic log line.

use crate::{
    discovery::{ScanSlot, Scanner},
    health::HealthState,
    identity::{MasterIndex, NodeAddress, Role},
};
use core::fmt;

/// Status of one node, as returned by [`Engine::status`](crate::engine::Engine::status).
///
/// Renders as a few summary lines followed, on a master, by one line per address in the scan range.
pub struct StatusReport<'a> {
    address: Option<NodeAddress>,
    health: HealthState,
    locked_by: Option<MasterIndex>,
    scanner: &'a Scanner,
}

impl<'a> StatusReport<'a> {
    pub(crate) fn new(
        address: Option<NodeAddress>,
        health: HealthState,
        locked_by: Option<MasterIndex>,
        scanner: &'a Scanner,
    ) -> Self {
        Self {
            address,
            health,
            locked_by,
            scanner,
        }
    }

    /// This node's address, if configured.
    pub fn address(&self) -> Option<NodeAddress> {
        self.address
    }

    /// Bus health at the time of the snapshot.
    pub fn health(&self) -> HealthState {
        self.health
    }

    /// Returns `true` if discovery has settled every address in range.
    pub fn scan_complete(&self) -> bool {
        self.scanner.is_complete()
    }
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(address) = self.address else {
            writeln!(f, "MBNet node: address not configured")?;
            return writeln!(f, "Bus: {}", self.health);
        };
        let role = match address.role() {
            Role::Master => "master",
            Role::Slave => "slave",
        };
        writeln!(f, "MBNet node {address} ({role})")?;
        writeln!(f, "Bus: {}", self.health)?;
        match self.locked_by {
            Some(owner) => writeln!(f, "Locked by master {}", owner.address())?,
            None => writeln!(f, "Not locked")?,
        }
        if address.role() == Role::Slave {
            return Ok(());
        }

        let range = self.scanner.range();
        writeln!(
            f,
            "Scan {}..={}: {}",
            range.start(),
            range.end(),
            if self.scanner.is_complete() {
                "complete"
            } else {
                "in progress"
            }
        )?;
        for (slot_address, slot) in self.scanner.slots() {
            write!(f, "  {slot_address}: ")?;
            if slot_address == address {
                writeln!(f, "this node")?;
                continue;
            }
            match slot {
                ScanSlot::Resolved { .. } => match self.scanner.record(slot_address).and_then(|record| record.info()) {
                    Some(info) => writeln!(f, "found, {info}")?,
                    None => writeln!(f, "found")?,
                },
                ScanSlot::Exhausted => writeln!(f, "not found")?,
                ScanSlot::Unresolved { retries } => writeln!(f, "pending ({retries} pings)")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ScanConfig;
    use std::string::ToString;

    fn scanner() -> Scanner {
        let mut scanner = Scanner::new(&ScanConfig {
            range: NodeAddress::new_lossy(0x00)..=NodeAddress::new_lossy(0x03),
            max_retries: 2,
            ping_poll_limit: 1,
        })
        .unwrap();
        scanner.set_own_address(NodeAddress::new_lossy(0x00));
        scanner
    }

    #[test]
    fn master_lists_every_slot() {
        let mut scanner = scanner();
        scanner.record_reply(NodeAddress::new_lossy(0x01), &[1, b'S', b'E', b'Q', b'M', 2, 0x00, 0x01]);
        scanner.record_miss(NodeAddress::new_lossy(0x02));
        scanner.record_miss(NodeAddress::new_lossy(0x02));
        scanner.record_miss(NodeAddress::new_lossy(0x03));

        let report = StatusReport::new(
            Some(NodeAddress::new_lossy(0x00)),
            HealthState::Panic,
            None,
            &scanner,
        );
        let expected = "\
MBNet node 0x00 (master)
Bus: panic
Not locked
Scan 0x00..=0x03: in progress
  0x00: this node
  0x01: found, SEQM v2.0001 (protocol 1)
  0x02: not found
  0x03: pending (1 pings)
";
        assert_eq!(expected, report.to_string(), "Expected left but got right");
    }

    #[test]
    fn slave_omits_scan() {
        let scanner = scanner();
        let report = StatusReport::new(
            Some(NodeAddress::new_lossy(0x05)),
            HealthState::Healthy,
            Some(MasterIndex::new_lossy(2)),
            &scanner,
        );
        assert_eq!(
            "MBNet node 0x05 (slave)\nBus: healthy\nLocked by master 0x20\n",
            report.to_string()
        );
    }

    #[test]
    fn unconfigured() {
        let scanner = scanner();
        let report = StatusReport::new(None, HealthState::Healthy, None, &scanner);
        assert_eq!(
            "MBNet node: address not configured\nBus: healthy\n",
            report.to_string()
        );
    }
}
