//! Bookkeeping for the master's discovery sweep.
//!
//! Every address in the configured range has a [`ScanSlot`] in a fixed table indexed by address, and every slave that
//! answered has a [`SlaveRecord`] in a bounded list. The [`Scanner`] only decides which address to ping next and what
//! to remember about the outcome; the pinging itself is done by [`Engine::scan_step`](crate::engine::Engine::scan_step).

use crate::{
    configuration::ScanConfig,
    error::Error,
    frame::{PAYLOAD_CAPACITY, Payload},
    identity::{NodeAddress, NodeInfo},
};
use core::ops::RangeInclusive;
use tinyvec::ArrayVec;

/// The most slaves a master keeps records for.
pub const MAX_SLAVES: usize = 8;

const ADDRESS_COUNT: usize = 128;

/// Discovery progress for a single address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanSlot {
    /// Not answered yet; `retries` pings went unanswered so far.
    Unresolved {
        /// Unanswered pings so far.
        retries: u8,
    },
    /// A slave answered; its record is at this index of [`Scanner::records`].
    Resolved {
        /// Index into the record list.
        record: u8,
    },
    /// The address is considered empty and won't be pinged again until [`Scanner::reset`].
    Exhausted,
}

impl Default for ScanSlot {
    fn default() -> Self {
        ScanSlot::Unresolved { retries: 0 }
    }
}

/// What a master knows about a discovered slave.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlaveRecord {
    address: NodeAddress,
    reply: Payload,
}

impl SlaveRecord {
    /// The slave's address.
    pub fn address(&self) -> NodeAddress {
        self.address
    }

    /// The raw payload of the slave's last ping reply.
    pub fn reply(&self) -> &[u8] {
        self.reply.as_slice()
    }

    /// The slave's self-description.
    pub fn info(&self) -> Option<NodeInfo> {
        NodeInfo::from_bytes(self.reply())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SlaveRecord {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "SlaveRecord {{ address: {}, reply: {=[u8]:x} }}",
            self.address,
            self.reply()
        );
    }
}

/// Decides which address to ping next and remembers what answered.
#[derive(Clone, Debug)]
pub struct Scanner {
    range: RangeInclusive<NodeAddress>,
    max_retries: u8,
    own_address: Option<NodeAddress>,
    /// Last address handed out by [`Scanner::next_target`].
    cursor: Option<NodeAddress>,
    slots: [ScanSlot; ADDRESS_COUNT],
    records: ArrayVec<[SlaveRecord; MAX_SLAVES]>,
}

impl Scanner {
    /// Constructs a [`Scanner`] with every slot unresolved. Fails with [`Error::InvalidScanRange`] for an empty range
    /// and with [`Error::InvalidScanRetries`] when `max_retries` is zero.
    pub fn new(config: &ScanConfig) -> Result<Self, Error> {
        if config.range.is_empty() {
            return Err(Error::InvalidScanRange);
        }
        if config.max_retries == 0 {
            return Err(Error::InvalidScanRetries);
        }
        Ok(Self {
            range: config.range.clone(),
            max_retries: config.max_retries,
            own_address: None,
            cursor: None,
            slots: [ScanSlot::default(); ADDRESS_COUNT],
            records: ArrayVec::new(),
        })
    }

    /// Tells the scanner which address to skip.
    pub fn set_own_address(&mut self, address: NodeAddress) {
        self.own_address = Some(address);
    }

    /// The configured address range.
    pub fn range(&self) -> RangeInclusive<NodeAddress> {
        self.range.clone()
    }

    /// Advances to the next address that still needs a ping, wrapping around the range. Returns `None` once the scan
    /// is complete.
    pub fn next_target(&mut self) -> Option<NodeAddress> {
        let begin = usize::from(self.range.start().as_u8());
        let len = usize::from(self.range.end().as_u8()) + 1 - begin;
        let first = match self.cursor {
            Some(cursor) if self.range.contains(&cursor) => usize::from(cursor.as_u8()) + 1 - begin,
            _ => 0,
        };

        let target = (0..len)
            .map(|step| NodeAddress::new_lossy((begin + (first + step) % len) as u8))
            .find(|&address| self.is_pending(address))?;
        self.cursor = Some(target);
        Some(target)
    }

    /// Records a ping reply from `address`, replacing an earlier record for the same address.
    pub fn record_reply(&mut self, address: NodeAddress, reply: &[u8]) {
        if !self.range.contains(&address) {
            return;
        }
        let reply: Payload = reply.iter().copied().take(PAYLOAD_CAPACITY).collect();
        let slot = &mut self.slots[usize::from(address.as_u8())];

        if let ScanSlot::Resolved { record } = *slot {
            self.records[usize::from(record)].reply = reply;
            return;
        }
        if self.records.len() == MAX_SLAVES {
            warn!("No room to record slave {}, treating it as absent", address);
            *slot = ScanSlot::Exhausted;
            return;
        }
        *slot = ScanSlot::Resolved {
            record: self.records.len() as u8,
        };
        self.records.push(SlaveRecord { address, reply });
    }

    /// Records an unanswered ping to `address`.
    pub fn record_miss(&mut self, address: NodeAddress) {
        if !self.range.contains(&address) {
            return;
        }
        let max_retries = self.max_retries;
        let slot = &mut self.slots[usize::from(address.as_u8())];
        if let ScanSlot::Unresolved { retries } = *slot {
            let retries = retries.saturating_add(1);
            *slot = if retries >= max_retries {
                debug!("No slave at {} after {} pings", address, retries);
                ScanSlot::Exhausted
            } else {
                ScanSlot::Unresolved { retries }
            };
        }
    }

    /// Returns `true` once every address in range (other than this node's own) is resolved or exhausted.
    pub fn is_complete(&self) -> bool {
        self.addresses().all(|address| !self.is_pending(address))
    }

    /// Starts discovery over: every slot becomes unresolved and all records are dropped.
    pub fn reset(&mut self) {
        self.slots = [ScanSlot::default(); ADDRESS_COUNT];
        self.records.clear();
        self.cursor = None;
    }

    /// The slot for `address`, or `None` if it lies outside the range.
    pub fn slot(&self, address: NodeAddress) -> Option<ScanSlot> {
        self.range
            .contains(&address)
            .then(|| self.slots[usize::from(address.as_u8())])
    }

    /// Every address in range with its slot, in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = (NodeAddress, ScanSlot)> + '_ {
        self.addresses()
            .map(|address| (address, self.slots[usize::from(address.as_u8())]))
    }

    /// The records of all discovered slaves, in the order they were found.
    pub fn records(&self) -> impl Iterator<Item = &SlaveRecord> {
        self.records.iter()
    }

    /// The record of the slave at `address`, if it was discovered.
    pub fn record(&self, address: NodeAddress) -> Option<&SlaveRecord> {
        match self.slot(address)? {
            ScanSlot::Resolved { record } => self.records.get(usize::from(record)),
            _ => None,
        }
    }

    fn addresses(&self) -> impl Iterator<Item = NodeAddress> {
        (self.range.start().as_u8()..=self.range.end().as_u8()).map(NodeAddress::new_lossy)
    }

    fn is_pending(&self, address: NodeAddress) -> bool {
        if self.own_address == Some(address) {
            return false;
        }
        match self.slots[usize::from(address.as_u8())] {
            ScanSlot::Unresolved { retries } => retries < self.max_retries,
            _ => false,
        }
    }
}
