//! Types describing who a node is on the bus: its [`NodeAddress`], the [`Role`] that address implies, the
//! [`MasterIndex`] masters are told apart by, and the [`NodeInfo`] record a node answers pings with.

use crate::error::Error;
use core::fmt;
use wmidi::U7;

/// The address of a node on the bus, a 7-bit value.
///
/// Internally this is a [`U7`], the same 7-bit type MIDI data bytes use, so an out-of-range address cannot be
/// represented at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddress(U7);

impl NodeAddress {
    /// The lowest address.
    pub const MIN: NodeAddress = NodeAddress::new_lossy(0x00);
    /// The highest address.
    pub const MAX: NodeAddress = NodeAddress::new_lossy(0x7f);

    /// Constructs a [`NodeAddress`], failing with [`Error::InvalidAddress`] if `raw` does not fit in 7 bits.
    pub fn new(raw: u8) -> Result<Self, Error> {
        U7::try_from(raw)
            .map(Self)
            .map_err(|_| Error::InvalidAddress(raw))
    }

    /// Constructs a [`NodeAddress`] from the low 7 bits of `raw`, discarding the most significant bit.
    pub const fn new_lossy(raw: u8) -> Self {
        Self(U7::from_u8_lossy(raw))
    }

    /// Returns the address as a plain byte.
    pub fn as_u8(self) -> u8 {
        u8::from(self.0)
    }

    /// Master-capable addresses have a low nibble of zero: 0x00, 0x10, ... 0x70.
    pub fn is_master(self) -> bool {
        self.as_u8() & 0x0f == 0
    }

    /// The [`Role`] implied by this address.
    pub fn role(self) -> Role {
        if self.is_master() {
            Role::Master
        } else {
            Role::Slave
        }
    }

    /// The master sub-index of a master-capable address, or `None` for slave-only addresses.
    pub fn master_index(self) -> Option<MasterIndex> {
        self.is_master()
            .then(|| MasterIndex::new_lossy(self.as_u8() >> 4))
    }
}

impl TryFrom<u8> for NodeAddress {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<NodeAddress> for u8 {
    fn from(address: NodeAddress) -> Self {
        address.as_u8()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.as_u8())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for NodeAddress {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=u8:#x}", self.as_u8());
    }
}

/// Whether a node may initiate transactions or only answer them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// May send requests, scan for slaves, and also answer requests from other masters.
    Master,
    /// Only answers requests.
    Slave,
}

/// Identifies one of the up to 8 masters sharing the bus, a 3-bit value.
///
/// Requests carry the sender's index so the slave knows where to address its acknowledgement, and so it can tell
/// masters apart when one of them holds a lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MasterIndex(u8);

impl MasterIndex {
    /// Number of distinct master sub-indices.
    pub const COUNT: u8 = 8;

    /// Constructs a [`MasterIndex`], returning `None` when `raw` does not fit in 3 bits.
    pub fn new(raw: u8) -> Option<Self> {
        (raw < Self::COUNT).then_some(Self(raw))
    }

    /// Constructs a [`MasterIndex`] from the low 3 bits of `raw`.
    pub const fn new_lossy(raw: u8) -> Self {
        Self(raw & 0x07)
    }

    /// Returns the index as a plain byte.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// The node address of the master with this index; acknowledgements are addressed to it.
    pub fn address(self) -> NodeAddress {
        NodeAddress::new_lossy(self.0 << 4)
    }
}

/// Number of bytes in an encoded [`NodeInfo`].
pub const NODE_INFO_LEN: usize = 8;

/// The self-description a node returns in its `Ping` acknowledgement.
///
/// It is never validated beyond its length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeInfo {
    /// Version of the MBNet protocol the node speaks.
    pub protocol_version: u8,
    /// Four ASCII characters naming the kind of node, e.g. `SEQM` for a sequencer.
    pub type_tag: [u8; 4],
    /// Application version.
    pub version: u8,
    /// Application subversion, kept in the byte order it was received in.
    pub subversion: [u8; 2],
}

impl NodeInfo {
    /// Constructs a [`NodeInfo`].
    pub const fn new(protocol_version: u8, type_tag: [u8; 4], version: u8, subversion: u16) -> Self {
        Self {
            protocol_version,
            type_tag,
            version,
            subversion: subversion.to_be_bytes(),
        }
    }

    /// Decodes a `Ping` reply payload; anything but exactly [`NODE_INFO_LEN`] bytes yields `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; NODE_INFO_LEN] = bytes.try_into().ok()?;
        Some(Self {
            protocol_version: bytes[0],
            type_tag: [bytes[1], bytes[2], bytes[3], bytes[4]],
            version: bytes[5],
            subversion: [bytes[6], bytes[7]],
        })
    }

    /// Encodes the record as a `Ping` reply payload.
    pub fn to_bytes(&self) -> [u8; NODE_INFO_LEN] {
        let [t0, t1, t2, t3] = self.type_tag;
        let [s0, s1] = self.subversion;
        [self.protocol_version, t0, t1, t2, t3, self.version, s0, s1]
    }

    /// The type tag as text, or `None` if it isn't valid UTF-8.
    pub fn type_tag_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.type_tag).ok()
    }

    /// The subversion bytes read most significant byte first.
    pub fn subversion(&self) -> u16 {
        u16::from_be_bytes(self.subversion)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{:04x} (protocol {})",
            self.type_tag_str().unwrap_or("????"),
            self.version,
            self.subversion(),
            self.protocol_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_addresses_above_seven_bits() {
        assert_eq!(
            Err(Error::InvalidAddress(0x80)),
            NodeAddress::new(0x80),
            "Expected left but got right"
        );
        assert_eq!(0x7f, NodeAddress::new(0x7f).unwrap().as_u8());
    }

    #[test]
    fn master_capable_addresses() {
        let masters = (0..=0x7f_u8)
            .map(NodeAddress::new_lossy)
            .filter(|address| address.is_master())
            .map(u8::from);
        assert!(
            masters.eq([0x00, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70]),
            "Only addresses with a low nibble of zero should be master-capable"
        );
    }

    #[test]
    fn role() {
        assert_eq!(Role::Master, NodeAddress::new_lossy(0x30).role());
        assert_eq!(Role::Slave, NodeAddress::new_lossy(0x35).role());
    }

    #[test]
    fn master_index_and_back() {
        let address = NodeAddress::new_lossy(0x50);
        let index = address.master_index().unwrap();
        assert_eq!(5, index.as_u8(), "Expected left but got right");
        assert_eq!(address, index.address(), "Expected left but got right");
        assert_eq!(None, NodeAddress::new_lossy(0x51).master_index());
    }

    #[test]
    fn master_index_bounds() {
        assert_eq!(None, MasterIndex::new(8));
        assert_eq!(Some(MasterIndex::new_lossy(7)), MasterIndex::new(7));
    }

    mod node_info {
        use super::*;

        #[test]
        fn decodes_ping_reply() {
            let info = NodeInfo::from_bytes(&[1, b'S', b'E', b'Q', b'M', 2, 0x00, 0x01]).unwrap();
            assert_eq!(
                NodeInfo::new(1, *b"SEQM", 2, 0x0001),
                info,
                "Expected left but got right"
            );
            assert_eq!(Some("SEQM"), info.type_tag_str());
            assert_eq!(0x0001, info.subversion());
        }

        #[test]
        fn only_length_is_validated() {
            assert_eq!(None, NodeInfo::from_bytes(&[1, 2, 3]));
            assert_eq!(None, NodeInfo::from_bytes(&[0; 9]));
            assert!(NodeInfo::from_bytes(&[0xff; 8]).is_some());
        }

        #[test]
        fn encodes_in_field_order() {
            let info = NodeInfo::new(1, *b"CORE", 3, 0x0102);
            assert_eq!(
                [1, b'C', b'O', b'R', b'E', 3, 0x01, 0x02],
                info.to_bytes(),
                "Expected left but got right"
            );
        }
    }
}
