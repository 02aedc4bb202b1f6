//! Packs MBNet addressing fields into a 29-bit extended CAN identifier and unpacks them again.
//!
//! From most to least significant bit the identifier reads `control` (16 bits), service code (2), master sub-index
//! (3), target node (7) and the acknowledgement flag (1). The payload is at most 8 bytes and its length travels out of
//! band as the frame's data length. There is no checksum or escaping at this layer; integrity is left to the bus.

use crate::{
    error::Error,
    identity::{MasterIndex, NodeAddress},
};
use core::ops::RangeInclusive;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tinyvec::ArrayVec;

/// The most bytes a single frame can carry.
pub const PAYLOAD_CAPACITY: usize = 8;

/// Opaque frame payload of up to [`PAYLOAD_CAPACITY`] bytes.
pub type Payload = ArrayVec<[u8; PAYLOAD_CAPACITY]>;

const ACK_SHIFT: u32 = 0;
const NODE_SHIFT: u32 = 1;
const MASTER_SHIFT: u32 = 8;
const SERVICE_SHIFT: u32 = 11;
const CONTROL_SHIFT: u32 = 13;

/// Mask of the 29 significant identifier bits.
pub const ID_MASK: u32 = 0x1fff_ffff;

/// Operation requested of a slave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestService {
    /// In-band commands such as lock and unlock; the sub-command sits in the low byte of `control`.
    Special = 0,
    /// Read from the slave's memory at the offset given in `control`.
    MemoryRead = 1,
    /// Write the payload to the slave's memory at the offset given in `control`.
    MemoryWrite = 2,
    /// Ask the slave to describe itself; answered with a [`NodeInfo`](crate::identity::NodeInfo).
    Ping = 3,
}

impl RequestService {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Special,
            1 => Self::MemoryRead,
            2 => Self::MemoryWrite,
            _ => Self::Ping,
        }
    }
}

/// How a slave answered a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckService {
    /// The request was carried out.
    Ok = 0,
    /// The request was carried out and the payload holds the data read.
    Read = 1,
    /// The slave is locked by another master; send the same request again.
    Retry = 2,
    /// The request was rejected.
    Error = 3,
}

impl AckService {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Ok,
            1 => Self::Read,
            2 => Self::Retry,
            _ => Self::Error,
        }
    }
}

/// The 2-bit service code of a frame, whose meaning depends on the acknowledgement flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Service {
    /// The frame is a request (acknowledgement flag clear).
    Request(RequestService),
    /// The frame is an acknowledgement (acknowledgement flag set).
    Acknowledge(AckService),
}

impl Service {
    /// Returns `true` for acknowledgements.
    pub fn is_acknowledge(&self) -> bool {
        matches!(self, Service::Acknowledge(_))
    }

    fn bits(&self) -> u32 {
        match *self {
            Service::Request(service) => service as u32,
            Service::Acknowledge(service) => service as u32,
        }
    }
}

/// Sub-commands of [`RequestService::Special`] implemented by the engine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpecialCommand {
    /// Grants the sending master exclusive access to the slave.
    Lock = 0x00,
    /// Releases exclusive access.
    Unlock = 0x01,
}

/// Special sub-command codes reserved for the protocol layer but not implemented by it.
pub const RESERVED_SPECIAL_CODES: RangeInclusive<u8> = 0x02..=0x0f;

/// A [`RequestService::Special`] request, classified by the low byte of its `control` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Special {
    /// A sub-command the engine handles on its own.
    Command(SpecialCommand),
    /// A reserved code the engine rejects.
    Reserved(u8),
    /// Anything else, left to the application.
    Extension(u8),
}

impl Special {
    /// Classifies a special request by the low byte of its `control` field.
    pub fn classify(control: u16) -> Self {
        let code = (control & 0xff) as u8;
        match SpecialCommand::from_u8(code) {
            Some(command) => Special::Command(command),
            None if RESERVED_SPECIAL_CODES.contains(&code) => Special::Reserved(code),
            None => Special::Extension(code),
        }
    }
}

/// The addressing fields carried by a frame identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    /// Request-specific data, e.g. a memory offset; opaque to the engine except for special requests and
    /// acknowledgements.
    pub control: u16,
    /// The service code, which also determines the acknowledgement flag.
    pub service: Service,
    /// The master that sent the request, or the master an acknowledgement answers.
    pub master: MasterIndex,
    /// The node the frame is delivered to.
    pub target: NodeAddress,
}

impl FrameHeader {
    /// Header of a request from `master` to `slave`.
    pub fn request(
        master: MasterIndex,
        slave: NodeAddress,
        service: RequestService,
        control: u16,
    ) -> Self {
        Self {
            control,
            service: Service::Request(service),
            master,
            target: slave,
        }
    }

    /// Header of an acknowledgement from `source` to `master`.
    ///
    /// The acknowledgement is addressed to the master's own node address so that the master's acceptance filter lets
    /// it through. The low 7 bits of `control` name the acknowledging node, which is how a master tells replies from
    /// different slaves apart.
    pub fn acknowledge(master: MasterIndex, source: NodeAddress, service: AckService) -> Self {
        Self {
            control: u16::from(source.as_u8()),
            service: Service::Acknowledge(service),
            master,
            target: master.address(),
        }
    }

    /// Returns `true` for acknowledgements.
    pub fn is_acknowledge(&self) -> bool {
        self.service.is_acknowledge()
    }

    /// The node that sent an acknowledgement. Meaningless for requests.
    pub fn source(&self) -> NodeAddress {
        NodeAddress::new_lossy(self.control as u8)
    }

    /// Packs the header into a frame identifier.
    pub fn encode(&self) -> FrameId {
        let raw = u32::from(self.control) << CONTROL_SHIFT
            | self.service.bits() << SERVICE_SHIFT
            | u32::from(self.master.as_u8()) << MASTER_SHIFT
            | u32::from(self.target.as_u8()) << NODE_SHIFT
            | u32::from(self.is_acknowledge()) << ACK_SHIFT;
        FrameId(raw)
    }
}

/// A 29-bit extended frame identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameId(u32);

impl FrameId {
    /// Wraps a raw identifier, ignoring anything above bit 28.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & ID_MASK)
    }

    /// The raw 29-bit identifier.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` if the acknowledgement flag is set.
    pub const fn is_acknowledge(self) -> bool {
        (self.0 >> ACK_SHIFT) & 1 == 1
    }

    /// The node the frame is addressed to.
    pub const fn target(self) -> NodeAddress {
        NodeAddress::new_lossy((self.0 >> NODE_SHIFT) as u8)
    }

    /// Unpacks the identifier into its addressing fields.
    pub fn decode(self) -> FrameHeader {
        let service_bits = ((self.0 >> SERVICE_SHIFT) & 0b11) as u8;
        let service = if self.is_acknowledge() {
            Service::Acknowledge(AckService::from_bits(service_bits))
        } else {
            Service::Request(RequestService::from_bits(service_bits))
        };
        FrameHeader {
            control: (self.0 >> CONTROL_SHIFT) as u16,
            service,
            master: MasterIndex::new_lossy((self.0 >> MASTER_SHIFT) as u8),
            target: self.target(),
        }
    }
}

/// The unit of bus transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    /// The frame identifier.
    pub id: FrameId,
    /// Up to 8 payload bytes.
    pub payload: Payload,
}

impl Frame {
    /// Builds a frame, failing with [`Error::PayloadTooLong`] if `payload` exceeds [`PAYLOAD_CAPACITY`].
    pub fn new(header: &FrameHeader, payload: &[u8]) -> Result<Self, Error> {
        if payload.len() > PAYLOAD_CAPACITY {
            return Err(Error::PayloadTooLong(payload.len()));
        }
        Ok(Self::from_parts(header.encode(), payload))
    }

    /// Builds a frame from a received identifier and data, keeping at most [`PAYLOAD_CAPACITY`] bytes.
    pub fn from_parts(id: FrameId, data: &[u8]) -> Self {
        Self {
            id,
            payload: data.iter().copied().take(PAYLOAD_CAPACITY).collect(),
        }
    }

    /// Decodes the addressing fields.
    pub fn header(&self) -> FrameHeader {
        self.id.decode()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Frame {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Frame {{ id: {=u32:#x}, data: {=[u8]:x} }}",
            self.id.raw(),
            self.payload.as_slice()
        );
    }
}

/// One acceptance filter of a bus controller: the frames for a single target node and direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcceptanceFilter {
    /// The node whose frames pass.
    pub node: NodeAddress,
    /// `true` to pass acknowledgements, `false` to pass requests.
    pub acknowledge: bool,
}

impl AcceptanceFilter {
    /// The identifier bits the filter compares: the target node and the acknowledgement flag.
    pub const MASK: u32 = 0xff;

    /// The two filters a node needs: its requests, then its acknowledgements.
    pub fn for_node(node: NodeAddress) -> [AcceptanceFilter; 2] {
        [
            AcceptanceFilter {
                node,
                acknowledge: false,
            },
            AcceptanceFilter {
                node,
                acknowledge: true,
            },
        ]
    }

    /// The identifier value the masked bits must equal.
    pub fn id(&self) -> u32 {
        u32::from(self.node.as_u8()) << NODE_SHIFT | u32::from(self.acknowledge) << ACK_SHIFT
    }

    /// Returns `true` if a frame with this identifier passes the filter.
    pub fn accepts(&self, id: FrameId) -> bool {
        id.raw() & Self::MASK == self.id()
    }
}
