//! The contract between the engine and the bus controller driver.
//!
//! A port moves raw [`Frame`]s on and off the wire and exposes two independent, non-blocking, FIFO-ordered receive
//! channels: requests addressed to this node and acknowledgements addressed to this node. Everything else (arbitration,
//! bit timing, error counters) stays behind the trait.

use crate::{frame::Frame, identity::NodeAddress};
use core::fmt;
use tinyvec::ArrayVec;

/// Failures reported by a [`BusPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// Every transmit mailbox is occupied.
    NoTransmitSlot,
    /// The controller has left the bus after too many errors.
    BusOff,
    /// Any other controller failure.
    Hardware,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::NoTransmitSlot => write!(f, "no free transmit slot"),
            PortError::BusOff => write!(f, "controller is bus-off"),
            PortError::Hardware => write!(f, "controller failure"),
        }
    }
}

/// Hardware abstraction over a bus controller.
///
/// Implementations never block: a receive call with nothing pending returns `None`, and a send that cannot be queued
/// fails.
pub trait BusPort {
    /// Brings the controller (back) into a working state and discards anything pending.
    fn init(&mut self) -> Result<(), PortError>;

    /// Programs the acceptance filters so that only requests and acknowledgements addressed to `node` are received;
    /// see [`AcceptanceFilter::for_node`](crate::frame::AcceptanceFilter::for_node).
    fn configure_filters(&mut self, node: NodeAddress) -> Result<(), PortError>;

    /// Queues a frame for transmission.
    fn send(&mut self, frame: &Frame) -> Result<(), PortError>;

    /// Takes the oldest pending request, if any.
    fn receive_request(&mut self) -> Option<Frame>;

    /// Takes the oldest pending acknowledgement, if any.
    fn receive_acknowledge(&mut self) -> Option<Frame>;

    /// Returns `true` while the controller reports a bus fault.
    fn bus_faulted(&self) -> bool;
}

/// How many frames each of the [`ReceiveChannels`] holds.
pub const CHANNEL_DEPTH: usize = 16;

/// Splits a single stream of received frames into the request and acknowledgement channels a [`BusPort`] exposes.
///
/// Useful for controllers whose receive path does not keep the two directions apart. Both channels are bounded; a
/// frame arriving at a full channel is dropped and counted.
#[derive(Clone, Debug, Default)]
pub struct ReceiveChannels {
    requests: ArrayVec<[Frame; CHANNEL_DEPTH]>,
    acknowledgements: ArrayVec<[Frame; CHANNEL_DEPTH]>,
    dropped: u32,
}

impl ReceiveChannels {
    /// Constructs empty channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes a frame to the channel matching its acknowledgement flag. Returns `false` if it had to be dropped.
    pub fn push(&mut self, frame: Frame) -> bool {
        let channel = if frame.id.is_acknowledge() {
            &mut self.acknowledgements
        } else {
            &mut self.requests
        };
        if channel.try_push(frame).is_some() {
            self.dropped = self.dropped.saturating_add(1);
            warn!("Receive channel full, dropping {}", frame);
            return false;
        }
        true
    }

    /// Takes the oldest request.
    pub fn pop_request(&mut self) -> Option<Frame> {
        Self::pop_front(&mut self.requests)
    }

    /// Takes the oldest acknowledgement.
    pub fn pop_acknowledge(&mut self) -> Option<Frame> {
        Self::pop_front(&mut self.acknowledgements)
    }

    /// Discards everything pending.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.acknowledgements.clear();
    }

    /// Number of frames dropped because a channel was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    fn pop_front(channel: &mut ArrayVec<[Frame; CHANNEL_DEPTH]>) -> Option<Frame> {
        (!channel.is_empty()).then(|| channel.remove(0))
    }
}
