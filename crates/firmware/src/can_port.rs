//! [`BusPort`] over the STM32's bxCAN peripheral.

use crate::configuration::BITRATE;
use defmt::*;
use embassy_stm32::can::{
    Can, Fifo, TryReadError, TryWriteError, enums::BusError, filter::Mask32,
    frame::Frame as CanFrame,
};
use embedded_can::{ExtendedId, Id};
use mbnet::{
    BusPort, Frame, FrameId, NodeAddress, PortError,
    frame::AcceptanceFilter,
    port::ReceiveChannels,
};

/// The CAN controller, seen through MBNet's port contract.
///
/// The controller's two receive FIFOs feed one stream of envelopes, so received frames are split into requests and
/// acknowledgements again by their acknowledgement flag.
pub struct CanPort {
    can: Can<'static>,
    channels: ReceiveChannels,
    faulted: bool,
}

impl CanPort {
    /// Wraps an enabled controller.
    pub fn new(can: Can<'static>) -> Self {
        Self {
            can,
            channels: ReceiveChannels::new(),
            faulted: false,
        }
    }

    /// Moves everything the controller received into the receive channels.
    fn drain(&mut self) {
        loop {
            match self.can.try_read() {
                Ok(envelope) => {
                    let Id::Extended(id) = envelope.frame.id() else {
                        trace!("Ignoring standard frame");
                        continue;
                    };
                    let frame = Frame::from_parts(FrameId::from_raw(id.as_raw()), envelope.frame.data());
                    self.channels.push(frame);
                }
                Err(TryReadError::Empty) => return,
                Err(TryReadError::BusError(err)) => {
                    if matches!(err, BusError::BusOff | BusError::BusPassive) {
                        warn!("CAN bus error: {}", err);
                        self.faulted = true;
                    } else {
                        debug!("CAN bus error: {}", err);
                    }
                    return;
                }
            }
        }
    }
}

impl BusPort for CanPort {
    fn init(&mut self) -> Result<(), PortError> {
        self.can.modify_config().set_bitrate(BITRATE);
        self.channels.clear();
        self.faulted = false;
        Ok(())
    }

    fn configure_filters(&mut self, node: NodeAddress) -> Result<(), PortError> {
        let mask = ExtendedId::new(AcceptanceFilter::MASK).ok_or(PortError::Hardware)?;
        let [requests, acknowledgements] = AcceptanceFilter::for_node(node);
        let requests = ExtendedId::new(requests.id()).ok_or(PortError::Hardware)?;
        let acknowledgements = ExtendedId::new(acknowledgements.id()).ok_or(PortError::Hardware)?;

        self.can
            .modify_filters()
            .clear()
            .enable_bank(0, Fifo::Fifo0, Mask32::frames_with_ext_id(requests, mask))
            .enable_bank(1, Fifo::Fifo1, Mask32::frames_with_ext_id(acknowledgements, mask));
        info!("CAN filters set for node {}", node);
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> Result<(), PortError> {
        if self.faulted {
            return Err(PortError::BusOff);
        }
        let can_frame =
            CanFrame::new_extended(frame.id.raw(), frame.payload.as_slice()).map_err(|_| PortError::Hardware)?;
        match self.can.try_write(&can_frame) {
            Ok(_) => Ok(()),
            Err(TryWriteError::Full) => Err(PortError::NoTransmitSlot),
        }
    }

    fn receive_request(&mut self) -> Option<Frame> {
        self.drain();
        self.channels.pop_request()
    }

    fn receive_acknowledge(&mut self) -> Option<Frame> {
        self.drain();
        self.channels.pop_acknowledge()
    }

    fn bus_faulted(&self) -> bool {
        self.faulted
    }
}
