use super::{Engine, RetainedRequest};
use crate::{
    error::Error,
    frame::{AckService, Frame, FrameHeader, Payload, RequestService, Service, SpecialCommand},
    identity::{NodeAddress, NodeInfo},
    port::BusPort,
};

/// An acknowledgement matched to the request it answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acknowledge {
    /// The slave that answered.
    pub slave: NodeAddress,
    /// How it answered. Never [`AckService::Retry`]; that is reported as [`AckPoll::Retry`] instead.
    pub service: AckService,
    /// Data returned by the slave, e.g. memory contents or a [`NodeInfo`].
    pub payload: Payload,
}

impl Acknowledge {
    /// Returns `true` if the slave carried out the request.
    pub fn is_success(&self) -> bool {
        matches!(self.service, AckService::Ok | AckService::Read)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Acknowledge {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Acknowledge {{ slave: {}, service: {}, payload: {=[u8]:x} }}",
            self.slave,
            self.service,
            self.payload.as_slice()
        );
    }
}

/// Outcome of a single non-blocking look at the acknowledgement channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckPoll {
    /// The expected slave answered.
    Received(Acknowledge),
    /// The expected slave is locked by another master; the request should be sent again.
    Retry,
    /// Nothing from the expected slave yet.
    Pending,
}

impl<P: BusPort> Engine<P> {
    /// Sends a request to `slave` and retains the exact frame for [`Engine::send_request_again`].
    ///
    /// The bus is checked (and recovered if it reports a fault) before anything is sent. Nothing is retained if the
    /// port refuses the frame; retrying a [`Error::Transmit`] is up to the caller.
    pub fn send_request(
        &mut self,
        slave: NodeAddress,
        service: RequestService,
        control: u16,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.health.ensure_usable()?;
        let master = self.master_index()?;
        let frame = Frame::new(
            &FrameHeader::request(master, slave, service, control),
            payload,
        )?;
        self.check_bus()?;

        self.port.send(&frame).map_err(|err| {
            warn!("Failed to send {} to {}: {}", service, slave, err);
            Error::Transmit(err)
        })?;
        trace!("Sent {} to {}, control {=u16:#x}", service, slave, control);
        self.last_request = Some(RetainedRequest { slave, frame });
        Ok(())
    }

    /// Retransmits the last request exactly as it was first sent.
    pub fn send_request_again(&mut self) -> Result<(), Error> {
        self.health.ensure_usable()?;
        let retained = self.last_request.ok_or(Error::NothingToReplay)?;
        self.port.send(&retained.frame).map_err(|err| {
            warn!("Failed to resend request to {}: {}", retained.slave, err);
            Error::Transmit(err)
        })
    }

    /// The slave and frame of the last request sent, if any.
    pub fn last_request(&self) -> Option<(NodeAddress, &Frame)> {
        self.last_request
            .as_ref()
            .map(|retained| (retained.slave, &retained.frame))
    }

    /// Looks at the acknowledgement channel once, without waiting.
    ///
    /// Acknowledgements meant for another master sub-index, or sent by a node other than `slave`, are late or stray
    /// replies from other transactions: they are logged and dropped. Any acknowledgement addressed to this master
    /// proves the bus works and resolves a [`Panic`](crate::health::HealthState::Panic).
    pub fn poll_acknowledge(&mut self, slave: NodeAddress) -> Result<AckPoll, Error> {
        self.health.ensure_usable()?;
        let master = self.master_index()?;

        while let Some(frame) = self.port.receive_acknowledge() {
            let header = frame.header();
            let Service::Acknowledge(service) = header.service else {
                warn!("Discarding request on the acknowledgement channel: {}", frame);
                continue;
            };
            if header.master != master {
                debug!("Discarding acknowledgement for master {}", header.master.as_u8());
                continue;
            }
            self.health.record_acknowledge();
            if header.source() != slave {
                debug!(
                    "Discarding acknowledgement from {} while waiting for {}",
                    header.source(),
                    slave
                );
                continue;
            }

            return Ok(match service {
                AckService::Retry => AckPoll::Retry,
                service => AckPoll::Received(Acknowledge {
                    slave,
                    service,
                    payload: frame.payload,
                }),
            });
        }
        Ok(AckPoll::Pending)
    }

    /// Waits for `slave` to acknowledge the last request, within [`EngineConfig::ack_poll_limit`] polls.
    ///
    /// [`EngineConfig::ack_poll_limit`]: crate::configuration::EngineConfig::ack_poll_limit
    pub fn wait_acknowledge(&mut self, slave: NodeAddress) -> Result<Acknowledge, Error> {
        self.wait_acknowledge_within(slave, self.config.ack_poll_limit)
    }

    /// Spins on [`Engine::poll_acknowledge`] until `slave` answers or `poll_limit` consecutive polls come up empty.
    ///
    /// A `Retry` answer replays the retained request verbatim and restarts the poll budget. After
    /// [`EngineConfig::retry_limit`](crate::configuration::EngineConfig::retry_limit) replays the slave is given up on
    /// with [`Error::Retry`].
    pub fn wait_acknowledge_within(
        &mut self,
        slave: NodeAddress,
        poll_limit: u32,
    ) -> Result<Acknowledge, Error> {
        let mut polls: u32 = 0;
        let mut replays: u8 = 0;
        loop {
            match self.poll_acknowledge(slave)? {
                AckPoll::Received(ack) => return Ok(ack),
                AckPoll::Retry => {
                    if replays >= self.config.retry_limit {
                        warn!("{} stayed locked after {} replays", slave, replays);
                        return Err(Error::Retry);
                    }
                    replays += 1;
                    debug!("{} is locked, replaying request ({})", slave, replays);
                    self.send_request_again()?;
                    polls = 0;
                }
                AckPoll::Pending => {
                    polls = polls.saturating_add(1);
                    if polls >= poll_limit {
                        debug!("No acknowledgement from {} after {} polls", slave, polls);
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Sends a request and waits for its acknowledgement.
    pub fn request(
        &mut self,
        slave: NodeAddress,
        service: RequestService,
        control: u16,
        payload: &[u8],
    ) -> Result<Acknowledge, Error> {
        self.send_request(slave, service, control, payload)?;
        self.wait_acknowledge(slave)
    }

    /// Asks `slave` for exclusive access. Other masters get `Retry` answers until [`Engine::unlock`].
    pub fn lock(&mut self, slave: NodeAddress) -> Result<Acknowledge, Error> {
        self.request(
            slave,
            RequestService::Special,
            SpecialCommand::Lock as u16,
            &[],
        )
    }

    /// Releases exclusive access to `slave`.
    pub fn unlock(&mut self, slave: NodeAddress) -> Result<Acknowledge, Error> {
        self.request(
            slave,
            RequestService::Special,
            SpecialCommand::Unlock as u16,
            &[],
        )
    }

    /// Pings `slave` and decodes its self-description. `Ok(None)` means it answered with something else.
    pub fn ping(&mut self, slave: NodeAddress) -> Result<Option<NodeInfo>, Error> {
        let ack = self.request(slave, RequestService::Ping, 0, &[])?;
        Ok(ack
            .is_success()
            .then(|| NodeInfo::from_bytes(ack.payload.as_slice()))
            .flatten())
    }
}
