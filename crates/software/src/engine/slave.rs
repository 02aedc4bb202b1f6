use super::Engine;
use crate::{
    error::Error,
    frame::{AckService, Frame, FrameHeader, Payload, RequestService, Service, Special, SpecialCommand},
    health::BusHealth,
    identity::{MasterIndex, NodeAddress},
    port::BusPort,
};

/// A request received from a master, handed to a [`RequestHandler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    /// The master that sent the request.
    pub master: MasterIndex,
    /// What the master wants.
    pub service: RequestService,
    /// Request-specific data, e.g. a memory offset.
    pub control: u16,
    /// Up to 8 bytes of data sent along.
    pub payload: Payload,
}

impl Request {
    /// The node address of the master that sent the request.
    pub fn master_address(&self) -> NodeAddress {
        self.master.address()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Request {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Request {{ master: {}, service: {}, control: {=u16:#x}, payload: {=[u8]:x} }}",
            self.master.as_u8(),
            self.service,
            self.control,
            self.payload.as_slice()
        );
    }
}

/// The application side of a slave: everything the engine does not answer on its own.
///
/// Each method receives the [`Request`] and a single-use [`Reply`]; the handler must answer exactly once by consuming
/// it.
pub trait RequestHandler {
    /// Handles a `MemoryRead` request.
    fn memory_read(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error>;

    /// Handles a `MemoryWrite` request.
    fn memory_write(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error>;

    /// Handles a `Ping` request, usually by answering with this node's
    /// [`NodeInfo`](crate::identity::NodeInfo).
    fn ping(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error>;

    /// Handles a `Special` sub-command the engine does not implement itself. Rejected unless overridden.
    fn special(&mut self, code: u8, request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        let _ = (code, request);
        reply.error()
    }
}

/// The right to acknowledge one request.
///
/// Dropping a reply without sending it leaves the master waiting until it times out, which is logged. A reply the port
/// accepts resolves a bus panic.
pub struct Reply<'a> {
    port: &'a mut dyn BusPort,
    health: &'a mut BusHealth,
    source: NodeAddress,
    master: MasterIndex,
    sent: bool,
}

impl<'a> Reply<'a> {
    fn new(
        port: &'a mut dyn BusPort,
        health: &'a mut BusHealth,
        source: NodeAddress,
        master: MasterIndex,
    ) -> Self {
        Self {
            port,
            health,
            source,
            master,
            sent: false,
        }
    }

    /// The master this reply goes to.
    pub fn master(&self) -> MasterIndex {
        self.master
    }

    /// Sends the acknowledgement.
    pub fn send(mut self, service: AckService, payload: &[u8]) -> Result<(), Error> {
        let frame = Frame::new(
            &FrameHeader::acknowledge(self.master, self.source, service),
            payload,
        )?;
        self.sent = true;
        match self.port.send(&frame) {
            Ok(()) => {
                self.health.record_reply_sent();
                Ok(())
            }
            Err(err) => {
                warn!("Failed to acknowledge master {}: {}", self.master.as_u8(), err);
                Err(Error::Transmit(err))
            }
        }
    }

    /// Acknowledges with `Ok` and no data.
    pub fn ok(self) -> Result<(), Error> {
        self.send(AckService::Ok, &[])
    }

    /// Acknowledges with `Read` and the data read.
    pub fn read(self, data: &[u8]) -> Result<(), Error> {
        self.send(AckService::Read, data)
    }

    /// Asks the master to send the request again later.
    pub fn retry(self) -> Result<(), Error> {
        self.send(AckService::Retry, &[])
    }

    /// Rejects the request.
    pub fn error(self) -> Result<(), Error> {
        self.send(AckService::Error, &[])
    }
}

impl Drop for Reply<'_> {
    fn drop(&mut self) {
        if !self.sent {
            warn!("Request from master {} was never acknowledged", self.master.as_u8());
        }
    }
}

impl<P: BusPort> Engine<P> {
    /// Answers every pending request and returns how many there were.
    ///
    /// While this node is locked by one master, requests from every other master are answered with `Retry` without
    /// reaching the handler. Lock and unlock are handled here, reserved special codes are rejected, and everything
    /// else goes to `handler`.
    pub fn poll_requests<H: RequestHandler + ?Sized>(&mut self, handler: &mut H) -> Result<usize, Error> {
        self.health.ensure_usable()?;
        let address = self.own_address()?;

        let mut handled = 0;
        while let Some(frame) = self.port.receive_request() {
            let header = frame.header();
            let Service::Request(service) = header.service else {
                warn!("Discarding acknowledgement on the request channel: {}", frame);
                continue;
            };
            if header.target != address {
                debug!("Discarding request for {}", header.target);
                continue;
            }
            handled += 1;

            let request = Request {
                master: header.master,
                service,
                control: header.control,
                payload: frame.payload,
            };
            let reply = Reply::new(&mut self.port, &mut self.health, address, request.master);

            if let Some(owner) = self.locked_by.filter(|&owner| owner != request.master) {
                debug!(
                    "Locked by master {}, asking master {} to retry",
                    owner.as_u8(),
                    request.master.as_u8()
                );
                reply.retry()?;
                continue;
            }

            trace!("Handling {}", request);
            match service {
                RequestService::Special => match Special::classify(request.control) {
                    Special::Command(SpecialCommand::Lock) => {
                        info!("Locked by master {}", request.master.as_u8());
                        self.locked_by = Some(request.master);
                        reply.ok()?;
                    }
                    Special::Command(SpecialCommand::Unlock) => {
                        info!("Unlocked by master {}", request.master.as_u8());
                        self.locked_by = None;
                        reply.ok()?;
                    }
                    Special::Reserved(code) => {
                        warn!("Rejecting reserved special command {=u8:#x}", code);
                        reply.error()?;
                    }
                    Special::Extension(code) => handler.special(code, &request, reply)?,
                },
                RequestService::MemoryRead => handler.memory_read(&request, reply)?,
                RequestService::MemoryWrite => handler.memory_write(&request, reply)?,
                RequestService::Ping => handler.ping(&request, reply)?,
            }
        }
        Ok(handled)
    }
}
