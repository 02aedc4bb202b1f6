//! An in-memory bus for testing engines against each other.
//!
//! Every [`SimPort`] attached to a [`SimBus`] is a station on a shared medium. A sent frame is delivered to every other
//! station whose acceptance filters let it through, the way a CAN controller would. Peer nodes added with
//! [`SimBus::add_peer`] answer their requests whenever a waiting master finds its acknowledgement channel empty, so a
//! blocking wait in a test sees replies without any threads.

use crate::{
    configuration::EngineConfig,
    engine::{Engine, Reply, Request, RequestHandler},
    error::Error,
    frame::{AcceptanceFilter, AckService, Frame, PAYLOAD_CAPACITY, Service},
    identity::{NodeAddress, NodeInfo},
    port::{BusPort, PortError, ReceiveChannels},
};
use core::cell::RefCell;
use std::{rc::Rc, vec::Vec};

/// Something on the bus that answers requests on its own.
pub trait Peer {
    fn service(&mut self);
}

#[derive(Default)]
struct Station {
    node: Option<NodeAddress>,
    channels: ReceiveChannels,
    faulted: bool,
    fail_init: bool,
    fail_sends: usize,
}

#[derive(Default)]
struct Medium {
    stations: Vec<Station>,
    peers: Vec<Rc<RefCell<dyn Peer>>>,
    sent: Vec<Frame>,
}

impl Medium {
    fn deliver(&mut self, frame: Frame, from: Option<usize>) {
        for (index, station) in self.stations.iter_mut().enumerate() {
            if from == Some(index) {
                continue;
            }
            let Some(node) = station.node else {
                continue;
            };
            if AcceptanceFilter::for_node(node)
                .iter()
                .any(|filter| filter.accepts(frame.id))
            {
                station.channels.push(frame);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct SimBus {
    medium: Rc<RefCell<Medium>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a station and returns its port.
    pub fn attach(&self) -> SimPort {
        let mut medium = self.medium.borrow_mut();
        medium.stations.push(Station::default());
        SimPort {
            medium: self.medium.clone(),
            station: medium.stations.len() - 1,
        }
    }

    /// Adds a node at `address` that answers its requests with `handler`.
    pub fn add_peer<H: RequestHandler + 'static>(
        &self,
        address: u8,
        handler: H,
    ) -> Rc<RefCell<SimNode<H>>> {
        let mut engine = Engine::new(self.attach(), EngineConfig::default()).unwrap();
        engine.configure(address).unwrap();
        let node = Rc::new(RefCell::new(SimNode {
            engine,
            handler,
            lag: 0,
            idle: 0,
        }));
        self.medium.borrow_mut().peers.push(node.clone());
        node
    }

    /// Makes the port report a bus fault until it is initialized again.
    pub fn raise_fault(&self, port: &SimPort) {
        self.station(port, |station| station.faulted = true);
    }

    /// Makes the port's initialization fail, or succeed again.
    pub fn fail_init(&self, port: &SimPort, fail: bool) {
        self.station(port, |station| station.fail_init = fail);
    }

    /// Makes the port refuse its next `count` frames.
    pub fn fail_sends(&self, port: &SimPort, count: usize) {
        self.station(port, |station| station.fail_sends = count);
    }

    /// The node the port's acceptance filters are programmed for.
    pub fn filter_of(&self, port: &SimPort) -> Option<NodeAddress> {
        self.station(port, |station| station.node)
    }

    /// Puts a frame on the bus as if an outside node had sent it.
    pub fn deliver(&self, frame: Frame) {
        self.medium.borrow_mut().deliver(frame, None);
    }

    /// Every frame sent through a port so far.
    pub fn sent(&self) -> Vec<Frame> {
        self.medium.borrow().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.medium.borrow().sent.len()
    }

    /// How many acknowledgements of the given kind were sent through a port so far.
    pub fn acknowledgements(&self, service: AckService) -> usize {
        self.medium
            .borrow()
            .sent
            .iter()
            .filter(|frame| frame.header().service == Service::Acknowledge(service))
            .count()
    }

    fn station<R>(&self, port: &SimPort, f: impl FnOnce(&mut Station) -> R) -> R {
        f(&mut self.medium.borrow_mut().stations[port.station])
    }
}

/// A station's view of the [`SimBus`].
pub struct SimPort {
    medium: Rc<RefCell<Medium>>,
    station: usize,
}

impl SimPort {
    fn pop_acknowledge(&self) -> Option<Frame> {
        self.medium.borrow_mut().stations[self.station]
            .channels
            .pop_acknowledge()
    }

    fn service_peers(&self) {
        let peers = core::mem::take(&mut self.medium.borrow_mut().peers);
        for peer in &peers {
            peer.borrow_mut().service();
        }
        self.medium.borrow_mut().peers = peers;
    }
}

impl BusPort for SimPort {
    fn init(&mut self) -> Result<(), PortError> {
        let mut medium = self.medium.borrow_mut();
        let station = &mut medium.stations[self.station];
        if station.fail_init {
            return Err(PortError::Hardware);
        }
        station.faulted = false;
        station.channels.clear();
        Ok(())
    }

    fn configure_filters(&mut self, node: NodeAddress) -> Result<(), PortError> {
        self.medium.borrow_mut().stations[self.station].node = Some(node);
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> Result<(), PortError> {
        let mut medium = self.medium.borrow_mut();
        let station = &mut medium.stations[self.station];
        if station.fail_sends > 0 {
            station.fail_sends -= 1;
            return Err(PortError::NoTransmitSlot);
        }
        medium.sent.push(*frame);
        medium.deliver(*frame, Some(self.station));
        Ok(())
    }

    fn receive_request(&mut self) -> Option<Frame> {
        self.medium.borrow_mut().stations[self.station]
            .channels
            .pop_request()
    }

    fn receive_acknowledge(&mut self) -> Option<Frame> {
        if let pending @ Some(_) = self.pop_acknowledge() {
            return pending;
        }
        self.service_peers();
        self.pop_acknowledge()
    }

    fn bus_faulted(&self) -> bool {
        self.medium.borrow().stations[self.station].faulted
    }
}

/// An engine on the [`SimBus`] together with the handler it answers requests with.
pub struct SimNode<H> {
    pub engine: Engine<SimPort>,
    pub handler: H,
    /// How many times the node is asked to answer before it actually does, each time.
    pub lag: u32,
    idle: u32,
}

impl<H: RequestHandler> Peer for SimNode<H> {
    fn service(&mut self) {
        if self.idle < self.lag {
            self.idle += 1;
            return;
        }
        self.idle = 0;
        let _ = self.engine.poll_requests(&mut self.handler);
    }
}

/// A handler backed by a small memory that remembers what it was asked.
pub struct Recorder {
    /// Every memory read and write, in order.
    pub requests: Vec<Request>,
    /// Codes of every special request forwarded to the handler.
    pub specials: Vec<u8>,
    pub pings: usize,
    /// What to answer pings with; pings are rejected without it.
    pub info: Option<NodeInfo>,
    memory: [u8; 64],
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            specials: Vec::new(),
            pings: 0,
            info: None,
            memory: core::array::from_fn(|offset| offset as u8),
        }
    }
}

impl Recorder {
    pub fn answering_pings() -> Self {
        Self {
            info: Some(NodeInfo::new(1, *b"SEQM", 2, 0x0001)),
            ..Self::default()
        }
    }
}

impl RequestHandler for Recorder {
    fn memory_read(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        self.requests.push(*request);
        let start = usize::from(request.control);
        let len = request
            .payload
            .first()
            .map_or(PAYLOAD_CAPACITY, |&len| usize::from(len));
        match self.memory.get(start..start + len) {
            Some(data) => reply.read(data),
            None => reply.error(),
        }
    }

    fn memory_write(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        self.requests.push(*request);
        let start = usize::from(request.control);
        match self.memory.get_mut(start..start + request.payload.len()) {
            Some(target) => {
                target.copy_from_slice(request.payload.as_slice());
                reply.ok()
            }
            None => reply.error(),
        }
    }

    fn ping(&mut self, _request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        self.pings += 1;
        match self.info {
            Some(info) => reply.send(AckService::Ok, &info.to_bytes()),
            None => reply.error(),
        }
    }

    fn special(&mut self, code: u8, _request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        self.specials.push(code);
        reply.ok()
    }
}
