//! The transaction engine: a single owned value threaded through every MBNet entry point.
//!
//! The engine is driven from two places. A periodic task calls [`Engine::tick`], which checks the bus, answers pending
//! requests, and on a master advances discovery by one address. Any other task may start transactions with
//! [`Engine::send_request`] and [`Engine::wait_acknowledge`]. All of these take `&mut self`, so whoever shares the
//! engine between tasks (or between a task and an interrupt) has to wrap it in a mutex; holding that lock is the
//! critical section around the retained request, the scan table and the lock owner.
//!
//! No operation suspends the caller. Waiting for an acknowledgement is a spin-poll with an iteration ceiling, so the
//! worst-case latency of every call is bounded.

mod master;
mod scan;
mod slave;

pub use master::{AckPoll, Acknowledge};
pub use scan::ScanStep;
pub use slave::{Reply, Request, RequestHandler};

use crate::{
    configuration::EngineConfig,
    discovery::Scanner,
    error::Error,
    frame::Frame,
    health::{BusHealth, HealthState},
    identity::{MasterIndex, NodeAddress, Role},
    port::BusPort,
    status::StatusReport,
};

/// The request a master sent last, kept so it can be replayed byte for byte.
#[derive(Clone, Copy, Debug)]
struct RetainedRequest {
    slave: NodeAddress,
    frame: Frame,
}

/// The MBNet protocol engine for one node.
pub struct Engine<P> {
    port: P,
    config: EngineConfig,
    address: Option<NodeAddress>,
    health: BusHealth,
    last_request: Option<RetainedRequest>,
    /// The master currently holding exclusive access to this node, if any.
    locked_by: Option<MasterIndex>,
    scanner: Scanner,
}

impl<P: BusPort> Engine<P> {
    /// Constructs an engine around a bus port. The node address is unset until [`Engine::configure`].
    pub fn new(port: P, config: EngineConfig) -> Result<Self, Error> {
        let scanner = Scanner::new(&config.scan)?;
        Ok(Self {
            port,
            config,
            address: None,
            health: BusHealth::new(),
            last_request: None,
            locked_by: None,
            scanner,
        })
    }

    /// (Re)initializes the bus port and forgets all transient state: health, the retained request and any lock.
    ///
    /// This is the only way out of [`HealthState::PermanentOff`]. The node address survives, and the acceptance filters
    /// are reprogrammed for it.
    pub fn init(&mut self) -> Result<(), Error> {
        self.port.init().map_err(Error::Port)?;
        if let Some(address) = self.address {
            self.port.configure_filters(address).map_err(Error::Port)?;
        }
        self.health.reset();
        self.last_request = None;
        self.locked_by = None;
        info!("MBNet initialized");
        Ok(())
    }

    /// Assigns this node's address and programs the acceptance filters for it.
    ///
    /// Fails with [`Error::InvalidAddress`] for values of 128 and up, and with [`Error::AlreadyConfigured`] once an
    /// address has been assigned.
    pub fn configure(&mut self, address: u8) -> Result<NodeAddress, Error> {
        let address = NodeAddress::new(address)?;
        if self.address.is_some() {
            return Err(Error::AlreadyConfigured);
        }
        self.port.configure_filters(address).map_err(Error::Port)?;
        self.address = Some(address);
        self.scanner.set_own_address(address);
        info!("MBNet node address set to {} ({})", address, address.role());
        Ok(address)
    }

    /// This node's address, once configured.
    pub fn address(&self) -> Option<NodeAddress> {
        self.address
    }

    /// This node's role, once configured.
    pub fn role(&self) -> Option<Role> {
        self.address.map(NodeAddress::role)
    }

    /// Returns `true` if this node's address is master-capable.
    pub fn is_master(&self) -> bool {
        self.role() == Some(Role::Master)
    }

    /// Current bus health.
    pub fn health(&self) -> HealthState {
        self.health.state()
    }

    /// The master currently holding this node's lock.
    pub fn locked_by(&self) -> Option<MasterIndex> {
        self.locked_by
    }

    /// The settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared access to the bus port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Exclusive access to the bus port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Samples the port's fault signal, records a fault if one is raised, and tries to recover by reinitializing the
    /// port.
    ///
    /// Returns the resulting health, or [`Error::BusPermanentlyOff`] if the fault escalated or recovery failed.
    pub fn check_bus(&mut self) -> Result<HealthState, Error> {
        self.health.ensure_usable()?;
        if !self.port.bus_faulted() {
            return Ok(self.health.state());
        }
        if self.health.record_fault() == HealthState::PermanentOff {
            return Err(Error::BusPermanentlyOff);
        }

        let recovered = self.port.init().and_then(|()| match self.address {
            Some(address) => self.port.configure_filters(address),
            None => Ok(()),
        });
        if let Err(err) = recovered {
            error!("Bus recovery failed: {}", err);
            self.health.declare_permanent_off();
            return Err(Error::BusPermanentlyOff);
        }
        Ok(self.health.state())
    }

    /// The periodic handler: checks the bus, answers pending requests and, on a master whose scan is incomplete,
    /// pings one more address.
    pub fn tick<H: RequestHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), Error> {
        self.check_bus()?;
        self.poll_requests(handler)?;
        if self.is_master() && !self.scan_complete() {
            self.scan_step()?;
        }
        Ok(())
    }

    /// A human-readable snapshot of this node's state.
    pub fn status(&self) -> StatusReport<'_> {
        StatusReport::new(self.address, self.health.state(), self.locked_by, &self.scanner)
    }

    fn own_address(&self) -> Result<NodeAddress, Error> {
        self.address.ok_or(Error::NotConfigured)
    }

    fn master_index(&self) -> Result<MasterIndex, Error> {
        self.own_address()?.master_index().ok_or(Error::NotAMaster)
    }
}
