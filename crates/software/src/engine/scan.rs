use super::Engine;
use crate::{
    discovery::{ScanSlot, SlaveRecord},
    error::Error,
    frame::RequestService,
    identity::{NodeAddress, NodeInfo},
    port::BusPort,
};

/// What a single [`Engine::scan_step`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanStep {
    /// The address answered the ping with a self-description.
    Found(NodeAddress),
    /// The address did not answer usefully.
    Missed(NodeAddress),
    /// Nothing left to ping.
    Complete,
}

impl<P: BusPort> Engine<P> {
    /// Pings the next unsettled address in the scan range, waiting at most
    /// [`ScanConfig::ping_poll_limit`](crate::configuration::ScanConfig::ping_poll_limit) polls for the answer.
    ///
    /// Timeouts, `Retry` answers that outlast the replay budget, refused sends and answers that aren't a
    /// [`NodeInfo`] all count as a miss for that address.
    pub fn scan_step(&mut self) -> Result<ScanStep, Error> {
        self.health.ensure_usable()?;
        self.master_index()?;
        let Some(target) = self.scanner.next_target() else {
            return Ok(ScanStep::Complete);
        };

        let poll_limit = self.config.scan.ping_poll_limit;
        let outcome = self
            .send_request(target, RequestService::Ping, 0, &[])
            .and_then(|()| self.wait_acknowledge_within(target, poll_limit));

        match outcome {
            Ok(ack) if ack.is_success() && NodeInfo::from_bytes(ack.payload.as_slice()).is_some() => {
                if self.scanner.record(target).is_none() {
                    info!("Found slave at {}", target);
                }
                self.scanner.record_reply(target, ack.payload.as_slice());
                Ok(ScanStep::Found(target))
            }
            Ok(_) | Err(Error::Timeout | Error::Retry | Error::Transmit(_)) => {
                self.scanner.record_miss(target);
                Ok(ScanStep::Missed(target))
            }
            Err(err) => Err(err),
        }
    }

    /// Returns `true` once every address in the scan range is resolved or exhausted.
    pub fn scan_complete(&self) -> bool {
        self.scanner.is_complete()
    }

    /// Forgets everything discovery found and releases any lock, for when the bus topology may have changed.
    pub fn reconnect(&mut self) {
        info!("Reconnecting, discovery starts over");
        self.scanner.reset();
        self.locked_by = None;
    }

    /// The discovered slave at `address`.
    pub fn slave(&self, address: NodeAddress) -> Option<&SlaveRecord> {
        self.scanner.record(address)
    }

    /// Every discovered slave, in the order they were found.
    pub fn slaves(&self) -> impl Iterator<Item = &SlaveRecord> {
        self.scanner.records()
    }

    /// The discovery state of `address`, or `None` if it lies outside the scan range.
    pub fn scan_slot(&self, address: NodeAddress) -> Option<ScanSlot> {
        self.scanner.slot(address)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        configuration::EngineConfig,
        discovery::ScanSlot,
        engine::{Engine, ScanStep},
        error::Error,
        frame::{AckService, RequestService},
        health::HealthState,
        identity::{NodeAddress, NodeInfo},
        sim::{Recorder, SimBus},
    };

    fn addr(raw: u8) -> NodeAddress {
        NodeAddress::new_lossy(raw)
    }

    #[test]
    fn slave_cannot_scan() {
        let bus = SimBus::new();
        let mut engine = Engine::new(bus.attach(), EngineConfig::default()).unwrap();
        assert_eq!(Err(Error::NotConfigured), engine.scan_step());
        engine.configure(0x05).unwrap();
        assert_eq!(Err(Error::NotAMaster), engine.scan_step());
    }

    #[test]
    fn finds_slave_and_writes_to_it() {
        let bus = SimBus::new();
        let mut config = EngineConfig::default();
        config.scan.range = addr(0x00)..=addr(0x1f);
        config.scan.ping_poll_limit = 8;
        let mut master = Engine::new(bus.attach(), config).unwrap();
        master.configure(0x10).unwrap();
        let slave = bus.add_peer(0x05, Recorder::answering_pings());

        // one pass over the range, skipping this node's own address
        for _ in 0..31 {
            match master.scan_step() {
                Ok(ScanStep::Found(_) | ScanStep::Missed(_)) => {}
                other => panic!("Expected a ping but got {:?}", other),
            }
        }
        assert!(
            !master.scan_complete(),
            "Silent addresses should still have retries left"
        );
        assert_eq!(
            Some(ScanSlot::Resolved { record: 0 }),
            master.scan_slot(addr(0x05))
        );
        assert_eq!(
            Some(NodeInfo::new(1, *b"SEQM", 2, 0x0001)),
            master.slave(addr(0x05)).and_then(|record| record.info()),
            "Expected left but got right"
        );
        assert_eq!(
            Some(ScanSlot::Unresolved { retries: 1 }),
            master.scan_slot(addr(0x06))
        );
        assert_eq!(
            Some(ScanSlot::Unresolved { retries: 0 }),
            master.scan_slot(addr(0x10)),
            "A master should never ping itself"
        );

        let ack = master
            .request(addr(0x05), RequestService::MemoryWrite, 0x0020, &[0xaa; 4])
            .unwrap();
        assert_eq!(AckService::Ok, ack.service, "Expected left but got right");

        let slave = slave.borrow();
        assert_eq!(1, slave.handler.requests.len(), "Expected a single callback");
        let request = slave.handler.requests[0];
        assert_eq!(addr(0x10), request.master_address());
        assert_eq!(RequestService::MemoryWrite, request.service);
        assert_eq!(0x0020, request.control);
        assert_eq!(&[0xaa; 4], request.payload.as_slice());
    }

    #[test]
    fn completes_and_reconnect_starts_over() {
        let bus = SimBus::new();
        let mut config = EngineConfig::default();
        config.scan.range = addr(0x00)..=addr(0x07);
        config.scan.max_retries = 2;
        config.scan.ping_poll_limit = 2;
        let mut master = Engine::new(bus.attach(), config).unwrap();
        master.configure(0x00).unwrap();
        bus.add_peer(0x03, Recorder::answering_pings());
        // answers pings with an error, so it is never recorded
        bus.add_peer(0x04, Recorder::default());

        let mut steps = 0;
        while master.scan_step().unwrap() != ScanStep::Complete {
            steps += 1;
            assert!(steps <= 7 * 2, "Scan should finish within bounded steps");
        }
        assert!(master.scan_complete());
        assert_eq!(1, master.slaves().count());
        assert_eq!(addr(0x03), master.slaves().next().unwrap().address());
        assert_eq!(Some(ScanSlot::Exhausted), master.scan_slot(addr(0x04)));

        master.reconnect();
        assert!(!master.scan_complete());
        assert_eq!(0, master.slaves().count());
        assert_eq!(
            Some(ScanSlot::Unresolved { retries: 0 }),
            master.scan_slot(addr(0x03))
        );
    }

    #[test]
    fn dead_bus_fails_even_when_complete() {
        let bus = SimBus::new();
        let mut config = EngineConfig::default();
        config.scan.range = addr(0x00)..=addr(0x01);
        config.scan.max_retries = 1;
        config.scan.ping_poll_limit = 1;
        let mut master = Engine::new(bus.attach(), config).unwrap();
        master.configure(0x00).unwrap();
        assert_eq!(Ok(ScanStep::Missed(addr(0x01))), master.scan_step());
        assert_eq!(Ok(ScanStep::Complete), master.scan_step());

        bus.raise_fault(master.port());
        bus.fail_init(master.port(), true);
        assert_eq!(Err(Error::BusPermanentlyOff), master.check_bus());
        assert_eq!(HealthState::PermanentOff, master.health());
        assert_eq!(
            Err(Error::BusPermanentlyOff),
            master.scan_step(),
            "A dead bus should fail fast"
        );
    }

    #[test]
    fn refused_ping_counts_as_miss() {
        let bus = SimBus::new();
        let mut config = EngineConfig::default();
        config.scan.range = addr(0x00)..=addr(0x01);
        let mut master = Engine::new(bus.attach(), config).unwrap();
        master.configure(0x00).unwrap();
        bus.add_peer(0x01, Recorder::answering_pings());

        bus.fail_sends(master.port(), 1);
        assert_eq!(Ok(ScanStep::Missed(addr(0x01))), master.scan_step());
        assert_eq!(Ok(ScanStep::Found(addr(0x01))), master.scan_step());
        assert_eq!(Ok(ScanStep::Complete), master.scan_step());
    }
}
