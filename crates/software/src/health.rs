//! Tracks whether the bus is usable.
//!
//! A single fault (lost arbitration, a burst of noise) puts the bus into [`HealthState::Panic`], which heals as soon as
//! an acknowledgement crosses the bus: one arriving for this node, or one this node sent without the port refusing it.
//! The second kind is all a slave ever sees. A second fault before that happens, or a failed recovery, means the physical layer is
//! unusable: [`HealthState::PermanentOff`] sticks until the engine is initialized again.

use crate::error::Error;
use core::fmt;

/// Escalating bus health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HealthState {
    /// No unresolved fault.
    #[default]
    Healthy,
    /// A fault was observed and no acknowledgement has crossed the bus since.
    Panic,
    /// The bus is considered unusable; every send and receive fails fast.
    PermanentOff,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Panic => write!(f, "panic"),
            HealthState::PermanentOff => write!(f, "permanently off"),
        }
    }
}

/// The bus health monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusHealth {
    state: HealthState,
}

impl BusHealth {
    /// Constructs a monitor in the [`HealthState::Healthy`] state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Returns `true` while a fault is unresolved, including when the bus is permanently off.
    pub fn panic(&self) -> bool {
        self.state != HealthState::Healthy
    }

    /// Returns `true` once the bus has been declared unusable.
    pub fn permanent_off(&self) -> bool {
        self.state == HealthState::PermanentOff
    }

    /// Records a bus fault signal and returns the resulting state.
    pub fn record_fault(&mut self) -> HealthState {
        self.state = match self.state {
            HealthState::Healthy => {
                warn!("Bus fault, entering panic state");
                HealthState::Panic
            }
            HealthState::Panic | HealthState::PermanentOff => {
                error!("Bus fault while in panic state, bus is now permanently off");
                HealthState::PermanentOff
            }
        };
        self.state
    }

    /// Records that an acknowledgement was received, which resolves a panic.
    pub fn record_acknowledge(&mut self) {
        if self.state == HealthState::Panic {
            info!("Acknowledgement received, bus recovered");
            self.state = HealthState::Healthy;
        }
    }

    /// Records that this node sent an acknowledgement the port accepted, which resolves a panic as well.
    pub fn record_reply_sent(&mut self) {
        if self.state == HealthState::Panic {
            info!("Acknowledgement sent, bus recovered");
            self.state = HealthState::Healthy;
        }
    }

    /// Declares the bus unusable, e.g. after recovery failed.
    pub fn declare_permanent_off(&mut self) {
        error!("Bus is now permanently off");
        self.state = HealthState::PermanentOff;
    }

    /// Fails with [`Error::BusPermanentlyOff`] once the bus has been declared unusable.
    pub fn ensure_usable(&self) -> Result<(), Error> {
        if self.permanent_off() {
            Err(Error::BusPermanentlyOff)
        } else {
            Ok(())
        }
    }

    /// Returns to [`HealthState::Healthy`]; only initialization should do this.
    pub fn reset(&mut self) {
        self.state = HealthState::Healthy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_faults_escalate() {
        let mut health = BusHealth::new();
        assert_eq!(HealthState::Panic, health.record_fault());
        assert!(health.panic());
        assert!(!health.permanent_off());
        assert_eq!(HealthState::PermanentOff, health.record_fault());
        assert!(health.permanent_off());
        assert_eq!(Err(Error::BusPermanentlyOff), health.ensure_usable());
    }

    #[test]
    fn acknowledge_heals_panic() {
        let mut health = BusHealth::new();
        health.record_fault();
        health.record_acknowledge();
        assert_eq!(HealthState::Healthy, health.state(), "Expected left but got right");

        // the escalation starts over
        assert_eq!(HealthState::Panic, health.record_fault());
    }

    #[test]
    fn sent_reply_heals_panic() {
        let mut health = BusHealth::new();
        health.record_fault();
        health.record_reply_sent();
        assert_eq!(HealthState::Healthy, health.state(), "Expected left but got right");
    }

    #[test]
    fn permanent_off_is_terminal() {
        let mut health = BusHealth::new();
        health.declare_permanent_off();
        health.record_acknowledge();
        health.record_reply_sent();
        assert_eq!(
            HealthState::PermanentOff,
            health.state(),
            "Expected left but got right"
        );

        health.reset();
        assert_eq!(Ok(()), health.ensure_usable());
    }
}
