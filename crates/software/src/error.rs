//! The error type shared by every MBNet operation.

use crate::port::PortError;
use core::fmt;

/// Errors surfaced by the MBNet engine.
///
/// Configuration errors are fatal to the call, not to the node. [`Error::Transmit`] is left for the caller's own retry
/// loop. [`Error::Retry`] and [`Error::Timeout`] are only returned once the engine's bounded retry and poll budgets have
/// been spent. A transient bus fault never shows up here; it is recovered locally and tracked as
/// [`HealthState::Panic`](crate::health::HealthState::Panic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The value does not fit the 7-bit node address space.
    InvalidAddress(u8),
    /// This node's address was already assigned; it cannot change until the device restarts.
    AlreadyConfigured,
    /// No node address has been assigned yet.
    NotConfigured,
    /// The operation requires a master-capable node address (low nibble zero).
    NotAMaster,
    /// The configured scan range is empty.
    InvalidScanRange,
    /// The scan is configured to give up on an address before pinging it even once.
    InvalidScanRetries,
    /// A payload longer than the 8 bytes a frame can carry.
    PayloadTooLong(usize),
    /// [`send_request_again`](crate::engine::Engine::send_request_again) was called before any request was sent.
    NothingToReplay,
    /// The bus port failed to initialize or to program its acceptance filters.
    Port(PortError),
    /// The bus port refused to transmit a frame.
    Transmit(PortError),
    /// The slave kept answering `Retry` (it is locked by another master) until the replay budget ran out.
    Retry,
    /// No acknowledgement arrived within the poll budget.
    Timeout,
    /// The bus has been declared unusable; [`init`](crate::engine::Engine::init) must be called again.
    BusPermanentlyOff,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidAddress(address) => {
                write!(f, "invalid node address {address:#04x}, must be below 0x80")
            }
            Error::AlreadyConfigured => write!(f, "node address is already configured"),
            Error::NotConfigured => write!(f, "node address is not configured"),
            Error::NotAMaster => write!(f, "node address is not master-capable"),
            Error::InvalidScanRange => write!(f, "scan range is empty"),
            Error::InvalidScanRetries => write!(f, "scan must ping each address at least once"),
            Error::PayloadTooLong(len) => {
                write!(f, "payload of {len} bytes exceeds the 8 bytes a frame can carry")
            }
            Error::NothingToReplay => write!(f, "no request has been sent yet"),
            Error::Port(err) => write!(f, "bus port error: {err}"),
            Error::Transmit(err) => write!(f, "transmit failed: {err}"),
            Error::Retry => write!(f, "slave is locked by another master"),
            Error::Timeout => write!(f, "timed out waiting for an acknowledgement"),
            Error::BusPermanentlyOff => write!(f, "bus is permanently off"),
        }
    }
}

impl core::error::Error for Error {}
