//! This crate contains the architecture-agnostic core of MBNet, the protocol a family of modular MIDI devices uses to act
//! as one instrument over a shared [CAN](https://en.wikipedia.org/wiki/CAN_bus) bus.
//!
//! MBNet turns the broadcast bus into master/slave request-acknowledge messaging with slave discovery, exclusive-access
//! locking, retry-on-collision and bus-fault recovery. Talking to the bus controller is left to an implementation of
//! [`port::BusPort`]; everything else lives in the [`engine::Engine`].

#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod configuration;

/// Which addresses a master has pinged and what answered.
pub mod discovery;

/// The request/acknowledge state machine for both masters and slaves.
pub mod engine;

pub mod error;

/// The wire format of MBNet frames.
pub mod frame;

pub mod health;

/// Node addresses, roles and self-descriptions.
pub mod identity;

pub mod port;

pub mod status;

#[cfg(test)]
mod sim;

pub use configuration::{EngineConfig, ScanConfig};
pub use engine::{AckPoll, Acknowledge, Engine, Reply, Request, RequestHandler, ScanStep};
pub use error::Error;
pub use frame::{AckService, Frame, FrameId, RequestService};
pub use health::HealthState;
pub use identity::{MasterIndex, NodeAddress, NodeInfo, Role};
pub use port::{BusPort, PortError};
