//! Device communication backbone: framed TCP connections to DAUs, correlated
//! commands, firmware updates, unicast PTP leases and archive forwarding.
pub mod facade;
pub mod firmware;
pub mod forwarding;
pub mod gateway;
pub mod inventory;
mod link;
pub mod orchestrator;
pub mod ptp;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use facade::{CommandFacade, DeviceCommand, FacadeResponse};
pub use gateway::DauGateway;
pub use link::DeviceLink;
