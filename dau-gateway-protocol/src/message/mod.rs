//! Device message catalog.
//!
//! Messages are hand-written prost types; tag numbers are part of the wire
//! contract with deployed devices and must never be renumbered.
pub mod archive;
mod command;
mod envelope;
mod request;
mod response;

pub use command::{Command, DeviceStatus};
pub use envelope::{now_ms, Envelope, EnvelopePayload, Header};
pub use request::*;
pub use response::*;
