//! Wire-level building blocks shared by the gateway and by device simulators.
//!
//! - [`message`]: the device message catalog (envelope, requests, responses) and
//!   the archive upload catalog, as hand-written prost messages.
//! - [`codec`]: varint length-delimited framing of envelopes for `tokio_util::codec`.
//! - [`sequence`]: per-issuer sequence number generator.
pub mod codec;
pub mod error;
pub mod message;
pub mod sequence;

pub use codec::{EnvelopeCodec, Inbound};
pub use error::{FramingError, ProtocolError};
pub use sequence::SequenceGenerator;
