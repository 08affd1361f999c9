use std::result::Result as StdResult;
use thiserror::Error;

pub type Result<T> = StdResult<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Problems with the length prefix or the frame boundary itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("length prefix is not a valid varint")]
    MalformedLength,
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: usize },
    #[error("stream ended inside a frame: expected {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },
}
