pub mod command;
pub mod init;
pub mod web;

use anyhow::Error as AnyhowError;
pub use command::CommandError;
use config::ConfigError;
use init::InitContextError;
use serde_json::Error as SerdeJsonError;
use std::{error::Error as StdError, io::Error as IoError};
use thiserror::Error;
use tokio::{task::JoinError, time::Duration};
use web::WebError;

pub type DauResult<T, E = DauError> = anyhow::Result<T, E>;
pub type WebResult<T, E = WebError> = anyhow::Result<T, E>;
pub type CommandResult<T, E = CommandError> = Result<T, E>;

#[derive(Error, Debug, Default)]
pub enum DauError {
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("read/write timeout")]
    Timeout(Duration),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    StdError(#[from] Box<dyn StdError + Send + Sync>),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    InitContextError(#[from] InitContextError),
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("{0}")]
    WebError(#[from] WebError),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
    #[error("Invalid state error: {0}")]
    InvalidStateError(String),
}

impl From<String> for DauError {
    #[inline]
    fn from(e: String) -> Self {
        DauError::Msg(e)
    }
}

impl From<&str> for DauError {
    #[inline]
    fn from(e: &str) -> Self {
        DauError::Msg(e.to_string())
    }
}

impl From<&DauError> for DauError {
    #[inline]
    fn from(e: &DauError) -> Self {
        DauError::Msg(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_keep_their_message() {
        let err = DauError::from(CommandError::Unavailable("dau-7".into()));
        assert_eq!(err.to_string(), "device dau-7 is not connected");
    }

    #[test]
    fn str_converts_into_msg() {
        assert!(matches!(DauError::from("boom"), DauError::Msg(m) if m == "boom"));
    }
}
