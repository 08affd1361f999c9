use thiserror::Error;

/// Error type for component bootstrap
#[derive(Error, Debug)]
pub enum InitContextError {
    /// Returned when a socket or file could not be bound/opened at startup
    #[error("bind failed: {0}")]
    Bind(String),
    /// Returned when a settings value is unusable
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    /// Returned when a primitive error occurs
    #[error("primitive error: {0}")]
    Primitive(String),
}
