//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad or missing settings: unparseable server prefix, metadata
    /// directory that cannot be created, unreadable config file.
    #[error("config error: {0}")]
    Config(String),

    /// The self-signed certificate generator failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// Template, certificate or metadata file could not be read or written.
    #[error("io error: {0}")]
    Io(String),

    #[error("logger error: {0}")]
    Logger(String),
}
