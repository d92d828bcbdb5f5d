//! Error types for Dockgate

use thiserror::Error;

/// Result type for Dockgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Dockgate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener / server error
    #[error("Server error: {0}")]
    Server(String),

    /// Upstream dispatch error
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
