//! WolfElect Error Types

use thiserror::Error;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Connectivity errors (initial reachability probe)
    #[error("Coordination service unreachable at {address}: {reason}")]
    Connectivity { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Session errors
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session expired")]
    SessionExpired,

    // Steady-state coordination errors
    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("Coordination service error code {0}")]
    ServerError(i32),

    // Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    // Shutdown cleanup errors
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
