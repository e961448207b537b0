//! Store error types

use thiserror::Error;

/// Store-specific errors
///
/// These stay inside the crate's threads; public connector calls fail soft
/// (`false` / `None`) and log instead of returning them.
#[derive(Debug, Error)]
pub enum StoreError {
    // ===== Transport Errors =====
    /// Transient I/O failure (retryable)
    #[error("io error talking to {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// No live stream
    #[error("not connected to {endpoint}")]
    NotConnected { endpoint: String },

    /// Background thread could not be started
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    // ===== Protocol Errors =====
    /// Malformed or unexpected reply
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Server replied with an error string
    #[error("server error: {message}")]
    Server { message: String },

    /// Shared contract error
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),
}

impl StoreError {
    pub fn io(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn not_connected(endpoint: impl Into<String>) -> Self {
        Self::NotConnected {
            endpoint: endpoint.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
