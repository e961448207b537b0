//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse or validation error
    #[error(transparent)]
    Config(#[from] contracts::ContractError),

    /// Instance filter matched nothing
    #[error("No configured instance matches {filter:?}")]
    NoInstances { filter: Vec<String> },

    /// Instance could not be started
    #[error(transparent)]
    Orchestrator(#[from] orchestrator::OrchestratorError),

    /// Connection pool could not be created
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// One or more instances ended with an error
    #[error("{failed} of {total} instances failed")]
    InstancesFailed { failed: usize, total: usize },

    /// Graceful shutdown error
    #[error("Error during shutdown: {message}")]
    Shutdown { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }
}
