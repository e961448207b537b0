//! Layered error definitions
//!
//! Categorized by source: config / engine / store / document / frame

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Engine Errors =====
    /// Engine rejected a call for a specific entity
    #[error("engine call '{call}' failed for '{entity_id}': {message}")]
    EngineCall {
        call: String,
        entity_id: String,
        message: String,
    },

    /// Entity unknown to the engine
    #[error("engine entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    // ===== Store Errors =====
    /// Datastore connection error
    #[error("store connection error to {endpoint}: {message}")]
    StoreConnection { endpoint: String, message: String },

    /// Datastore protocol error (unexpected reply)
    #[error("store protocol error: {message}")]
    StoreProtocol { message: String },

    // ===== Document Errors =====
    /// Incoming document could not be decoded
    #[error("document '{key}' decode error: {message}")]
    DocumentDecode { key: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create engine call error
    pub fn engine_call(
        call: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::EngineCall {
            call: call.into(),
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }

    /// Create document decode error
    pub fn document_decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DocumentDecode {
            key: key.into(),
            message: message.into(),
        }
    }
}
