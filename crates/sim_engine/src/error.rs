//! Engine adapter error types

use contracts::ContractError;
use thiserror::Error;

/// Error returned by engine and routing calls
#[derive(Debug, Error)]
pub enum EngineError {
    // ===== Entity Errors =====
    /// Vehicle unknown to the engine
    #[error("vehicle not found: {vehicle_id}")]
    VehicleNotFound { vehicle_id: String },

    /// Vehicle ID already in use
    #[error("vehicle already exists: {vehicle_id}")]
    DuplicateVehicle { vehicle_id: String },

    // ===== Network Errors =====
    /// Route unknown to the engine
    #[error("route not found: {route_id}")]
    RouteNotFound { route_id: String },

    /// Edge or lane unknown to the engine
    #[error("unknown road element: {id}")]
    UnknownRoad { id: String },

    /// Position could not be projected onto the network
    #[error("cannot project ({x:.2}, {y:.2}) onto the road network: {message}")]
    Projection { x: f64, y: f64, message: String },

    /// No route between two edges
    #[error("no route from '{from}' to '{to}'")]
    NoRoute { from: String, to: String },

    // ===== Call Errors =====
    /// Engine rejected a call
    #[error("engine call '{call}' failed for '{entity_id}': {message}")]
    Call {
        call: String,
        entity_id: String,
        message: String,
    },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl EngineError {
    pub fn vehicle_not_found(vehicle_id: impl Into<String>) -> Self {
        Self::VehicleNotFound {
            vehicle_id: vehicle_id.into(),
        }
    }

    pub fn unknown_road(id: impl Into<String>) -> Self {
        Self::UnknownRoad { id: id.into() }
    }

    /// Create engine call error
    pub fn call(
        call: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Call {
            call: call.into(),
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, EngineError>;
