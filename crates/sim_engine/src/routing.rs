//! Route planning collaborator

use contracts::Vector3;

use crate::error::{EngineError, Result};
use crate::network::StraightNetwork;

/// Origin/destination to an ordered edge list
pub trait RoutePlanner: Send + Sync {
    fn plan(&self, origin: &Vector3, destination: &Vector3) -> Result<Vec<String>>;
}

/// Engine route ID for a planned edge list
pub fn route_id_for(edges: &[String]) -> String {
    format!("nav:{}", edges.join(","))
}

/// Planner over a [`StraightNetwork`]: every edge between the projected
/// origin and destination, which must lie ahead of the origin.
#[derive(Debug, Clone)]
pub struct MockRoutePlanner {
    network: StraightNetwork,
    fail: bool,
}

impl MockRoutePlanner {
    pub fn new(network: StraightNetwork) -> Self {
        Self {
            network,
            fail: false,
        }
    }

    /// Planner whose every call fails
    pub fn failing(network: StraightNetwork) -> Self {
        Self {
            network,
            fail: true,
        }
    }
}

impl RoutePlanner for MockRoutePlanner {
    fn plan(&self, origin: &Vector3, destination: &Vector3) -> Result<Vec<String>> {
        if self.fail {
            return Err(EngineError::call("plan", "", "injected failure"));
        }
        let from = self.network.project(origin)?;
        let to = self.network.project(destination)?;
        let from_index = self.network.edge_index(&from.edge_id)?;
        let to_index = self.network.edge_index(&to.edge_id)?;
        if to_index < from_index {
            return Err(EngineError::NoRoute {
                from: from.edge_id,
                to: to.edge_id,
            });
        }
        Ok(self.network.edges_between(from_index, to_index))
    }
}
