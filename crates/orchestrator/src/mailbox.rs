//! Single-slot hand-off of planned routes from the map service to the
//! navigate loop.

use std::sync::Mutex;

use contracts::PlannedRoute;
use frame_sync::lock_unpoisoned;

/// Holds the latest batch of planned routes until it is taken once
#[derive(Debug, Default)]
pub struct RouteMailbox {
    slot: Mutex<Option<Vec<PlannedRoute>>>,
}

impl RouteMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is waiting with `routes`
    pub fn post(&self, routes: Vec<PlannedRoute>) {
        *lock_unpoisoned(&self.slot) = Some(routes);
    }

    /// Take the waiting batch, leaving the slot empty
    pub fn take(&self) -> Option<Vec<PlannedRoute>> {
        lock_unpoisoned(&self.slot).take()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.slot).is_none()
    }
}
