//! Bridge run orchestration module.

mod bridge;
mod stats;

pub use bridge::{Bridge, BridgeConfig};
pub use stats::RunStats;
