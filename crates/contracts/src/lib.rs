//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace: entity
//! snapshots, published documents, road coordinates, configuration and errors.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Frame Model
//! - One frame = one engine step followed by one command-queue drain
//! - Snapshots are captured after the frame completes and never mutated afterwards

mod config;
mod document;
mod entity;
mod error;
mod road;

pub use config::*;
pub use document::*;
pub use entity::*;
pub use error::*;
pub use road::*;
