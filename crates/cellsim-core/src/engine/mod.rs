//! # Engine Module
//!
//! The stateful simulation engine: it owns every molecule, advances time one iteration
//! at a time and keeps the spatial and compartment indices consistent with the geometry.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Run parameters assembled through a validating builder
//! - **World** ([`world`]) - The explicit context object holding all simulation state
//! - **Spatial Partition** ([`partition`]) - Molecule arena plus uniform cubic binning
//! - **Event Scheduler** ([`scheduler`]) - Time-ordered per-molecule actions
//! - **Counted Volumes** ([`counted_volumes`]) - Compartment hierarchy of closed meshes
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress reporting
//! - **Error Handling** ([`error`]) - Engine-level error type
//!
//! Per-step work (diffusion, reactions, releases, clamps, counting, defragmentation)
//! lives in the crate-private `tasks` module and is driven by [`world::World::run_iteration`].

pub mod config;
pub mod counted_volumes;
pub mod error;
pub mod partition;
pub mod progress;
pub mod scheduler;
pub(crate) mod setup;
pub(crate) mod tasks;
pub mod world;
