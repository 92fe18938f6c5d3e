//! # Workflows Module
//!
//! High-level entry points for running simulations with cellsim.
//!
//! ## Overview
//!
//! A workflow takes a parsed [`ModelDescription`](crate::core::io::model::ModelDescription)
//! and a [`SimulationConfig`](crate::engine::config::SimulationConfig), builds the
//! [`World`](crate::engine::world::World), and drives it through its iterations while
//! reporting progress and sampling observables.
//!
//! - **Simulation Workflow** ([`simulate`]) - World construction, optional restore from a
//!   checkpoint, the iteration loop and count sampling.

pub mod simulate;
