//! # Core Module
//!
//! Foundational, mostly stateless building blocks of the simulator.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - Identifiers, species, molecules and reaction rules
//! - **Geometry** ([`geometry`]) - Walls, shared-edge transforms, surface grids and meshes
//! - **Chemistry** ([`chemistry`]) - Encounter classification, probability factors and reaction classes
//! - **File I/O** ([`io`]) - Model descriptions, checkpoints and count output
//! - **Utilities** ([`utils`]) - Small vector-math helpers shared by the layers above

pub mod chemistry;
pub mod geometry;
pub mod io;
pub mod models;
pub mod utils;
