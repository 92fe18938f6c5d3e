//! # cellsim Core Library
//!
//! A particle-based (Monte Carlo) reaction-diffusion engine for cellular microphysiology.
//! Discrete molecules diffuse through 3D space and across triangulated membrane surfaces,
//! undergo stochastic chemical reactions, and are counted per compartment over time.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless data models (species, molecules, reaction rules),
//!   the triangle-mesh geometry model with its surface grids and edge transforms, the
//!   reaction-probability engine, and file formats (model descriptions, checkpoints, counts).
//!
//! - **[`engine`]: The Logic Core.** The stateful simulation: the spatial partition that owns
//!   every molecule, the event scheduler, the counted-volume resolver, and the per-step tasks
//!   (diffusion, reactions, releases, clamps, defragmentation) that operate on the [`engine::world::World`].
//!
//! - **[`workflows`]: The Public API.** High-level entry points that build a world from a model
//!   description, advance it, collect observables and produce checkpoints.

pub mod core;
pub mod engine;
pub mod workflows;
