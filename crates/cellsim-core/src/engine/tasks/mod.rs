//! Per-iteration units of work.
//!
//! Each submodule implements one kind of event processing against the [`World`]:
//! moving molecules, firing reactions, injecting molecules and bookkeeping. The world
//! drives them from its event loop.
//!
//! [`World`]: crate::engine::world::World

pub mod clamp;
pub mod counting;
pub mod defragment;
pub mod diffuse_surface;
pub mod diffuse_volume;
pub mod reactions;
pub mod release;
pub mod unimolecular;
