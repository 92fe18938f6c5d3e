//! Conversion of macroscopic rate constants into per-encounter probabilities and the
//! selection of reaction outcomes.

use crate::core::models::species::SpeciesError;
use thiserror::Error;

pub mod pb_factor;
pub mod registry;
pub mod rxn_class;

#[derive(Debug, Error, PartialEq)]
pub enum ReactionError {
    #[error(transparent)]
    Species(#[from] SpeciesError),

    #[error("Reaction '{name}' has a negative rate ({rate})")]
    NegativeRate { name: String, rate: f64 },

    #[error("Rate must be a finite, non-negative number (got {0})")]
    InvalidRate(f64),

    #[error("Reaction '{name}' has {count} reactants; one to three are supported")]
    ReactantCount { name: String, count: usize },

    #[error("Reaction '{name}' combines reactants in a way the engine cannot simulate")]
    UnsupportedReactants { name: String },

    #[error("Reaction class '{class}' only has target-only reactants and can never be initiated")]
    AllTargetOnly { class: String },

    #[error("Reaction '{name}' uses more than one surface class")]
    MultipleSurfaceClasses { name: String },

    #[error("Reaction '{name}' lists surface class '{species}' as a product")]
    SurfaceClassProduct { name: String, species: String },

    #[error("Reaction '{name}' creates surface products without a surface to place them on")]
    SurfaceProductWithoutSurface { name: String },

    #[error(
        "Reaction '{name}' creates {products} surface products from {reactants} surface reactants, \
         but the vacancy search radius is zero"
    )]
    NoRoomForSurfaceProducts {
        name: String,
        products: usize,
        reactants: usize,
    },

    #[error(
        "Reaction '{name}' of kind {kind} must pair exactly one molecule with one surface class and have no products"
    )]
    InvalidSurfaceClassRule { name: String, kind: String },

    #[error("Unknown reaction '{0}'")]
    UnknownReaction(String),

    #[error("Cumulative probabilities of reaction class '{class}' are not monotonic")]
    NonMonotonic { class: String },
}
