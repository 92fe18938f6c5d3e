use super::config::ConfigError;
use crate::core::chemistry::ReactionError;
use crate::core::geometry::GeometryError;
use crate::core::io::checkpoint::CheckpointError;
use crate::core::io::model::ModelLoadError;
use crate::core::models::ids::MoleculeId;
use crate::core::models::species::SpeciesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Geometry error: {source}")]
    Geometry {
        #[from]
        source: GeometryError,
    },

    #[error("Reaction network error: {source}")]
    Reaction {
        #[from]
        source: ReactionError,
    },

    #[error("Model error: {source}")]
    Model {
        #[from]
        source: ModelLoadError,
    },

    #[error("Checkpoint error: {source}")]
    Checkpoint {
        #[from]
        source: CheckpointError,
    },

    #[error("Geometry object '{0}' not found")]
    ObjectNotFound(String),

    #[error("Region '{region}' not found on object '{object}'")]
    RegionNotFound { object: String, region: String },

    #[error("Position ({x}, {y}, {z}) lies outside the partitioned volume")]
    OutsidePartition { x: f64, y: f64, z: f64 },

    #[error("Molecule {0} not found")]
    MoleculeNotFound(MoleculeId),

    #[error("Release of '{species}' failed: {reason}")]
    Release { species: String, reason: String },

    #[error("Concentration clamp on '{species}' requires a diffusing volume species")]
    InvalidClamp { species: String },

    #[error("Invalid species pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Counted objects '{a}' and '{b}' have identical meshes")]
    IdenticalCountedVolumes { a: String, b: String },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<SpeciesError> for EngineError {
    fn from(source: SpeciesError) -> Self {
        EngineError::Reaction {
            source: ReactionError::Species(source),
        }
    }
}
