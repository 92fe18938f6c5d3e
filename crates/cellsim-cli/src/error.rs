use cellsim::core::io::checkpoint::CheckpointError;
use cellsim::core::io::counts::CountsError;
use cellsim::core::io::model::ModelLoadError;
use cellsim::engine::error::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Model(#[from] ModelLoadError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Failed to write counts: {0}")]
    Counts(#[from] CountsError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse file '{path}': {source}", path = path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
