use crate::core::models::ids::{CountedVolumeId, MoleculeId, ObjectId};
use crate::core::models::molecule::{ActionKind, Molecule};
use nalgebra::Point3;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error for '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("Unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("Checkpoint does not match the model: {0}")]
    Incompatible(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub time: f64,
    pub sequence: u64,
    pub molecule: MoleculeId,
    pub kind: ActionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedVolumeRecord {
    pub object: ObjectId,
    pub inside: CountedVolumeId,
    pub outside: CountedVolumeId,
}

/// Everything needed to continue a run so that it produces exactly the trajectory the
/// original run would have produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    /// Simulation time in internal units.
    pub time: f64,
    pub iteration: u64,
    pub next_molecule_id: u64,
    pub next_reaction_serial: u64,
    pub species_names: Vec<String>,
    /// Molecules in id order, tombstones included.
    pub molecules: Vec<Molecule>,
    pub pending_actions: Vec<PendingAction>,
    pub next_sequence: u64,
    pub rng: ChaCha8Rng,
    pub rates: Vec<(String, f64)>,
    pub vertices: Vec<Point3<f64>>,
    pub releases_done: Vec<bool>,
    pub counted_volumes: Vec<CountedVolumeRecord>,
}

impl Checkpoint {
    pub fn to_writer(&self, writer: impl Write) -> Result<(), serde_json::Error> {
        serde_json::to_writer(writer, self)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }

    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let display = path.to_string_lossy().to_string();
        let file = File::create(path).map_err(|e| CheckpointError::Io {
            path: display.clone(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer).map_err(|e| CheckpointError::Json {
            path: display.clone(),
            source: e,
        })?;
        writer.flush().map_err(|e| CheckpointError::Io {
            path: display,
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let display = path.to_string_lossy().to_string();
        let file = File::open(path).map_err(|e| CheckpointError::Io {
            path: display.clone(),
            source: e,
        })?;
        let checkpoint = Self::from_reader(BufReader::new(file)).map_err(|e| CheckpointError::Json {
            path: display,
            source: e,
        })?;
        if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }
        Ok(checkpoint)
    }
}
