//! File formats of the simulator: TOML model descriptions, JSON checkpoints and CSV
//! count output.

pub mod checkpoint;
pub mod counts;
pub mod model;
