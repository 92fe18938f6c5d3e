pub mod defaults;

use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use cellsim::engine::config::{SimulationConfig, SimulationConfigBuilder};
use defaults::DefaultsConfig;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialRunConfig {
    time_unit: Option<f64>,
    iterations: Option<u64>,
    seed: Option<u64>,
    count_interval: Option<u64>,
    defragmentation_interval: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialSurfaceConfig {
    grid_density: Option<f64>,
    center_molecules_on_grid: Option<bool>,
    vacancy_search_radius: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialPartitionConfig {
    origin: Option<[f64; 3]>,
    edge_length: Option<f64>,
    subparts_per_dim: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialReactionConfig {
    rx_radius_3d: Option<f64>,
}

/// Simulation settings as read from a TOML file, every field optional.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialSimulationConfig {
    simulation: Option<PartialRunConfig>,
    surfaces: Option<PartialSurfaceConfig>,
    partition: Option<PartialPartitionConfig>,
    reactions: Option<PartialReactionConfig>,
}

/// Values given as dedicated command-line flags; these win over the file and `-S`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLineOverrides {
    pub iterations: Option<u64>,
    pub seed: Option<u64>,
    pub time_unit: Option<f64>,
}

impl From<&RunArgs> for CommandLineOverrides {
    fn from(args: &RunArgs) -> Self {
        Self {
            iterations: args.iterations,
            seed: args.seed,
            time_unit: args.time_unit,
        }
    }
}

impl PartialSimulationConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Reads `path` if one is given; otherwise every setting falls back to its default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn merge_with_cli(
        mut self,
        set_values: &[String],
        overrides: CommandLineOverrides,
    ) -> Result<SimulationConfig> {
        self.apply_set_values(set_values)?;
        let defaults = DefaultsConfig::default();

        let run = self.simulation.take().unwrap_or_default();
        let surfaces = self.surfaces.take().unwrap_or_default();
        let partition = self.partition.take().unwrap_or_default();
        let reactions = self.reactions.take().unwrap_or_default();

        let mut builder = SimulationConfigBuilder::new()
            .time_unit(overrides.time_unit.or(run.time_unit).unwrap_or(defaults.time_unit))
            .iterations(overrides.iterations.or(run.iterations).unwrap_or(defaults.iterations))
            .seed(overrides.seed.or(run.seed).unwrap_or(defaults.seed))
            .count_interval(run.count_interval.unwrap_or(defaults.count_interval))
            .defragmentation_interval(
                run.defragmentation_interval
                    .unwrap_or(defaults.defragmentation_interval),
            )
            .grid_density(surfaces.grid_density.unwrap_or(defaults.grid_density))
            .center_molecules_on_grid(surfaces.center_molecules_on_grid.unwrap_or(false))
            .partition_edge_length(partition.edge_length.unwrap_or(defaults.partition_edge_length))
            .subparts_per_dim(partition.subparts_per_dim.unwrap_or(defaults.subparts_per_dim));

        if let Some(radius) = surfaces.vacancy_search_radius {
            builder = builder.vacancy_search_radius(radius);
        }
        if let Some([x, y, z]) = partition.origin {
            builder = builder.partition_origin([x, y, z].into());
        }
        if let Some(radius) = reactions.rx_radius_3d {
            builder = builder.rx_radius_3d(radius);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "simulation.time-unit" => {
                    self.run().time_unit = Some(parse_value(key, value)?);
                }
                "simulation.iterations" => {
                    self.run().iterations = Some(parse_value(key, value)?);
                }
                "simulation.seed" => {
                    self.run().seed = Some(parse_value(key, value)?);
                }
                "simulation.count-interval" => {
                    self.run().count_interval = Some(parse_value(key, value)?);
                }
                "simulation.defragmentation-interval" => {
                    self.run().defragmentation_interval = Some(parse_value(key, value)?);
                }
                "surfaces.grid-density" => {
                    self.surfaces().grid_density = Some(parse_value(key, value)?);
                }
                "surfaces.center-molecules-on-grid" => {
                    self.surfaces().center_molecules_on_grid = Some(parse_value(key, value)?);
                }
                "surfaces.vacancy-search-radius" => {
                    self.surfaces().vacancy_search_radius = Some(parse_value(key, value)?);
                }
                "partition.edge-length" => {
                    self.partition().edge_length = Some(parse_value(key, value)?);
                }
                "partition.subparts-per-dim" => {
                    self.partition().subparts_per_dim = Some(parse_value(key, value)?);
                }
                "reactions.rx-radius-3d" => {
                    self.reactions
                        .get_or_insert_with(Default::default)
                        .rx_radius_3d = Some(parse_value(key, value)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn run(&mut self) -> &mut PartialRunConfig {
        self.simulation.get_or_insert_with(Default::default)
    }

    fn surfaces(&mut self) -> &mut PartialSurfaceConfig {
        self.surfaces.get_or_insert_with(Default::default)
    }

    fn partition(&mut self) -> &mut PartialPartitionConfig {
        self.partition.get_or_insert_with(Default::default)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!(
            "Invalid {} value for {}: {}",
            std::any::type_name::<T>(),
            key,
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const FILE: &str = r#"
        [simulation]
        time-unit = 1e-5
        iterations = 500
        count-interval = 10

        [surfaces]
        grid-density = 2500.0

        [partition]
        origin = [-2.0, -2.0, -2.0]
        edge-length = 4.0
        subparts-per-dim = 8
    "#;

    fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn file_values_fill_in_over_defaults() {
        let (_dir, path) = write_config(FILE);
        let config = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&[], CommandLineOverrides::default())
            .unwrap();

        assert_eq!(config.time_unit, 1e-5);
        assert_eq!(config.iterations, 500);
        assert_eq!(config.count_interval, 10);
        assert_eq!(config.grid_density, 2500.0);
        assert_eq!(config.partition.edge_length, 4.0);
        assert_eq!(config.partition.subparts_per_dim, 8);
        assert_eq!(config.partition.origin.x, -2.0);
        assert_eq!(config.seed, DefaultsConfig::default().seed);
        assert_eq!(config.defragmentation_interval, 100);
        assert!(!config.center_molecules_on_grid);
    }

    #[test]
    fn flags_override_set_values_which_override_the_file() {
        let (_dir, path) = write_config(FILE);
        let set = vec![
            "simulation.iterations=50".to_string(),
            "simulation.seed=9".to_string(),
            "surfaces.center-molecules-on-grid=true".to_string(),
        ];
        let overrides = CommandLineOverrides {
            iterations: Some(75),
            ..Default::default()
        };
        let config = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&set, overrides)
            .unwrap();

        assert_eq!(config.iterations, 75);
        assert_eq!(config.seed, 9);
        assert!(config.center_molecules_on_grid);
    }

    #[test]
    fn missing_file_section_uses_defaults() {
        let config = PartialSimulationConfig::load(None)
            .unwrap()
            .merge_with_cli(&[], CommandLineOverrides::default())
            .unwrap();
        let defaults = DefaultsConfig::default();
        assert_eq!(config.time_unit, defaults.time_unit);
        assert_eq!(config.partition.edge_length, defaults.partition_edge_length);
        assert_eq!(config.partition.origin.x, -defaults.partition_edge_length / 2.0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let (_dir, path) = write_config("[simulation]\ntime-step = 1e-6\n");
        let result = PartialSimulationConfig::from_file(&path);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn invalid_set_values_are_reported() {
        let partial = PartialSimulationConfig::default();
        let result = partial.merge_with_cli(&["simulation.seed".to_string()], CommandLineOverrides::default());
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("KEY=VALUE")));

        let partial = PartialSimulationConfig::default();
        let result = partial.merge_with_cli(&["simulation.seed=abc".to_string()], CommandLineOverrides::default());
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("simulation.seed")));

        let partial = PartialSimulationConfig::default();
        let result = partial.merge_with_cli(&["forcefield.s-factor=1".to_string()], CommandLineOverrides::default());
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("Unsupported")));
    }

    #[test]
    fn builder_validation_surfaces_as_config_error() {
        let partial = PartialSimulationConfig::default();
        let result = partial.merge_with_cli(&["simulation.time-unit=-1".to_string()], CommandLineOverrides::default());
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("time_unit")));
    }
}
