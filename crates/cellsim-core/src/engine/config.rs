use crate::core::chemistry::pb_factor::{PbContext, default_rx_radius};
use nalgebra::Point3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionConfig {
    /// Lower corner of the partitioned cube, µm.
    pub origin: Point3<f64>,
    /// Edge length of the partitioned cube, µm.
    pub edge_length: f64,
    pub subparts_per_dim: u32,
}

impl PartitionConfig {
    pub fn subpart_edge_length(&self) -> f64 {
        self.edge_length / self.subparts_per_dim as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Seconds per internal time unit (one iteration).
    pub time_unit: f64,
    /// Surface tiles per µm².
    pub grid_density: f64,
    pub partition: PartitionConfig,
    /// Interaction radius of volume molecules, µm.
    pub rx_radius_3d: f64,
    /// Radius searched for vacant tiles for extra surface products, µm.
    pub vacancy_search_radius: f64,
    pub seed: u64,
    pub iterations: u64,
    pub count_interval: u64,
    pub defragmentation_interval: u64,
    /// Snap surface molecules to tile centers instead of keeping continuous positions.
    pub center_molecules_on_grid: bool,
}

impl SimulationConfig {
    pub fn pb_context(&self) -> PbContext {
        PbContext {
            time_unit: self.time_unit,
            grid_density: self.grid_density,
            rx_radius_3d: self.rx_radius_3d,
        }
    }
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    time_unit: Option<f64>,
    grid_density: Option<f64>,
    partition_origin: Option<Point3<f64>>,
    partition_edge_length: Option<f64>,
    subparts_per_dim: Option<u32>,
    rx_radius_3d: Option<f64>,
    vacancy_search_radius: Option<f64>,
    seed: Option<u64>,
    iterations: Option<u64>,
    count_interval: Option<u64>,
    defragmentation_interval: Option<u64>,
    center_molecules_on_grid: Option<bool>,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_unit(mut self, seconds: f64) -> Self {
        self.time_unit = Some(seconds);
        self
    }
    pub fn grid_density(mut self, tiles_per_um2: f64) -> Self {
        self.grid_density = Some(tiles_per_um2);
        self
    }
    pub fn partition_origin(mut self, origin: Point3<f64>) -> Self {
        self.partition_origin = Some(origin);
        self
    }
    pub fn partition_edge_length(mut self, length: f64) -> Self {
        self.partition_edge_length = Some(length);
        self
    }
    pub fn subparts_per_dim(mut self, n: u32) -> Self {
        self.subparts_per_dim = Some(n);
        self
    }
    pub fn rx_radius_3d(mut self, radius: f64) -> Self {
        self.rx_radius_3d = Some(radius);
        self
    }
    pub fn vacancy_search_radius(mut self, radius: f64) -> Self {
        self.vacancy_search_radius = Some(radius);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn iterations(mut self, n: u64) -> Self {
        self.iterations = Some(n);
        self
    }
    pub fn count_interval(mut self, n: u64) -> Self {
        self.count_interval = Some(n);
        self
    }
    pub fn defragmentation_interval(mut self, n: u64) -> Self {
        self.defragmentation_interval = Some(n);
        self
    }
    pub fn center_molecules_on_grid(mut self, enabled: bool) -> Self {
        self.center_molecules_on_grid = Some(enabled);
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        let time_unit = positive(
            "time_unit",
            self.time_unit
                .ok_or(ConfigError::MissingParameter("time_unit"))?,
        )?;
        let grid_density = positive(
            "grid_density",
            self.grid_density
                .ok_or(ConfigError::MissingParameter("grid_density"))?,
        )?;
        let edge_length = positive(
            "partition_edge_length",
            self.partition_edge_length
                .ok_or(ConfigError::MissingParameter("partition_edge_length"))?,
        )?;
        let origin = self
            .partition_origin
            .unwrap_or_else(|| Point3::new(-edge_length / 2.0, -edge_length / 2.0, -edge_length / 2.0));
        if !origin.iter().all(|c| c.is_finite()) {
            return Err(ConfigError::InvalidValue {
                name: "partition_origin",
                reason: "coordinates must be finite".into(),
            });
        }
        let subparts_per_dim = self.subparts_per_dim.unwrap_or(1);
        if subparts_per_dim == 0 {
            return Err(ConfigError::InvalidValue {
                name: "subparts_per_dim",
                reason: "must be at least 1".into(),
            });
        }
        let rx_radius_3d = match self.rx_radius_3d {
            Some(r) => positive("rx_radius_3d", r)?,
            None => default_rx_radius(grid_density),
        };
        let vacancy_search_radius = self.vacancy_search_radius.unwrap_or(0.0);
        if !(vacancy_search_radius.is_finite() && vacancy_search_radius >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "vacancy_search_radius",
                reason: format!("must be a non-negative number, got {vacancy_search_radius}"),
            });
        }
        let count_interval = self.count_interval.unwrap_or(1);
        if count_interval == 0 {
            return Err(ConfigError::InvalidValue {
                name: "count_interval",
                reason: "must be at least 1".into(),
            });
        }

        Ok(SimulationConfig {
            time_unit,
            grid_density,
            partition: PartitionConfig {
                origin,
                edge_length,
                subparts_per_dim,
            },
            rx_radius_3d,
            vacancy_search_radius,
            seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
            iterations: self
                .iterations
                .ok_or(ConfigError::MissingParameter("iterations"))?,
            count_interval,
            defragmentation_interval: self.defragmentation_interval.unwrap_or(100),
            center_molecules_on_grid: self.center_molecules_on_grid.unwrap_or(false),
        })
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> SimulationConfigBuilder {
        SimulationConfigBuilder::new()
            .time_unit(1e-6)
            .grid_density(10_000.0)
            .partition_edge_length(2.0)
            .seed(1)
            .iterations(10)
    }

    #[test]
    fn build_fills_defaults() {
        let config = complete().build().unwrap();
        assert_eq!(config.partition.origin, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(config.partition.subparts_per_dim, 1);
        assert_eq!(config.rx_radius_3d, default_rx_radius(10_000.0));
        assert_eq!(config.count_interval, 1);
        assert!(!config.center_molecules_on_grid);
    }

    #[test]
    fn build_fails_if_required_parameter_is_missing() {
        let result = SimulationConfigBuilder::new()
            .grid_density(1.0)
            .partition_edge_length(1.0)
            .seed(1)
            .iterations(1)
            .build();
        assert_eq!(result.unwrap_err(), ConfigError::MissingParameter("time_unit"));
    }

    #[test]
    fn build_rejects_non_positive_values() {
        assert!(matches!(
            complete().time_unit(0.0).build(),
            Err(ConfigError::InvalidValue { name: "time_unit", .. })
        ));
        assert!(matches!(
            complete().subparts_per_dim(0).build(),
            Err(ConfigError::InvalidValue { name: "subparts_per_dim", .. })
        ));
        assert!(matches!(
            complete().vacancy_search_radius(-1.0).build(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn subpart_edge_length_divides_partition() {
        let config = complete().subparts_per_dim(4).build().unwrap();
        assert_eq!(config.partition.subpart_edge_length(), 0.5);
    }
}
