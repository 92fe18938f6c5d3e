/// Values used for settings that neither the config file nor the command line provide.
pub struct DefaultsConfig {
    pub time_unit: f64,
    pub iterations: u64,
    pub seed: u64,
    pub count_interval: u64,
    pub defragmentation_interval: u64,
    pub grid_density: f64,
    pub partition_edge_length: f64,
    pub subparts_per_dim: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            time_unit: 1e-6,
            iterations: 1000,
            seed: 1,
            count_interval: 1,
            defragmentation_interval: 100,
            grid_density: 10_000.0,
            partition_edge_length: 10.0,
            subparts_per_dim: 10,
        }
    }
}
