use super::ids::SpeciesId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Conversion factor from cm² to µm².
pub const UM2_PER_CM2: f64 = 1.0e8;

#[derive(Debug, Error, PartialEq)]
pub enum SpeciesError {
    #[error("Species '{name}' is defined twice with conflicting properties")]
    ConflictingDefinition { name: String },
    #[error("Unknown species '{0}'")]
    Unknown(String),
    #[error("Species '{name}' has invalid diffusion constant {value}")]
    InvalidDiffusionConstant { name: String, value: f64 },
    #[error("Species '{name}' has an invalid custom step: {reason}")]
    InvalidCustomStep { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeciesKind {
    Volume,
    Surface,
    SurfaceClass,
}

/// Overrides of the default per-species step, mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CustomStep {
    /// Step length in seconds.
    TimeStep(f64),
    /// Mean displacement per step in µm.
    SpaceStep(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub name: String,
    pub kind: SpeciesKind,
    /// Diffusion constant in cm²/s (3D for volume species, 2D for surface species).
    pub diffusion_constant: f64,
    /// Cannot initiate bimolecular reactions; only be hit by a partner.
    pub target_only: bool,
    pub custom_step: Option<CustomStep>,
    /// Characteristic displacement length in µm, derived by [`Species::update_steps`].
    pub space_step: f64,
    /// Step length in internal time units, derived by [`Species::update_steps`].
    pub time_step: f64,
}

impl Species {
    pub fn new(name: impl Into<String>, kind: SpeciesKind, diffusion_constant: f64) -> Self {
        Self {
            id: SpeciesId(0),
            name: name.into(),
            kind,
            diffusion_constant,
            target_only: false,
            custom_step: None,
            space_step: 0.0,
            time_step: 1.0,
        }
    }

    pub fn with_target_only(mut self, target_only: bool) -> Self {
        self.target_only = target_only;
        self
    }

    pub fn with_custom_step(mut self, step: Option<CustomStep>) -> Self {
        self.custom_step = step;
        self
    }

    #[inline]
    pub fn is_volume(&self) -> bool {
        self.kind == SpeciesKind::Volume
    }

    #[inline]
    pub fn is_surface(&self) -> bool {
        self.kind == SpeciesKind::Surface
    }

    #[inline]
    pub fn is_surface_class(&self) -> bool {
        self.kind == SpeciesKind::SurfaceClass
    }

    #[inline]
    pub fn can_diffuse(&self) -> bool {
        self.diffusion_constant > 0.0 && !self.is_surface_class()
    }

    /// Diffusion constant in µm²/s.
    pub fn diffusion_um2_per_s(&self) -> f64 {
        self.diffusion_constant * UM2_PER_CM2
    }

    /// Derives `space_step` (µm) and `time_step` (internal units) from the diffusion constant.
    ///
    /// A non-diffusing species gets a zero space step and a time step of exactly one
    /// internal unit.
    ///
    /// # Arguments
    ///
    /// * `time_unit` - Duration of one internal time unit in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`SpeciesError`] when the diffusion constant or a custom step is not a
    /// finite, non-negative (respectively positive) number.
    pub fn update_steps(&mut self, time_unit: f64) -> Result<(), SpeciesError> {
        let d = self.diffusion_constant;
        if !d.is_finite() || d < 0.0 {
            return Err(SpeciesError::InvalidDiffusionConstant {
                name: self.name.clone(),
                value: d,
            });
        }
        if d == 0.0 || self.is_surface_class() {
            self.space_step = 0.0;
            self.time_step = 1.0;
            return Ok(());
        }

        let four_d = 4.0 * self.diffusion_um2_per_s();
        match self.custom_step {
            None => {
                self.time_step = 1.0;
                self.space_step = (four_d * time_unit).sqrt();
            }
            Some(CustomStep::TimeStep(seconds)) => {
                if !(seconds.is_finite() && seconds > 0.0) {
                    return Err(self.invalid_step(format!("time step {seconds} s")));
                }
                self.time_step = seconds / time_unit;
                self.space_step = (four_d * seconds).sqrt();
            }
            Some(CustomStep::SpaceStep(length)) => {
                if !(length.is_finite() && length > 0.0) {
                    return Err(self.invalid_step(format!("space step {length} um")));
                }
                self.space_step = length;
                self.time_step = length * length / four_d / time_unit;
            }
        }
        Ok(())
    }

    /// Duration of one step of this species in seconds.
    pub fn time_step_seconds(&self, time_unit: f64) -> f64 {
        self.time_step * time_unit
    }

    fn invalid_step(&self, reason: String) -> SpeciesError {
        SpeciesError::InvalidCustomStep {
            name: self.name.clone(),
            reason,
        }
    }

    fn same_definition(&self, other: &Species) -> bool {
        self.kind == other.kind
            && self.diffusion_constant == other.diffusion_constant
            && self.target_only == other.target_only
            && self.custom_step == other.custom_step
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpeciesTable {
    species: Vec<Species>,
    by_name: HashMap<String, SpeciesId>,
}

impl SpeciesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a species, merging identical duplicate definitions.
    ///
    /// # Return
    ///
    /// The id of the (possibly pre-existing) species.
    ///
    /// # Errors
    ///
    /// Returns [`SpeciesError::ConflictingDefinition`] when a species with the same name
    /// but different properties is already registered.
    pub fn add(&mut self, mut species: Species) -> Result<SpeciesId, SpeciesError> {
        if let Some(&existing) = self.by_name.get(&species.name) {
            if self.species[existing.index()].same_definition(&species) {
                return Ok(existing);
            }
            return Err(SpeciesError::ConflictingDefinition { name: species.name });
        }
        let id = SpeciesId(self.species.len() as u32);
        species.id = id;
        self.by_name.insert(species.name.clone(), id);
        self.species.push(species);
        Ok(id)
    }

    pub fn update_steps(&mut self, time_unit: f64) -> Result<(), SpeciesError> {
        self.species
            .iter_mut()
            .try_for_each(|s| s.update_steps(time_unit))
    }

    pub fn get(&self, id: SpeciesId) -> Option<&Species> {
        self.species.get(id.index())
    }

    pub fn id_of(&self, name: &str) -> Result<SpeciesId, SpeciesError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SpeciesError::Unknown(name.to_string()))
    }

    pub fn by_name(&self, name: &str) -> Option<&Species> {
        self.by_name.get(name).map(|id| &self.species[id.index()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_diffusion_gives_zero_space_step_and_unit_time_step() {
        let mut s = Species::new("Z", SpeciesKind::Volume, 0.0);
        s.update_steps(1e-6).unwrap();
        assert_eq!(s.space_step, 0.0);
        assert_eq!(s.time_step, 1.0);
        assert!(!s.can_diffuse());
    }

    #[test]
    fn default_space_step_follows_four_d_t() {
        let mut s = Species::new("A", SpeciesKind::Volume, 1e-6);
        s.update_steps(1e-6).unwrap();
        // 4 * 1e-6 cm²/s * 1e8 µm²/cm² * 1e-6 s = 4e-4 µm²
        assert_relative_eq!(s.space_step, 0.02, epsilon = 1e-12);
        assert_eq!(s.time_step, 1.0);
    }

    #[test]
    fn custom_time_step_rescales_space_step() {
        let mut s = Species::new("A", SpeciesKind::Volume, 1e-6)
            .with_custom_step(Some(CustomStep::TimeStep(4e-6)));
        s.update_steps(1e-6).unwrap();
        assert_relative_eq!(s.time_step, 4.0, epsilon = 1e-12);
        assert_relative_eq!(s.space_step, 0.04, epsilon = 1e-12);
    }

    #[test]
    fn custom_space_step_derives_time_step() {
        let mut s = Species::new("A", SpeciesKind::Surface, 1e-6)
            .with_custom_step(Some(CustomStep::SpaceStep(0.04)));
        s.update_steps(1e-6).unwrap();
        assert_relative_eq!(s.time_step, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn negative_diffusion_constant_is_rejected() {
        let mut s = Species::new("A", SpeciesKind::Volume, -1.0);
        assert!(matches!(
            s.update_steps(1e-6),
            Err(SpeciesError::InvalidDiffusionConstant { .. })
        ));
    }

    #[test]
    fn identical_duplicates_merge_and_conflicts_fail() {
        let mut table = SpeciesTable::new();
        let a = table
            .add(Species::new("A", SpeciesKind::Volume, 1e-6))
            .unwrap();
        let again = table
            .add(Species::new("A", SpeciesKind::Volume, 1e-6))
            .unwrap();
        assert_eq!(a, again);
        assert_eq!(table.len(), 1);

        let err = table
            .add(Species::new("A", SpeciesKind::Surface, 1e-6))
            .unwrap_err();
        assert_eq!(
            err,
            SpeciesError::ConflictingDefinition {
                name: "A".to_string()
            }
        );
    }

    #[test]
    fn lookup_by_name_reports_unknown_species() {
        let table = SpeciesTable::new();
        assert_eq!(
            table.id_of("missing"),
            Err(SpeciesError::Unknown("missing".to_string()))
        );
    }
}
