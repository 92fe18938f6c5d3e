use crate::core::models::reaction::{Orientation, ReactionKind};
use crate::core::models::species::{CustomStep, SpeciesKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Species '{name}' sets both a custom time step and a custom space step")]
    ConflictingCustomSteps { name: String },
    #[error("Invalid reactant or product '{0}'")]
    InvalidParticipant(String),
    #[error("Release of '{species}' must give exactly one of count, concentration or density")]
    AmbiguousReleaseAmount { species: String },
}

/// Complete description of a model: chemistry, geometry, releases and observables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModelDescription {
    #[serde(default)]
    pub species: Vec<SpeciesDef>,
    #[serde(default)]
    pub reactions: Vec<ReactionDef>,
    #[serde(default)]
    pub objects: Vec<ObjectDef>,
    #[serde(default)]
    pub releases: Vec<ReleaseDef>,
    #[serde(default)]
    pub counts: Vec<CountDef>,
    #[serde(default)]
    pub clamps: Vec<ClampDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SpeciesDef {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: SpeciesKind,
    #[serde(default)]
    pub diffusion_constant: f64,
    #[serde(default)]
    pub target_only: bool,
    pub custom_time_step: Option<f64>,
    pub custom_space_step: Option<f64>,
}

fn default_kind() -> SpeciesKind {
    SpeciesKind::Volume
}

impl SpeciesDef {
    pub fn custom_step(&self) -> Result<Option<CustomStep>, ModelLoadError> {
        match (self.custom_time_step, self.custom_space_step) {
            (Some(_), Some(_)) => Err(ModelLoadError::ConflictingCustomSteps {
                name: self.name.clone(),
            }),
            (Some(t), None) => Ok(Some(CustomStep::TimeStep(t))),
            (None, Some(s)) => Ok(Some(CustomStep::SpaceStep(s))),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReactionDef {
    pub name: Option<String>,
    /// Participants with an optional orientation mark: `'` up, `,` down, `;` any.
    pub reactants: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub kind: ReactionKind,
}

impl ReactionDef {
    /// The explicit name, or one derived from the participants (`A + B -> C`).
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            let side = |v: &[String]| {
                if v.is_empty() {
                    "NULL".to_string()
                } else {
                    v.join(" + ")
                }
            };
            format!("{} -> {}", side(&self.reactants), side(&self.products))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObjectDef {
    pub name: String,
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[usize; 3]>,
    #[serde(default)]
    pub counted: bool,
    #[serde(default)]
    pub report_wall_hits: bool,
    pub volume_compartment: Option<String>,
    pub surface_compartment: Option<String>,
    pub color: Option<[f32; 4]>,
    #[serde(default)]
    pub regions: Vec<RegionDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegionDef {
    pub name: String,
    /// Wall indices within the object; omitted means every wall.
    pub walls: Option<Vec<usize>>,
    pub surface_class: Option<String>,
    pub color: Option<[f32; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReleaseShapeDef {
    Point {
        position: [f64; 3],
    },
    Box {
        min: [f64; 3],
        max: [f64; 3],
    },
    Sphere {
        center: [f64; 3],
        radius: f64,
    },
    Object {
        object: String,
    },
    Region {
        object: String,
        #[serde(default = "default_region")]
        region: String,
    },
}

fn default_region() -> String {
    crate::core::geometry::mesh::ALL_REGION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReleaseDef {
    /// Species, with an orientation mark for surface releases.
    pub species: String,
    pub shape: ReleaseShapeDef,
    pub count: Option<u64>,
    /// Molar concentration, for volume releases.
    pub concentration: Option<f64>,
    /// Molecules per µm², for surface releases.
    pub density: Option<f64>,
    /// Release time in seconds.
    #[serde(default)]
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReleaseAmount {
    Count(u64),
    Concentration(f64),
    Density(f64),
}

impl ReleaseDef {
    pub fn amount(&self) -> Result<ReleaseAmount, ModelLoadError> {
        match (self.count, self.concentration, self.density) {
            (Some(n), None, None) => Ok(ReleaseAmount::Count(n)),
            (None, Some(c), None) => Ok(ReleaseAmount::Concentration(c)),
            (None, None, Some(d)) => Ok(ReleaseAmount::Density(d)),
            _ => Err(ModelLoadError::AmbiguousReleaseAmount {
                species: self.species.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CountDef {
    pub name: String,
    /// Regular expression matched against full species names.
    pub species: String,
    /// Restrict the count to the inside of this object.
    pub object: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClampDef {
    pub surface_class: String,
    /// Clamped volume species; the orientation mark selects the side (`'` front, `,` back).
    pub species: String,
    /// Molar concentration held at the surface.
    pub concentration: f64,
}

/// Splits a participant such as `A'` into its species name and orientation.
pub fn parse_participant(text: &str) -> Result<(String, Orientation), ModelLoadError> {
    let trimmed = text.trim();
    let (name, orientation) = match trimmed.chars().last() {
        Some('\'') => (&trimmed[..trimmed.len() - 1], Orientation::Up),
        Some(',') => (&trimmed[..trimmed.len() - 1], Orientation::Down),
        Some(';') => (&trimmed[..trimmed.len() - 1], Orientation::Any),
        _ => (trimmed, Orientation::Any),
    };
    let name = name.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '@' | '(' | ')' | '~' | '!'));
    if !valid {
        return Err(ModelLoadError::InvalidParticipant(text.to_string()));
    }
    Ok((name.to_string(), orientation))
}

impl ModelDescription {
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ModelLoadError> {
        toml::from_str(content).map_err(|e| ModelLoadError::Toml {
            path: origin.to_string(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MODEL: &str = r#"
        [[species]]
        name = "A"
        diffusion-constant = 1e-6

        [[species]]
        name = "S"
        kind = "surface"
        diffusion-constant = 1e-8
        custom-time-step = 1e-5

        [[species]]
        name = "sc"
        kind = "surface-class"

        [[reactions]]
        name = "adsorb"
        reactants = ["A'", "sc'"]
        products = ["S'"]
        rate = 1e6

        [[reactions]]
        reactants = ["A", "sc"]
        kind = "transparent"

        [[objects]]
        name = "plane"
        vertices = [[0, 0, 0], [1, 0, 0], [0, 1, 0]]
        triangles = [[0, 1, 2]]

        [[objects.regions]]
        name = "top"
        surface-class = "sc"

        [[releases]]
        species = "A"
        shape = { type = "box", min = [0, 0, 0], max = [1, 1, 1] }
        count = 10

        [[releases]]
        species = "S'"
        shape = { type = "region", object = "plane" }
        density = 100.0

        [[counts]]
        name = "all_A"
        species = "^A$"
    "#;

    #[test]
    fn parses_complete_model() {
        let model = ModelDescription::from_toml_str(MODEL, "inline").unwrap();
        assert_eq!(model.species.len(), 3);
        assert_eq!(model.species[1].kind, SpeciesKind::Surface);
        assert_eq!(
            model.species[1].custom_step().unwrap(),
            Some(CustomStep::TimeStep(1e-5))
        );
        assert_eq!(model.reactions[1].kind, ReactionKind::Transparent);
        assert_eq!(model.reactions[1].display_name(), "A + sc -> NULL");
        assert_eq!(model.objects[0].regions[0].walls, None);
        assert_eq!(model.releases[0].amount().unwrap(), ReleaseAmount::Count(10));
        assert_eq!(
            model.releases[1].shape,
            ReleaseShapeDef::Region {
                object: "plane".into(),
                region: "ALL".into()
            }
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ModelDescription::from_toml_str("[[species]]\nname = \"A\"\nspeed = 3\n", "inline");
        assert!(matches!(err, Err(ModelLoadError::Toml { .. })));
    }

    #[test]
    fn participant_orientation_marks() {
        assert_eq!(parse_participant("A'").unwrap(), ("A".into(), Orientation::Up));
        assert_eq!(parse_participant(" B, ").unwrap(), ("B".into(), Orientation::Down));
        assert_eq!(parse_participant("C;").unwrap(), ("C".into(), Orientation::Any));
        assert_eq!(parse_participant("D").unwrap(), ("D".into(), Orientation::Any));
        assert!(parse_participant("'").is_err());
        assert!(parse_participant("A B").is_err());
    }

    #[test]
    fn ambiguous_release_amount_is_rejected() {
        let release = ReleaseDef {
            species: "A".into(),
            shape: ReleaseShapeDef::Point {
                position: [0.0; 3],
            },
            count: Some(1),
            concentration: Some(1e-6),
            density: None,
            time: 0.0,
        };
        assert!(matches!(
            release.amount(),
            Err(ModelLoadError::AmbiguousReleaseAmount { .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let result = ModelDescription::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ModelLoadError::Io { .. })));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.toml");
        fs::write(&path, MODEL).unwrap();
        let model = ModelDescription::load(&path).unwrap();
        assert_eq!(model.counts[0].name, "all_A");
    }
}
