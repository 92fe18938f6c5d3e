use super::ids::SpeciesId;
use serde::{Deserialize, Serialize};

/// Orientation of a surface molecule (or the approach side of a volume molecule)
/// relative to the wall normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    Down,
    #[default]
    Any,
    Up,
}

impl Orientation {
    #[inline]
    pub fn value(self) -> i8 {
        match self {
            Orientation::Down => -1,
            Orientation::Any => 0,
            Orientation::Up => 1,
        }
    }

    pub fn from_sign(sign: i8) -> Self {
        match sign.signum() {
            -1 => Orientation::Down,
            1 => Orientation::Up,
            _ => Orientation::Any,
        }
    }

    pub fn flipped(self) -> Self {
        Orientation::from_sign(-self.value())
    }

    pub fn is_any(self) -> bool {
        self == Orientation::Any
    }
}

/// How a reaction rule acts. Only `Standard` rules go through the probability engine;
/// the others describe what a surface class does to molecules that touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionKind {
    #[default]
    Standard,
    Transparent,
    Reflect,
    AbsorbRegionBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactantSpec {
    pub species: SpeciesId,
    pub orientation: Orientation,
}

impl ReactantSpec {
    pub fn new(species: SpeciesId, orientation: Orientation) -> Self {
        Self {
            species,
            orientation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRule {
    pub name: String,
    pub reactants: Vec<ReactantSpec>,
    pub products: Vec<ReactantSpec>,
    /// Macroscopic rate: 1/s for unimolecular, 1/(M·s) for bimolecular volume reactions,
    /// µm²/(N·s) for reactions among surface molecules.
    pub rate: f64,
    pub kind: ReactionKind,
}

impl ReactionRule {
    pub fn new(
        name: impl Into<String>,
        reactants: Vec<ReactantSpec>,
        products: Vec<ReactantSpec>,
        rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            reactants,
            products,
            rate,
            kind: ReactionKind::Standard,
        }
    }

    pub fn with_kind(mut self, kind: ReactionKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Two orientation requirements are compatible with an actual relative orientation when
/// either is unconstrained, or their product matches the observed relative sign.
pub fn orientations_match(rule_a: Orientation, rule_b: Orientation, actual_relative: i8) -> bool {
    if rule_a.is_any() || rule_b.is_any() {
        return true;
    }
    rule_a.value() * rule_b.value() == actual_relative
}
