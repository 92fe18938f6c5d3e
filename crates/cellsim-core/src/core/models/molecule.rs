use super::ids::{CountedVolumeId, MoleculeId, SpeciesId, SubpartIndex, TileIndex, WallIndex};
use super::reaction::Orientation;
use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MoleculeLocation {
    Volume {
        position: Point3<f64>,
        subpart: SubpartIndex,
    },
    Surface {
        /// Position in the owning wall's (u, v) frame.
        position: Vector2<f64>,
        wall: WallIndex,
        tile: TileIndex,
        orientation: Orientation,
    },
}

/// Where a reaction product was born. Used to suppress an immediate reaction with a
/// sibling product, or with whatever sits on the creation tile, during the product's
/// first diffusion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationSite {
    pub reaction_serial: u64,
    pub wall: Option<WallIndex>,
    pub tile: Option<TileIndex>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoleculeFlags {
    pub defunct: bool,
    pub reschedule_unimol: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub id: MoleculeId,
    pub species: SpeciesId,
    pub location: MoleculeLocation,
    pub birthday: f64,
    /// Time (internal units) up to which the molecule has been diffused.
    pub diffusion_time: f64,
    /// Pending unimolecular reaction time; `None` means the molecule never decays.
    pub unimol_rx_time: Option<f64>,
    pub counted_volume: CountedVolumeId,
    pub flags: MoleculeFlags,
    pub creation_site: Option<CreationSite>,
}

impl Molecule {
    pub fn new_volume(species: SpeciesId, position: Point3<f64>, time: f64) -> Self {
        Self {
            id: MoleculeId(0),
            species,
            location: MoleculeLocation::Volume {
                position,
                subpart: SubpartIndex(0),
            },
            birthday: time,
            diffusion_time: time,
            unimol_rx_time: None,
            counted_volume: CountedVolumeId::OUTSIDE_ALL,
            flags: MoleculeFlags::default(),
            creation_site: None,
        }
    }

    pub fn new_surface(
        species: SpeciesId,
        wall: WallIndex,
        tile: TileIndex,
        position: Vector2<f64>,
        orientation: Orientation,
        time: f64,
    ) -> Self {
        Self {
            id: MoleculeId(0),
            species,
            location: MoleculeLocation::Surface {
                position,
                wall,
                tile,
                orientation,
            },
            birthday: time,
            diffusion_time: time,
            unimol_rx_time: None,
            counted_volume: CountedVolumeId::OUTSIDE_ALL,
            flags: MoleculeFlags::default(),
            creation_site: None,
        }
    }

    #[inline]
    pub fn is_volume(&self) -> bool {
        matches!(self.location, MoleculeLocation::Volume { .. })
    }

    #[inline]
    pub fn is_surface(&self) -> bool {
        matches!(self.location, MoleculeLocation::Surface { .. })
    }

    #[inline]
    pub fn is_defunct(&self) -> bool {
        self.flags.defunct
    }

    pub fn volume_position(&self) -> Option<Point3<f64>> {
        match self.location {
            MoleculeLocation::Volume { position, .. } => Some(position),
            MoleculeLocation::Surface { .. } => None,
        }
    }

    pub fn surface_site(&self) -> Option<(WallIndex, TileIndex, Vector2<f64>, Orientation)> {
        match self.location {
            MoleculeLocation::Surface {
                position,
                wall,
                tile,
                orientation,
            } => Some((wall, tile, position, orientation)),
            MoleculeLocation::Volume { .. } => None,
        }
    }

    /// True when `other` was produced by the same reaction event and this molecule has not
    /// yet taken its first diffusion step.
    pub fn is_sibling_of(&self, other: &Molecule) -> bool {
        match (self.creation_site, other.creation_site) {
            (Some(a), Some(b)) => a.reaction_serial == b.reaction_serial,
            _ => false,
        }
    }

    /// Whether this molecule must not react with `other` during its first step: `other`
    /// is a sibling product or occupies the tile this molecule was created on.
    pub fn avoids_on_first_step(&self, other: &Molecule) -> bool {
        let Some(site) = self.creation_site else {
            return false;
        };
        if self.is_sibling_of(other) {
            return true;
        }
        matches!(
            other.surface_site(),
            Some((wall, tile, _, _)) if site.wall == Some(wall) && site.tile == Some(tile)
        )
    }
}

/// Kind of a per-molecule action in the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    Diffuse,
    UnimolecularReaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(serial: u64, site: Option<(u32, u32)>) -> Molecule {
        let mut m = Molecule::new_volume(SpeciesId(0), Point3::origin(), 0.0);
        m.creation_site = Some(CreationSite {
            reaction_serial: serial,
            wall: site.map(|(w, _)| WallIndex(w)),
            tile: site.map(|(_, t)| TileIndex(t)),
        });
        m
    }

    fn surface(wall: u32, tile: u32) -> Molecule {
        Molecule::new_surface(
            SpeciesId(1),
            WallIndex(wall),
            TileIndex(tile),
            Vector2::zeros(),
            Orientation::Up,
            0.0,
        )
    }

    #[test]
    fn siblings_share_a_reaction_serial() {
        let a = product(7, None);
        let b = product(7, None);
        let c = product(8, None);
        assert!(a.is_sibling_of(&b));
        assert!(!a.is_sibling_of(&c));
        assert!(!a.is_sibling_of(&surface(0, 0)));
    }

    #[test]
    fn first_step_avoids_creation_tile_and_siblings() {
        let me = product(3, Some((2, 5)));
        assert!(me.avoids_on_first_step(&surface(2, 5)));
        assert!(!me.avoids_on_first_step(&surface(2, 6)));
        assert!(!me.avoids_on_first_step(&surface(1, 5)));

        let mut sibling = surface(4, 0);
        sibling.creation_site = me.creation_site;
        assert!(me.avoids_on_first_step(&sibling));
    }

    #[test]
    fn molecules_past_their_first_step_avoid_nothing() {
        let mut me = product(3, Some((2, 5)));
        me.creation_site = None;
        assert!(!me.avoids_on_first_step(&surface(2, 5)));
        assert!(!me.avoids_on_first_step(&product(3, None)));
    }
}
