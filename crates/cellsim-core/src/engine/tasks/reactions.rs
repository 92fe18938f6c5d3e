use crate::core::chemistry::rxn_class::{Pathway, ReactionClass};
use crate::core::models::ids::{CountedVolumeId, MoleculeId, SpeciesId, TileIndex, WallIndex};
use crate::core::models::molecule::{CreationSite, Molecule};
use crate::core::models::reaction::{Orientation, orientations_match};
use crate::engine::error::EngineError;
use crate::engine::world::World;
use nalgebra::{Point3, Vector2};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, VecDeque};
use tracing::{trace, warn};

/// Distance between a surface and a volume product placed next to it, as a fraction of
/// the 3D interaction radius.
pub const PRODUCT_OFFSET: f64 = 1.0e-3;

/// Contact between a volume molecule and a wall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallContact {
    pub wall: WallIndex,
    pub point: Point3<f64>,
    /// `1` when the molecule arrived from the side the wall normal points to, else `-1`.
    pub side: i8,
}

/// The molecules (and wall) taking part in one reaction event.
#[derive(Debug, Clone, PartialEq)]
pub struct Encounter {
    /// The first molecule initiated the encounter; volume products of encounters without a
    /// surface appear at the position of the last one.
    pub reactants: Vec<MoleculeId>,
    pub time: f64,
    pub contact: Option<WallContact>,
}

/// Whether a pathway's orientation requirements hold for the observed orientations.
///
/// `actual` pairs each participant's species with its orientation relative to the
/// surface of the encounter: surface molecules report their own orientation, volume
/// molecules the side they came from, surface classes `1`, and participants that are not
/// near a surface `0` (unconstrained).
pub fn orientation_allows(pathway: &Pathway, actual: &[(SpeciesId, i8)]) -> bool {
    let mut used = vec![false; pathway.reactants.len()];
    let mut paired: Vec<(Orientation, i8)> = Vec::with_capacity(actual.len());
    for (species, observed) in actual {
        let Some(slot) = pathway
            .reactants
            .iter()
            .enumerate()
            .position(|(i, r)| !used[i] && r.species == *species)
        else {
            return false;
        };
        used[slot] = true;
        paired.push((pathway.reactants[slot].orientation, *observed));
    }
    paired.iter().enumerate().all(|(i, (rule_a, a))| {
        paired[i + 1..].iter().all(|(rule_b, b)| {
            *a == 0 || *b == 0 || orientations_match(*rule_a, *rule_b, a * b)
        })
    })
}

/// Tests an encounter against a class, honoring per-pathway orientation requirements.
///
/// Classes where no pathway accepts the observed orientations are skipped without drawing
/// a random number; a selected pathway that rejects them counts as no reaction.
pub fn test_class(
    rng: &mut ChaCha8Rng,
    class: &ReactionClass,
    scaling: f64,
    actual: &[(SpeciesId, i8)],
) -> Option<Pathway> {
    if !class.pathways().iter().any(|p| orientation_allows(p, actual)) {
        return None;
    }
    let index = class.test_encounter(rng, scaling)?;
    let pathway = class.pathway(index);
    orientation_allows(pathway, actual).then(|| pathway.clone())
}

fn sign_or_one(orientation: Orientation) -> i8 {
    if orientation.is_any() { 1 } else { orientation.value() }
}

#[derive(Debug, Clone, Copy)]
struct Reference {
    wall: WallIndex,
    tile: TileIndex,
    uv: Vector2<f64>,
    point: Point3<f64>,
    actual: i8,
    rule: i8,
}

enum Planned {
    Volume {
        species: SpeciesId,
        position: Point3<f64>,
        counted_volume: CountedVolumeId,
    },
    Surface {
        species: SpeciesId,
        wall: WallIndex,
        tile: TileIndex,
        uv: Vector2<f64>,
        orientation: Orientation,
    },
}

fn product_sign(rng: &mut ChaCha8Rng, product: Orientation, reference: &Reference) -> i8 {
    let own = if product.is_any() {
        if rng.gen_bool(0.5) { 1 } else { -1 }
    } else {
        product.value()
    };
    own * reference.rule * reference.actual
}

/// Fires `pathway` for `encounter`: consumes the reactants and places the products.
///
/// Product sites are chosen before anything changes. Surface products reuse the
/// reactants' tiles first, then the contacted tile, then vacant tiles within the vacancy
/// search radius.
///
/// # Return
///
/// `false` (with the world unchanged) when the surface products cannot all be placed.
pub fn fire(world: &mut World, encounter: &Encounter, pathway: &Pathway) -> Result<bool, EngineError> {
    let Some(reactants) = encounter
        .reactants
        .iter()
        .map(|id| world.partition.get(*id).filter(|m| !m.is_defunct()).cloned())
        .collect::<Option<Vec<Molecule>>>()
    else {
        return Ok(false);
    };

    let mut used = vec![false; reactants.len()];
    let mut wall_rule = Orientation::Any;
    let mut ordered: Vec<(&Molecule, Orientation)> = Vec::with_capacity(reactants.len());
    for spec in &pathway.reactants {
        if world.species_info(spec.species)?.is_surface_class() {
            wall_rule = spec.orientation;
            continue;
        }
        let slot = reactants
            .iter()
            .enumerate()
            .position(|(i, m)| !used[i] && m.species == spec.species)
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "reaction '{}' fired without reactant species {}",
                    pathway.name, spec.species
                ))
            })?;
        used[slot] = true;
        ordered.push((&reactants[slot], spec.orientation));
    }

    let reference = if let Some((wall, tile, uv, orientation, rule)) = ordered
        .iter()
        .find_map(|(m, rule)| m.surface_site().map(|(w, t, uv, o)| (w, t, uv, o, *rule)))
    {
        Some(Reference {
            wall,
            tile,
            uv,
            point: world.geometry.wall(wall).uv_to_xyz(&uv),
            actual: sign_or_one(orientation),
            rule: sign_or_one(rule),
        })
    } else if let Some(contact) = encounter.contact {
        let uv = world.geometry.wall(contact.wall).xyz_to_uv(&contact.point);
        let tile = world.geometry.ensure_grid(contact.wall).uv_to_tile(&uv);
        Some(Reference {
            wall: contact.wall,
            tile,
            uv,
            point: contact.point,
            actual: 1,
            rule: sign_or_one(wall_rule),
        })
    } else {
        None
    };

    let mut n_surface_products = 0;
    for product in &pathway.products {
        if world.species_info(product.species)?.is_surface() {
            n_surface_products += 1;
        }
    }

    let mut pool: Vec<(WallIndex, TileIndex, Vector2<f64>)> = ordered
        .iter()
        .filter_map(|(m, _)| m.surface_site().map(|(w, t, uv, _)| (w, t, uv)))
        .collect();
    if pool.len() < n_surface_products {
        if let (Some(r), Some(_)) = (&reference, encounter.contact) {
            let free = !world.geometry.ensure_grid(r.wall).is_occupied(r.tile);
            if free && !pool.iter().any(|(w, t, _)| (*w, *t) == (r.wall, r.tile)) {
                pool.push((r.wall, r.tile, r.uv));
            }
        }
    }
    if pool.len() < n_surface_products {
        let r = reference.ok_or_else(|| {
            EngineError::Internal(format!("reaction '{}' has surface products but no surface", pathway.name))
        })?;
        let claimed: Vec<(WallIndex, TileIndex)> = pool.iter().map(|(w, t, _)| (*w, *t)).collect();
        for (w, t) in find_vacant_tiles(world, (r.wall, r.tile), n_surface_products - pool.len(), &claimed) {
            let uv = if world.config.center_molecules_on_grid {
                world.geometry.ensure_grid(w).tile_center(t)
            } else {
                world.geometry.closest_position_in_tile((r.wall, r.tile), (w, t))?
            };
            pool.push((w, t, uv));
        }
    }
    if pool.len() < n_surface_products {
        world.stats.blocked_reactions += 1;
        trace!(reaction = %pathway.name, "No room for surface products");
        return Ok(false);
    }

    let volume_site = reactants
        .iter()
        .rev()
        .find_map(|m| m.volume_position().map(|p| (p, m.counted_volume)));

    let mut tiles = pool.into_iter();
    let mut planned = Vec::with_capacity(pathway.products.len());
    for product in &pathway.products {
        let is_surface = world.species_info(product.species)?.is_surface();
        match (is_surface, &reference) {
            (true, Some(r)) => {
                let (wall, tile, uv) = tiles
                    .next()
                    .ok_or_else(|| EngineError::Internal("surface product without a tile".to_string()))?;
                let uv = if world.config.center_molecules_on_grid {
                    world.geometry.ensure_grid(wall).tile_center(tile)
                } else {
                    uv
                };
                planned.push(Planned::Surface {
                    species: product.species,
                    wall,
                    tile,
                    uv,
                    orientation: Orientation::from_sign(product_sign(&mut world.rng, product.orientation, r)),
                });
            }
            (false, Some(r)) => {
                let side = product_sign(&mut world.rng, product.orientation, r);
                let wall = world.geometry.wall(r.wall);
                let offset = PRODUCT_OFFSET * world.config.rx_radius_3d;
                let position = r.point + wall.normal * (side as f64 * offset);
                let counted_volume = world
                    .counted_volumes
                    .crossing(wall.object, side > 0)
                    .unwrap_or_else(|| world.counted_volumes.volume_at(&world.geometry, &position));
                planned.push(Planned::Volume {
                    species: product.species,
                    position,
                    counted_volume,
                });
            }
            (false, None) => {
                let (position, counted_volume) = volume_site.ok_or_else(|| {
                    EngineError::Internal(format!("reaction '{}' has no site for products", pathway.name))
                })?;
                planned.push(Planned::Volume {
                    species: product.species,
                    position,
                    counted_volume,
                });
            }
            (true, None) => {
                return Err(EngineError::Internal(format!(
                    "reaction '{}' places a surface product without a surface",
                    pathway.name
                )));
            }
        }
    }

    let serial = world.next_reaction_serial();
    for id in &encounter.reactants {
        world.retire(*id);
    }
    let creation_site = CreationSite {
        reaction_serial: serial,
        wall: reference.map(|r| r.wall),
        tile: reference.map(|r| r.tile),
    };
    for product in planned {
        let mut molecule = match product {
            Planned::Volume {
                species,
                position,
                counted_volume,
            } => {
                let mut m = Molecule::new_volume(species, position, encounter.time);
                m.counted_volume = counted_volume;
                m
            }
            Planned::Surface {
                species,
                wall,
                tile,
                uv,
                orientation,
            } => Molecule::new_surface(species, wall, tile, uv, orientation, encounter.time),
        };
        molecule.creation_site = Some(creation_site);
        match world.place_molecule(molecule) {
            Ok(_) => {}
            Err(EngineError::OutsidePartition { x, y, z }) => {
                warn!(reaction = %pathway.name, x, y, z, "Product outside the partitioned volume dropped");
            }
            Err(err) => return Err(err),
        }
    }
    world.stats.reactions += 1;
    trace!(reaction = %pathway.name, time = encounter.time, serial, "Reaction fired");
    Ok(true)
}

fn tile_center_xyz(world: &mut World, (wall, tile): (WallIndex, TileIndex)) -> Point3<f64> {
    let uv = world.geometry.ensure_grid(wall).tile_center(tile);
    world.geometry.wall(wall).uv_to_xyz(&uv)
}

/// Breadth-first search over adjacent tiles for up to `needed` vacant tiles whose centers
/// lie within the vacancy search radius of `start`'s center.
fn find_vacant_tiles(
    world: &mut World,
    start: (WallIndex, TileIndex),
    needed: usize,
    claimed: &[(WallIndex, TileIndex)],
) -> Vec<(WallIndex, TileIndex)> {
    let radius = world.config.vacancy_search_radius;
    let mut found = Vec::new();
    if needed == 0 || radius <= 0.0 {
        return found;
    }
    let origin = tile_center_xyz(world, start);
    let mut visited = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some((wall, tile)) = queue.pop_front() {
        for next in world.geometry.neighbor_tiles(wall, tile) {
            if !visited.insert(next) {
                continue;
            }
            if (tile_center_xyz(world, next) - origin).norm() > radius {
                continue;
            }
            queue.push_back(next);
            let occupied = world.geometry.ensure_grid(next.0).is_occupied(next.1);
            if !occupied && !claimed.contains(&next) {
                found.push(next);
                if found.len() == needed {
                    return found;
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::reaction::ReactantSpec;
    use crate::engine::setup::tests::{cube_object_toml, world_from_toml};
    use approx::assert_relative_eq;

    fn pathway(reactants: &[(u32, Orientation)]) -> Pathway {
        Pathway {
            rule: 0,
            name: "r".into(),
            rate: 1.0,
            pb_factor: 1.0,
            reactants: reactants
                .iter()
                .map(|(s, o)| ReactantSpec::new(SpeciesId(*s), *o))
                .collect(),
            products: Vec::new(),
        }
    }

    #[test]
    fn volume_surface_orientation_uses_arrival_side() {
        let p = pathway(&[(0, Orientation::Up), (1, Orientation::Up)]);
        assert!(orientation_allows(&p, &[(0, 1), (1, 1)].map(|(s, o)| (SpeciesId(s), o))));
        assert!(!orientation_allows(&p, &[(0, -1), (1, 1)].map(|(s, o)| (SpeciesId(s), o))));
        assert!(orientation_allows(&p, &[(0, -1), (1, -1)].map(|(s, o)| (SpeciesId(s), o))));
    }

    #[test]
    fn unconstrained_participants_always_match() {
        let p = pathway(&[(0, Orientation::Any), (1, Orientation::Down)]);
        assert!(orientation_allows(&p, &[(SpeciesId(0), 1), (SpeciesId(1), 1)]));
        let q = pathway(&[(0, Orientation::Up), (1, Orientation::Down)]);
        assert!(orientation_allows(&q, &[(SpeciesId(0), 0), (SpeciesId(1), 1)]));
    }

    #[test]
    fn foreign_species_never_match() {
        let p = pathway(&[(0, Orientation::Any)]);
        assert!(!orientation_allows(&p, &[(SpeciesId(3), 1)]));
    }

    #[test]
    fn volume_product_leaves_the_wall_by_a_fraction_of_the_interaction_radius() {
        let toml = format!(
            r#"
            [[species]]
            name = "A"
            diffusion-constant = 1e-6

            [[species]]
            name = "S"
            kind = "surface"

            [[reactions]]
            reactants = ["S'"]
            products = ["A'"]
            rate = 1e5
            {}
            "#,
            cube_object_toml("box", 1.0, None)
        );
        let mut world = world_from_toml(&toml, 1e-6, 3);
        let s = world.species().id_of("S").unwrap();
        let wall = world.geometry().wall(WallIndex(0)).clone();
        let uv = Vector2::new((wall.uv_vert1_u + wall.uv_vert2.x) / 3.0, wall.uv_vert2.y / 3.0);
        let id = world.add_surface_molecule(s, WallIndex(0), uv, Orientation::Up).unwrap();

        let pathway = world.reactions().unimolecular(s).unwrap().pathway(0).clone();
        let encounter = Encounter {
            reactants: vec![id],
            time: 0.0,
            contact: None,
        };
        assert!(fire(&mut world, &encounter, &pathway).unwrap());

        let products = world.molecules_matching("A").unwrap();
        assert_eq!(products.len(), 1);
        let product = products[0];
        let position = product.volume_position().unwrap();
        let anchor = world.geometry().vertices()[wall.vertices[0].index()];
        let height = (position - anchor).dot(&wall.normal);
        assert_relative_eq!(
            height,
            PRODUCT_OFFSET * world.config().rx_radius_3d,
            max_relative = 1e-6
        );
        assert_eq!(product.creation_site.and_then(|site| site.wall), Some(WallIndex(0)));
    }
}
