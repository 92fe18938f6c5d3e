use super::reactions::{Encounter, fire, test_class};
use crate::core::models::ids::{MoleculeId, SpeciesId, TileIndex, WallIndex};
use crate::core::models::molecule::{Molecule, MoleculeLocation};
use crate::core::models::reaction::{Orientation, ReactionKind, orientations_match};
use crate::core::utils::geometry::segment_intersection_2d;
use crate::engine::error::EngineError;
use crate::engine::world::World;
use nalgebra::Vector2;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::FRAC_1_SQRT_2;
use tracing::trace;

/// Upper bound on edge crossings and reflections within one step.
const MAX_HOPS: usize = 64;

const EDGE_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Border {
    Pass,
    Reflect,
    Absorb,
}

/// One step of a surface molecule: a 2D walk across walls (skipped for immobile
/// species) followed by reaction tests with neighboring surface molecules and the
/// surface classes under it. A product on its first step ignores its sibling products
/// and the occupant of its creation tile.
pub fn run(world: &mut World, id: MoleculeId, time: f64, dt: f64) -> Result<(), EngineError> {
    let Some(molecule) = world.partition.get(id).filter(|m| !m.is_defunct()).cloned() else {
        return Ok(());
    };
    let Some((wall, tile, uv, orientation)) = molecule.surface_site() else {
        return Ok(());
    };
    let species_id = molecule.species;
    let species = world.species_info(species_id)?;
    let can_diffuse = species.can_diffuse();
    let initiates = !species.target_only;
    let sigma = if species.time_step > 0.0 {
        species.space_step * (dt / species.time_step).sqrt() * FRAC_1_SQRT_2
    } else {
        0.0
    };

    let (wall, tile) = if can_diffuse {
        let step = Vector2::new(
            world.rng.sample::<f64, _>(StandardNormal) * sigma,
            world.rng.sample::<f64, _>(StandardNormal) * sigma,
        );
        match walk(world, species_id, orientation, wall, uv, step) {
            Some((to_wall, to_uv)) => relocate(world, id, (wall, tile), to_wall, to_uv),
            None => {
                trace!(molecule = %id, "Absorbed at region border");
                world.retire(id);
                return Ok(());
            }
        }
    } else {
        (wall, tile)
    };
    let own = (species_id, orientation.value());

    if initiates && world.reactions.has_partners(species_id) {
        let neighbors = world.geometry.neighbor_tiles(wall, tile);
        let occupants: Vec<(MoleculeId, SpeciesId, i8)> = neighbors
            .iter()
            .filter_map(|&(w, t)| occupant(world, w, t, &molecule))
            .collect();
        let n = neighbors.len().max(1) as f64;

        let scaling = n / (3.0 * dt);
        for &(other, other_species, other_orient) in &occupants {
            let pathway = world
                .reactions
                .bimolecular(species_id, other_species)
                .and_then(|class| test_class(&mut world.rng, class, scaling, &[own, (other_species, other_orient)]));
            if let Some(pathway) = pathway {
                let encounter = Encounter {
                    reactants: vec![id, other],
                    time,
                    contact: None,
                };
                if fire(world, &encounter, &pathway)? {
                    return Ok(());
                }
            }
        }

        if world.reactions.has_trimolecular() {
            let scaling = n * n / (9.0 * dt);
            for (i, &(a, a_species, a_orient)) in occupants.iter().enumerate() {
                for &(b, b_species, b_orient) in &occupants[i + 1..] {
                    let actual = [own, (a_species, a_orient), (b_species, b_orient)];
                    let pathway = world
                        .reactions
                        .trimolecular(species_id, a_species, b_species)
                        .and_then(|class| test_class(&mut world.rng, class, scaling, &actual));
                    if let Some(pathway) = pathway {
                        let encounter = Encounter {
                            reactants: vec![id, a, b],
                            time,
                            contact: None,
                        };
                        if fire(world, &encounter, &pathway)? {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    let surface_classes = world.geometry.wall(wall).surface_classes.clone();
    for sc in surface_classes {
        let pathway = world
            .reactions
            .bimolecular(species_id, sc)
            .and_then(|class| test_class(&mut world.rng, class, 1.0 / dt, &[own, (sc, 1)]));
        if let Some(pathway) = pathway {
            let encounter = Encounter {
                reactants: vec![id],
                time,
                contact: None,
            };
            if fire(world, &encounter, &pathway)? {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn occupant(world: &World, wall: WallIndex, tile: TileIndex, me: &Molecule) -> Option<(MoleculeId, SpeciesId, i8)> {
    let id = world.geometry.grid(wall)?.occupant(tile)?;
    let molecule = world
        .partition
        .get(id)
        .filter(|m| !m.is_defunct() && !me.avoids_on_first_step(m))?;
    let (_, _, _, orientation) = molecule.surface_site()?;
    Some((id, molecule.species, orientation.value()))
}

/// Follows `step` from `uv` on `wall` across shared edges, reflecting off mesh
/// boundaries and region borders.
///
/// # Return
///
/// The final wall and position, or `None` if a region border absorbed the molecule.
fn walk(
    world: &World,
    species: SpeciesId,
    orientation: Orientation,
    mut wall: WallIndex,
    mut uv: Vector2<f64>,
    mut step: Vector2<f64>,
) -> Option<(WallIndex, Vector2<f64>)> {
    let mut entry_edge: Option<usize> = None;
    for _ in 0..MAX_HOPS {
        if step.norm_squared() == 0.0 {
            break;
        }
        let current = world.geometry.wall(wall);
        let exit = (0..3)
            .filter(|k| Some(*k) != entry_edge)
            .filter_map(|k| {
                let (a, b) = current.edge_uv(k);
                segment_intersection_2d(&uv, &step, &a, &b)
                    .filter(|(s, _)| *s > EDGE_EPSILON && *s <= 1.0)
                    .map(|(s, _)| (k, s))
            })
            .min_by(|x, y| x.1.total_cmp(&y.1));

        let Some((k, s)) = exit else {
            return Some((wall, uv + step));
        };
        let hit = uv + step * s;
        let remainder = step * (1.0 - s);

        let crossing = current.neighbors[k].and_then(|next| {
            let edge = current.edges[k]?;
            let (_, next_uv) = world.geometry.cross_edge(wall, k, &hit)?;
            Some((next, next_uv, edge))
        });
        let border = match crossing {
            None => Border::Reflect,
            Some((next, _, _)) => region_border(world, species, orientation, wall, next),
        };
        match (border, crossing) {
            (Border::Absorb, _) => return None,
            (Border::Pass, Some((next, next_uv, edge))) => {
                step = world.geometry.edge(edge).rotate_from(wall, &remainder);
                entry_edge = world.geometry.wall(next).index_of_neighbor(wall);
                wall = next;
                uv = next_uv;
            }
            _ => {
                let (a, b) = current.edge_uv(k);
                let along = (b - a).normalize();
                step = along * (2.0 * remainder.dot(&along)) - remainder;
                uv = hit;
                entry_edge = Some(k);
            }
        }
    }
    Some((wall, uv))
}

/// What the surface classes that differ between two adjacent walls do to a molecule
/// crossing from one to the other. Absorption wins over reflection, which wins over
/// passing.
fn region_border(
    world: &World,
    species: SpeciesId,
    orientation: Orientation,
    from: WallIndex,
    to: WallIndex,
) -> Border {
    let here = &world.geometry.wall(from).surface_classes;
    let there = &world.geometry.wall(to).surface_classes;
    here.iter()
        .filter(|sc| !there.contains(sc))
        .chain(there.iter().filter(|sc| !here.contains(sc)))
        .filter_map(|sc| world.reactions.surface_behavior(species, *sc))
        .filter(|b| orientations_match(b.molecule_orientation, b.surface_orientation, orientation.value()))
        .map(|b| match b.kind {
            ReactionKind::AbsorbRegionBorder => Border::Absorb,
            ReactionKind::Reflect => Border::Reflect,
            ReactionKind::Transparent | ReactionKind::Standard => Border::Pass,
        })
        .max()
        .unwrap_or(Border::Pass)
}

/// Moves the molecule to the tile under `uv` if that tile is free; otherwise it stays.
fn relocate(
    world: &mut World,
    id: MoleculeId,
    from: (WallIndex, TileIndex),
    wall: WallIndex,
    uv: Vector2<f64>,
) -> (WallIndex, TileIndex) {
    let centered = world.config.center_molecules_on_grid;
    let grid = world.geometry.ensure_grid(wall);
    let tile = grid.uv_to_tile(&uv);
    let uv = if centered { grid.tile_center(tile) } else { uv };

    if (wall, tile) != from {
        if grid.occupy(wall, tile, id).is_err() {
            return from;
        }
        if let Some(old) = world.geometry.grid_mut(from.0) {
            old.release(from.1);
        }
    }
    if let Some(m) = world.partition.get_mut(id) {
        if let MoleculeLocation::Surface {
            position,
            wall: w,
            tile: t,
            ..
        } = &mut m.location
        {
            *position = uv;
            *w = wall;
            *t = tile;
        }
    }
    (wall, tile)
}
