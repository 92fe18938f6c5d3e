use crate::core::chemistry::pb_factor::MOLAR_TO_PER_UM3;
use crate::core::io::model::ReleaseAmount;
use crate::core::models::molecule::Molecule;
use crate::core::models::reaction::Orientation;
use crate::engine::error::EngineError;
use crate::engine::world::{ReleaseShape, ReleaseSite, World};
use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;
use tracing::{info, instrument, warn};

/// Placement attempts per molecule before a shape is considered unusable.
const MAX_ATTEMPTS: usize = 10_000;

/// Performs every release due before the end of the current iteration.
///
/// # Return
///
/// The number of molecules placed.
#[instrument(skip_all, name = "release_task")]
pub fn run(world: &mut World) -> Result<usize, EngineError> {
    let horizon = world.time + 1.0;
    release_due(world, |time| time < horizon)
}

/// Performs the releases scheduled at or before the current time only.
#[instrument(skip_all, name = "release_task")]
pub fn run_immediate(world: &mut World) -> Result<usize, EngineError> {
    let now = world.time;
    release_due(world, |time| time <= now)
}

fn release_due(world: &mut World, is_due: impl Fn(f64) -> bool) -> Result<usize, EngineError> {
    let due: Vec<usize> = (0..world.releases.len())
        .filter(|&i| !world.releases_done[i] && is_due(world.releases[i].time))
        .collect();

    let mut total = 0;
    for i in due {
        let site = world.releases[i].clone();
        let born = site.time.max(world.time);
        let count = amount(world, &site)?;
        let placed = match site.shape {
            ReleaseShape::Region(_) => release_on_region(world, &site, count, born)?,
            _ => release_in_volume(world, &site, count, born)?,
        };
        world.releases_done[i] = true;
        world.stats.released += placed as u64;
        total += placed;
        let name = &world.species_info(site.species)?.name;
        info!(species = %name, requested = count, placed, "Released molecules");
    }
    Ok(total)
}

/// Rounds an expected number of molecules to an integer, keeping the fraction as a
/// probability.
pub(crate) fn stochastic_round(rng: &mut ChaCha8Rng, expected: f64) -> u64 {
    let whole = expected.floor();
    let extra = rng.gen_range(0.0..1.0) < expected - whole;
    whole as u64 + u64::from(extra)
}

fn amount(world: &mut World, site: &ReleaseSite) -> Result<u64, EngineError> {
    let expected = match site.amount {
        ReleaseAmount::Count(n) => return Ok(n),
        ReleaseAmount::Concentration(c) => {
            let volume = match &site.shape {
                ReleaseShape::Box { min, max } => (max - min).product(),
                ReleaseShape::Sphere { radius, .. } => 4.0 / 3.0 * PI * radius.powi(3),
                ReleaseShape::Object(object) => world.geometry.object_volume(*object),
                ReleaseShape::Point(_) | ReleaseShape::Region(_) => 0.0,
            };
            c * MOLAR_TO_PER_UM3 * volume
        }
        ReleaseAmount::Density(d) => match site.shape {
            ReleaseShape::Region(region) => d * world.geometry.region_area(region),
            _ => 0.0,
        },
    };
    Ok(stochastic_round(&mut world.rng, expected))
}

fn random_unit_cube(rng: &mut ChaCha8Rng) -> Vector3<f64> {
    Vector3::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0))
}

fn sample_position(world: &mut World, site: &ReleaseSite) -> Result<Point3<f64>, EngineError> {
    match &site.shape {
        ReleaseShape::Point(p) => Ok(*p),
        ReleaseShape::Box { min, max } => {
            Ok(min + (max - min).component_mul(&random_unit_cube(&mut world.rng)))
        }
        ReleaseShape::Sphere { center, radius } => {
            for _ in 0..MAX_ATTEMPTS {
                let offset = (random_unit_cube(&mut world.rng) * 2.0).add_scalar(-1.0);
                if offset.norm_squared() <= 1.0 {
                    return Ok(center + offset * *radius);
                }
            }
            Ok(*center)
        }
        ReleaseShape::Object(object) => {
            let (lo, hi) = world.geometry.object_bounding_box(*object);
            for _ in 0..MAX_ATTEMPTS {
                let p = lo + (hi - lo).component_mul(&random_unit_cube(&mut world.rng));
                if world.geometry.point_in_object(*object, &p) {
                    return Ok(p);
                }
            }
            Err(EngineError::Release {
                species: world.species_info(site.species)?.name.clone(),
                reason: format!(
                    "no point inside '{}' found after {MAX_ATTEMPTS} attempts",
                    world.geometry.object(*object).name
                ),
            })
        }
        ReleaseShape::Region(_) => Err(EngineError::Internal(
            "region release routed to volume placement".to_string(),
        )),
    }
}

fn release_in_volume(world: &mut World, site: &ReleaseSite, count: u64, born: f64) -> Result<usize, EngineError> {
    for _ in 0..count {
        let position = sample_position(world, site)?;
        let mut molecule = Molecule::new_volume(site.species, position, born);
        molecule.counted_volume = world.counted_volumes.volume_at(&world.geometry, &position);
        world.place_molecule(molecule)?;
    }
    Ok(count as usize)
}

fn release_on_region(world: &mut World, site: &ReleaseSite, count: u64, born: f64) -> Result<usize, EngineError> {
    let ReleaseShape::Region(region) = site.shape else {
        return Ok(0);
    };
    let walls = world.geometry.region(region).walls.clone();
    let weights: Vec<f64> = walls.iter().map(|w| world.geometry.wall(*w).area).collect();
    let Ok(picker) = WeightedIndex::new(&weights) else {
        warn!(region = %world.geometry.region(region).name, "Region has no area; nothing released");
        return Ok(0);
    };
    let centered = world.config.center_molecules_on_grid;

    let mut placed = 0;
    'molecules: for _ in 0..count {
        for _ in 0..MAX_ATTEMPTS {
            let wall = walls[picker.sample(&mut world.rng)];
            let uv = world.geometry.wall(wall).random_uv(&mut world.rng);
            let grid = world.geometry.ensure_grid(wall);
            let tile = grid.uv_to_tile(&uv);
            if grid.is_occupied(tile) {
                continue;
            }
            let uv = if centered { grid.tile_center(tile) } else { uv };
            let orientation = match site.orientation {
                Orientation::Any => {
                    if world.rng.gen_bool(0.5) {
                        Orientation::Up
                    } else {
                        Orientation::Down
                    }
                }
                fixed => fixed,
            };
            world.place_molecule(Molecule::new_surface(site.species, wall, tile, uv, orientation, born))?;
            placed += 1;
            continue 'molecules;
        }
        warn!(
            region = %world.geometry.region(region).name,
            placed,
            requested = count,
            "Region is full; release truncated"
        );
        break;
    }
    Ok(placed)
}
