use super::release::stochastic_round;
use crate::core::chemistry::pb_factor::MOLAR_TO_PER_UM3;
use crate::core::models::ids::WallIndex;
use crate::core::models::molecule::Molecule;
use crate::core::models::reaction::Orientation;
use crate::engine::error::EngineError;
use crate::engine::world::World;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::{FRAC_1_SQRT_2, PI};
use tracing::{debug, trace};

/// Injects molecules next to every wall carrying a clamped surface class.
///
/// Per wall and iteration the expected number is `c · area · sqrt(D · Δt / π)`, the flux
/// through the wall from a reservoir held at concentration `c`. Injected molecules sit
/// on the reservoir side at a half-normal distance scaled to one diffusion step.
pub fn run(world: &mut World) -> Result<usize, EngineError> {
    let mut injected = 0;
    for clamp in world.clamps.clone() {
        let species = world.species_info(clamp.species)?;
        let d = species.diffusion_um2_per_s();
        let reach = species.space_step * FRAC_1_SQRT_2;
        let depth = (d * world.config.time_unit / PI).sqrt();

        let walls: Vec<WallIndex> = world
            .geometry
            .walls()
            .iter()
            .enumerate()
            .filter(|(_, w)| w.has_surface_class(clamp.surface_class))
            .map(|(i, _)| WallIndex(i as u32))
            .collect();

        for wall in walls {
            let area = world.geometry.wall(wall).area;
            let expected = clamp.concentration * MOLAR_TO_PER_UM3 * area * depth;
            let n = stochastic_round(&mut world.rng, expected);
            for _ in 0..n {
                let side: i8 = match clamp.side {
                    Orientation::Up => 1,
                    Orientation::Down => -1,
                    Orientation::Any => {
                        if world.rng.gen_bool(0.5) {
                            1
                        } else {
                            -1
                        }
                    }
                };
                let distance = reach * world.rng.sample::<f64, _>(StandardNormal).abs();
                let w = world.geometry.wall(wall);
                let uv = w.random_uv(&mut world.rng);
                let position = w.uv_to_xyz(&uv) + w.normal * (f64::from(side) * distance);
                let counted_volume = world
                    .counted_volumes
                    .crossing(w.object, side > 0)
                    .unwrap_or_else(|| world.counted_volumes.volume_at(&world.geometry, &position));

                let mut molecule = Molecule::new_volume(clamp.species, position, world.time);
                molecule.counted_volume = counted_volume;
                match world.place_molecule(molecule) {
                    Ok(_) => injected += 1,
                    Err(EngineError::OutsidePartition { .. }) => {
                        trace!(wall = %wall, "Clamped molecule outside the partition skipped");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
    if injected > 0 {
        debug!(injected, "Concentration clamps applied");
    }
    world.stats.clamped += injected as u64;
    Ok(injected)
}
