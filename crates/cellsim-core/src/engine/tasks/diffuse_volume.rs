use super::reactions::{Encounter, WallContact, fire, test_class};
use crate::core::models::ids::{MoleculeId, SpeciesId, WallIndex};
use crate::core::models::molecule::Molecule;
use crate::core::models::reaction::{Orientation, ReactionKind, orientations_match};
use crate::core::models::species::Species;
use crate::core::utils::geometry::{closest_segment_parameter, segment_triangle_intersection};
use crate::engine::error::EngineError;
use crate::engine::world::{WallHit, World};
use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::FRAC_1_SQRT_2;
use tracing::trace;

/// Upper bound on reflections within one diffusion step.
const MAX_WALL_BOUNCES: usize = 64;

/// Segment parameters at or below this are treated as the starting point.
const HIT_EPSILON: f64 = 1e-10;

/// Distance a reflected molecule is pushed back off the wall, as a fraction of the
/// wall's linear size.
const REFLECT_NUDGE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
enum Hit {
    Molecule { id: MoleculeId, species: SpeciesId },
    Wall(WallIndex),
}

enum WallOutcome {
    Pass,
    Reflect,
    Consumed,
}

/// One Brownian step of a volume molecule over `dt` internal units, starting at `time`.
///
/// The displacement is traced as a ray: molecules within the interaction radius of the
/// ray and walls it pierces are visited in order of distance. Each may trigger a
/// reaction, which ends the step; walls otherwise reflect the remainder of the ray
/// unless a transparent surface class lets the molecule through. A product on its first
/// step still bounces off or crosses its creation wall, but never reacts with its
/// sibling products or the occupant of its creation tile.
pub fn run(world: &mut World, id: MoleculeId, time: f64, dt: f64) -> Result<(), EngineError> {
    let Some(me) = world.partition.get(id).filter(|m| !m.is_defunct()).cloned() else {
        return Ok(());
    };
    let Some(start) = me.volume_position() else {
        return Ok(());
    };
    let species = world.species_info(me.species)?;
    let sigma = if species.time_step > 0.0 {
        species.space_step * (dt / species.time_step).sqrt() * FRAC_1_SQRT_2
    } else {
        0.0
    };
    let initiates_volume = !species.target_only && world.reactions.has_partners(me.species);
    let scaling = partial_step_scaling(species, dt);

    let mut displacement = Vector3::new(
        world.rng.sample::<f64, _>(StandardNormal) * sigma,
        world.rng.sample::<f64, _>(StandardNormal) * sigma,
        world.rng.sample::<f64, _>(StandardNormal) * sigma,
    );
    let mut origin = start;
    let mut last_wall: Option<WallIndex> = None;
    let mut leg_start = time;
    let mut leg_duration = dt;

    'legs: for _ in 0..MAX_WALL_BOUNCES {
        if displacement.norm_squared() == 0.0 {
            break;
        }
        let hits = collect_hits(world, &me, &origin, &displacement, last_wall, initiates_volume);
        let mut partners: Vec<(MoleculeId, SpeciesId)> = Vec::new();

        for (s, hit) in hits {
            let point = origin + displacement * s;
            let hit_time = leg_start + s * leg_duration;
            match hit {
                Hit::Molecule { id: other, species } => {
                    if collide_with_molecule(world, &me, (other, species), &partners, hit_time, scaling)? {
                        return Ok(());
                    }
                    partners.push((other, species));
                }
                Hit::Wall(wall) => {
                    let normal = world.geometry.wall(wall).normal;
                    let side: i8 = if displacement.dot(&normal) < 0.0 { 1 } else { -1 };
                    record_wall_hit(world, id, wall, point, hit_time, origin, leg_start);
                    let contact = WallContact { wall, point, side };
                    match hit_wall(world, &me, &contact, &partners, hit_time, scaling)? {
                        WallOutcome::Consumed => return Ok(()),
                        WallOutcome::Pass => {
                            let object = world.geometry.wall(wall).object;
                            if let Some(volume) = world.counted_volumes.crossing(object, side < 0) {
                                if let Some(m) = world.partition.get_mut(id) {
                                    m.counted_volume = volume;
                                }
                            }
                        }
                        WallOutcome::Reflect => {
                            let remaining = displacement * (1.0 - s);
                            displacement = remaining - normal * (2.0 * remaining.dot(&normal));
                            let nudge = REFLECT_NUDGE * world.geometry.wall(wall).area.sqrt();
                            origin = point + normal * (f64::from(side) * nudge);
                            last_wall = Some(wall);
                            leg_start = hit_time;
                            leg_duration *= 1.0 - s;
                            continue 'legs;
                        }
                    }
                }
            }
        }

        origin += displacement;
        break;
    }

    if world.partition.move_volume(id, origin).is_none() {
        world.warn_escaped(id, &origin);
        world.retire(id);
    }
    Ok(())
}

/// Factor by which a step of `dt` shorter than the species' time step divides the
/// per-encounter probabilities. Path length, and so the number of encounters, scales with
/// the square root of the step.
fn partial_step_scaling(species: &Species, dt: f64) -> f64 {
    if dt > 0.0 && dt < species.time_step {
        (species.time_step / dt).sqrt()
    } else {
        1.0
    }
}

fn collect_hits(
    world: &World,
    me: &Molecule,
    origin: &Point3<f64>,
    displacement: &Vector3<f64>,
    last_wall: Option<WallIndex>,
    initiates_volume: bool,
) -> Vec<(f64, Hit)> {
    let end = origin + displacement;
    let lo = origin.inf(&end);
    let hi = origin.sup(&end);
    let mut hits = Vec::new();

    for wall in world.partition.walls_in_box(&lo, &hi) {
        if Some(wall) == last_wall {
            continue;
        }
        let [a, b, c] = world.geometry.wall_vertices(wall);
        if let Some(s) = segment_triangle_intersection(origin, displacement, &a, &b, &c) {
            if s > HIT_EPSILON {
                hits.push((s, Hit::Wall(wall)));
            }
        }
    }

    if initiates_volume {
        let r = world.config.rx_radius_3d;
        let pad = Vector3::new(r, r, r);
        for subpart in world.partition.subparts_in_box(&(lo - pad), &(hi + pad)) {
            for other_id in world.partition.volume_molecules_in(subpart) {
                if other_id == me.id {
                    continue;
                }
                let Some(other) = world.partition.get(other_id) else {
                    continue;
                };
                if other.is_defunct()
                    || me.avoids_on_first_step(other)
                    || !world.reactions.can_react_with(me.species, other.species)
                {
                    continue;
                }
                let Some(target) = other.volume_position() else {
                    continue;
                };
                let s = closest_segment_parameter(origin, displacement, &target);
                if s <= 0.0 || s >= 1.0 {
                    continue;
                }
                if (origin + displacement * s - target).norm() < r {
                    hits.push((
                        s,
                        Hit::Molecule {
                            id: other_id,
                            species: other.species,
                        },
                    ));
                }
            }
        }
    }

    hits.sort_by(|a, b| a.0.total_cmp(&b.0));
    hits
}

/// Tests a volume-volume encounter and the three-body encounters it completes with
/// molecules already passed on this leg.
fn collide_with_molecule(
    world: &mut World,
    me: &Molecule,
    (other, other_species): (MoleculeId, SpeciesId),
    passed: &[(MoleculeId, SpeciesId)],
    time: f64,
    scaling: f64,
) -> Result<bool, EngineError> {
    let (id, species) = (me.id, me.species);
    let pathway = world
        .reactions
        .bimolecular(species, other_species)
        .and_then(|class| test_class(&mut world.rng, class, scaling, &[(species, 0), (other_species, 0)]));
    if let Some(pathway) = pathway {
        let encounter = Encounter {
            reactants: vec![id, other],
            time,
            contact: None,
        };
        if fire(world, &encounter, &pathway)? {
            return Ok(true);
        }
    }

    if world.reactions.has_trimolecular() {
        for (third, third_species) in passed {
            let pathway = world
                .reactions
                .trimolecular(species, *third_species, other_species)
                .and_then(|class| {
                    test_class(
                        &mut world.rng,
                        class,
                        scaling,
                        &[(species, 0), (*third_species, 0), (other_species, 0)],
                    )
                });
            if let Some(pathway) = pathway {
                let encounter = Encounter {
                    reactants: vec![id, *third, other],
                    time,
                    contact: None,
                };
                if fire(world, &encounter, &pathway)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn hit_wall(
    world: &mut World,
    me: &Molecule,
    contact: &WallContact,
    passed: &[(MoleculeId, SpeciesId)],
    time: f64,
    scaling: f64,
) -> Result<WallOutcome, EngineError> {
    let (id, species) = (me.id, me.species);
    let wall = contact.wall;
    let h = contact.side;
    let uv = world.geometry.wall(wall).xyz_to_uv(&contact.point);
    let tile = world.geometry.ensure_grid(wall).uv_to_tile(&uv);
    let occupant = world
        .geometry
        .ensure_grid(wall)
        .occupant(tile)
        .and_then(|o| world.partition.get(o))
        .filter(|m| !m.is_defunct() && !me.avoids_on_first_step(m))
        .and_then(|m| m.surface_site().map(|(_, _, _, orient)| (m.id, m.species, orient.value())));

    if let Some((surface_id, surface_species, surface_orient)) = occupant {
        let actual = [(species, h), (surface_species, surface_orient)];
        let pathway = world
            .reactions
            .bimolecular(species, surface_species)
            .and_then(|class| test_class(&mut world.rng, class, scaling, &actual));
        if let Some(pathway) = pathway {
            let encounter = Encounter {
                reactants: vec![id, surface_id],
                time,
                contact: Some(*contact),
            };
            if fire(world, &encounter, &pathway)? {
                return Ok(WallOutcome::Consumed);
            }
        }
        if world.reactions.has_trimolecular()
            && three_body_at_wall(
                world,
                me,
                (surface_id, surface_species, surface_orient),
                contact,
                passed,
                time,
                scaling,
            )?
        {
            return Ok(WallOutcome::Consumed);
        }
    }

    let mut outcome = WallOutcome::Reflect;
    let surface_classes = world.geometry.wall(wall).surface_classes.clone();
    for sc in surface_classes {
        if let Some(behavior) = world.reactions.surface_behavior(species, sc).copied() {
            if orientations_match(behavior.molecule_orientation, behavior.surface_orientation, h) {
                match behavior.kind {
                    ReactionKind::Transparent => outcome = WallOutcome::Pass,
                    ReactionKind::Reflect | ReactionKind::Standard => {}
                    ReactionKind::AbsorbRegionBorder => {
                        trace!(molecule = %id, wall = %wall, "Absorbed at wall");
                        world.retire(id);
                        return Ok(WallOutcome::Consumed);
                    }
                }
            }
        }

        let pathway = world
            .reactions
            .bimolecular(species, sc)
            .and_then(|class| test_class(&mut world.rng, class, scaling, &[(species, h), (sc, 1)]));
        if let Some(pathway) = pathway {
            let encounter = Encounter {
                reactants: vec![id],
                time,
                contact: Some(*contact),
            };
            if fire(world, &encounter, &pathway)? {
                return Ok(WallOutcome::Consumed);
            }
        }

        let clamped = world.clamps.iter().any(|c| {
            c.surface_class == sc
                && c.species == species
                && match c.side {
                    Orientation::Up => h > 0,
                    Orientation::Down => h < 0,
                    Orientation::Any => true,
                }
        });
        if clamped {
            world.retire(id);
            return Ok(WallOutcome::Consumed);
        }
    }
    Ok(outcome)
}

/// Three-body encounters of a volume molecule hitting an occupied tile: with a volume
/// molecule passed earlier on this leg, or with a second surface molecule on a
/// neighboring tile.
fn three_body_at_wall(
    world: &mut World,
    me: &Molecule,
    (surface_id, surface_species, surface_orient): (MoleculeId, SpeciesId, i8),
    contact: &WallContact,
    passed: &[(MoleculeId, SpeciesId)],
    time: f64,
    scaling: f64,
) -> Result<bool, EngineError> {
    let (id, species) = (me.id, me.species);
    let h = contact.side;
    for (other, other_species) in passed {
        let actual = [(species, h), (*other_species, 0), (surface_species, surface_orient)];
        let pathway = world
            .reactions
            .trimolecular(species, *other_species, surface_species)
            .and_then(|class| test_class(&mut world.rng, class, scaling, &actual));
        if let Some(pathway) = pathway {
            let encounter = Encounter {
                reactants: vec![id, *other, surface_id],
                time,
                contact: Some(*contact),
            };
            if fire(world, &encounter, &pathway)? {
                return Ok(true);
            }
        }
    }

    let Some((wall, tile, _, _)) = world.partition.get(surface_id).and_then(Molecule::surface_site) else {
        return Ok(false);
    };
    for (nw, nt) in world.geometry.neighbor_tiles(wall, tile) {
        let Some((second, second_species, second_orient)) = world
            .geometry
            .grid(nw)
            .and_then(|g| g.occupant(nt))
            .and_then(|o| world.partition.get(o))
            .filter(|m| !m.is_defunct() && !me.avoids_on_first_step(m))
            .and_then(|m| m.surface_site().map(|(_, _, _, orient)| (m.id, m.species, orient.value())))
        else {
            continue;
        };
        let actual = [(species, h), (surface_species, surface_orient), (second_species, second_orient)];
        let pathway = world
            .reactions
            .trimolecular(species, surface_species, second_species)
            .and_then(|class| test_class(&mut world.rng, class, scaling, &actual));
        if let Some(pathway) = pathway {
            let encounter = Encounter {
                reactants: vec![id, surface_id, second],
                time,
                contact: Some(*contact),
            };
            if fire(world, &encounter, &pathway)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn record_wall_hit(
    world: &mut World,
    id: MoleculeId,
    wall: WallIndex,
    point: Point3<f64>,
    time: f64,
    before: Point3<f64>,
    time_before: f64,
) {
    let object = world.geometry.wall(wall).object;
    if !world.geometry.object(object).report_wall_hits {
        return;
    }
    let unit = world.config.time_unit;
    world.wall_hits.push(WallHit {
        molecule: id,
        object,
        wall,
        time: time * unit,
        position: point,
        time_before_hit: time_before * unit,
        position_before_hit: before,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::setup::tests::{cube_object_toml, world_from_toml};
    use approx::assert_relative_eq;

    const SPECIES: &str = r#"
        [[species]]
        name = "A"
        diffusion-constant = 1e-6

        [[species]]
        name = "wall"
        kind = "surface-class"
    "#;

    fn release(count: u32) -> String {
        format!(
            r#"
            [[releases]]
            species = "A"
            count = {count}
            shape = {{ type = "point", position = [0.0, 0.0, 0.0] }}
            "#
        )
    }

    #[test]
    fn reflective_box_keeps_molecules_inside() {
        let toml = format!("{SPECIES}{}{}", release(20), cube_object_toml("box", 0.2, None));
        let mut world = world_from_toml(&toml, 1e-5, 11);
        for _ in 0..200 {
            world.run_iteration().unwrap();
        }
        assert_eq!(world.live_molecule_count(), 20);
        for m in world.partition().live() {
            let p = m.volume_position().unwrap();
            assert!(p.x.abs() < 0.2 && p.y.abs() < 0.2 && p.z.abs() < 0.2, "escaped to {p}");
        }
        assert!(world.stats().diffusion_steps >= 20 * 200);
    }

    #[test]
    fn absorbing_walls_remove_every_molecule() {
        let toml = format!(
            "{SPECIES}{}{}
            [[reactions]]
            reactants = [\"A\", \"wall\"]
            kind = \"absorb-region-border\"
            ",
            release(20),
            cube_object_toml("box", 0.2, Some("wall"))
        );
        let mut world = world_from_toml(&toml, 1e-5, 3);
        for _ in 0..2000 {
            world.run_iteration().unwrap();
            if world.live_molecule_count() == 0 {
                break;
            }
        }
        assert_eq!(world.live_molecule_count(), 0);
    }

    #[test]
    fn transparent_walls_let_molecules_leave_and_update_compartment() {
        let toml = format!(
            "{SPECIES}{}{}
            [[reactions]]
            reactants = [\"A\", \"wall\"]
            kind = \"transparent\"
            ",
            release(20),
            cube_object_toml("box", 0.2, Some("wall"))
        );
        let mut world = world_from_toml(&toml, 1e-5, 5);
        for _ in 0..400 {
            world.run_iteration().unwrap();
        }
        let box_id = world.geometry().object_by_name("box").unwrap().id;
        let mut outside = 0;
        for m in world.partition().live() {
            let p = m.volume_position().unwrap();
            let inside = world.geometry().point_in_object(box_id, &p);
            assert_eq!(
                inside,
                world.counted_volumes().encloses(m.counted_volume, box_id),
                "compartment out of date at {p}"
            );
            if !inside {
                outside += 1;
            }
        }
        assert!(outside > 0);
    }

    #[test]
    fn wall_hits_are_recorded_for_reporting_objects() {
        let toml = format!("{SPECIES}{}{}", release(5), cube_object_toml("box", 0.1, None))
            .replace("counted = true", "counted = true\n            report-wall-hits = true");
        let mut world = world_from_toml(&toml, 1e-5, 9);
        for _ in 0..50 {
            world.run_iteration().unwrap();
        }
        let hits = world.drain_wall_hits();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.time >= h.time_before_hit));
        assert!(world.drain_wall_hits().is_empty());
    }

    /// Surface `S'` on a reflective box decays into a volume product on the outer side,
    /// optionally with a surface sibling left on the creation tile.
    fn decaying_surface_model(products: &str, extra: &str, half: f64, count: u32) -> String {
        format!(
            r#"
            [[species]]
            name = "A"
            diffusion-constant = 1e-6

            [[species]]
            name = "S"
            kind = "surface"

            [[species]]
            name = "P"
            kind = "surface"

            [[species]]
            name = "B"
            kind = "surface"

            [[reactions]]
            name = "emit"
            reactants = ["S'"]
            products = [{products}]
            rate = 1e9
            {extra}

            [[releases]]
            species = "S'"
            count = {count}
            shape = {{ type = "region", object = "box" }}
            {}
            "#,
            cube_object_toml("box", half, None)
        )
    }

    #[test]
    fn products_still_reflect_off_their_creation_wall() {
        let toml = decaying_surface_model(r#""A'""#, "", 0.2, 48);
        let mut world = world_from_toml(&toml, 1e-6, 13);
        for _ in 0..3 {
            world.run_iteration().unwrap();
        }

        let box_id = world.geometry().object_by_name("box").unwrap().id;
        let products = world.molecules_matching("A").unwrap();
        assert_eq!(products.len(), 48);
        for m in products {
            let p = m.volume_position().unwrap();
            assert!(!world.geometry().point_in_object(box_id, &p), "product crossed into the box at {p}");
            assert!(!world.counted_volumes().encloses(m.counted_volume, box_id));
        }
    }

    #[test]
    fn first_step_skips_the_sibling_on_the_creation_tile() {
        let extra = r#"
            [[reactions]]
            name = "bind"
            reactants = ["A'", "P'"]
            products = ["B'"]
            rate = 1e12
        "#;
        let toml = decaying_surface_model(r#""A'", "P'""#, extra, 0.5, 40);
        let mut world = world_from_toml(&toml, 1e-6, 29);

        world.run_iteration().unwrap();
        assert_eq!(world.molecules_matching("S").unwrap().len(), 0);
        assert_eq!(world.molecules_matching("A").unwrap().len(), 40);
        assert_eq!(world.molecules_matching("P").unwrap().len(), 40);
        assert!(world.molecules_matching("B").unwrap().is_empty());
        assert!(world.partition().live().all(|m| m.creation_site.is_none()));

        for _ in 0..20 {
            world.run_iteration().unwrap();
        }
        let bound = world.molecules_matching("B").unwrap().len();
        assert_eq!(world.molecules_matching("A").unwrap().len() + bound, 40);
        assert_eq!(world.molecules_matching("P").unwrap().len() + bound, 40);
    }

    #[test]
    fn shortened_steps_scale_encounter_probabilities() {
        let toml = r#"
            [[species]]
            name = "A"
            diffusion-constant = 1e-6
            custom-time-step = 4e-6
        "#;
        let world = world_from_toml(toml, 1e-6, 1);
        let a = world.species().by_name("A").unwrap();
        assert_relative_eq!(a.time_step, 4.0, epsilon = 1e-9);
        assert_relative_eq!(partial_step_scaling(a, a.time_step), 1.0);
        assert_relative_eq!(partial_step_scaling(a, a.time_step / 4.0), 2.0, epsilon = 1e-9);
        assert_relative_eq!(partial_step_scaling(a, 0.0), 1.0);
    }
}
