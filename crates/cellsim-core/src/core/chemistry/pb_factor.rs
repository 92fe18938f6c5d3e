//! Per-encounter probability factors.
//!
//! Positions are in µm, diffusion constants in cm²/s, times in seconds unless noted, and
//! bimolecular volume rates in 1/(M·s). A pathway's per-encounter probability is its rate
//! multiplied by the factor computed here.

use super::ReactionError;
use crate::core::models::reaction::Orientation;
use crate::core::models::species::{Species, UM2_PER_CM2};
use std::f64::consts::PI;

pub const AVOGADRO: f64 = 6.022_140_76e23;
/// Converts a molar concentration to molecules per µm³ when multiplied (1/M → µm³ when divided).
pub const MOLAR_TO_PER_UM3: f64 = AVOGADRO * 1.0e-15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbContext {
    /// Seconds per internal time unit.
    pub time_unit: f64,
    /// Surface tiles per µm².
    pub grid_density: f64,
    /// Interaction radius of volume molecules, µm.
    pub rx_radius_3d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EncounterGeometry {
    Unimolecular,
    VolVol,
    VolSurf,
    VolWall,
    SurfSurf,
    SurfWall,
    VolVolSurf,
    VolSurfSurf,
    SurfSurfSurf,
    VolVolVol,
}

/// Classifies a reactant set by how many volume molecules, surface molecules and surface
/// classes (walls) it contains.
pub fn classify(reactants: &[&Species]) -> Option<EncounterGeometry> {
    let vol = reactants.iter().filter(|s| s.is_volume()).count();
    let surf = reactants.iter().filter(|s| s.is_surface()).count();
    let wall = reactants.iter().filter(|s| s.is_surface_class()).count();
    use EncounterGeometry::*;
    Some(match (vol, surf, wall) {
        (1, 0, 0) | (0, 1, 0) => Unimolecular,
        (2, 0, 0) => VolVol,
        (1, 1, 0) => VolSurf,
        (1, 0, 1) => VolWall,
        (0, 2, 0) => SurfSurf,
        (0, 1, 1) => SurfWall,
        (2, 1, 0) => VolVolSurf,
        (1, 2, 0) => VolSurfSurf,
        (0, 3, 0) => SurfSurfSurf,
        (3, 0, 0) => VolVolVol,
        _ => return None,
    })
}

fn mean_speed(species: &Species, time_unit: f64) -> f64 {
    if species.target_only || species.space_step == 0.0 {
        0.0
    } else {
        species.space_step / (species.time_step * time_unit)
    }
}

fn vol_vol(volumes: &[&Species], ctx: &PbContext, label: &str) -> Result<f64, ReactionError> {
    if volumes.iter().all(|s| s.target_only) {
        return Err(ReactionError::AllTargetOnly {
            class: label.to_string(),
        });
    }
    let speed: f64 = volumes.iter().map(|s| mean_speed(s, ctx.time_unit)).sum();
    if speed <= 0.0 {
        return Ok(0.0);
    }
    let r = ctx.rx_radius_3d;
    Ok(1.0e15 / AVOGADRO / (2.0 * PI.sqrt() * r * r * speed))
}

fn vol_surf(volume: &Species, ctx: &PbContext) -> f64 {
    if volume.diffusion_constant <= 0.0 {
        return 0.0;
    }
    let dt = volume.time_step_seconds(ctx.time_unit);
    1.0e11 * ctx.grid_density / (2.0 * AVOGADRO) * (PI * dt / volume.diffusion_constant).sqrt()
}

/// Computes the probability factor for an encounter of `reactants` (with the orientations
/// required by the rule).
///
/// # Arguments
///
/// * `geometry` - Encounter class from [`classify`].
/// * `reactants` - Species with their required orientations, in class order.
/// * `ctx` - Time unit, grid density and interaction radius.
/// * `label` - Human-readable class name used in errors.
///
/// # Errors
///
/// [`ReactionError::AllTargetOnly`] if no reactant that could move is allowed to initiate.
pub fn compute_pb_factor(
    geometry: EncounterGeometry,
    reactants: &[(&Species, Orientation)],
    ctx: &PbContext,
    label: &str,
) -> Result<f64, ReactionError> {
    let all_target_only = || ReactionError::AllTargetOnly {
        class: label.to_string(),
    };
    let volumes: Vec<&Species> = reactants
        .iter()
        .filter(|(s, _)| s.is_volume())
        .map(|(s, _)| *s)
        .collect();
    let surfaces: Vec<&Species> = reactants
        .iter()
        .filter(|(s, _)| s.is_surface())
        .map(|(s, _)| *s)
        .collect();

    let base = match geometry {
        EncounterGeometry::Unimolecular => 1.0,
        EncounterGeometry::VolVol | EncounterGeometry::VolVolSurf => vol_vol(&volumes, ctx, label)?,
        EncounterGeometry::VolWall => {
            if volumes[0].target_only {
                return Err(all_target_only());
            }
            vol_surf(volumes[0], ctx)
        }
        EncounterGeometry::VolSurf | EncounterGeometry::VolSurfSurf => {
            if volumes[0].target_only && surfaces.iter().all(|s| s.target_only) {
                return Err(all_target_only());
            }
            vol_surf(volumes[0], ctx)
        }
        EncounterGeometry::SurfSurf => {
            let initiators = surfaces.iter().filter(|s| !s.target_only).count();
            match initiators {
                0 => return Err(all_target_only()),
                1 => ctx.time_unit * ctx.grid_density / 3.0,
                _ => ctx.time_unit * ctx.grid_density / 6.0,
            }
        }
        EncounterGeometry::SurfWall => {
            if surfaces[0].target_only {
                return Err(all_target_only());
            }
            ctx.time_unit
        }
        EncounterGeometry::SurfSurfSurf => {
            if surfaces.iter().all(|s| s.target_only) {
                return Err(all_target_only());
            }
            ctx.time_unit * ctx.grid_density * ctx.grid_density / 9.0
        }
        EncounterGeometry::VolVolVol => {
            if volumes.iter().all(|s| s.target_only) {
                return Err(all_target_only());
            }
            let d_sum: f64 = volumes.iter().map(|s| s.diffusion_constant).sum();
            if d_sum <= 0.0 {
                0.0
            } else {
                let r = ctx.rx_radius_3d;
                1.0e30 / (AVOGADRO * AVOGADRO) / (2.0 * PI * r.powi(4) * d_sum * UM2_PER_CM2)
            }
        }
    };

    let doubled = match reactants {
        [(_, a), (_, b)] => {
            let (g0, g1) = (a.value() as i32, b.value() as i32);
            (g0 + g1) * (g0 - g1) == 0 && g0 * g1 != 0
        }
        _ => false,
    };
    Ok(if doubled { base * 2.0 } else { base })
}

/// Default interaction radius for volume molecules, `1 / sqrt(π · grid_density)` µm.
pub fn default_rx_radius(grid_density: f64) -> f64 {
    1.0 / (PI * grid_density).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::species::SpeciesKind;
    use approx::assert_relative_eq;

    fn species(kind: SpeciesKind, d: f64, target_only: bool) -> Species {
        let mut s = Species::new("s", kind, d).with_target_only(target_only);
        s.update_steps(1e-6).unwrap();
        s
    }

    fn ctx() -> PbContext {
        PbContext {
            time_unit: 1e-6,
            grid_density: 10_000.0,
            rx_radius_3d: default_rx_radius(10_000.0),
        }
    }

    #[test]
    fn vol_vol_factor_is_positive_for_diffusing_reactants() {
        let a = species(SpeciesKind::Volume, 1e-6, false);
        let b = species(SpeciesKind::Volume, 2e-6, false);
        let pb = compute_pb_factor(
            EncounterGeometry::VolVol,
            &[(&a, Orientation::Any), (&b, Orientation::Any)],
            &ctx(),
            "A + B",
        )
        .unwrap();
        assert!(pb > 0.0 && pb.is_finite());
    }

    #[test]
    fn vol_vol_with_both_target_only_is_fatal() {
        let a = species(SpeciesKind::Volume, 1e-6, true);
        let b = species(SpeciesKind::Volume, 2e-6, true);
        let err = compute_pb_factor(
            EncounterGeometry::VolVol,
            &[(&a, Orientation::Any), (&b, Orientation::Any)],
            &ctx(),
            "A + B",
        )
        .unwrap_err();
        assert_eq!(
            err,
            ReactionError::AllTargetOnly {
                class: "A + B".into()
            }
        );
    }

    #[test]
    fn target_only_partner_contributes_no_speed() {
        let a = species(SpeciesKind::Volume, 1e-6, false);
        let b_moving = species(SpeciesKind::Volume, 1e-6, false);
        let b_target = species(SpeciesKind::Volume, 1e-6, true);
        let c = ctx();
        let both = compute_pb_factor(
            EncounterGeometry::VolVol,
            &[(&a, Orientation::Any), (&b_moving, Orientation::Any)],
            &c,
            "x",
        )
        .unwrap();
        let one = compute_pb_factor(
            EncounterGeometry::VolVol,
            &[(&a, Orientation::Any), (&b_target, Orientation::Any)],
            &c,
            "x",
        )
        .unwrap();
        assert_relative_eq!(one, 2.0 * both, epsilon = 1e-9 * one);
    }

    #[test]
    fn surface_pair_is_halved_when_both_can_initiate() {
        let s1 = species(SpeciesKind::Surface, 1e-8, false);
        let s2 = species(SpeciesKind::Surface, 1e-8, false);
        let t = species(SpeciesKind::Surface, 1e-8, true);
        let c = ctx();
        let both = compute_pb_factor(
            EncounterGeometry::SurfSurf,
            &[(&s1, Orientation::Any), (&s2, Orientation::Any)],
            &c,
            "x",
        )
        .unwrap();
        let single = compute_pb_factor(
            EncounterGeometry::SurfSurf,
            &[(&s1, Orientation::Any), (&t, Orientation::Any)],
            &c,
            "x",
        )
        .unwrap();
        assert_relative_eq!(single, c.time_unit * c.grid_density / 3.0);
        assert_relative_eq!(both, single / 2.0);
    }

    #[test]
    fn matching_orientations_double_the_factor() {
        let v = species(SpeciesKind::Volume, 1e-6, false);
        let s = species(SpeciesKind::Surface, 0.0, false);
        let c = ctx();
        let any = compute_pb_factor(
            EncounterGeometry::VolSurf,
            &[(&v, Orientation::Any), (&s, Orientation::Up)],
            &c,
            "x",
        )
        .unwrap();
        let oriented = compute_pb_factor(
            EncounterGeometry::VolSurf,
            &[(&v, Orientation::Up), (&s, Orientation::Down)],
            &c,
            "x",
        )
        .unwrap();
        assert_relative_eq!(oriented, 2.0 * any);
    }

    #[test]
    fn non_diffusing_volume_reactant_never_hits_walls() {
        let v = species(SpeciesKind::Volume, 0.0, false);
        let sc = species(SpeciesKind::SurfaceClass, 0.0, false);
        let pb = compute_pb_factor(
            EncounterGeometry::VolWall,
            &[(&v, Orientation::Any), (&sc, Orientation::Any)],
            &ctx(),
            "x",
        )
        .unwrap();
        assert_eq!(pb, 0.0);
    }

    #[test]
    fn classification_counts_reactant_kinds() {
        let v = species(SpeciesKind::Volume, 1e-6, false);
        let s = species(SpeciesKind::Surface, 1e-8, false);
        let w = species(SpeciesKind::SurfaceClass, 0.0, false);
        assert_eq!(classify(&[&v]), Some(EncounterGeometry::Unimolecular));
        assert_eq!(classify(&[&v, &w]), Some(EncounterGeometry::VolWall));
        assert_eq!(classify(&[&s, &w]), Some(EncounterGeometry::SurfWall));
        assert_eq!(classify(&[&v, &v, &s]), Some(EncounterGeometry::VolVolSurf));
        assert_eq!(classify(&[&s, &s, &s]), Some(EncounterGeometry::SurfSurfSurf));
        assert_eq!(classify(&[&w]), None);
        assert_eq!(classify(&[&v, &w, &w]), None);
    }
}
