use super::config::SimulationConfig;
use super::counted_volumes::{CountedVolumes, RayCastOracle};
use super::error::EngineError;
use super::partition::SpatialPartition;
use super::scheduler::EventScheduler;
use super::world::{Clamp, Observable, ReleaseShape, ReleaseSite, RunStatistics, World, full_match_regex};
use crate::core::chemistry::registry::ReactionRegistry;
use crate::core::geometry::mesh::{GeometryModel, ObjectSpec};
use crate::core::io::model::{ModelDescription, ReleaseAmount, ReleaseShapeDef, parse_participant};
use crate::core::models::ids::ObjectId;
use crate::core::models::reaction::{ReactantSpec, ReactionRule};
use crate::core::models::species::{Species, SpeciesTable};
use nalgebra::Point3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Builds a ready-to-run world from a model description.
///
/// # Errors
///
/// Any invalid species, rule, geometry, release, clamp or count definition.
pub(crate) fn build_world(model: &ModelDescription, config: SimulationConfig) -> Result<World, EngineError> {
    let species = build_species(model, config.time_unit)?;
    let rules = build_rules(model, &species)?;
    let reactions = ReactionRegistry::build(&species, rules, &config.pb_context(), config.vacancy_search_radius)?;
    let geometry = build_geometry(model, &species, config.grid_density)?;

    let mut partition = SpatialPartition::new(&config.partition);
    partition.index_walls(&geometry);
    let counted_volumes = CountedVolumes::build(&geometry, &RayCastOracle)?;

    let releases = build_releases(model, &species, &geometry, config.time_unit)?;
    let clamps = build_clamps(model, &species)?;
    let observables = build_observables(model, &species, &geometry)?;

    info!(
        species = species.len(),
        walls = geometry.walls().len(),
        releases = releases.len(),
        clamps = clamps.len(),
        observables = observables.len(),
        "World initialized"
    );

    Ok(World {
        rng: ChaCha8Rng::seed_from_u64(config.seed),
        releases_done: vec![false; releases.len()],
        config,
        species,
        reactions,
        geometry,
        partition,
        counted_volumes,
        scheduler: EventScheduler::new(),
        time: 0.0,
        iteration: 0,
        releases,
        clamps,
        observables,
        wall_hits: Vec::new(),
        next_reaction_serial: 0,
        stats: RunStatistics::default(),
    })
}

fn build_species(model: &ModelDescription, time_unit: f64) -> Result<SpeciesTable, EngineError> {
    let mut table = SpeciesTable::new();
    for def in &model.species {
        let species = Species::new(def.name.clone(), def.kind, def.diffusion_constant)
            .with_target_only(def.target_only)
            .with_custom_step(def.custom_step()?);
        table.add(species)?;
    }
    table.update_steps(time_unit)?;
    for s in table.iter() {
        debug!(species = %s.name, space_step = s.space_step, time_step = s.time_step, "Species steps");
    }
    Ok(table)
}

fn participant(species: &SpeciesTable, text: &str) -> Result<ReactantSpec, EngineError> {
    let (name, orientation) = parse_participant(text)?;
    Ok(ReactantSpec::new(species.id_of(&name)?, orientation))
}

fn build_rules(model: &ModelDescription, species: &SpeciesTable) -> Result<Vec<ReactionRule>, EngineError> {
    model
        .reactions
        .iter()
        .map(|def| {
            let reactants = def
                .reactants
                .iter()
                .map(|r| participant(species, r))
                .collect::<Result<Vec<_>, _>>()?;
            let products = def
                .products
                .iter()
                .map(|p| participant(species, p))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ReactionRule::new(def.display_name(), reactants, products, def.rate).with_kind(def.kind))
        })
        .collect()
}

fn build_geometry(
    model: &ModelDescription,
    species: &SpeciesTable,
    grid_density: f64,
) -> Result<GeometryModel, EngineError> {
    let mut geometry = GeometryModel::new(grid_density);
    for def in &model.objects {
        let id = geometry.add_object(ObjectSpec {
            name: def.name.clone(),
            vertices: def.vertices.iter().map(|v| Point3::new(v[0], v[1], v[2])).collect(),
            triangles: def.triangles.clone(),
            counted: def.counted,
            report_wall_hits: def.report_wall_hits,
            volume_compartment: def.volume_compartment.clone(),
            surface_compartment: def.surface_compartment.clone(),
            color: def.color,
        })?;
        for region in &def.regions {
            let surface_class = match &region.surface_class {
                Some(name) => {
                    let sc = species.id_of(name)?;
                    if !species.get(sc).is_some_and(Species::is_surface_class) {
                        return Err(EngineError::Initialization(format!(
                            "'{name}' on region '{}' of '{}' is not a surface class",
                            region.name, def.name
                        )));
                    }
                    Some(sc)
                }
                None => None,
            };
            geometry.add_region(id, &region.name, region.walls.as_deref(), surface_class, region.color)?;
        }
        debug!(object = %def.name, walls = geometry.object(id).walls.len(), "Object added");
    }
    Ok(geometry)
}

fn object_id(geometry: &GeometryModel, name: &str) -> Result<ObjectId, EngineError> {
    geometry
        .object_by_name(name)
        .map(|o| o.id)
        .ok_or_else(|| EngineError::ObjectNotFound(name.to_string()))
}

fn build_releases(
    model: &ModelDescription,
    species: &SpeciesTable,
    geometry: &GeometryModel,
    time_unit: f64,
) -> Result<Vec<ReleaseSite>, EngineError> {
    let mut sites = Vec::with_capacity(model.releases.len());
    for def in &model.releases {
        let (name, orientation) = parse_participant(&def.species)?;
        let id = species.id_of(&name)?;
        let is_surface = species.get(id).is_some_and(Species::is_surface);
        let amount = def.amount()?;
        let fail = |reason: &str| EngineError::Release {
            species: name.clone(),
            reason: reason.to_string(),
        };

        let shape = match &def.shape {
            ReleaseShapeDef::Point { position } => ReleaseShape::Point(Point3::from(*position)),
            ReleaseShapeDef::Box { min, max } => {
                if (0..3).any(|i| min[i] > max[i]) {
                    return Err(fail("box minimum exceeds maximum"));
                }
                ReleaseShape::Box {
                    min: Point3::from(*min),
                    max: Point3::from(*max),
                }
            }
            ReleaseShapeDef::Sphere { center, radius } => {
                if *radius < 0.0 {
                    return Err(fail("negative sphere radius"));
                }
                ReleaseShape::Sphere {
                    center: Point3::from(*center),
                    radius: *radius,
                }
            }
            ReleaseShapeDef::Object { object } => ReleaseShape::Object(object_id(geometry, object)?),
            ReleaseShapeDef::Region { object, region } => {
                let obj = object_id(geometry, object)?;
                let region_id = geometry
                    .region_by_name(obj, region)
                    .map(|r| r.id)
                    .ok_or_else(|| EngineError::RegionNotFound {
                        object: object.clone(),
                        region: region.clone(),
                    })?;
                ReleaseShape::Region(region_id)
            }
        };

        let on_surface = matches!(shape, ReleaseShape::Region(_));
        if is_surface != on_surface {
            return Err(fail(if is_surface {
                "surface molecules must be released on a region"
            } else {
                "only surface molecules can be released on a region"
            }));
        }
        match (amount, &shape) {
            (ReleaseAmount::Density(_), ReleaseShape::Region(_)) => {}
            (ReleaseAmount::Density(_), _) => return Err(fail("density requires a region")),
            (ReleaseAmount::Concentration(_), ReleaseShape::Point(_) | ReleaseShape::Region(_)) => {
                return Err(fail("concentration requires a volume"));
            }
            _ => {}
        }

        sites.push(ReleaseSite {
            species: id,
            orientation,
            shape,
            amount,
            time: def.time / time_unit,
        });
    }
    Ok(sites)
}

fn build_clamps(model: &ModelDescription, species: &SpeciesTable) -> Result<Vec<Clamp>, EngineError> {
    model
        .clamps
        .iter()
        .map(|def| {
            let surface_class = species.id_of(&def.surface_class)?;
            if !species.get(surface_class).is_some_and(Species::is_surface_class) {
                return Err(EngineError::Initialization(format!(
                    "clamp target '{}' is not a surface class",
                    def.surface_class
                )));
            }
            let (name, side) = parse_participant(&def.species)?;
            let id = species.id_of(&name)?;
            let diffusing_volume = species.get(id).is_some_and(|s| s.is_volume() && s.can_diffuse());
            if !diffusing_volume {
                return Err(EngineError::InvalidClamp { species: name });
            }
            Ok(Clamp {
                surface_class,
                species: id,
                side,
                concentration: def.concentration,
            })
        })
        .collect()
}

fn build_observables(
    model: &ModelDescription,
    species: &SpeciesTable,
    geometry: &GeometryModel,
) -> Result<Vec<Observable>, EngineError> {
    model
        .counts
        .iter()
        .map(|def| {
            let pattern = full_match_regex(&def.species)?;
            let object = def.object.as_deref().map(|n| object_id(geometry, n)).transpose()?;
            let matches = species.iter().map(|s| pattern.is_match(&s.name)).collect();
            Ok(Observable {
                name: def.name.clone(),
                pattern,
                object,
                matches,
            })
        })
        .collect()
}
