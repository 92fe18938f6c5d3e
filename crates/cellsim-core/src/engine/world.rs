use super::config::SimulationConfig;
use super::counted_volumes::CountedVolumes;
use super::error::EngineError;
use super::partition::SpatialPartition;
use super::scheduler::EventScheduler;
use super::tasks;
use crate::core::chemistry::registry::ReactionRegistry;
use crate::core::geometry::mesh::{Color, GeometryModel};
use crate::core::io::checkpoint::{CHECKPOINT_FORMAT_VERSION, Checkpoint, CheckpointError};
use crate::core::io::counts::CountSample;
use crate::core::io::model::ReleaseAmount;
use crate::core::models::ids::{MoleculeId, ObjectId, RegionId, SpeciesId, VertexIndex, WallIndex};
use crate::core::models::molecule::{ActionKind, Molecule, MoleculeLocation};
use crate::core::models::reaction::Orientation;
use crate::core::models::species::{Species, SpeciesTable};
use nalgebra::{Point3, Vector2, Vector3};
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseShape {
    Point(Point3<f64>),
    Box { min: Point3<f64>, max: Point3<f64> },
    Sphere { center: Point3<f64>, radius: f64 },
    Object(ObjectId),
    Region(RegionId),
}

/// A scheduled one-shot release of molecules.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSite {
    pub species: SpeciesId,
    /// Orientation of released surface molecules; `Any` picks one at random per molecule.
    pub orientation: Orientation,
    pub shape: ReleaseShape,
    pub amount: ReleaseAmount,
    /// Release time in internal units.
    pub time: f64,
}

/// Holds a volume species at a fixed concentration next to every wall carrying a
/// surface class.
#[derive(Debug, Clone, PartialEq)]
pub struct Clamp {
    pub surface_class: SpeciesId,
    pub species: SpeciesId,
    /// Side the reservoir sits on; `Any` means both sides.
    pub side: Orientation,
    /// Molar concentration.
    pub concentration: f64,
}

#[derive(Debug, Clone)]
pub struct Observable {
    pub name: String,
    pub pattern: Regex,
    pub object: Option<ObjectId>,
    /// Per-species match of `pattern`, indexed by species id.
    pub(crate) matches: Vec<bool>,
}

/// A volume molecule touching a wall of an object that reports wall hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WallHit {
    pub molecule: MoleculeId,
    pub object: ObjectId,
    pub wall: WallIndex,
    /// Seconds.
    pub time: f64,
    pub position: Point3<f64>,
    pub time_before_hit: f64,
    pub position_before_hit: Point3<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub diffusion_steps: u64,
    pub reactions: u64,
    pub blocked_reactions: u64,
    pub released: u64,
    pub clamped: u64,
    pub escaped: u64,
}

/// The complete state of one simulation.
///
/// All randomness comes from one seeded stream, and every container that is iterated
/// while drawing random numbers is ordered, so a world restored from a [`Checkpoint`]
/// continues along exactly the trajectory the original would have followed.
#[derive(Debug, Clone)]
pub struct World {
    pub(crate) config: SimulationConfig,
    pub(crate) species: SpeciesTable,
    pub(crate) reactions: ReactionRegistry,
    pub(crate) geometry: GeometryModel,
    pub(crate) partition: SpatialPartition,
    pub(crate) counted_volumes: CountedVolumes,
    pub(crate) scheduler: EventScheduler,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) time: f64,
    pub(crate) iteration: u64,
    pub(crate) releases: Vec<ReleaseSite>,
    pub(crate) releases_done: Vec<bool>,
    pub(crate) clamps: Vec<Clamp>,
    pub(crate) observables: Vec<Observable>,
    pub(crate) wall_hits: Vec<WallHit>,
    pub(crate) next_reaction_serial: u64,
    pub(crate) stats: RunStatistics,
}

impl World {
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn species(&self) -> &SpeciesTable {
        &self.species
    }

    pub fn reactions(&self) -> &ReactionRegistry {
        &self.reactions
    }

    pub fn geometry(&self) -> &GeometryModel {
        &self.geometry
    }

    pub fn partition(&self) -> &SpatialPartition {
        &self.partition
    }

    pub fn counted_volumes(&self) -> &CountedVolumes {
        &self.counted_volumes
    }

    pub fn releases(&self) -> &[ReleaseSite] {
        &self.releases
    }

    pub fn clamps(&self) -> &[Clamp] {
        &self.clamps
    }

    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    pub fn observable_names(&self) -> Vec<String> {
        self.observables.iter().map(|o| o.name.clone()).collect()
    }

    /// Current time in internal units.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn time_seconds(&self) -> f64 {
        self.time * self.config.time_unit
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn stats(&self) -> RunStatistics {
        self.stats
    }

    pub fn live_molecule_count(&self) -> usize {
        self.partition.live_count()
    }

    /// A live molecule by id.
    pub fn molecule(&self, id: MoleculeId) -> Option<&Molecule> {
        self.partition.get(id).filter(|m| !m.is_defunct())
    }

    /// Live molecules whose species name fully matches `pattern`, in id order.
    ///
    /// # Errors
    ///
    /// [`EngineError::Pattern`] for an invalid regular expression.
    pub fn molecules_matching(&self, pattern: &str) -> Result<Vec<&Molecule>, EngineError> {
        let regex = full_match_regex(pattern)?;
        let matches: Vec<bool> = self.species.iter().map(|s| regex.is_match(&s.name)).collect();
        Ok(self
            .partition
            .live()
            .filter(|m| matches.get(m.species.index()).copied().unwrap_or(false))
            .collect())
    }

    pub fn wall_normal(&self, wall: WallIndex) -> Result<Vector3<f64>, EngineError> {
        Ok(self.geometry.try_wall(wall)?.normal)
    }

    pub fn wall_color(&self, wall: WallIndex) -> Result<Color, EngineError> {
        self.geometry.try_wall(wall)?;
        Ok(self.geometry.wall_color(wall))
    }

    pub fn vertex_unit_normal(&self, vertex: VertexIndex) -> Result<Vector3<f64>, EngineError> {
        if vertex.index() >= self.geometry.vertices().len() {
            return Err(EngineError::Internal(format!("vertex {vertex} does not exist")));
        }
        Ok(self.geometry.vertex_unit_normal(vertex))
    }

    /// Takes every wall hit recorded since the previous call.
    pub fn drain_wall_hits(&mut self) -> Vec<WallHit> {
        std::mem::take(&mut self.wall_hits)
    }

    /// Adds a volume molecule at `position` at the current time.
    pub fn add_volume_molecule(
        &mut self,
        species: SpeciesId,
        position: Point3<f64>,
    ) -> Result<MoleculeId, EngineError> {
        let spec = self.species_info(species)?;
        if !spec.is_volume() {
            return Err(EngineError::Release {
                species: spec.name.clone(),
                reason: "not a volume species".to_string(),
            });
        }
        let mut molecule = Molecule::new_volume(species, position, self.time);
        molecule.counted_volume = self.counted_volumes.volume_at(&self.geometry, &position);
        self.place_molecule(molecule)
    }

    /// Adds a surface molecule on `wall` at the wall-frame position `uv`.
    pub fn add_surface_molecule(
        &mut self,
        species: SpeciesId,
        wall: WallIndex,
        uv: Vector2<f64>,
        orientation: Orientation,
    ) -> Result<MoleculeId, EngineError> {
        let spec = self.species_info(species)?;
        if !spec.is_surface() {
            return Err(EngineError::Release {
                species: spec.name.clone(),
                reason: "not a surface species".to_string(),
            });
        }
        self.geometry.try_wall(wall)?;
        let tile = self.geometry.ensure_grid(wall).uv_to_tile(&uv);
        let molecule = Molecule::new_surface(species, wall, tile, uv, orientation, self.time);
        self.place_molecule(molecule)
    }

    /// Changes the rate of every pathway created from the named rule. Molecules whose
    /// unimolecular lifetime depends on it are flagged and resampled at the current time.
    ///
    /// # Errors
    ///
    /// Invalid rates and unknown names are rejected before anything changes.
    pub fn modify_rate(&mut self, name: &str, rate: f64) -> Result<(), EngineError> {
        let update = self.reactions.modify_rate(name, rate)?;
        if update.unimolecular_species.is_empty() {
            return Ok(());
        }
        let now = self.time;
        let affected: Vec<MoleculeId> = self
            .partition
            .live()
            .filter(|m| update.unimolecular_species.contains(&m.species))
            .map(|m| m.id)
            .collect();
        for id in &affected {
            let Some(molecule) = self.partition.get_mut(*id) else {
                continue;
            };
            let already_dirty = molecule.flags.reschedule_unimol;
            molecule.flags.reschedule_unimol = true;
            molecule.unimol_rx_time = Some(now);
            if !already_dirty {
                self.scheduler
                    .schedule(now, *id, ActionKind::UnimolecularReaction);
            }
        }
        debug!(reaction = name, molecules = affected.len(), "Flagged molecules for rescheduling");
        Ok(())
    }

    /// Moves vertices of an object. Surface molecules on the affected walls keep their
    /// barycentric position; wall caches and compartments are refreshed.
    ///
    /// # Errors
    ///
    /// Unknown objects, vertices of other objects and displacements that would make a wall
    /// degenerate are rejected without changing anything.
    #[instrument(skip_all, name = "vertex_displacement", fields(object = object))]
    pub fn apply_vertex_displacements(
        &mut self,
        object: &str,
        displacements: &[(VertexIndex, Vector3<f64>)],
    ) -> Result<(), EngineError> {
        let object_id = self
            .geometry
            .object_by_name(object)
            .map(|o| o.id)
            .ok_or_else(|| EngineError::ObjectNotFound(object.to_string()))?;

        let saved: Vec<(MoleculeId, WallIndex, [f64; 3])> = self
            .partition
            .live()
            .filter_map(|m| {
                let (wall, _, uv, _) = m.surface_site()?;
                (self.geometry.wall(wall).object == object_id)
                    .then(|| (m.id, wall, self.geometry.wall(wall).uv_barycentric(&uv)))
            })
            .collect();

        let moved = self
            .geometry
            .apply_vertex_displacements(object_id, displacements)?;

        for (id, wall, bary) in saved {
            if !moved.contains(&wall) {
                continue;
            }
            let uv = self.geometry.wall(wall).uv_from_barycentric(&bary);
            if let Some(MoleculeLocation::Surface { position, .. }) =
                self.partition.get_mut(id).map(|m| &mut m.location)
            {
                *position = uv;
            }
        }
        self.partition.index_walls(&self.geometry);
        self.refresh_counted_volumes();
        info!(walls = moved.len(), "Geometry updated");
        Ok(())
    }

    fn refresh_counted_volumes(&mut self) {
        let updates: Vec<(MoleculeId, _)> = self
            .partition
            .live()
            .filter_map(|m| {
                let p = m.volume_position()?;
                Some((m.id, self.counted_volumes.volume_at(&self.geometry, &p)))
            })
            .collect();
        for (id, volume) in updates {
            if let Some(m) = self.partition.get_mut(id) {
                m.counted_volume = volume;
            }
        }
    }

    /// Places the molecules of every release scheduled at or before the current time.
    pub fn release_immediate(&mut self) -> Result<usize, EngineError> {
        tasks::release::run_immediate(self)
    }

    /// Advances the simulation by one time unit.
    ///
    /// Due releases and clamps run first, then every queued action before the end of the
    /// iteration is serviced in time order.
    pub fn run_iteration(&mut self) -> Result<(), EngineError> {
        tasks::release::run(self)?;
        tasks::clamp::run(self)?;

        let horizon = self.time + 1.0;
        while let Some((time, id, kind)) = self.scheduler.pop_before(horizon) {
            match kind {
                ActionKind::Diffuse => self.service_diffusion(id, time)?,
                ActionKind::UnimolecularReaction => tasks::unimolecular::run(self, id, time)?,
            }
        }

        self.time = horizon;
        self.iteration += 1;
        let interval = self.config.defragmentation_interval;
        if interval > 0 && self.iteration % interval == 0 {
            tasks::defragment::run(self);
        }
        Ok(())
    }

    /// Counts every observable now.
    pub fn sample_counts(&self) -> CountSample {
        tasks::counting::run(self)
    }

    /// Reclaims tombstoned molecules immediately.
    pub fn defragment(&mut self) -> usize {
        tasks::defragment::run(self)
    }

    fn service_diffusion(&mut self, id: MoleculeId, time: f64) -> Result<(), EngineError> {
        let Some(molecule) = self.partition.get(id) else {
            return Ok(());
        };
        if molecule.is_defunct() || molecule.diffusion_time != time {
            return Ok(());
        }
        if molecule.flags.reschedule_unimol {
            self.reschedule_unimolecular(id, time);
        }
        let Some(molecule) = self.partition.get(id) else {
            return Ok(());
        };
        let species = self.species_info(molecule.species)?;
        let mut dt = species.time_step;
        if let Some(due) = molecule.unimol_rx_time {
            if due > time {
                dt = dt.min(due - time);
            }
        }

        if molecule.is_volume() {
            tasks::diffuse_volume::run(self, id, time, dt)?;
        } else {
            tasks::diffuse_surface::run(self, id, time, dt)?;
        }
        self.stats.diffusion_steps += 1;

        if let Some(molecule) = self.partition.get_mut(id) {
            if !molecule.is_defunct() {
                molecule.diffusion_time = time + dt;
                molecule.creation_site = None;
                self.scheduler.schedule(time + dt, id, ActionKind::Diffuse);
            }
        }
        Ok(())
    }

    pub(crate) fn species_info(&self, id: SpeciesId) -> Result<&Species, EngineError> {
        self.species
            .get(id)
            .ok_or_else(|| EngineError::Internal(format!("species {id} does not exist")))
    }

    /// Whether molecules of `species` need diffusion actions: they move, or they sit on a
    /// surface and have a reaction partner.
    pub(crate) fn needs_stepping(&self, species: SpeciesId) -> bool {
        self.species.get(species).is_some_and(|s| {
            s.can_diffuse() || (s.is_surface() && self.reactions.has_partners(species))
        })
    }

    /// Samples a fresh unimolecular time measured from `now` and queues it.
    pub(crate) fn reschedule_unimolecular(&mut self, id: MoleculeId, now: f64) {
        let Some(species) = self.partition.get(id).map(|m| m.species) else {
            return;
        };
        let due = self
            .reactions
            .unimolecular(species)
            .and_then(|class| class.sample_lifetime(&mut self.rng, self.config.time_unit))
            .map(|delay| now + delay);
        if let Some(molecule) = self.partition.get_mut(id) {
            molecule.flags.reschedule_unimol = false;
            molecule.unimol_rx_time = due;
        }
        if let Some(due) = due {
            self.scheduler
                .schedule(due, id, ActionKind::UnimolecularReaction);
        }
    }

    /// Inserts a new molecule, claims its tile and queues its first actions at its
    /// birthday.
    pub(crate) fn place_molecule(&mut self, molecule: Molecule) -> Result<MoleculeId, EngineError> {
        let born = molecule.birthday;
        let species = molecule.species;
        let site = molecule.surface_site();
        let id = self.partition.insert(molecule)?;
        if let Some((wall, tile, _, _)) = site {
            if let Err(err) = self.geometry.ensure_grid(wall).occupy(wall, tile, id) {
                self.partition.remove(id);
                return Err(err.into());
            }
        }
        self.reschedule_unimolecular(id, born);
        if self.needs_stepping(species) {
            self.scheduler.schedule(born, id, ActionKind::Diffuse);
        }
        trace!(molecule = %id, species = %species, time = born, "Molecule created");
        Ok(id)
    }

    /// Tombstones a molecule and frees its tile.
    pub(crate) fn retire(&mut self, id: MoleculeId) {
        if let Some((wall, tile, _, _)) = self.partition.get(id).and_then(Molecule::surface_site) {
            if let Some(grid) = self.geometry.grid_mut(wall) {
                if grid.occupant(tile) == Some(id) {
                    grid.release(tile);
                }
            }
        }
        self.partition.mark_defunct(id);
    }

    pub(crate) fn next_reaction_serial(&mut self) -> u64 {
        let serial = self.next_reaction_serial;
        self.next_reaction_serial += 1;
        serial
    }

    /// Captures everything needed to continue this run exactly.
    pub fn snapshot(&self) -> Checkpoint {
        let (pending_actions, next_sequence) = self.scheduler.snapshot();
        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            time: self.time,
            iteration: self.iteration,
            next_molecule_id: self.partition.next_molecule_id(),
            next_reaction_serial: self.next_reaction_serial,
            species_names: self.species.iter().map(|s| s.name.clone()).collect(),
            molecules: self.partition.iter().cloned().collect(),
            pending_actions,
            next_sequence,
            rng: self.rng.clone(),
            rates: self.reactions.current_rates(),
            vertices: self.geometry.vertices().to_vec(),
            releases_done: self.releases_done.clone(),
            counted_volumes: self.counted_volumes.records(),
        }
    }

    /// Replaces the dynamic state with a checkpoint taken from a world built from the
    /// same model.
    ///
    /// The checkpoint is validated and applied to a copy of the world first; on any error
    /// this world is left untouched.
    ///
    /// # Errors
    ///
    /// [`EngineError::Checkpoint`] when the checkpoint does not fit this model, or a
    /// geometry error when its vertex positions produce degenerate walls.
    #[instrument(skip_all, name = "checkpoint_restore")]
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        self.check_compatible(checkpoint)?;
        let mut staged = self.clone();
        staged.apply_checkpoint(checkpoint)?;
        *self = staged;

        info!(
            iteration = self.iteration,
            molecules = self.partition.live_count(),
            pending = self.scheduler.len(),
            "Checkpoint restored"
        );
        Ok(())
    }

    fn check_compatible(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let incompatible = |reason: String| -> EngineError { CheckpointError::Incompatible(reason).into() };
        if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            }
            .into());
        }
        let names: Vec<&str> = self.species.iter().map(|s| s.name.as_str()).collect();
        if names != checkpoint.species_names.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(incompatible("species differ".to_string()));
        }
        if checkpoint.vertices.len() != self.geometry.vertices().len() {
            return Err(incompatible("vertex count differs".to_string()));
        }
        if checkpoint.releases_done.len() != self.releases.len() {
            return Err(incompatible("release count differs".to_string()));
        }
        let current: BTreeMap<String, f64> = self.reactions.current_rates().into_iter().collect();
        for (name, rate) in &checkpoint.rates {
            if !current.contains_key(name) {
                return Err(incompatible(format!("unknown reaction '{name}'")));
            }
            if !rate.is_finite() || *rate < 0.0 {
                return Err(incompatible(format!("invalid rate {rate} for reaction '{name}'")));
            }
        }
        Ok(())
    }

    fn apply_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        self.geometry.set_vertex_positions(&checkpoint.vertices)?;

        let current: BTreeMap<String, f64> = self.reactions.current_rates().into_iter().collect();
        for (name, rate) in &checkpoint.rates {
            if current.get(name) != Some(rate) {
                self.reactions.modify_rate(name, *rate)?;
            }
        }

        for w in 0..self.geometry.walls().len() {
            if let Some(grid) = self.geometry.grid_mut(WallIndex(w as u32)) {
                grid.clear();
            }
        }
        self.partition.clear_molecules();
        self.partition.index_walls(&self.geometry);
        self.counted_volumes.restore_records(&checkpoint.counted_volumes)?;

        for molecule in &checkpoint.molecules {
            let site = (!molecule.is_defunct()).then(|| molecule.surface_site()).flatten();
            let id = self.partition.insert_restored(molecule.clone())?;
            if let Some((wall, tile, _, _)) = site {
                self.geometry.try_wall(wall)?;
                self.geometry.ensure_grid(wall).occupy(wall, tile, id)?;
            }
        }
        self.partition.set_next_molecule_id(checkpoint.next_molecule_id);
        self.scheduler = EventScheduler::restore(&checkpoint.pending_actions, checkpoint.next_sequence);
        self.rng = checkpoint.rng.clone();
        self.time = checkpoint.time;
        self.iteration = checkpoint.iteration;
        self.next_reaction_serial = checkpoint.next_reaction_serial;
        self.releases_done = checkpoint.releases_done.clone();
        self.wall_hits.clear();
        Ok(())
    }

    pub(crate) fn warn_escaped(&mut self, id: MoleculeId, position: &Point3<f64>) {
        warn!(
            molecule = %id,
            x = position.x,
            y = position.y,
            z = position.z,
            "Molecule left the partitioned volume and was removed"
        );
        self.stats.escaped += 1;
    }
}

/// Compiles `pattern` so that it must match a whole species name.
pub(crate) fn full_match_regex(pattern: &str) -> Result<Regex, EngineError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| EngineError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::setup::tests::{cube_object_toml, world_from_toml};

    fn world() -> World {
        let toml = format!(
            r#"
            [[species]]
            name = "A"
            diffusion-constant = 1e-6

            [[species]]
            name = "S"
            kind = "surface"
            {}
            "#,
            cube_object_toml("box", 1.0, None)
        );
        world_from_toml(&toml, 1e-6, 5)
    }

    fn wall_centroid(world: &World, wall: WallIndex) -> Vector2<f64> {
        let w = world.geometry().wall(wall);
        Vector2::new((w.uv_vert1_u + w.uv_vert2.x) / 3.0, w.uv_vert2.y / 3.0)
    }

    #[test]
    fn added_volume_molecule_is_counted_inside_its_object() {
        let mut world = world();
        let a = world.species().id_of("A").unwrap();
        let id = world.add_volume_molecule(a, Point3::new(0.2, -0.1, 0.3)).unwrap();

        let molecule = world.molecule(id).unwrap();
        let box_id = world.geometry().object_by_name("box").unwrap().id;
        assert!(world.counted_volumes().encloses(molecule.counted_volume, box_id));
        assert_eq!(world.live_molecule_count(), 1);

        let s = world.species().id_of("S").unwrap();
        assert!(matches!(
            world.add_volume_molecule(s, Point3::origin()),
            Err(EngineError::Release { .. })
        ));
    }

    #[test]
    fn surface_molecules_claim_exclusive_tiles() {
        let mut world = world();
        let s = world.species().id_of("S").unwrap();
        let uv = wall_centroid(&world, WallIndex(0));

        let id = world.add_surface_molecule(s, WallIndex(0), uv, Orientation::Up).unwrap();
        let (wall, tile, _, orientation) = world.molecule(id).unwrap().surface_site().unwrap();
        assert_eq!(wall, WallIndex(0));
        assert_eq!(orientation, Orientation::Up);
        assert_eq!(world.geometry().grid(wall).unwrap().occupant(tile), Some(id));

        let second = world.add_surface_molecule(s, WallIndex(0), uv, Orientation::Down);
        assert!(matches!(second, Err(EngineError::Geometry { .. })));
        assert_eq!(world.live_molecule_count(), 1);
    }

    #[test]
    fn introspection_by_pattern_and_geometry() {
        let mut world = world();
        let a = world.species().id_of("A").unwrap();
        for x in [-0.5, 0.0, 0.5] {
            world.add_volume_molecule(a, Point3::new(x, 0.0, 0.0)).unwrap();
        }
        assert_eq!(world.molecules_matching("A").unwrap().len(), 3);
        assert_eq!(world.molecules_matching("[AS]").unwrap().len(), 3);
        assert!(world.molecules_matching("S").unwrap().is_empty());
        assert!(matches!(world.molecules_matching("("), Err(EngineError::Pattern { .. })));

        let normal = world.wall_normal(WallIndex(0)).unwrap();
        assert!((normal.norm() - 1.0).abs() < 1e-12);
        assert!(world.wall_normal(WallIndex(99)).is_err());
        assert!(world.vertex_unit_normal(VertexIndex(99)).is_err());
    }

    fn decaying_world() -> World {
        let toml = format!(
            r#"
            [[species]]
            name = "A"
            diffusion-constant = 1e-6

            [[reactions]]
            name = "decay"
            reactants = ["A"]
            products = []
            rate = 1e5
            {}
            "#,
            cube_object_toml("box", 1.0, None)
        );
        world_from_toml(&toml, 1e-6, 8)
    }

    fn rate(world: &World, name: &str) -> Option<f64> {
        world
            .reactions()
            .current_rates()
            .into_iter()
            .find_map(|(n, r)| (n == name).then_some(r))
    }

    #[test]
    fn restore_applies_checkpointed_rates() {
        let mut world = decaying_world();
        let mut checkpoint = world.snapshot();
        checkpoint.rates = vec![("decay".to_string(), 5.0)];

        world.restore(&checkpoint).unwrap();
        assert_eq!(rate(&world, "decay"), Some(5.0));
    }

    #[test]
    fn restore_with_unknown_reaction_changes_nothing() {
        let mut world = decaying_world();
        let before = rate(&world, "decay");
        let mut checkpoint = world.snapshot();
        checkpoint.rates = vec![("decay".to_string(), 5.0), ("bogus".to_string(), 1.0)];

        let result = world.restore(&checkpoint);
        assert!(matches!(result, Err(EngineError::Checkpoint { .. })));
        assert_eq!(rate(&world, "decay"), before);
    }

    #[test]
    fn restore_with_degenerate_vertices_changes_nothing() {
        let mut world = decaying_world();
        let a = world.species().id_of("A").unwrap();
        world.add_volume_molecule(a, Point3::new(0.1, 0.2, 0.3)).unwrap();
        let before_rate = rate(&world, "decay");
        let before_vertices = world.geometry().vertices().to_vec();

        let mut checkpoint = world.snapshot();
        checkpoint.rates = vec![("decay".to_string(), 5.0)];
        checkpoint.vertices = vec![Point3::origin(); before_vertices.len()];
        checkpoint.molecules.clear();

        let result = world.restore(&checkpoint);
        assert!(matches!(result, Err(EngineError::Geometry { .. })));
        assert_eq!(rate(&world, "decay"), before_rate);
        assert_eq!(world.geometry().vertices(), before_vertices.as_slice());
        assert_eq!(world.live_molecule_count(), 1);
    }
}
