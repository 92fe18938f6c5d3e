use super::config::PartitionConfig;
use super::error::EngineError;
use crate::core::geometry::mesh::GeometryModel;
use crate::core::models::ids::{MoleculeId, MoleculeKey, SubpartIndex, WallIndex};
use crate::core::models::molecule::{Molecule, MoleculeLocation};
use crate::core::utils::geometry::triangle_overlaps_box;
use nalgebra::Point3;
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Uniform cubic binning of space that owns every molecule.
///
/// Molecules live in an arena addressed by stable [`MoleculeId`]s. Every live volume
/// molecule is filed in exactly one subpartition; defunct molecules are unfiled at once
/// and reclaimed by [`SpatialPartition::defragment`]. Iteration is always in id order so
/// that runs restored from a checkpoint visit molecules exactly as the original did.
#[derive(Debug, Clone)]
pub struct SpatialPartition {
    origin: Point3<f64>,
    edge_length: f64,
    n: u32,
    subpart_edge: f64,
    molecules: SlotMap<MoleculeKey, Molecule>,
    keys: BTreeMap<MoleculeId, MoleculeKey>,
    volume_index: Vec<BTreeSet<MoleculeId>>,
    wall_index: Vec<Vec<WallIndex>>,
    next_molecule_id: u64,
    n_defunct: usize,
}

impl SpatialPartition {
    pub fn new(config: &PartitionConfig) -> Self {
        let n = config.subparts_per_dim;
        let total = (n as usize).pow(3);
        Self {
            origin: config.origin,
            edge_length: config.edge_length,
            n,
            subpart_edge: config.subpart_edge_length(),
            molecules: SlotMap::with_key(),
            keys: BTreeMap::new(),
            volume_index: vec![BTreeSet::new(); total],
            wall_index: vec![Vec::new(); total],
            next_molecule_id: 1,
            n_defunct: 0,
        }
    }

    pub fn n_subparts(&self) -> usize {
        self.volume_index.len()
    }

    pub fn subparts_per_dim(&self) -> u32 {
        self.n
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.origin[i] && p[i] < self.origin[i] + self.edge_length)
    }

    /// Subpartition containing `p`, or `None` outside the partitioned cube.
    pub fn locate(&self, p: &Point3<f64>) -> Option<SubpartIndex> {
        if !self.contains(p) {
            return None;
        }
        let cell = |axis: usize| {
            let c = ((p[axis] - self.origin[axis]) / self.subpart_edge).floor() as i64;
            c.clamp(0, self.n as i64 - 1) as u32
        };
        Some(self.index_of([cell(0), cell(1), cell(2)]))
    }

    fn index_of(&self, [x, y, z]: [u32; 3]) -> SubpartIndex {
        SubpartIndex(x + y * self.n + z * self.n * self.n)
    }

    pub fn subpart_coords(&self, idx: SubpartIndex) -> [u32; 3] {
        let n = self.n;
        [idx.0 % n, (idx.0 / n) % n, idx.0 / (n * n)]
    }

    pub fn subpart_bounds(&self, idx: SubpartIndex) -> (Point3<f64>, Point3<f64>) {
        let c = self.subpart_coords(idx);
        let lo = Point3::new(
            self.origin.x + c[0] as f64 * self.subpart_edge,
            self.origin.y + c[1] as f64 * self.subpart_edge,
            self.origin.z + c[2] as f64 * self.subpart_edge,
        );
        let hi = lo + nalgebra::Vector3::repeat(self.subpart_edge);
        (lo, hi)
    }

    /// Subpartitions overlapping the axis-aligned box `[min, max]`, clamped to the partition.
    pub fn subparts_in_box(&self, min: &Point3<f64>, max: &Point3<f64>) -> Vec<SubpartIndex> {
        let mut range = [(0u32, 0u32); 3];
        for axis in 0..3 {
            let lo = ((min[axis] - self.origin[axis]) / self.subpart_edge).floor();
            let hi = ((max[axis] - self.origin[axis]) / self.subpart_edge).floor();
            if hi < 0.0 || lo >= self.n as f64 {
                return Vec::new();
            }
            range[axis] = (lo.max(0.0) as u32, (hi as u32).min(self.n - 1));
        }
        let mut out = Vec::new();
        for z in range[2].0..=range[2].1 {
            for y in range[1].0..=range[1].1 {
                for x in range[0].0..=range[0].1 {
                    out.push(self.index_of([x, y, z]));
                }
            }
        }
        out
    }

    /// The subpartition itself and its (up to 26) face, edge and corner neighbors.
    pub fn neighborhood(&self, idx: SubpartIndex) -> Vec<SubpartIndex> {
        let c = self.subpart_coords(idx);
        let mut out = Vec::with_capacity(27);
        for dz in -1i64..=1 {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let p = [c[0] as i64 + dx, c[1] as i64 + dy, c[2] as i64 + dz];
                    if p.iter().all(|&v| v >= 0 && v < self.n as i64) {
                        out.push(self.index_of([p[0] as u32, p[1] as u32, p[2] as u32]));
                    }
                }
            }
        }
        out
    }

    /// Rebuilds the per-subpartition wall caches.
    pub fn index_walls(&mut self, geometry: &GeometryModel) {
        self.wall_index.iter_mut().for_each(Vec::clear);
        for (i, wall) in geometry.walls().iter().enumerate() {
            let w = WallIndex(i as u32);
            let verts = wall.vertices.map(|v| geometry.vertex(v));
            let lo = verts[0].inf(&verts[1]).inf(&verts[2]);
            let hi = verts[0].sup(&verts[1]).sup(&verts[2]);
            for sp in self.subparts_in_box(&lo, &hi) {
                let (blo, bhi) = self.subpart_bounds(sp);
                if triangle_overlaps_box(&verts, &blo, &bhi) {
                    self.wall_index[sp.index()].push(w);
                }
            }
        }
        debug!(walls = geometry.walls().len(), subparts = self.n_subparts(), "Indexed walls");
    }

    pub fn walls_in(&self, idx: SubpartIndex) -> &[WallIndex] {
        &self.wall_index[idx.index()]
    }

    /// Walls cached in any subpartition overlapping the box, deduplicated and sorted.
    pub fn walls_in_box(&self, min: &Point3<f64>, max: &Point3<f64>) -> BTreeSet<WallIndex> {
        self.subparts_in_box(min, max)
            .into_iter()
            .flat_map(|sp| self.wall_index[sp.index()].iter().copied())
            .collect()
    }

    pub fn volume_molecules_in(&self, idx: SubpartIndex) -> impl Iterator<Item = MoleculeId> + '_ {
        self.volume_index[idx.index()].iter().copied()
    }

    fn allocate_id(&mut self) -> MoleculeId {
        let id = MoleculeId(self.next_molecule_id);
        self.next_molecule_id += 1;
        id
    }

    /// Adds a molecule under a freshly allocated id, filing volume molecules by position.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutsidePartition`] for a volume molecule outside the partition.
    pub fn insert(&mut self, mut molecule: Molecule) -> Result<MoleculeId, EngineError> {
        if let MoleculeLocation::Volume { position, .. } = molecule.location {
            if !self.contains(&position) {
                return Err(EngineError::OutsidePartition {
                    x: position.x,
                    y: position.y,
                    z: position.z,
                });
            }
        }
        molecule.id = self.allocate_id();
        self.file(molecule)
    }

    /// Adds a molecule keeping its id (checkpoint restore).
    pub fn insert_restored(&mut self, molecule: Molecule) -> Result<MoleculeId, EngineError> {
        if self.keys.contains_key(&molecule.id) {
            return Err(EngineError::Internal(format!(
                "molecule {} restored twice",
                molecule.id
            )));
        }
        self.next_molecule_id = self.next_molecule_id.max(molecule.id.0 + 1);
        self.file(molecule)
    }

    fn file(&mut self, mut molecule: Molecule) -> Result<MoleculeId, EngineError> {
        let id = molecule.id;
        if let MoleculeLocation::Volume { position, subpart } = &mut molecule.location {
            let located = self.locate(position).ok_or(EngineError::OutsidePartition {
                x: position.x,
                y: position.y,
                z: position.z,
            })?;
            *subpart = located;
            if !molecule.flags.defunct {
                self.volume_index[located.index()].insert(id);
            }
        }
        if molecule.flags.defunct {
            self.n_defunct += 1;
        }
        let key = self.molecules.insert(molecule);
        self.keys.insert(id, key);
        Ok(id)
    }

    pub fn get(&self, id: MoleculeId) -> Option<&Molecule> {
        self.keys.get(&id).and_then(|k| self.molecules.get(*k))
    }

    /// Mutable access for bookkeeping fields. Volume positions must be changed through
    /// [`SpatialPartition::move_volume`] so the subpartition index stays exact.
    pub fn get_mut(&mut self, id: MoleculeId) -> Option<&mut Molecule> {
        let key = *self.keys.get(&id)?;
        self.molecules.get_mut(key)
    }

    /// Moves a volume molecule and re-files it.
    ///
    /// # Return
    ///
    /// The new subpartition, or `None` (molecule untouched) if the target lies outside
    /// the partition or the molecule is not a live volume molecule.
    pub fn move_volume(&mut self, id: MoleculeId, to: Point3<f64>) -> Option<SubpartIndex> {
        let new_subpart = self.locate(&to)?;
        let key = *self.keys.get(&id)?;
        let molecule = self.molecules.get_mut(key)?;
        if molecule.flags.defunct {
            return None;
        }
        let MoleculeLocation::Volume { position, subpart } = &mut molecule.location else {
            return None;
        };
        let old = *subpart;
        *position = to;
        *subpart = new_subpart;
        self.reindex(id, old, new_subpart);
        Some(new_subpart)
    }

    /// Moves an index entry between subpartitions.
    pub fn reindex(&mut self, id: MoleculeId, old: SubpartIndex, new: SubpartIndex) {
        if old != new {
            self.volume_index[old.index()].remove(&id);
            self.volume_index[new.index()].insert(id);
        }
    }

    /// Removes a molecule outright, bypassing the tombstone.
    pub fn remove(&mut self, id: MoleculeId) -> Option<Molecule> {
        let key = self.keys.remove(&id)?;
        let molecule = self.molecules.remove(key)?;
        if molecule.flags.defunct {
            self.n_defunct -= 1;
        } else if let MoleculeLocation::Volume { subpart, .. } = molecule.location {
            self.volume_index[subpart.index()].remove(&id);
        }
        Some(molecule)
    }

    /// Tombstones a molecule. It stops being visible to encounter searches immediately
    /// and is reclaimed at the next defragmentation.
    pub fn mark_defunct(&mut self, id: MoleculeId) {
        let Some(&key) = self.keys.get(&id) else {
            return;
        };
        let Some(molecule) = self.molecules.get_mut(key) else {
            return;
        };
        if molecule.flags.defunct {
            return;
        }
        molecule.flags.defunct = true;
        self.n_defunct += 1;
        if let MoleculeLocation::Volume { subpart, .. } = molecule.location {
            self.volume_index[subpart.index()].remove(&id);
        }
    }

    /// Reclaims every tombstoned molecule.
    pub fn defragment(&mut self) -> usize {
        let dead: Vec<MoleculeId> = self
            .keys
            .iter()
            .filter(|(_, k)| self.molecules.get(**k).is_some_and(Molecule::is_defunct))
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            if let Some(key) = self.keys.remove(id) {
                self.molecules.remove(key);
            }
        }
        self.n_defunct = 0;
        dead.len()
    }

    /// All molecules (including tombstoned ones) in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Molecule> + '_ {
        self.keys.values().filter_map(|k| self.molecules.get(*k))
    }

    /// Live molecules in id order.
    pub fn live(&self) -> impl Iterator<Item = &Molecule> + '_ {
        self.iter().filter(|m| !m.is_defunct())
    }

    pub fn live_ids(&self) -> Vec<MoleculeId> {
        self.live().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.keys.len() - self.n_defunct
    }

    pub fn n_defunct(&self) -> usize {
        self.n_defunct
    }

    pub fn next_molecule_id(&self) -> u64 {
        self.next_molecule_id
    }

    pub fn set_next_molecule_id(&mut self, next: u64) {
        self.next_molecule_id = next;
    }

    pub fn clear_molecules(&mut self) {
        self.molecules.clear();
        self.keys.clear();
        self.volume_index.iter_mut().for_each(BTreeSet::clear);
        self.n_defunct = 0;
    }

    /// Checks the one-subpartition-per-volume-molecule invariant.
    pub fn verify_index(&self) -> Result<(), EngineError> {
        let mut filed = 0usize;
        for (i, set) in self.volume_index.iter().enumerate() {
            for id in set {
                let m = self
                    .get(*id)
                    .ok_or_else(|| EngineError::Internal(format!("stale index entry {id}")))?;
                match m.location {
                    MoleculeLocation::Volume { position, subpart }
                        if subpart.index() == i && self.locate(&position) == Some(subpart) => {}
                    _ => {
                        return Err(EngineError::Internal(format!(
                            "molecule {id} filed in wrong subpartition {i}"
                        )));
                    }
                }
                filed += 1;
            }
        }
        let expected = self.live().filter(|m| m.is_volume()).count();
        if filed != expected {
            return Err(EngineError::Internal(format!(
                "{filed} volume molecules filed but {expected} are live"
            )));
        }
        Ok(())
    }
}
