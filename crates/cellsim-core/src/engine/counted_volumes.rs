use super::error::EngineError;
use crate::core::geometry::mesh::GeometryModel;
use crate::core::io::checkpoint::CountedVolumeRecord;
use crate::core::models::ids::{CountedVolumeId, ObjectId};
use crate::core::utils::geometry::segment_triangle_intersection;
use itertools::Itertools;
use nalgebra::Point3;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Spatial relation between two closed meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshRelation {
    Disjoint,
    Identical,
    Intersecting,
    AContainsB,
    BContainsA,
}

/// Decides how two closed meshes relate in space.
pub trait SolidGeometryOracle: Send + Sync {
    fn classify(&self, geometry: &GeometryModel, a: ObjectId, b: ObjectId) -> MeshRelation;
}

/// Default oracle: wall-edge / triangle crossing tests followed by a ray-parity
/// containment check of one vertex.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayCastOracle;

impl RayCastOracle {
    fn same_vertex_set(geometry: &GeometryModel, a: ObjectId, b: ObjectId) -> bool {
        let points = |id: ObjectId| -> Vec<[u64; 3]> {
            let range = &geometry.object(id).vertex_range;
            let mut v: Vec<[u64; 3]> = geometry.vertices()[range.start as usize..range.end as usize]
                .iter()
                .map(|p| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
                .collect();
            v.sort_unstable();
            v.dedup();
            v
        };
        geometry.object(a).walls.len() == geometry.object(b).walls.len() && points(a) == points(b)
    }

    /// True when any wall edge of `a` pierces a wall of `b`.
    fn edges_cross(geometry: &GeometryModel, a: ObjectId, b: ObjectId) -> bool {
        let triangles: Vec<[Point3<f64>; 3]> = geometry
            .object(b)
            .walls
            .iter()
            .map(|&w| geometry.wall_vertices(w))
            .collect();
        geometry.object(a).walls.iter().any(|&w| {
            let v = geometry.wall_vertices(w);
            (0..3).any(|k| {
                let (p, q) = (v[k], v[(k + 1) % 3]);
                triangles
                    .iter()
                    .any(|t| segment_triangle_intersection(&p, &(q - p), &t[0], &t[1], &t[2]).is_some())
            })
        })
    }

    fn boxes_overlap(geometry: &GeometryModel, a: ObjectId, b: ObjectId) -> bool {
        let (alo, ahi) = geometry.object_bounding_box(a);
        let (blo, bhi) = geometry.object_bounding_box(b);
        (0..3).all(|i| alo[i] <= bhi[i] && blo[i] <= ahi[i])
    }
}

impl SolidGeometryOracle for RayCastOracle {
    fn classify(&self, geometry: &GeometryModel, a: ObjectId, b: ObjectId) -> MeshRelation {
        if !Self::boxes_overlap(geometry, a, b) {
            return MeshRelation::Disjoint;
        }
        if Self::same_vertex_set(geometry, a, b) {
            return MeshRelation::Identical;
        }
        if Self::edges_cross(geometry, a, b) || Self::edges_cross(geometry, b, a) {
            return MeshRelation::Intersecting;
        }
        let first_vertex = |id: ObjectId| geometry.vertex(geometry.wall(geometry.object(id).walls[0]).vertices[0]);
        if geometry.point_in_object(a, &first_vertex(b)) {
            MeshRelation::AContainsB
        } else if geometry.point_in_object(b, &first_vertex(a)) {
            MeshRelation::BContainsA
        } else {
            MeshRelation::Disjoint
        }
    }
}

/// Compartment hierarchy of the counted closed meshes.
///
/// Every counted object gets an inside id, and its outside id is its direct parent's
/// inside id (or [`CountedVolumeId::OUTSIDE_ALL`] for roots). Objects that intersect
/// another counted object, and everything nested in them, map to
/// [`CountedVolumeId::INTERSECTS`] on both sides.
#[derive(Debug, Clone, Default)]
pub struct CountedVolumes {
    records: BTreeMap<ObjectId, CountedVolumeRecord>,
    parents: BTreeMap<ObjectId, Option<ObjectId>>,
    intersecting: BTreeSet<ObjectId>,
    excluded: Vec<ObjectId>,
    enclosing: BTreeMap<CountedVolumeId, BTreeSet<ObjectId>>,
}

impl CountedVolumes {
    /// Classifies every pair of counted objects and builds the containment forest.
    ///
    /// # Errors
    ///
    /// [`EngineError::IdenticalCountedVolumes`] when two counted objects coincide.
    #[instrument(skip_all, name = "counted_volume_resolution")]
    pub fn build(geometry: &GeometryModel, oracle: &dyn SolidGeometryOracle) -> Result<Self, EngineError> {
        let mut volumes = Self::default();
        let mut counted = Vec::new();
        for object in geometry.objects().iter().filter(|o| o.counted) {
            if object.watertight && !object.walls.is_empty() {
                counted.push(object.id);
            } else {
                warn!(object = %object.name, "Counted object is not closed; excluded from counting");
                volumes.excluded.push(object.id);
            }
        }

        let pairs: Vec<(ObjectId, ObjectId)> = counted.iter().copied().tuple_combinations().collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = pairs.iter();

        #[cfg(feature = "parallel")]
        let iterator = pairs.par_iter();

        let relations: Vec<(ObjectId, ObjectId, MeshRelation)> = iterator
            .map(|&(a, b)| (a, b, oracle.classify(geometry, a, b)))
            .collect();

        let mut containers: BTreeMap<ObjectId, BTreeSet<ObjectId>> =
            counted.iter().map(|&id| (id, BTreeSet::new())).collect();
        for (a, b, relation) in relations {
            debug!(a = %geometry.object(a).name, b = %geometry.object(b).name, ?relation, "Classified pair");
            match relation {
                MeshRelation::Identical => {
                    return Err(EngineError::IdenticalCountedVolumes {
                        a: geometry.object(a).name.clone(),
                        b: geometry.object(b).name.clone(),
                    });
                }
                MeshRelation::Intersecting => {
                    warn!(
                        a = %geometry.object(a).name,
                        b = %geometry.object(b).name,
                        "Counted objects intersect; their compartments cannot be resolved"
                    );
                    volumes.intersecting.insert(a);
                    volumes.intersecting.insert(b);
                }
                MeshRelation::AContainsB => {
                    containers.entry(b).or_default().insert(a);
                }
                MeshRelation::BContainsA => {
                    containers.entry(a).or_default().insert(b);
                }
                MeshRelation::Disjoint => {}
            }
        }

        // The direct parent is the container nested most deeply, i.e. with the most containers itself.
        for (&child, holders) in &containers {
            let parent = holders
                .iter()
                .copied()
                .max_by_key(|h| (containers.get(h).map_or(0, BTreeSet::len), std::cmp::Reverse(*h)));
            volumes.parents.insert(child, parent);
        }

        let tainted: BTreeSet<ObjectId> = counted
            .iter()
            .copied()
            .filter(|&o| volumes.ancestors_and_self(o).any(|a| volumes.intersecting.contains(&a)))
            .collect();

        let mut next = CountedVolumeId::FIRST_OBJECT;
        for &object in &counted {
            if tainted.contains(&object) {
                continue;
            }
            volumes.records.insert(
                object,
                CountedVolumeRecord {
                    object,
                    inside: CountedVolumeId(next),
                    outside: CountedVolumeId::OUTSIDE_ALL,
                },
            );
            next += 1;
        }
        for &object in &tainted {
            volumes.records.insert(
                object,
                CountedVolumeRecord {
                    object,
                    inside: CountedVolumeId::INTERSECTS,
                    outside: CountedVolumeId::INTERSECTS,
                },
            );
        }
        let parents = volumes.parents.clone();
        for (&object, parent) in &parents {
            if tainted.contains(&object) {
                continue;
            }
            let outside = parent
                .and_then(|p| volumes.records.get(&p))
                .map_or(CountedVolumeId::OUTSIDE_ALL, |r| r.inside);
            if let Some(record) = volumes.records.get_mut(&object) {
                record.outside = outside;
            }
        }
        volumes.rebuild_enclosing();

        info!(
            counted = counted.len(),
            excluded = volumes.excluded.len(),
            intersecting = tainted.len(),
            "Counted volumes resolved"
        );
        Ok(volumes)
    }

    fn ancestors_and_self(&self, object: ObjectId) -> impl Iterator<Item = ObjectId> + '_ {
        std::iter::successors(Some(object), move |o| self.parents.get(o).copied().flatten())
    }

    fn rebuild_enclosing(&mut self) {
        self.enclosing.clear();
        self.enclosing.insert(CountedVolumeId::OUTSIDE_ALL, BTreeSet::new());
        let entries: Vec<(CountedVolumeId, ObjectId)> =
            self.records.values().map(|r| (r.inside, r.object)).collect();
        for (inside, object) in entries {
            if inside.is_sentinel() {
                continue;
            }
            let set: BTreeSet<ObjectId> = self.ancestors_and_self(object).collect();
            self.enclosing.insert(inside, set);
        }
    }

    /// Counted volume entered when crossing a wall of `object`, or `None` for walls of
    /// objects that are not counted.
    pub fn crossing(&self, object: ObjectId, outward: bool) -> Option<CountedVolumeId> {
        self.records
            .get(&object)
            .map(|r| if outward { r.outside } else { r.inside })
    }

    /// Counted volume containing `point`.
    pub fn volume_at(&self, geometry: &GeometryModel, point: &Point3<f64>) -> CountedVolumeId {
        let holders: Vec<&CountedVolumeRecord> = self
            .records
            .values()
            .filter(|r| geometry.point_in_object(r.object, point))
            .collect();
        if holders.iter().any(|r| r.inside == CountedVolumeId::INTERSECTS) {
            return CountedVolumeId::INTERSECTS;
        }
        holders
            .into_iter()
            .max_by_key(|r| self.depth(r.object))
            .map_or(CountedVolumeId::OUTSIDE_ALL, |r| r.inside)
    }

    /// Objects enclosing every point of `volume`. Empty for the sentinels.
    pub fn enclosing(&self, volume: CountedVolumeId) -> Option<&BTreeSet<ObjectId>> {
        self.enclosing.get(&volume)
    }

    pub fn encloses(&self, volume: CountedVolumeId, object: ObjectId) -> bool {
        self.enclosing.get(&volume).is_some_and(|s| s.contains(&object))
    }

    pub fn is_counted(&self, object: ObjectId) -> bool {
        self.records.contains_key(&object)
    }

    pub fn parent(&self, object: ObjectId) -> Option<ObjectId> {
        self.parents.get(&object).copied().flatten()
    }

    pub fn depth(&self, object: ObjectId) -> usize {
        self.ancestors_and_self(object).count() - 1
    }

    pub fn record(&self, object: ObjectId) -> Option<&CountedVolumeRecord> {
        self.records.get(&object)
    }

    pub fn records(&self) -> Vec<CountedVolumeRecord> {
        self.records.values().copied().collect()
    }

    pub fn excluded(&self) -> &[ObjectId] {
        &self.excluded
    }

    /// Counted objects in depth-first order with their nesting depth.
    pub fn hierarchy(&self) -> Vec<(ObjectId, usize)> {
        fn visit(volumes: &CountedVolumes, node: ObjectId, depth: usize, out: &mut Vec<(ObjectId, usize)>) {
            out.push((node, depth));
            for (&child, _) in volumes.parents.iter().filter(|(_, p)| **p == Some(node)) {
                visit(volumes, child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for (&root, _) in self.parents.iter().filter(|(_, p)| p.is_none()) {
            visit(self, root, 0, &mut out);
        }
        out
    }

    /// Replaces the id assignment with one saved in a checkpoint.
    ///
    /// # Errors
    ///
    /// [`EngineError::Checkpoint`] if the saved set of counted objects differs.
    pub fn restore_records(&mut self, records: &[CountedVolumeRecord]) -> Result<(), EngineError> {
        let saved: BTreeSet<ObjectId> = records.iter().map(|r| r.object).collect();
        let current: BTreeSet<ObjectId> = self.records.keys().copied().collect();
        if saved != current {
            return Err(crate::core::io::checkpoint::CheckpointError::Incompatible(
                "counted objects differ".to_string(),
            )
            .into());
        }
        self.records = records.iter().map(|r| (r.object, *r)).collect();
        self.rebuild_enclosing();
        Ok(())
    }
}
