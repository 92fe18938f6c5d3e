use super::GeometryError;
use super::closest::find_closest_position;
use super::edge::Edge;
use super::grid::Grid;
use super::wall::Wall;
use crate::core::models::ids::{EdgeIndex, ObjectId, RegionId, SpeciesId, TileIndex, VertexIndex, WallIndex};
use crate::core::utils::geometry::{EPSILON, barycentric, segment_triangle_intersection};
use nalgebra::{Point3, Vector2, Vector3};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::{debug, warn};

pub type Color = [f32; 4];

pub const DEFAULT_WALL_COLOR: Color = [1.0, 1.0, 1.0, 1.0];
pub const ALL_REGION: &str = "ALL";

/// Input for [`GeometryModel::add_object`].
#[derive(Debug, Clone, Default)]
pub struct ObjectSpec {
    pub name: String,
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[usize; 3]>,
    pub counted: bool,
    pub report_wall_hits: bool,
    pub volume_compartment: Option<String>,
    pub surface_compartment: Option<String>,
    pub color: Option<Color>,
}

#[derive(Debug, Clone)]
pub struct GeometryObject {
    pub id: ObjectId,
    pub name: String,
    pub walls: Vec<WallIndex>,
    pub vertex_range: Range<u32>,
    pub regions: Vec<RegionId>,
    pub counted: bool,
    pub report_wall_hits: bool,
    pub volume_compartment: Option<String>,
    pub surface_compartment: Option<String>,
    pub watertight: bool,
    pub color: Option<Color>,
}

impl GeometryObject {
    pub fn owns_vertex(&self, v: VertexIndex) -> bool {
        self.vertex_range.contains(&v.0)
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub object: ObjectId,
    pub walls: Vec<WallIndex>,
    pub surface_class: Option<SpeciesId>,
    pub color: Option<Color>,
}

/// The assembled triangle-mesh world: vertices, walls, shared-edge transforms, objects and
/// regions.
#[derive(Debug, Clone)]
pub struct GeometryModel {
    vertices: Vec<Point3<f64>>,
    vertex_walls: Vec<Vec<WallIndex>>,
    walls: Vec<Wall>,
    edges: Vec<Edge>,
    objects: Vec<GeometryObject>,
    regions: Vec<Region>,
    grid_density: f64,
}

impl GeometryModel {
    pub fn new(grid_density: f64) -> Self {
        Self {
            vertices: Vec::new(),
            vertex_walls: Vec::new(),
            walls: Vec::new(),
            edges: Vec::new(),
            objects: Vec::new(),
            regions: Vec::new(),
            grid_density,
        }
    }

    /// Adds a closed or open triangle mesh, discovering neighbors through shared vertex
    /// pairs and building an edge transform for every shared edge.
    ///
    /// An implicit `ALL` region covering every wall is created for the object.
    ///
    /// # Errors
    ///
    /// Fails on duplicate object names, out-of-range or repeated vertex indices and
    /// degenerate triangles.
    pub fn add_object(&mut self, spec: ObjectSpec) -> Result<ObjectId, GeometryError> {
        if self.object_by_name(&spec.name).is_some() {
            return Err(GeometryError::DuplicateObject(spec.name));
        }
        let id = ObjectId(self.objects.len() as u32);
        let vertex_offset = self.vertices.len() as u32;
        let count = spec.vertices.len();

        let mut new_walls = Vec::with_capacity(spec.triangles.len());
        for (side, tri) in spec.triangles.iter().enumerate() {
            if let Some(&bad) = tri.iter().find(|&&i| i >= count) {
                return Err(GeometryError::VertexOutOfRange {
                    object: spec.name.clone(),
                    index: bad,
                    count,
                });
            }
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                return Err(GeometryError::RepeatedVertex {
                    object: spec.name.clone(),
                });
            }
            let indices = tri.map(|i| VertexIndex(vertex_offset + i as u32));
            let positions = tri.map(|i| spec.vertices[i]);
            new_walls.push(Wall::new(id, side, indices, &positions)?);
        }

        self.vertices.extend_from_slice(&spec.vertices);
        self.vertex_walls.extend((0..count).map(|_| Vec::new()));
        let first_wall = self.walls.len() as u32;
        let wall_ids: Vec<WallIndex> = (0..new_walls.len() as u32)
            .map(|i| WallIndex(first_wall + i))
            .collect();
        for (wall, &wid) in new_walls.into_iter().zip(&wall_ids) {
            for v in wall.vertices {
                self.vertex_walls[v.index()].push(wid);
            }
            self.walls.push(wall);
        }

        let watertight = self.connect_walls(&wall_ids);
        debug!(
            object = %spec.name,
            walls = wall_ids.len(),
            watertight,
            "Added geometry object"
        );

        self.objects.push(GeometryObject {
            id,
            name: spec.name,
            walls: wall_ids,
            vertex_range: vertex_offset..vertex_offset + count as u32,
            regions: Vec::new(),
            counted: spec.counted,
            report_wall_hits: spec.report_wall_hits,
            volume_compartment: spec.volume_compartment,
            surface_compartment: spec.surface_compartment,
            watertight,
            color: spec.color,
        });
        self.add_region(id, ALL_REGION, None, None, None)?;
        Ok(id)
    }

    fn connect_walls(&mut self, wall_ids: &[WallIndex]) -> bool {
        let mut by_edge: BTreeMap<(VertexIndex, VertexIndex), Vec<(WallIndex, usize)>> =
            BTreeMap::new();
        for &w in wall_ids {
            let verts = self.walls[w.index()].vertices;
            for k in 0..3 {
                let (a, b) = (verts[k], verts[(k + 1) % 3]);
                let key = if a < b { (a, b) } else { (b, a) };
                by_edge.entry(key).or_default().push((w, k));
            }
        }

        let mut watertight = true;
        for sharing in by_edge.values() {
            let [(wf, kf), (wb, kb)] = sharing.as_slice() else {
                watertight = false;
                continue;
            };
            let fwd = &self.walls[wf.index()];
            let a = self.vertices[fwd.vertices[*kf].index()];
            let b = self.vertices[fwd.vertices[(*kf + 1) % 3].index()];
            let edge = Edge::new(
                (*wf, fwd),
                (*wb, &self.walls[wb.index()]),
                *kf,
                *kb,
                &a,
                &b,
            );
            let eid = EdgeIndex(self.edges.len() as u32);
            self.edges.push(edge);
            let fwd = &mut self.walls[wf.index()];
            fwd.neighbors[*kf] = Some(*wb);
            fwd.edges[*kf] = Some(eid);
            let bwd = &mut self.walls[wb.index()];
            bwd.neighbors[*kb] = Some(*wf);
            bwd.edges[*kb] = Some(eid);
        }
        watertight
    }

    /// Adds a named region over a subset of an object's walls (`sides` are wall indices
    /// within the object; `None` selects every wall).
    pub fn add_region(
        &mut self,
        object: ObjectId,
        name: &str,
        sides: Option<&[usize]>,
        surface_class: Option<SpeciesId>,
        color: Option<Color>,
    ) -> Result<RegionId, GeometryError> {
        let obj = &self.objects[object.index()];
        let walls: Vec<WallIndex> = match sides {
            None => obj.walls.clone(),
            Some(sides) => sides
                .iter()
                .map(|&side| {
                    obj.walls.get(side).copied().ok_or_else(|| {
                        GeometryError::RegionWallOutOfRange {
                            object: obj.name.clone(),
                            region: name.to_string(),
                            side,
                        }
                    })
                })
                .collect::<Result<_, _>>()?,
        };

        if let Some(existing) = self.region_by_name(object, name) {
            let existing = existing.id;
            let region = &mut self.regions[existing.index()];
            if region.surface_class.is_none() {
                region.surface_class = surface_class;
            }
            if region.color.is_none() {
                region.color = color;
            }
            for w in walls.iter() {
                if !region.walls.contains(w) {
                    region.walls.push(*w);
                }
            }
            self.attach_region(existing, &walls, surface_class);
            return Ok(existing);
        }

        let id = RegionId(self.regions.len() as u32);
        self.attach_region(id, &walls, surface_class);
        self.regions.push(Region {
            id,
            name: name.to_string(),
            object,
            walls,
            surface_class,
            color,
        });
        self.objects[object.index()].regions.push(id);
        Ok(id)
    }

    fn attach_region(&mut self, id: RegionId, walls: &[WallIndex], surface_class: Option<SpeciesId>) {
        for w in walls {
            let wall = &mut self.walls[w.index()];
            if !wall.regions.contains(&id) {
                wall.regions.push(id);
            }
            if let Some(sc) = surface_class {
                if !wall.surface_classes.contains(&sc) {
                    wall.surface_classes.push(sc);
                }
            }
        }
    }

    pub fn grid_density(&self) -> f64 {
        self.grid_density
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn wall(&self, w: WallIndex) -> &Wall {
        &self.walls[w.index()]
    }

    pub fn try_wall(&self, w: WallIndex) -> Result<&Wall, GeometryError> {
        self.walls.get(w.index()).ok_or(GeometryError::WallOutOfRange(w))
    }

    pub fn edge(&self, e: EdgeIndex) -> &Edge {
        &self.edges[e.index()]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn vertex(&self, v: VertexIndex) -> Point3<f64> {
        self.vertices[v.index()]
    }

    pub fn objects(&self) -> &[GeometryObject] {
        &self.objects
    }

    pub fn object(&self, id: ObjectId) -> &GeometryObject {
        &self.objects[id.index()]
    }

    pub fn object_by_name(&self, name: &str) -> Option<&GeometryObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    pub fn region_by_name(&self, object: ObjectId, name: &str) -> Option<&Region> {
        self.objects[object.index()]
            .regions
            .iter()
            .map(|r| &self.regions[r.index()])
            .find(|r| r.name == name)
    }

    pub fn wall_vertices(&self, w: WallIndex) -> [Point3<f64>; 3] {
        self.walls[w.index()].vertices.map(|v| self.vertices[v.index()])
    }

    pub fn wall_normal(&self, w: WallIndex) -> Vector3<f64> {
        self.walls[w.index()].normal
    }

    /// Color of a wall: the most recently added region with a color wins, then the
    /// object color, then the default.
    pub fn wall_color(&self, w: WallIndex) -> Color {
        let wall = &self.walls[w.index()];
        wall.regions
            .iter()
            .rev()
            .find_map(|r| self.regions[r.index()].color)
            .or(self.objects[wall.object.index()].color)
            .unwrap_or(DEFAULT_WALL_COLOR)
    }

    /// Normalized sum of the normals of the walls meeting at a vertex.
    pub fn vertex_unit_normal(&self, v: VertexIndex) -> Vector3<f64> {
        let sum: Vector3<f64> = self.vertex_walls[v.index()]
            .iter()
            .map(|w| self.walls[w.index()].normal)
            .sum();
        sum.try_normalize(EPSILON).unwrap_or_else(Vector3::zeros)
    }

    pub fn object_bounding_box(&self, id: ObjectId) -> (Point3<f64>, Point3<f64>) {
        let range = &self.objects[id.index()].vertex_range;
        let pts = &self.vertices[range.start as usize..range.end as usize];
        let mut lo = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut hi = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in pts {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        (lo, hi)
    }

    /// Enclosed volume of a closed object, µm³.
    pub fn object_volume(&self, id: ObjectId) -> f64 {
        let six_v: f64 = self.objects[id.index()]
            .walls
            .iter()
            .map(|&w| {
                let [a, b, c] = self.wall_vertices(w);
                a.coords.dot(&b.coords.cross(&c.coords))
            })
            .sum();
        (six_v / 6.0).abs()
    }

    pub fn region_area(&self, id: RegionId) -> f64 {
        self.regions[id.index()]
            .walls
            .iter()
            .map(|w| self.walls[w.index()].area)
            .sum()
    }

    /// Point-in-closed-mesh test by ray parity. Rays grazing an edge or vertex are
    /// retried along another direction.
    pub fn point_in_object(&self, id: ObjectId, point: &Point3<f64>) -> bool {
        const DIRECTIONS: [[f64; 3]; 4] = [
            [0.381_965, 0.529_150, 0.758_306],
            [-0.612_372, 0.353_553, 0.707_107],
            [0.267_261, -0.801_784, 0.534_522],
            [0.0, 0.0, 1.0],
        ];
        let (lo, hi) = self.object_bounding_box(id);
        let reach = (hi - lo).norm() + (point - lo).norm() + 1.0;
        let object = &self.objects[id.index()];

        let mut crossings = 0usize;
        for dir in DIRECTIONS {
            let ray = Vector3::from(dir).normalize() * reach;
            crossings = 0;
            let mut ambiguous = false;
            for &w in &object.walls {
                let [a, b, c] = self.wall_vertices(w);
                if let Some(s) = segment_triangle_intersection(point, &ray, &a, &b, &c) {
                    let hit = point + ray * s;
                    let bary = barycentric(&hit, &a, &b, &c);
                    if bary.iter().any(|x| x.abs() < 1e-9) {
                        ambiguous = true;
                        break;
                    }
                    crossings += 1;
                }
            }
            if !ambiguous {
                break;
            }
        }
        crossings % 2 == 1
    }

    pub fn grid(&self, w: WallIndex) -> Option<&Grid> {
        self.walls[w.index()].grid.as_ref()
    }

    pub fn grid_mut(&mut self, w: WallIndex) -> Option<&mut Grid> {
        self.walls[w.index()].grid.as_mut()
    }

    /// Returns the wall's grid, creating it on first use.
    pub fn ensure_grid(&mut self, w: WallIndex) -> &mut Grid {
        let density = self.grid_density;
        let wall = &mut self.walls[w.index()];
        let (area, u1, v2) = (wall.area, wall.uv_vert1_u, wall.uv_vert2);
        wall.grid
            .get_or_insert_with(|| Grid::new(area, u1, v2, density))
    }

    pub fn tile_vertices_xyz(&mut self, w: WallIndex, tile: TileIndex) -> [Point3<f64>; 3] {
        let uv = self.ensure_grid(w).tile_vertices(tile);
        let wall = &self.walls[w.index()];
        uv.map(|p| wall.uv_to_xyz(&p))
    }

    /// Tiles sharing an edge with `tile`, including tiles on neighboring walls across
    /// shared edges. Grids of neighboring walls are created as needed.
    pub fn neighbor_tiles(&mut self, w: WallIndex, tile: TileIndex) -> Vec<(WallIndex, TileIndex)> {
        let grid = self.ensure_grid(w);
        let mut out: Vec<(WallIndex, TileIndex)> = grid
            .neighbors_in_wall(tile)
            .into_iter()
            .map(|t| (w, t))
            .collect();
        let crossings: Vec<(usize, Vector2<f64>)> = grid
            .boundary_edges(tile)
            .into_iter()
            .filter_map(|k| grid.boundary_side_midpoint(tile, k).map(|m| (k, m)))
            .collect();

        for (k, mid) in crossings {
            let Some((nb, uv)) = self.cross_edge(w, k, &mid) else {
                continue;
            };
            let centroid = self.walls[nb.index()].centroid_uv();
            let nudged = uv + (centroid - uv) * 1e-6;
            let t = self.ensure_grid(nb).uv_to_tile(&nudged);
            if !out.contains(&(nb, t)) {
                out.push((nb, t));
            }
        }
        out
    }

    /// Maps a point of wall `w` across its edge `k` into the neighboring wall's frame.
    pub fn cross_edge(&self, w: WallIndex, k: usize, uv: &Vector2<f64>) -> Option<(WallIndex, Vector2<f64>)> {
        let wall = &self.walls[w.index()];
        let nb = wall.neighbors[k]?;
        let edge = &self.edges[wall.edges[k]?.index()];
        Some((nb, edge.transform_from(w, uv)))
    }

    /// Position (in the destination wall's frame) strictly inside `dst_tile` and as close
    /// as possible to `src_tile`.
    ///
    /// # Errors
    ///
    /// [`GeometryError::NoClosestPosition`] when the tiered search yields no interior point.
    pub fn closest_position_in_tile(
        &mut self,
        src: (WallIndex, TileIndex),
        dst: (WallIndex, TileIndex),
    ) -> Result<Vector2<f64>, GeometryError> {
        let src_xyz = self.tile_vertices_xyz(src.0, src.1);
        let dst_xyz = self.tile_vertices_xyz(dst.0, dst.1);
        let point = find_closest_position(&src_xyz, &dst_xyz).ok_or(GeometryError::NoClosestPosition {
            src_wall: src.0,
            src_tile: src.1,
            dst_wall: dst.0,
            dst_tile: dst.1,
        })?;
        Ok(self.walls[dst.0.index()].xyz_to_uv(&point))
    }

    /// Moves vertices of one object and recomputes every dependent wall frame, grid
    /// layout and edge transform.
    ///
    /// # Return
    ///
    /// The walls whose constants changed.
    ///
    /// # Errors
    ///
    /// Fails if a vertex belongs to another object or a moved wall degenerates; in that
    /// case the geometry is left unchanged.
    pub fn apply_vertex_displacements(
        &mut self,
        object: ObjectId,
        displacements: &[(VertexIndex, Vector3<f64>)],
    ) -> Result<Vec<WallIndex>, GeometryError> {
        let obj = &self.objects[object.index()];
        if let Some((v, _)) = displacements.iter().find(|(v, _)| !obj.owns_vertex(*v)) {
            return Err(GeometryError::ForeignVertex(*v));
        }

        let saved: Vec<(VertexIndex, Point3<f64>)> = displacements
            .iter()
            .map(|(v, _)| (*v, self.vertices[v.index()]))
            .collect();
        for (v, d) in displacements {
            self.vertices[v.index()] += d;
        }

        let affected: Vec<WallIndex> = displacements
            .iter()
            .flat_map(|(v, _)| self.vertex_walls[v.index()].iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if let Err(err) = self.refresh_walls(&affected) {
            warn!("Vertex displacement rejected: {}", err);
            for (v, p) in saved.iter().rev() {
                self.vertices[v.index()] = *p;
            }
            self.refresh_walls(&affected)?;
            return Err(err);
        }
        Ok(affected)
    }

    /// Restores all vertex positions (used when loading a checkpoint).
    pub fn set_vertex_positions(&mut self, positions: &[Point3<f64>]) -> Result<(), GeometryError> {
        let n = positions.len().min(self.vertices.len());
        self.vertices[..n].copy_from_slice(&positions[..n]);
        let all: Vec<WallIndex> = (0..self.walls.len() as u32).map(WallIndex).collect();
        self.refresh_walls(&all)
    }

    fn refresh_walls(&mut self, walls: &[WallIndex]) -> Result<(), GeometryError> {
        for &w in walls {
            let positions = self.wall_vertices(w);
            self.walls[w.index()].update_constants(&positions)?;
        }
        let edges: BTreeSet<EdgeIndex> = walls
            .iter()
            .flat_map(|w| self.walls[w.index()].edges.iter().flatten().copied())
            .collect();
        for e in edges {
            let edge = &self.edges[e.index()];
            let fwd = &self.walls[edge.forward.index()];
            let a = self.vertices[fwd.vertices[edge.edge_forward].index()];
            let b = self.vertices[fwd.vertices[(edge.edge_forward + 1) % 3].index()];
            let bwd = &self.walls[edge.backward.index()];
            let mut updated = edge.clone();
            updated.update(fwd, bwd, &a, &b);
            self.edges[e.index()] = updated;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Axis-aligned cube with outward-facing triangles.
    pub(crate) fn cube_spec(name: &str, center: Point3<f64>, half: f64) -> ObjectSpec {
        let mut vertices = Vec::new();
        for i in 0..8 {
            vertices.push(Point3::new(
                center.x + if i & 1 == 0 { -half } else { half },
                center.y + if i & 2 == 0 { -half } else { half },
                center.z + if i & 4 == 0 { -half } else { half },
            ));
        }
        let triangles = vec![
            [0, 2, 1],
            [1, 2, 3],
            [4, 5, 6],
            [5, 7, 6],
            [0, 1, 4],
            [1, 5, 4],
            [2, 6, 3],
            [3, 6, 7],
            [0, 4, 2],
            [2, 4, 6],
            [1, 3, 5],
            [3, 7, 5],
        ];
        ObjectSpec {
            name: name.to_string(),
            vertices,
            triangles,
            counted: true,
            ..Default::default()
        }
    }

    fn cube_model() -> (GeometryModel, ObjectId) {
        let mut model = GeometryModel::new(10.0);
        let id = model
            .add_object(cube_spec("box", Point3::origin(), 1.0))
            .unwrap();
        (model, id)
    }

    #[test]
    fn cube_is_watertight_and_fully_connected() {
        let (model, id) = cube_model();
        assert!(model.object(id).watertight);
        assert_eq!(model.edges().len(), 18);
        assert!(model.walls().iter().all(|w| w.neighbors.iter().all(Option::is_some)));
    }

    #[test]
    fn cube_normals_point_outward() {
        let (model, id) = cube_model();
        for &w in &model.object(id).walls {
            let wall = model.wall(w);
            let [a, b, c] = model.wall_vertices(w);
            let centroid = Point3::from((a.coords + b.coords + c.coords) / 3.0);
            assert!(centroid.coords.dot(&wall.normal) > 0.0);
        }
    }

    #[test]
    fn open_mesh_is_not_watertight() {
        let mut model = GeometryModel::new(10.0);
        let id = model
            .add_object(ObjectSpec {
                name: "sheet".into(),
                vertices: vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(1.0, 0.0, 0.0),
                    Point3::new(0.0, 1.0, 0.0),
                    Point3::new(1.0, 1.0, 0.0),
                ],
                triangles: vec![[0, 1, 2], [1, 3, 2]],
                ..Default::default()
            })
            .unwrap();
        assert!(!model.object(id).watertight);
        assert_eq!(model.edges().len(), 1);
    }

    #[test]
    fn point_in_cube_uses_ray_parity() {
        let (model, id) = cube_model();
        assert!(model.point_in_object(id, &Point3::new(0.1, 0.2, -0.3)));
        assert!(model.point_in_object(id, &Point3::origin()));
        assert!(!model.point_in_object(id, &Point3::new(1.5, 0.0, 0.0)));
        assert_relative_eq!(model.object_volume(id), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn vertex_normal_of_cube_corner_points_diagonally() {
        let (model, _) = cube_model();
        let n = model.vertex_unit_normal(VertexIndex(7));
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-12);
        assert!(n.x > 0.0 && n.y > 0.0 && n.z > 0.0);
    }

    #[test]
    fn region_color_overrides_default() {
        let (mut model, id) = cube_model();
        assert_eq!(model.wall_color(WallIndex(0)), DEFAULT_WALL_COLOR);
        let red = [1.0, 0.0, 0.0, 1.0];
        model
            .add_region(id, "bottom", Some(&[0, 1]), None, Some(red))
            .unwrap();
        assert_eq!(model.wall_color(WallIndex(0)), red);
        assert_eq!(model.wall_color(WallIndex(2)), DEFAULT_WALL_COLOR);
        assert!(model.region_by_name(id, ALL_REGION).is_some());
    }

    #[test]
    fn region_side_out_of_range_is_rejected() {
        let (mut model, id) = cube_model();
        assert!(matches!(
            model.add_region(id, "bad", Some(&[12]), None, None),
            Err(GeometryError::RegionWallOutOfRange { .. })
        ));
    }

    #[test]
    fn neighbor_tiles_cross_shared_edges() {
        let (mut model, _) = cube_model();
        let w = WallIndex(0);
        let n = model.ensure_grid(w).n;
        // Apex tile touches two wall edges, both shared with other walls.
        let neighbors = model.neighbor_tiles(w, TileIndex(0));
        assert!(neighbors.iter().filter(|(nw, _)| *nw != w).count() == 2);
        assert!(n > 1);
    }

    #[test]
    fn closest_position_between_adjacent_walls_is_interior() {
        let (mut model, _) = cube_model();
        let w = WallIndex(0);
        let neighbors = model.neighbor_tiles(w, TileIndex(0));
        let (nw, nt) = *neighbors.iter().find(|(nw, _)| *nw != w).unwrap();
        let uv = model.closest_position_in_tile((w, TileIndex(0)), (nw, nt)).unwrap();
        assert_eq!(model.grid(nw).unwrap().uv_to_tile(&uv), nt);
    }

    #[test]
    fn displacement_updates_frames_and_edges() {
        let (mut model, id) = cube_model();
        let affected = model
            .apply_vertex_displacements(id, &[(VertexIndex(7), Vector3::new(0.5, 0.5, 0.5))])
            .unwrap();
        assert!(!affected.is_empty());
        for e in model.edges() {
            let fwd = model.wall(e.forward);
            let bwd = model.wall(e.backward);
            let a = model.vertex(fwd.vertices[e.edge_forward]);
            assert_relative_eq!(e.forward_transform(&fwd.xyz_to_uv(&a)), bwd.xyz_to_uv(&a), epsilon = 1e-9);
        }
    }

    #[test]
    fn degenerating_displacement_is_rolled_back() {
        let (mut model, id) = cube_model();
        let before = model.vertex(VertexIndex(1));
        // Collapse vertex 1 onto vertex 0.
        let err = model
            .apply_vertex_displacements(id, &[(VertexIndex(1), Vector3::new(-2.0, 0.0, 0.0))])
            .unwrap_err();
        assert!(matches!(err, GeometryError::DegenerateWall { .. }));
        assert_eq!(model.vertex(VertexIndex(1)), before);
    }
}
