use super::GeometryError;
use super::grid::Grid;
use crate::core::models::ids::{EdgeIndex, ObjectId, RegionId, SpeciesId, VertexIndex, WallIndex};
use crate::core::utils::geometry::{EPSILON, cross_2d};
use nalgebra::{Point3, Vector2, Vector3};
use rand::Rng;

/// A triangular wall with its own orthonormal (u, v) frame.
///
/// Vertex 0 is the frame origin, vertex 1 lies on the positive u axis at
/// `(uv_vert1_u, 0)`, and vertex 2 sits at `uv_vert2`. The vertex order fixes the
/// outward normal (right-hand rule).
#[derive(Debug, Clone)]
pub struct Wall {
    pub vertices: [VertexIndex; 3],
    pub object: ObjectId,
    /// Index of the wall within its object.
    pub side: usize,
    pub normal: Vector3<f64>,
    pub distance_to_origin: f64,
    pub unit_u: Vector3<f64>,
    pub unit_v: Vector3<f64>,
    pub uv_vert1_u: f64,
    pub uv_vert2: Vector2<f64>,
    pub area: f64,
    /// 3D position of vertex 0.
    pub origin: Point3<f64>,
    pub neighbors: [Option<WallIndex>; 3],
    pub edges: [Option<EdgeIndex>; 3],
    pub regions: Vec<RegionId>,
    pub surface_classes: Vec<SpeciesId>,
    pub grid: Option<Grid>,
}

impl Wall {
    /// Builds a wall from three vertex positions.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DegenerateWall`] if the triangle has zero area.
    pub fn new(
        object: ObjectId,
        side: usize,
        vertices: [VertexIndex; 3],
        positions: &[Point3<f64>; 3],
    ) -> Result<Self, GeometryError> {
        let mut wall = Self {
            vertices,
            object,
            side,
            normal: Vector3::zeros(),
            distance_to_origin: 0.0,
            unit_u: Vector3::zeros(),
            unit_v: Vector3::zeros(),
            uv_vert1_u: 0.0,
            uv_vert2: Vector2::zeros(),
            area: 0.0,
            origin: positions[0],
            neighbors: [None; 3],
            edges: [None; 3],
            regions: Vec::new(),
            surface_classes: Vec::new(),
            grid: None,
        };
        wall.update_constants(positions)?;
        Ok(wall)
    }

    /// Recomputes the frame after the vertices moved. Neighbor links are kept.
    pub fn update_constants(&mut self, positions: &[Point3<f64>; 3]) -> Result<(), GeometryError> {
        let va = positions[1] - positions[0];
        let vb = positions[2] - positions[0];
        let vx = va.cross(&vb);
        let cross_norm = vx.norm();
        let scale = va.norm() * vb.norm();
        if cross_norm <= EPSILON * scale || cross_norm == 0.0 {
            return Err(GeometryError::DegenerateWall {
                vertices: self.vertices,
            });
        }

        self.area = 0.5 * cross_norm;
        self.normal = vx / cross_norm;
        self.uv_vert1_u = va.norm();
        self.unit_u = va / self.uv_vert1_u;
        self.unit_v = self.normal.cross(&self.unit_u);
        self.uv_vert2 = Vector2::new(vb.dot(&self.unit_u), vb.dot(&self.unit_v));
        self.distance_to_origin = positions[0].coords.dot(&self.normal);
        self.origin = positions[0];
        if let Some(grid) = self.grid.as_mut() {
            grid.refresh_constants(self.uv_vert1_u, self.uv_vert2);
        }
        Ok(())
    }

    pub fn uv_vertices(&self) -> [Vector2<f64>; 3] {
        [
            Vector2::zeros(),
            Vector2::new(self.uv_vert1_u, 0.0),
            self.uv_vert2,
        ]
    }

    /// Projects a 3D point into the wall frame (the normal component is dropped).
    pub fn xyz_to_uv(&self, point: &Point3<f64>) -> Vector2<f64> {
        let d = point - self.origin;
        Vector2::new(d.dot(&self.unit_u), d.dot(&self.unit_v))
    }

    pub fn uv_to_xyz(&self, uv: &Vector2<f64>) -> Point3<f64> {
        self.origin + self.unit_u * uv.x + self.unit_v * uv.y
    }

    /// Barycentric coordinates of a 2D point with respect to the wall's uv triangle.
    pub fn uv_barycentric(&self, uv: &Vector2<f64>) -> [f64; 3] {
        let v1 = Vector2::new(self.uv_vert1_u, 0.0);
        let v2 = self.uv_vert2;
        let denom = cross_2d(&v1, &v2);
        let b1 = cross_2d(uv, &v2) / denom;
        let b2 = cross_2d(&v1, uv) / denom;
        [1.0 - b1 - b2, b1, b2]
    }

    pub fn uv_from_barycentric(&self, bary: &[f64; 3]) -> Vector2<f64> {
        Vector2::new(self.uv_vert1_u, 0.0) * bary[1] + self.uv_vert2 * bary[2]
    }

    /// Whether a 2D point lies inside the wall, with a tolerance relative to the wall size.
    pub fn contains_uv(&self, uv: &Vector2<f64>, tolerance: f64) -> bool {
        self.uv_barycentric(uv).iter().all(|&b| b >= -tolerance)
    }

    /// Uniformly distributed point inside the wall.
    pub fn random_uv(&self, rng: &mut impl Rng) -> Vector2<f64> {
        let mut s: f64 = rng.gen_range(0.0..1.0);
        let mut t: f64 = rng.gen_range(0.0..1.0);
        if s + t > 1.0 {
            s = 1.0 - s;
            t = 1.0 - t;
        }
        Vector2::new(self.uv_vert1_u, 0.0) * s + self.uv_vert2 * t
    }

    pub fn centroid_uv(&self) -> Vector2<f64> {
        (Vector2::new(self.uv_vert1_u, 0.0) + self.uv_vert2) / 3.0
    }

    /// The two uv endpoints of wall edge `k`, which runs from vertex `k` to vertex `k + 1`.
    pub fn edge_uv(&self, k: usize) -> (Vector2<f64>, Vector2<f64>) {
        let uv = self.uv_vertices();
        (uv[k], uv[(k + 1) % 3])
    }

    /// Signed distance of a point from the wall plane (positive on the normal side).
    pub fn signed_distance(&self, point: &Point3<f64>) -> f64 {
        point.coords.dot(&self.normal) - self.distance_to_origin
    }

    pub fn index_of_neighbor(&self, neighbor: WallIndex) -> Option<usize> {
        self.neighbors.iter().position(|n| *n == Some(neighbor))
    }

    pub fn has_surface_class(&self, species: SpeciesId) -> bool {
        self.surface_classes.contains(&species)
    }
}
