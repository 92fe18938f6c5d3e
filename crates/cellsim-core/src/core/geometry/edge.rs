use super::wall::Wall;
use crate::core::models::ids::WallIndex;
use nalgebra::{Point3, Vector2};

/// Rigid 2D transform between the frames of two walls sharing an edge.
///
/// The transform unfolds the backward wall into the plane of the forward wall around the
/// shared edge, so a point that leaves the forward wall across the edge lands on the
/// backward wall at the same distance along and away from the edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub forward: WallIndex,
    pub backward: WallIndex,
    /// Edge number within the forward wall (edge `k` joins vertices `k` and `k + 1`).
    pub edge_forward: usize,
    pub edge_backward: usize,
    pub cos_theta: f64,
    pub sin_theta: f64,
    pub translate: Vector2<f64>,
}

impl Edge {
    /// Computes the transform constants for the shared edge `edge_forward` of `fwd`.
    ///
    /// `a` and `b` are the 3D endpoints of the shared edge, in the order they appear in
    /// the forward wall.
    pub fn new(
        forward: (WallIndex, &Wall),
        backward: (WallIndex, &Wall),
        edge_forward: usize,
        edge_backward: usize,
        a: &Point3<f64>,
        b: &Point3<f64>,
    ) -> Self {
        let mut edge = Self {
            forward: forward.0,
            backward: backward.0,
            edge_forward,
            edge_backward,
            cos_theta: 1.0,
            sin_theta: 0.0,
            translate: Vector2::zeros(),
        };
        edge.update(forward.1, backward.1, a, b);
        edge
    }

    pub fn update(&mut self, fwd: &Wall, bwd: &Wall, a: &Point3<f64>, b: &Point3<f64>) {
        let origin_f = fwd.xyz_to_uv(a);
        let origin_b = bwd.xyz_to_uv(a);
        let e_f = (fwd.xyz_to_uv(b) - origin_f).normalize();
        let e_b = (bwd.xyz_to_uv(b) - origin_b).normalize();
        let f_f = Vector2::new(-e_f.y, e_f.x);
        let f_b = Vector2::new(-e_b.y, e_b.x);

        let m00 = e_b.x * e_f.x + f_b.x * f_f.x;
        let m01 = e_b.x * e_f.y + f_b.x * f_f.y;
        let m10 = e_b.y * e_f.x + f_b.y * f_f.x;
        let m11 = e_b.y * e_f.y + f_b.y * f_f.y;

        self.cos_theta = m00;
        self.sin_theta = m01;
        self.translate = Vector2::new(
            origin_b.x - (m00 * origin_f.x + m01 * origin_f.y),
            origin_b.y - (m10 * origin_f.x + m11 * origin_f.y),
        );
    }

    /// Maps a point from the forward wall's frame to the backward wall's frame.
    pub fn forward_transform(&self, uv: &Vector2<f64>) -> Vector2<f64> {
        self.rotate_forward(uv) + self.translate
    }

    /// Maps a point from the backward wall's frame to the forward wall's frame.
    pub fn backward_transform(&self, uv: &Vector2<f64>) -> Vector2<f64> {
        self.rotate_backward(&(uv - self.translate))
    }

    pub fn rotate_forward(&self, d: &Vector2<f64>) -> Vector2<f64> {
        let (c, s) = (self.cos_theta, self.sin_theta);
        Vector2::new(c * d.x + s * d.y, -s * d.x + c * d.y)
    }

    pub fn rotate_backward(&self, d: &Vector2<f64>) -> Vector2<f64> {
        let (c, s) = (self.cos_theta, self.sin_theta);
        Vector2::new(c * d.x - s * d.y, s * d.x + c * d.y)
    }

    /// Maps a point from `from`'s frame to the frame of the wall on the other side.
    pub fn transform_from(&self, from: WallIndex, uv: &Vector2<f64>) -> Vector2<f64> {
        if from == self.forward {
            self.forward_transform(uv)
        } else {
            self.backward_transform(uv)
        }
    }

    pub fn rotate_from(&self, from: WallIndex, d: &Vector2<f64>) -> Vector2<f64> {
        if from == self.forward {
            self.rotate_forward(d)
        } else {
            self.rotate_backward(d)
        }
    }

    pub fn other(&self, wall: WallIndex) -> WallIndex {
        if wall == self.forward {
            self.backward
        } else {
            self.forward
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::{ObjectId, VertexIndex};
    use approx::assert_relative_eq;

    // Two faces of a tetrahedron-like fold sharing the edge (0,0,0)-(1,0,0).
    fn folded_pair() -> (Wall, Wall, [Point3<f64>; 4]) {
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.2, 1.0, 0.0),
            Point3::new(0.4, -0.5, 0.7),
        ];
        let ids = |a: u32, b: u32, c: u32| [VertexIndex(a), VertexIndex(b), VertexIndex(c)];
        let f = Wall::new(ObjectId(0), 0, ids(0, 1, 2), &[p[0], p[1], p[2]]).unwrap();
        let b = Wall::new(ObjectId(0), 1, ids(1, 0, 3), &[p[1], p[0], p[3]]).unwrap();
        (f, b, p)
    }

    #[test]
    fn forward_then_backward_is_identity() {
        let (f, b, p) = folded_pair();
        let edge = Edge::new((WallIndex(0), &f), (WallIndex(1), &b), 0, 0, &p[0], &p[1]);
        for uv in [
            Vector2::new(0.3, 0.2),
            Vector2::new(-1.5, 4.0),
            Vector2::new(0.0, 0.0),
        ] {
            let there = edge.forward_transform(&uv);
            assert_relative_eq!(edge.backward_transform(&there), uv, epsilon = 1e-12);
        }
    }

    #[test]
    fn shared_edge_points_map_onto_each_other() {
        let (f, b, p) = folded_pair();
        let edge = Edge::new((WallIndex(0), &f), (WallIndex(1), &b), 0, 0, &p[0], &p[1]);
        for q in [p[0], p[1], Point3::new(0.25, 0.0, 0.0)] {
            let mapped = edge.forward_transform(&f.xyz_to_uv(&q));
            assert_relative_eq!(mapped, b.xyz_to_uv(&q), epsilon = 1e-12);
        }
    }

    #[test]
    fn point_leaving_forward_wall_lands_inside_backward_wall() {
        let (f, b, p) = folded_pair();
        let edge = Edge::new((WallIndex(0), &f), (WallIndex(1), &b), 0, 0, &p[0], &p[1]);
        let just_outside = f.xyz_to_uv(&Point3::new(0.5, 0.0, 0.0)) - Vector2::new(0.0, 0.05);
        let mapped = edge.transform_from(WallIndex(0), &just_outside);
        assert!(b.contains_uv(&mapped, 0.0));
    }
}
