//! Placement of a product in a neighboring tile as close as possible to the reactant's
//! tile while staying strictly inside the destination tile.

use crate::core::utils::geometry::{barycentric, closest_point_on_triangle, distance_to_segment};
use nalgebra::Point3;

/// Weight pulling a point off a destination vertex or edge toward the tile interior.
pub const INTERIOR_BIAS: f64 = 1e-6;
/// Distance below which two vertices (or a vertex and an edge) are considered touching, µm.
pub const TOUCH_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
enum Contact {
    Vertex(usize),
    /// A point strictly inside destination edge `edge` (joining vertices `edge` and `edge + 1`).
    OnEdge { edge: usize, point: Point3<f64> },
}

/// Finds a point strictly inside the destination tile that is as close as possible to the
/// source tile.
///
/// The policy is tiered: a shared vertex, then a shared edge, then a vertex of one tile
/// lying on an edge of the other, and finally the destination vertex closest to the
/// source triangle. Each tier biases the contact point slightly toward the interior.
///
/// # Return
///
/// `None` only if no tier yields a strictly interior point, which indicates inconsistent
/// tile geometry.
pub fn find_closest_position(src: &[Point3<f64>; 3], dst: &[Point3<f64>; 3]) -> Option<Point3<f64>> {
    let touching = |a: &Point3<f64>, b: &Point3<f64>| (a - b).norm() <= TOUCH_TOLERANCE;

    let shared: Vec<usize> = (0..3)
        .filter(|&i| src.iter().any(|s| touching(s, &dst[i])))
        .collect();

    let candidate = match shared.as_slice() {
        [i] => vertex_bias(dst, *i),
        [i, j] => edge_bias(dst, *i, *j),
        [_, _, _] => centroid(dst),
        _ => match contacts(src, dst).as_slice() {
            [] => projection_fallback(src, dst),
            [single] => contact_bias(dst, single),
            [first, second, ..] => {
                let mid = Point3::from((point_of(dst, first).coords + point_of(dst, second).coords) / 2.0);
                interpolate(&mid, &centroid(dst), INTERIOR_BIAS)
            }
        },
    };

    strictly_inside(&candidate, dst).then_some(candidate)
}

fn contacts(src: &[Point3<f64>; 3], dst: &[Point3<f64>; 3]) -> Vec<Contact> {
    let mut out = Vec::new();
    for (i, v) in dst.iter().enumerate() {
        let on_src_edge =
            (0..3).any(|e| distance_to_segment(v, &src[e], &src[(e + 1) % 3]) <= TOUCH_TOLERANCE);
        if on_src_edge {
            out.push(Contact::Vertex(i));
        }
    }
    for s in src {
        for edge in 0..3 {
            let (a, b) = (&dst[edge], &dst[(edge + 1) % 3]);
            let near_endpoint = (s - a).norm() <= TOUCH_TOLERANCE || (s - b).norm() <= TOUCH_TOLERANCE;
            if !near_endpoint && distance_to_segment(s, a, b) <= TOUCH_TOLERANCE {
                out.push(Contact::OnEdge { edge, point: *s });
            }
        }
    }
    out
}

fn point_of(dst: &[Point3<f64>; 3], contact: &Contact) -> Point3<f64> {
    match contact {
        Contact::Vertex(i) => dst[*i],
        Contact::OnEdge { point, .. } => *point,
    }
}

fn contact_bias(dst: &[Point3<f64>; 3], contact: &Contact) -> Point3<f64> {
    match contact {
        Contact::Vertex(i) => vertex_bias(dst, *i),
        Contact::OnEdge { edge, point } => interpolate(point, &dst[(edge + 2) % 3], INTERIOR_BIAS),
    }
}

fn projection_fallback(src: &[Point3<f64>; 3], dst: &[Point3<f64>; 3]) -> Point3<f64> {
    let distance = |v: &Point3<f64>| (closest_point_on_triangle(v, &src[0], &src[1], &src[2]) - v).norm();
    let nearest = (0..3)
        .min_by(|&a, &b| distance(&dst[a]).total_cmp(&distance(&dst[b])))
        .unwrap_or(0);
    vertex_bias(dst, nearest)
}

fn vertex_bias(dst: &[Point3<f64>; 3], i: usize) -> Point3<f64> {
    let far_mid = Point3::from((dst[(i + 1) % 3].coords + dst[(i + 2) % 3].coords) / 2.0);
    interpolate(&dst[i], &far_mid, INTERIOR_BIAS)
}

fn edge_bias(dst: &[Point3<f64>; 3], i: usize, j: usize) -> Point3<f64> {
    let mid = Point3::from((dst[i].coords + dst[j].coords) / 2.0);
    let opposite = 3 - i - j;
    interpolate(&mid, &dst[opposite], INTERIOR_BIAS)
}

fn centroid(dst: &[Point3<f64>; 3]) -> Point3<f64> {
    Point3::from((dst[0].coords + dst[1].coords + dst[2].coords) / 3.0)
}

fn interpolate(from: &Point3<f64>, toward: &Point3<f64>, weight: f64) -> Point3<f64> {
    Point3::from(from.coords * (1.0 - weight) + toward.coords * weight)
}

fn strictly_inside(p: &Point3<f64>, tri: &[Point3<f64>; 3]) -> bool {
    let bary = barycentric(p, &tri[0], &tri[1], &tri[2]);
    bary.iter().all(|b| b.is_finite() && *b > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point3<f64> {
        Point3::new(x, y, 0.0)
    }

    #[test]
    fn one_shared_vertex_moves_strictly_away_from_it() {
        let src = [p(0.0, 0.0), p(-1.0, 0.0), p(-0.5, -1.0)];
        let dst = [p(0.0, 0.0), p(1.0, 0.0), p(0.5, 1.0)];
        let result = find_closest_position(&src, &dst).unwrap();
        assert!((result - dst[0]).norm() > 1e-9);
        assert!((result - dst[0]).norm() < 1e-3);
        assert!(strictly_inside(&result, &dst));
    }

    #[test]
    fn shared_edge_lands_near_edge_midpoint() {
        let src = [p(0.0, 0.0), p(1.0, 0.0), p(0.5, -1.0)];
        let dst = [p(1.0, 0.0), p(0.0, 0.0), p(0.5, 1.0)];
        let result = find_closest_position(&src, &dst).unwrap();
        assert!((result - p(0.5, 0.0)).norm() < 1e-3);
        assert!(result.y > 0.0);
    }

    #[test]
    fn source_vertex_on_destination_edge_is_detected() {
        // Source apex touches the middle of the destination's bottom edge.
        let src = [p(0.5, 0.0), p(0.0, -1.0), p(1.0, -1.0)];
        let dst = [p(0.0, 0.0), p(1.0, 0.0), p(0.5, 1.0)];
        let result = find_closest_position(&src, &dst).unwrap();
        assert!((result - p(0.5, 0.0)).norm() < 1e-3);
        assert!(strictly_inside(&result, &dst));
    }

    #[test]
    fn disjoint_tiles_fall_back_to_nearest_destination_vertex() {
        let src = [p(-3.0, 0.0), p(-2.0, 0.0), p(-2.5, 1.0)];
        let dst = [p(1.0, 0.0), p(0.0, 0.0), p(0.5, 1.0)];
        let result = find_closest_position(&src, &dst).unwrap();
        assert!((result - p(0.0, 0.0)).norm() < 1e-3);
        assert!(strictly_inside(&result, &dst));
    }

    #[test]
    fn works_across_a_fold() {
        let src = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 0.0, 1.0),
        ];
        let dst = [p(1.0, 0.0), p(0.0, 0.0), p(0.5, 1.0)];
        let result = find_closest_position(&src, &dst).unwrap();
        assert!(strictly_inside(&result, &dst));
    }

    #[test]
    fn degenerate_destination_yields_none() {
        let src = [p(-3.0, 0.0), p(-2.0, 0.0), p(-2.5, 1.0)];
        let dst = [p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0)];
        assert!(find_closest_position(&src, &dst).is_none());
    }
}
