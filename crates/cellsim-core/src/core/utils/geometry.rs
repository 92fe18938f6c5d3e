use nalgebra::{Point3, Vector2, Vector3};

pub const EPSILON: f64 = 1e-12;

/// Intersection of the segment `origin + s * direction` (`s` in `[0, 1]`) with triangle
/// `(a, b, c)`, using the Möller–Trumbore test.
///
/// # Return
///
/// The segment parameter `s` of the hit, or `None` for a miss or a segment parallel to
/// the triangle plane.
pub fn segment_triangle_intersection(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Option<f64> {
    let e1 = b - a;
    let e2 = c - a;
    let p = direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < EPSILON * e1.norm() * e2.norm() * direction.norm() {
        return None;
    }
    let inv_det = 1.0 / det;
    let t_vec = origin - a;
    let u = t_vec.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = t_vec.cross(&e1);
    let v = direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let s = e2.dot(&q) * inv_det;
    (0.0..=1.0).contains(&s).then_some(s)
}

/// Barycentric coordinates of `p` with respect to triangle `(a, b, c)`. `p` is assumed to
/// lie in the triangle's plane.
pub fn barycentric(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> [f64; 3] {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < f64::MIN_POSITIVE {
        return [f64::NAN; 3];
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [1.0 - v - w, v, w]
}

/// Closest point to `p` on the closed triangle `(a, b, c)`.
pub fn closest_point_on_triangle(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Parameter of the point on segment `start + s * direction` closest to `target`,
/// clamped to `[0, 1]`.
pub fn closest_segment_parameter(
    start: &Point3<f64>,
    direction: &Vector3<f64>,
    target: &Point3<f64>,
) -> f64 {
    let len2 = direction.norm_squared();
    if len2 < f64::MIN_POSITIVE {
        return 0.0;
    }
    ((target - start).dot(direction) / len2).clamp(0.0, 1.0)
}

/// Distance from `p` to the segment `[a, b]`.
pub fn distance_to_segment(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let s = closest_segment_parameter(a, &(b - a), p);
    (a + (b - a) * s - p).norm()
}

/// Intersection of the 2D segment `p + s * r` with segment `[a, b]`.
///
/// # Return
///
/// `(s, t)` with `s` the parameter along `r` and `t` in `[0, 1]` the parameter along
/// `[a, b]`, or `None` for parallel or non-overlapping segments.
pub fn segment_intersection_2d(
    p: &Vector2<f64>,
    r: &Vector2<f64>,
    a: &Vector2<f64>,
    b: &Vector2<f64>,
) -> Option<(f64, f64)> {
    let e = b - a;
    let denom = cross_2d(r, &e);
    if denom.abs() < f64::MIN_POSITIVE {
        return None;
    }
    let ap = a - p;
    let s = cross_2d(&ap, &e) / denom;
    let t = cross_2d(&ap, r) / denom;
    ((0.0..=1.0).contains(&t)).then_some((s, t))
}

#[inline]
pub fn cross_2d(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Conservative triangle / axis-aligned box overlap: bounding boxes overlap and the box
/// straddles (or touches) the triangle plane.
pub fn triangle_overlaps_box(
    vertices: &[Point3<f64>; 3],
    box_min: &Point3<f64>,
    box_max: &Point3<f64>,
) -> bool {
    for axis in 0..3 {
        let lo = vertices.iter().map(|v| v[axis]).fold(f64::INFINITY, f64::min);
        let hi = vertices
            .iter()
            .map(|v| v[axis])
            .fold(f64::NEG_INFINITY, f64::max);
        if hi < box_min[axis] || lo > box_max[axis] {
            return false;
        }
    }

    let normal = (vertices[1] - vertices[0]).cross(&(vertices[2] - vertices[0]));
    let d = normal.dot(&vertices[0].coords);
    let mut below = false;
    let mut above = false;
    for i in 0..8 {
        let corner = Point3::new(
            if i & 1 == 0 { box_min.x } else { box_max.x },
            if i & 2 == 0 { box_min.y } else { box_max.y },
            if i & 4 == 0 { box_min.z } else { box_max.z },
        );
        let side = normal.dot(&corner.coords) - d;
        below |= side <= 0.0;
        above |= side >= 0.0;
    }
    below && above
}
