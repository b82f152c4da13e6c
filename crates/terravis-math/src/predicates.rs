//! Plan and spatial predicates.
//!
//! Azimuths are measured counter-clockwise from +X and normalised to
//! `[0, 2π]`. Side tests use the exact sign of the orientation determinant;
//! tolerance policy is left to callers.

use std::f64::consts::TAU;

use crate::{Point3, Vec3};

/// Value substituted for a zero z coefficient when solving a plane for z.
pub const VERTICAL_PLANE_EPSILON: f64 = 1e-9;

/// Position of a point relative to a directed line in plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Counter-clockwise of the line.
    Left,
    /// Exactly on the line.
    On,
    /// Clockwise of the line.
    Right,
}

/// Twice the signed area of triangle `a, b, c` in plan.
///
/// Positive when `c` lies to the left of `a -> b`.
pub fn orient2d(a: &Point3, b: &Point3, c: &Point3) -> f64 {
    (a.x - c.x) * (b.y - c.y) - (a.y - c.y) * (b.x - c.x)
}

/// Which side of the directed line `a -> b` the point `c` lies on.
pub fn side_of(a: &Point3, b: &Point3, c: &Point3) -> Side {
    let d = orient2d(a, b, c);
    if d > 0.0 {
        Side::Left
    } else if d < 0.0 {
        Side::Right
    } else {
        Side::On
    }
}

/// Plan bearing from `from` to `to`, in `[0, 2π]`.
pub fn azimuth(from: &Point3, to: &Point3) -> f64 {
    let a = (to.y - from.y).atan2(to.x - from.x);
    if a < 0.0 {
        a + TAU
    } else {
        a
    }
}

/// Distance between two points in plan.
pub fn planar_distance(a: &Point3, b: &Point3) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Plane `normal · p + d = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unnormalised normal `(A, B, C)`.
    pub normal: Vec3,
    /// Constant term `D`.
    pub d: f64,
}

impl Plane {
    /// Plane through three points. The normal is `(b - a) × (c - a)`, so a
    /// counter-clockwise triangle (seen from above) has an upward normal.
    pub fn through(a: &Point3, b: &Point3, c: &Point3) -> Self {
        let normal = (b - a).cross(&(c - a));
        let d = -normal.dot(&a.coords);
        Self { normal, d }
    }

    /// True if the three defining points were collinear.
    pub fn is_degenerate(&self) -> bool {
        self.normal.norm_squared() == 0.0
    }

    /// Unnormalised evaluation `normal · p + d`.
    pub fn evaluate(&self, p: &Point3) -> f64 {
        self.normal.dot(&p.coords) + self.d
    }

    /// Signed distance from `p`, or `None` for a degenerate plane.
    pub fn signed_distance(&self, p: &Point3) -> Option<f64> {
        let len = self.normal.norm();
        if len == 0.0 {
            None
        } else {
            Some(self.evaluate(p) / len)
        }
    }

    /// Elevation of the plane at `(x, y)`.
    ///
    /// Vertical planes have no solution; their z coefficient is replaced by
    /// [`VERTICAL_PLANE_EPSILON`] so callers always get a finite value.
    pub fn z_at(&self, x: f64, y: f64) -> f64 {
        let c = if self.normal.z == 0.0 {
            VERTICAL_PLANE_EPSILON
        } else {
            self.normal.z
        };
        -(self.normal.x * x + self.normal.y * y + self.d) / c
    }
}

/// Signed distance of `p` from the plane through `a, b, c`.
///
/// All operands are translated by the component-wise minimum of `a, b, c`
/// before the plane is formed, which keeps the cross product well
/// conditioned for large survey coordinates. Returns `None` when the three
/// points are collinear.
pub fn signed_plane_distance(a: &Point3, b: &Point3, c: &Point3, p: &Point3) -> Option<f64> {
    let origin = Point3::new(
        a.x.min(b.x).min(c.x),
        a.y.min(b.y).min(c.y),
        a.z.min(b.z).min(c.z),
    );
    let shift = |q: &Point3| Point3::from(q - origin);
    Plane::through(&shift(a), &shift(b), &shift(c)).signed_distance(&shift(p))
}

/// Intersection of the infinite plan lines `a1-a2` and `b1-b2`.
///
/// Returns the parameters `(s, t)` along each line, or `None` if parallel.
pub fn line_intersection(
    a1: &Point3,
    a2: &Point3,
    b1: &Point3,
    b2: &Point3,
) -> Option<(f64, f64)> {
    let rx = a2.x - a1.x;
    let ry = a2.y - a1.y;
    let sx = b2.x - b1.x;
    let sy = b2.y - b1.y;
    let denom = rx * sy - ry * sx;
    if denom == 0.0 {
        return None;
    }
    let qx = b1.x - a1.x;
    let qy = b1.y - a1.y;
    let s = (qx * sy - qy * sx) / denom;
    let t = (qx * ry - qy * rx) / denom;
    Some((s, t))
}

/// Intersection of the plan segments `a1-a2` and `b1-b2`, endpoints
/// included. Returns the parameters along each segment.
pub fn segment_intersection(
    a1: &Point3,
    a2: &Point3,
    b1: &Point3,
    b2: &Point3,
) -> Option<(f64, f64)> {
    let (s, t) = line_intersection(a1, a2, b1, b2)?;
    if (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t) {
        Some((s, t))
    } else {
        None
    }
}

/// Whether `p` lies inside or on the plan triangle `a, b, c` (either winding).
pub fn point_in_triangle(a: &Point3, b: &Point3, c: &Point3, p: &Point3) -> bool {
    let d1 = orient2d(a, b, p);
    let d2 = orient2d(b, c, p);
    let d3 = orient2d(c, a, p);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Elevation at plan position `(x, y)` on the 3D line through `a` and `b`.
///
/// The parameter is taken from whichever of x or y varies more along the
/// line. A vertical line returns `a.z`.
pub fn interpolate_z(a: &Point3, b: &Point3, x: f64, y: f64) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let t = if dx.abs() >= dy.abs() {
        if dx == 0.0 {
            return a.z;
        }
        (x - a.x) / dx
    } else {
        (y - a.y) / dy
    };
    a.z + t * (b.z - a.z)
}

/// Line of intersection of two planes as `(point, direction)`.
///
/// Returns `None` for parallel or degenerate planes.
pub fn plane_intersection(p0: &Plane, p1: &Plane) -> Option<(Point3, Vec3)> {
    let dir = p0.normal.cross(&p1.normal);
    let det = dir.norm_squared();
    if det == 0.0 {
        return None;
    }
    let n00 = p0.normal.norm_squared();
    let n11 = p1.normal.norm_squared();
    let n01 = p0.normal.dot(&p1.normal);
    let c0 = (-p0.d * n11 + p1.d * n01) / det;
    let c1 = (-p1.d * n00 + p0.d * n01) / det;
    let origin = p0.normal * c0 + p1.normal * c1;
    Some((Point3::from(origin), dir))
}
