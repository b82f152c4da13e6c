#![warn(missing_docs)]

//! Math types for the terravis visibility engine.
//!
//! Thin wrappers around nalgebra providing the point and vector types used
//! across the workspace, tolerance constants, and the pure geometry
//! predicates (azimuths, side tests, planes, intersections) that every
//! visibility algorithm is built from.

use nalgebra::Vector3;

pub mod predicates;

pub use predicates::{
    azimuth, interpolate_z, line_intersection, orient2d, planar_distance, plane_intersection,
    point_in_triangle, segment_intersection, side_of, signed_plane_distance, Plane, Side,
};

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A point in the plan (XY) projection.
pub type Point2 = nalgebra::Point2<f64>;

/// Axis-aligned bounding box in plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2 {
    /// Minimum corner.
    pub min: Point2,
    /// Maximum corner.
    pub max: Point2,
}

impl Bounds2 {
    /// Bounding box of a set of points, or `None` if the iterator is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut min = Point2::new(first.x, first.y);
        let mut max = min;
        for p in iter {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(Self { min, max })
    }

    /// Length of the diagonal.
    pub fn diagonal(&self) -> f64 {
        (self.max - self.min).norm()
    }

    /// Width along X.
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Height along Y.
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

/// Tolerance constants for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Linear distance tolerance.
    pub linear: f64,
    /// Angular tolerance in radians.
    pub angular: f64,
    /// Signed point-to-plane distance below which a sight plane test is
    /// treated as grazing (visible).
    pub plane: f64,
    /// Height tolerance used when comparing a covering sight plane against
    /// a more distant horizon line.
    pub cover: f64,
}

impl Tolerance {
    /// Default terrain tolerances.
    pub const DEFAULT: Self = Self {
        linear: 1e-6,
        angular: 1e-9,
        plane: 1e-7,
        cover: 1e-3,
    };

    /// Check if two points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point3, b: &Point3) -> bool {
        (a - b).norm() < self.linear
    }

    /// Check if two points coincide in plan within tolerance.
    pub fn plan_equal(&self, a: &Point3, b: &Point3) -> bool {
        planar_distance(a, b) < self.linear
    }

    /// Check if a scalar distance is effectively zero.
    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() < self.linear
    }

    /// Check if two angles are effectively equal (in radians).
    pub fn angles_equal(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.angular
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}
