//! The surface interface consumed by the visibility engine.

use terravis_math::{Bounds2, Point3};

use crate::error::Result;

/// Identifier of a surface point.
pub type PointId = usize;

/// Result of locating a plan position on the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
    /// Inside (or on the boundary of) a non-void triangle.
    Triangle {
        /// Counter-clockwise vertices of the containing triangle.
        vertices: [PointId; 3],
        /// Surface elevation at the position.
        z: f64,
    },
    /// Inside a void triangle.
    Void,
    /// Outside the surface hull.
    Outside,
}

impl Location {
    /// Surface elevation, if the position is on the surface.
    pub fn elevation(&self) -> Option<f64> {
        match self {
            Location::Triangle { z, .. } => Some(*z),
            _ => None,
        }
    }
}

/// Classification of a draped sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrapeKind {
    /// On a non-void triangle.
    Surface,
    /// Over a void.
    Void,
    /// Off the surface.
    External,
}

/// One sample of a path draped onto the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrapePoint {
    /// Sample position; z is the surface elevation for [`DrapeKind::Surface`]
    /// samples and the path elevation otherwise.
    pub point: Point3,
    /// Where the sample fell.
    pub kind: DrapeKind,
}

/// A triangulated elevation surface.
///
/// Triangles are counter-clockwise in plan. `next_counter_clockwise(p1, p2)`
/// is the third vertex of the triangle to the left of `p1 -> p2` and
/// `next_clockwise(p1, p2)` the third vertex of the triangle to its right.
pub trait Surface {
    /// Number of points.
    fn point_count(&self) -> usize;

    /// Coordinates of a point.
    fn point(&self, id: PointId) -> Point3;

    /// Every undirected edge once, as `(min, max)` in a deterministic order.
    fn edges(&self) -> Vec<(PointId, PointId)>;

    /// Every triangle, counter-clockwise, void triangles included.
    fn triangles(&self) -> Vec<[PointId; 3]>;

    /// Third vertex of the triangle on the right of `p1 -> p2`.
    fn next_clockwise(&self, p1: PointId, p2: PointId) -> Option<PointId>;

    /// Third vertex of the triangle on the left of `p1 -> p2`.
    fn next_counter_clockwise(&self, p1: PointId, p2: PointId) -> Option<PointId>;

    /// True if every triangle adjacent to the edge is void.
    fn is_void_edge(&self, p1: PointId, p2: PointId) -> bool;

    /// True if the triangle exists and is void.
    fn is_void_triangle(&self, p1: PointId, p2: PointId, p3: PointId) -> bool;

    /// A directed hull edge, surface on its left, starting at the lowest
    /// point by x then y.
    fn hull_start(&self) -> Option<(PointId, PointId)>;

    /// The hull point after the hull edge `from -> to`, walking
    /// counter-clockwise. At a vertex shared by two hull fans the walk stays
    /// on the fan of `from -> to`.
    fn hull_next(&self, from: PointId, to: PointId) -> Option<PointId>;

    /// Locate a plan position.
    fn locate(&self, x: f64, y: f64) -> Location;

    /// Drape a polyline onto the surface. Samples are emitted at every path
    /// vertex and at every crossing of a triangle edge.
    fn drape_polyline(&self, path: &[Point3]) -> Vec<DrapePoint>;

    /// Insert the segment `a-b` as a chain of constrained edges.
    fn insert_constrained_segment(&mut self, a: &Point3, b: &Point3) -> Result<()>;

    /// Improve triangle shape without changing the surface or any constrained
    /// edge.
    fn retriangulate(&mut self) -> Result<()>;

    /// Plan bounding box.
    fn bounds(&self) -> Option<Bounds2>;

    /// Revision counter, bumped by every mutation.
    fn revision(&self) -> u64;
}
