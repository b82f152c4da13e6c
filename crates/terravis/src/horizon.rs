//! Horizon table construction.
//!
//! A horizon line is a silhouette edge of the surface seen from the eye: an
//! edge where the terrain turns from facing the eye to facing away from it,
//! or a hull edge beyond which the surface falls away. Each line is stored
//! with `p1` at its smaller azimuth so that the eye sees `p1 -> p2`
//! counter-clockwise. Lines crossing the 0° ray are split there.

use std::cmp::Ordering;
use std::f64::consts::TAU;

use log::debug;
use terravis_math::{
    azimuth, line_intersection, orient2d, planar_distance, signed_plane_distance, Point3,
};
use terravis_tin::{PointId, Surface};

use crate::error::{reserve_chunk, Result};

/// One silhouette edge as seen from the eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonLine {
    /// Azimuth of `p1` from the eye.
    pub ang_start: f64,
    /// Azimuth of `p2` from the eye, never less than `ang_start`.
    pub ang_end: f64,
    /// Planar distance from the eye to `p1`.
    pub dist_start: f64,
    /// Planar distance from the eye to `p2`.
    pub dist_end: f64,
    /// Endpoint at `ang_start`.
    pub p1: Point3,
    /// Endpoint at `ang_end`.
    pub p2: Point3,
    /// Cleared when simplification removes the line.
    pub active: bool,
}

impl HorizonLine {
    /// Line from `p1` to `p2` as seen from `eye`. An end azimuth of exactly
    /// zero following a larger start azimuth is read as 2π.
    pub fn new(eye: &Point3, p1: Point3, p2: Point3) -> Self {
        let ang_start = azimuth(eye, &p1);
        let mut ang_end = azimuth(eye, &p2);
        if ang_end == 0.0 && ang_start > ang_end {
            ang_end = TAU;
        }
        Self {
            ang_start,
            ang_end,
            dist_start: planar_distance(eye, &p1),
            dist_end: planar_distance(eye, &p2),
            p1,
            p2,
            active: true,
        }
    }

    /// Whether `theta` lies within the closed angular span.
    pub fn covers_angle(&self, theta: f64) -> bool {
        self.ang_start <= theta && theta <= self.ang_end
    }

    /// Middle of the angular span.
    pub fn mid_angle(&self) -> f64 {
        0.5 * (self.ang_start + self.ang_end)
    }

    /// Planar length.
    pub fn length(&self) -> f64 {
        planar_distance(&self.p1, &self.p2)
    }

    /// Planar distance from the eye to the line's supporting line along
    /// bearing `theta`. `None` when the bearing is parallel to the line.
    pub fn radial_distance(&self, eye: &Point3, theta: f64) -> Option<f64> {
        let far = Point3::new(eye.x + theta.cos(), eye.y + theta.sin(), eye.z);
        line_intersection(eye, &far, &self.p1, &self.p2).map(|(s, _)| s)
    }

    /// Point of the line on bearing `theta`, with z interpolated along it.
    pub fn point_at_angle(&self, eye: &Point3, theta: f64) -> Option<Point3> {
        let far = Point3::new(eye.x + theta.cos(), eye.y + theta.sin(), eye.z);
        let (_, t) = line_intersection(eye, &far, &self.p1, &self.p2)?;
        let t = t.clamp(0.0, 1.0);
        Some(self.p1 + (self.p2 - self.p1) * t)
    }
}

/// Table order: start azimuth ascending, end azimuth descending, then start
/// and end distance ascending.
pub fn compare_lines(a: &HorizonLine, b: &HorizonLine) -> Ordering {
    a.ang_start
        .total_cmp(&b.ang_start)
        .then(b.ang_end.total_cmp(&a.ang_end))
        .then(a.dist_start.total_cmp(&b.dist_start))
        .then(a.dist_end.total_cmp(&b.dist_end))
}

/// The silhouette edges of a surface for one eye.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HorizonTable {
    lines: Vec<HorizonLine>,
}

impl HorizonTable {
    /// Table from already normalised lines, sorted.
    pub fn from_lines(lines: Vec<HorizonLine>) -> Self {
        let mut table = Self { lines };
        table.sort();
        table
    }

    /// All lines, inactive ones included until [`compact`](Self::compact).
    pub fn lines(&self) -> &[HorizonLine] {
        &self.lines
    }

    pub(crate) fn lines_mut(&mut self) -> &mut Vec<HorizonLine> {
        &mut self.lines
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of active lines.
    pub fn active_count(&self) -> usize {
        self.lines.iter().filter(|l| l.active).count()
    }

    /// Restore table order.
    pub fn sort(&mut self) {
        self.lines.sort_by(compare_lines);
    }

    /// Drop inactive lines.
    pub fn compact(&mut self) {
        self.lines.retain(|l| l.active);
    }
}

/// Whether the triangle `a, b, c` (counter-clockwise) faces away from the
/// eye, i.e. the eye is on or below its upward plane.
fn faces_away(eye: &Point3, a: &Point3, b: &Point3, c: &Point3) -> bool {
    signed_plane_distance(a, b, c, eye).map_or(true, |d| d <= 0.0)
}

/// Append `p1 -> p2` to `lines`, splitting it at the 0° ray when its span
/// wraps.
fn push_line(eye: &Point3, p1: Point3, p2: Point3, lines: &mut Vec<HorizonLine>) -> Result<()> {
    let line = HorizonLine::new(eye, p1, p2);
    if line.ang_end >= line.ang_start {
        reserve_chunk(lines, "horizon table")?;
        lines.push(line);
        return Ok(());
    }

    let ratio = (eye.y - p1.y) / (p2.y - p1.y);
    let crossing = Point3::new(
        p1.x + ratio * (p2.x - p1.x),
        eye.y,
        p1.z + ratio * (p2.z - p1.z),
    );
    let dist = planar_distance(eye, &crossing);

    let first = HorizonLine {
        ang_end: TAU,
        dist_end: dist,
        p2: crossing,
        ..line
    };
    let second = HorizonLine {
        ang_start: 0.0,
        dist_start: dist,
        p1: crossing,
        ..line
    };
    for piece in [first, second] {
        if piece.length() > 0.0 {
            reserve_chunk(lines, "horizon table")?;
            lines.push(piece);
        }
    }
    Ok(())
}

/// Build the sorted horizon table of `surface` seen from `eye`.
///
/// Void triangles count as absent, so an edge bordering a void behaves like
/// a hull edge.
pub fn build_horizon_table<S: Surface + ?Sized>(surface: &S, eye: &Point3) -> Result<HorizonTable> {
    let mut lines = Vec::new();
    let mut silhouettes = 0usize;

    for (a, b) in surface.edges() {
        if surface.is_void_edge(a, b) {
            continue;
        }
        let pa = surface.point(a);
        let pb = surface.point(b);

        let away = |c: PointId, first: &Point3, second: &Point3| {
            faces_away(eye, first, second, &surface.point(c))
        };
        let left = surface
            .next_counter_clockwise(a, b)
            .filter(|&c| !surface.is_void_triangle(a, b, c))
            .map(|c| away(c, &pa, &pb));
        let right = surface
            .next_clockwise(a, b)
            .filter(|&c| !surface.is_void_triangle(b, a, c))
            .map(|c| away(c, &pb, &pa));

        let silhouette = match (left, right) {
            (Some(l), Some(r)) => l != r,
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => false,
        };
        if !silhouette {
            continue;
        }

        let side = orient2d(&pa, &pb, eye);
        if side == 0.0 {
            continue;
        }
        silhouettes += 1;
        if side > 0.0 {
            push_line(eye, pa, pb, &mut lines)?;
        } else {
            push_line(eye, pb, pa, &mut lines)?;
        }
    }

    debug!(
        "{} silhouette edges produced {} horizon lines",
        silhouettes,
        lines.len()
    );
    Ok(HorizonTable::from_lines(lines))
}
