//! Point, edge and line visibility against a visibility index.
//!
//! Every test reduces to the sight plane of a horizon line: the plane through
//! the eye and the line's endpoints. A point on the far side of the line (in
//! plan) and below that plane by more than the plane tolerance is hidden.
//! Degenerate planes never hide anything.

use std::f64::consts::TAU;

use terravis_math::{
    azimuth, line_intersection, orient2d, side_of, signed_plane_distance, Point3, Side, Tolerance,
};

use terravis_tin::Surface;

use crate::error::Result;
use crate::horizon::HorizonLine;
use crate::index::{check_target, ensure_current, VisibilityIndex};
use crate::trace::{LineOfSightTrace, StoreMode};

/// Signed sight-plane distance below which a point still counts as visible.
pub const PLANE_TOLERANCE: f64 = Tolerance::DEFAULT.plane;

/// Whether `line` hides `p` from `eye`.
pub(crate) fn hidden_by(eye: &Point3, line: &HorizonLine, p: &Point3) -> bool {
    if side_of(&line.p1, &line.p2, p) == Side::Left {
        return false;
    }
    signed_plane_distance(eye, &line.p2, &line.p1, p).is_some_and(|d| d >= PLANE_TOLERANCE)
}

/// Point visibility through the angle index.
pub fn is_point_visible(index: &VisibilityIndex, p: &Point3) -> bool {
    let eye = index.eye();
    let theta = azimuth(eye, p);
    !index.covering(theta).any(|line| hidden_by(eye, line, p))
}

/// Point visibility with the target checked against `surface` first.
///
/// Fails with `TargetOutsideSurface` off the mesh or over a void,
/// `TargetBelowSurface` under the terrain, and `IndexCorrupt` when the
/// surface changed since `index` was built.
pub fn query_point_visible<S: Surface + ?Sized>(
    surface: &S,
    index: &VisibilityIndex,
    p: &Point3,
) -> Result<bool> {
    ensure_current(surface, index)?;
    check_target(surface, p)?;
    Ok(is_point_visible(index, p))
}

/// Point visibility by scanning the whole horizon table.
pub fn point_visible_brute_force(index: &VisibilityIndex, p: &Point3) -> bool {
    let eye = index.eye();
    let theta = azimuth(eye, p);
    !index
        .table()
        .lines()
        .iter()
        .filter(|line| line.active && line.covers_angle(theta))
        .any(|line| hidden_by(eye, line, p))
}

/// Result of testing a segment against one horizon line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeVisibility {
    /// The whole segment is visible.
    Visible(Point3, Point3),
    /// The whole segment is hidden.
    NotVisible,
    /// Only the given sub-segment is visible.
    Partial(Point3, Point3),
}

impl EdgeVisibility {
    /// Numeric code: 1 visible, -1 not visible, 0 partial.
    pub fn code(&self) -> i8 {
        match self {
            EdgeVisibility::Visible(..) => 1,
            EdgeVisibility::NotVisible => -1,
            EdgeVisibility::Partial(..) => 0,
        }
    }
}

/// Classify the segment `a-b` against the sight plane of `horizon`.
///
/// Only the plane is consulted; callers make sure the segment lies beyond
/// the horizon line. A mixed result is split where the plane distance
/// changes sign.
pub fn edge_visibility(eye: &Point3, horizon: &HorizonLine, a: &Point3, b: &Point3) -> EdgeVisibility {
    let (Some(d1), Some(d2)) = (
        signed_plane_distance(eye, &horizon.p2, &horizon.p1, a),
        signed_plane_distance(eye, &horizon.p2, &horizon.p1, b),
    ) else {
        return EdgeVisibility::Visible(*a, *b);
    };

    let (a_visible, b_visible) = (d1 < 0.0, d2 < 0.0);
    match (a_visible, b_visible) {
        (true, true) => EdgeVisibility::Visible(*a, *b),
        (false, false) => EdgeVisibility::NotVisible,
        _ if d1.abs() < PLANE_TOLERANCE => whole(b_visible, a, b),
        _ if d2.abs() < PLANE_TOLERANCE => whole(a_visible, a, b),
        _ => {
            let crossing = a + (b - a) * (d1.abs() / (d1.abs() + d2.abs()));
            if a_visible {
                EdgeVisibility::Partial(*a, crossing)
            } else {
                EdgeVisibility::Partial(crossing, *b)
            }
        }
    }
}

fn whole(visible: bool, a: &Point3, b: &Point3) -> EdgeVisibility {
    if visible {
        EdgeVisibility::Visible(*a, *b)
    } else {
        EdgeVisibility::NotVisible
    }
}

/// Overall verdict for a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    /// Every run is visible.
    Visible,
    /// Every run is hidden.
    NotVisible,
    /// Both visible and hidden runs.
    Partial,
}

/// Verdict and runs of a line visibility query.
#[derive(Debug, Clone, PartialEq)]
pub struct LineVisibility {
    /// Overall verdict.
    pub verdict: LineVerdict,
    /// Runs from `a` to `b`, stored as pairs.
    pub trace: LineOfSightTrace,
}

/// Sub-interval of `[0, 1]` where the affine function through `(0, f0)` and
/// `(1, f1)` is at least `c`.
fn at_least(f0: f64, f1: f64, c: f64) -> Option<(f64, f64)> {
    match (f0 >= c, f1 >= c) {
        (true, true) => Some((0.0, 1.0)),
        (false, false) => None,
        (true, false) => Some((0.0, (f0 - c) / (f0 - f1))),
        (false, true) => Some(((c - f0) / (f1 - f0), 1.0)),
    }
}

/// Part of `p-q`, as parameters in `[0, 1]`, that `line` hides. Both the
/// far-side test and the plane distance are affine along the segment.
fn occluded_interval(eye: &Point3, line: &HorizonLine, p: &Point3, q: &Point3) -> Option<(f64, f64)> {
    let beyond = at_least(
        -orient2d(&line.p1, &line.p2, p),
        -orient2d(&line.p1, &line.p2, q),
        0.0,
    )?;
    let below = at_least(
        signed_plane_distance(eye, &line.p2, &line.p1, p)?,
        signed_plane_distance(eye, &line.p2, &line.p1, q)?,
        PLANE_TOLERANCE,
    )?;
    let lo = beyond.0.max(below.0);
    let hi = beyond.1.min(below.1);
    (hi > lo).then_some((lo, hi))
}

/// Parameters along `a-b` where the set of covering horizon lines can
/// change: the 0° ray and every breakpoint inside the line's angular span.
fn split_parameters(index: &VisibilityIndex, a: &Point3, b: &Point3) -> Vec<f64> {
    let eye = index.eye();
    let mut params = vec![0.0, 1.0];
    let turn = orient2d(eye, a, b);

    if turn == 0.0 {
        // Radial line: the bearing only flips where it passes the eye.
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let len2 = dx * dx + dy * dy;
        if len2 > 0.0 {
            let t = ((eye.x - a.x) * dx + (eye.y - a.y) * dy) / len2;
            if t > 0.0 && t < 1.0 {
                params.push(t);
            }
        }
    } else {
        let (from, to) = if turn > 0.0 {
            (azimuth(eye, a), azimuth(eye, b))
        } else {
            (azimuth(eye, b), azimuth(eye, a))
        };
        let angles = index.angle_index();
        let mut cuts = Vec::new();
        if from <= to {
            cuts.extend(angles.breakpoints_between(from, to));
        } else {
            cuts.extend(angles.breakpoints_between(from, TAU));
            cuts.push(0.0);
            cuts.extend(angles.breakpoints_between(0.0, to));
        }
        for phi in cuts {
            let far = Point3::new(eye.x + phi.cos(), eye.y + phi.sin(), eye.z);
            if let Some((t, s)) = line_intersection(a, b, eye, &far) {
                if s > 0.0 && t > 0.0 && t < 1.0 {
                    params.push(t);
                }
            }
        }
    }

    params.sort_by(|x, y| x.total_cmp(y));
    params.dedup_by(|x, y| (*x - *y).abs() < 1e-12);
    params
}

/// Append a run, merging it into the previous one when the flags agree.
fn push_run(runs: &mut Vec<(f64, f64, bool)>, start: f64, end: f64, visible: bool) {
    if end <= start {
        return;
    }
    match runs.last_mut() {
        Some(last) if last.2 == visible && last.1 >= start => last.1 = last.1.max(end),
        _ => runs.push((start, end, visible)),
    }
}

/// Visibility of the straight 3D segment `a-b`.
///
/// The segment is cut wherever its covering set of horizon lines changes.
/// Within each piece the hidden parameter intervals of all covering lines
/// are exact, so the visible runs are their complement. Runs are reported
/// from `a` to `b`.
pub fn line_visibility(index: &VisibilityIndex, a: &Point3, b: &Point3) -> Result<LineVisibility> {
    let eye = index.eye();
    let point_at = |t: f64| a + (b - a) * t;
    let mut trace = LineOfSightTrace::new();

    if a == b {
        let visible = is_point_visible(index, a);
        trace.push(*a, visible, StoreMode::Always)?;
        trace.push(*b, visible, StoreMode::Always)?;
        let verdict = if visible {
            LineVerdict::Visible
        } else {
            LineVerdict::NotVisible
        };
        return Ok(LineVisibility { verdict, trace });
    }

    let params = split_parameters(index, a, b);
    let mut runs: Vec<(f64, f64, bool)> = Vec::with_capacity(params.len());
    for w in params.windows(2) {
        let (t0, t1) = (w[0], w[1]);
        let (p, q) = (point_at(t0), point_at(t1));
        let theta = azimuth(eye, &point_at(0.5 * (t0 + t1)));

        let mut hidden: Vec<(f64, f64)> = index
            .covering(theta)
            .filter_map(|line| occluded_interval(eye, line, &p, &q))
            .map(|(u0, u1)| (t0 + u0 * (t1 - t0), t0 + u1 * (t1 - t0)))
            .collect();
        hidden.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut cursor = t0;
        for (h0, h1) in hidden {
            if h1 <= cursor {
                continue;
            }
            push_run(&mut runs, cursor, h0, true);
            push_run(&mut runs, h0.max(cursor), h1, false);
            cursor = h1;
        }
        push_run(&mut runs, cursor, t1, true);
    }

    let verdict = if runs.iter().all(|r| r.2) {
        LineVerdict::Visible
    } else if runs.iter().all(|r| !r.2) {
        LineVerdict::NotVisible
    } else {
        LineVerdict::Partial
    };
    for (t0, t1, visible) in runs {
        trace.push(point_at(t0), visible, StoreMode::Always)?;
        trace.push(point_at(t1), visible, StoreMode::Always)?;
    }
    Ok(LineVisibility { verdict, trace })
}

/// [`line_visibility`] with both endpoints checked against `surface`, as in
/// [`query_point_visible`].
pub fn query_line_visibility<S: Surface + ?Sized>(
    surface: &S,
    index: &VisibilityIndex,
    a: &Point3,
    b: &Point3,
) -> Result<LineVisibility> {
    ensure_current(surface, index)?;
    check_target(surface, a)?;
    check_target(surface, b)?;
    line_visibility(index, a, b)
}
