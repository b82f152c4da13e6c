//! Whole-surface sweeps and brute-force checks.

use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use terravis_math::{interpolate_z, Point2, Point3};
use terravis_tin::{DrapeKind, Surface};

use crate::error::{Result, VisibilityError};
use crate::feature::{FeatureSink, Visibility};
use crate::index::{check_eye, check_target, ensure_current, VisibilityIndex};
use crate::query::{is_point_visible, line_visibility, LineVerdict, PLANE_TOLERANCE};
use crate::settings::VisibilitySettings;

/// Counts reported by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Features entirely visible.
    pub visible: usize,
    /// Features entirely hidden.
    pub invisible: usize,
    /// Features partly visible.
    pub partial: usize,
}

/// Classify every point of a non-void triangle, raised by `point_offset`,
/// and emit it as a single-point feature.
pub fn tin_points_visibility<S, F>(
    surface: &S,
    index: &VisibilityIndex,
    settings: &VisibilitySettings,
    sink: &mut F,
) -> Result<SweepSummary>
where
    S: Surface + ?Sized,
    F: FeatureSink + ?Sized,
{
    settings.validate()?;
    ensure_current(surface, index)?;

    let ids: BTreeSet<usize> = surface
        .triangles()
        .into_iter()
        .filter(|&[a, b, c]| !surface.is_void_triangle(a, b, c))
        .flatten()
        .collect();

    let mut summary = SweepSummary::default();
    for id in ids {
        let p = surface.point(id);
        let raised = Point3::new(p.x, p.y, p.z + settings.point_offset);
        let visible = is_point_visible(index, &raised);
        if visible {
            summary.visible += 1;
        } else {
            summary.invisible += 1;
        }
        sink.emit(Visibility::from_flag(visible), &[p]);
    }

    info!(
        "point sweep: {} visible, {} invisible",
        summary.visible, summary.invisible
    );
    Ok(summary)
}

/// Run line visibility on every non-void edge, raised by `line_offset`,
/// and emit the visible and invisible runs.
pub fn tin_lines_visibility<S, F>(
    surface: &S,
    index: &VisibilityIndex,
    settings: &VisibilitySettings,
    sink: &mut F,
) -> Result<SweepSummary>
where
    S: Surface + ?Sized,
    F: FeatureSink + ?Sized,
{
    settings.validate()?;
    ensure_current(surface, index)?;

    let mut summary = SweepSummary::default();
    for (p1, p2) in surface.edges() {
        if surface.is_void_edge(p1, p2) {
            continue;
        }
        let raise = |p: Point3| Point3::new(p.x, p.y, p.z + settings.line_offset);
        let (a, b) = (raise(surface.point(p1)), raise(surface.point(p2)));
        let result = line_visibility(index, &a, &b)?;
        match result.verdict {
            LineVerdict::Visible => summary.visible += 1,
            LineVerdict::NotVisible => summary.invisible += 1,
            LineVerdict::Partial => summary.partial += 1,
        }
        result.trace.emit(sink);
    }

    info!(
        "line sweep: {} visible, {} invisible, {} partial",
        summary.visible, summary.invisible, summary.partial
    );
    Ok(summary)
}

/// Point visibility by draping the sight line onto the surface: the target
/// is hidden if any surface sample rises above the line.
pub fn point_visibility_by_drape<S: Surface + ?Sized>(
    surface: &S,
    eye: &Point3,
    target: &Point3,
) -> Result<bool> {
    check_eye(surface, eye)?;
    check_target(surface, target)?;

    let blocked = surface
        .drape_polyline(&[*eye, *target])
        .iter()
        .filter(|s| s.kind == DrapeKind::Surface)
        .any(|s| s.point.z > interpolate_z(eye, target, s.point.x, s.point.y) + PLANE_TOLERANCE);
    Ok(!blocked)
}

/// Point visibility over a regular grid of nodes spanning the surface
/// bounds. Nodes off the surface or over voids hold `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityLattice {
    /// Nodes along X.
    pub nx: usize,
    /// Nodes along Y.
    pub ny: usize,
    /// Node spacing along X.
    pub dx: f64,
    /// Node spacing along Y.
    pub dy: f64,
    /// Position of node `(0, 0)`.
    pub origin: Point2,
    /// Row-major verdicts, `j * nx + i`.
    pub values: Vec<Option<bool>>,
}

impl VisibilityLattice {
    /// Verdict at node `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> Option<bool> {
        if i >= self.nx || j >= self.ny {
            return None;
        }
        self.values[j * self.nx + i]
    }

    /// Plan position of node `(i, j)`.
    pub fn node(&self, i: usize, j: usize) -> Point2 {
        Point2::new(
            self.origin.x + i as f64 * self.dx,
            self.origin.y + j as f64 * self.dy,
        )
    }

    /// Number of visible nodes.
    pub fn visible_count(&self) -> usize {
        self.values.iter().filter(|v| **v == Some(true)).count()
    }

    /// Number of hidden nodes.
    pub fn invisible_count(&self) -> usize {
        self.values.iter().filter(|v| **v == Some(false)).count()
    }
}

/// Sample point visibility on an `nx` by `ny` lattice, each node raised
/// `z_offset` above the surface.
pub fn visibility_lattice<S: Surface + ?Sized>(
    surface: &S,
    index: &VisibilityIndex,
    nx: usize,
    ny: usize,
    z_offset: f64,
) -> Result<VisibilityLattice> {
    if nx < 2 || ny < 2 {
        return Err(VisibilityError::Unsupported(format!(
            "lattice needs at least 2x2 nodes, got {nx}x{ny}"
        )));
    }
    ensure_current(surface, index)?;
    let bounds = surface
        .bounds()
        .ok_or_else(|| VisibilityError::InvalidMesh("surface has no points".into()))?;

    let mut lattice = VisibilityLattice {
        nx,
        ny,
        dx: bounds.width() / (nx - 1) as f64,
        dy: bounds.height() / (ny - 1) as f64,
        origin: bounds.min,
        values: Vec::with_capacity(nx * ny),
    };
    for j in 0..ny {
        for i in 0..nx {
            let node = lattice.node(i, j);
            let value = surface.locate(node.x, node.y).elevation().map(|z| {
                is_point_visible(index, &Point3::new(node.x, node.y, z + z_offset))
            });
            lattice.values.push(value);
        }
    }
    debug!("lattice spacing {} x {}", lattice.dx, lattice.dy);
    info!(
        "visibility lattice {}x{}: {} visible, {} invisible",
        nx,
        ny,
        lattice.visible_count(),
        lattice.invisible_count()
    );
    Ok(lattice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizon::tests::{make_flat_tin, make_mesa_tin, make_ridge_tin};
    use crate::index::build_visibility_index;
    use crate::query::point_visible_brute_force;
    use terravis_tin::Tin;

    fn index_for<S: Surface>(surface: &S, eye: Point3) -> VisibilityIndex {
        build_visibility_index(surface, &eye, &VisibilitySettings::default()).unwrap()
    }

    #[test]
    fn test_point_sweep_on_mesa() {
        let tin = make_mesa_tin();
        let index = index_for(&tin, Point3::new(0.0, 0.0, 11.0));
        let mut visible = Vec::new();
        let mut sink = |tag: Visibility, geometry: &[Point3]| {
            assert_eq!(geometry.len(), 1);
            if tag.is_visible() {
                visible.push(geometry[0]);
            }
        };
        let summary =
            tin_points_visibility(&tin, &index, &VisibilitySettings::default(), &mut sink).unwrap();
        assert_eq!(summary.visible + summary.invisible, tin.points().len());
        assert_eq!(summary.partial, 0);
        // Centre plus four full rings on the flat top.
        assert_eq!(summary.visible, 1 + 4 * 64);
        assert!(visible.iter().all(|p| p.z == 10.0));
    }

    #[test]
    fn test_line_sweep_on_ridge() {
        let tin = make_ridge_tin();
        let index = index_for(&tin, Point3::new(0.0, 0.0, 1.0));
        let mut runs = 0;
        let mut sink = |_: Visibility, geometry: &[Point3]| {
            assert_eq!(geometry.len(), 2);
            runs += 1;
        };
        let summary =
            tin_lines_visibility(&tin, &index, &VisibilitySettings::default(), &mut sink).unwrap();
        assert_eq!(
            summary.visible + summary.invisible + summary.partial,
            tin.edges().len()
        );
        assert!(summary.visible > 0);
        assert!(summary.invisible > 0);
        assert!(runs >= tin.edges().len());
    }

    #[test]
    fn test_stale_index_rejected() {
        let mut tin = make_flat_tin();
        let index = index_for(&tin, Point3::new(0.0, 0.0, 10.0));
        tin.set_void(0, true).unwrap();
        let mut sink = |_: Visibility, _: &[Point3]| {};
        let err = tin_points_visibility(&tin, &index, &VisibilitySettings::default(), &mut sink);
        assert!(matches!(err, Err(VisibilityError::IndexCorrupt(_))));
    }

    #[test]
    fn test_drape_check_on_ridge() {
        let tin = make_ridge_tin();
        let target = Point3::new(10.0, 0.0, 0.0);
        assert!(!point_visibility_by_drape(&tin, &Point3::new(0.0, 0.0, 1.0), &target).unwrap());
        assert!(point_visibility_by_drape(&tin, &Point3::new(0.0, 0.0, 5.0), &target).unwrap());
        assert!(matches!(
            point_visibility_by_drape(&tin, &Point3::new(50.0, 0.0, 5.0), &target),
            Err(VisibilityError::EyeOutsideSurface)
        ));
        assert!(matches!(
            point_visibility_by_drape(&tin, &Point3::new(0.0, 0.0, 5.0), &Point3::new(50.0, 0.0, 0.0)),
            Err(VisibilityError::TargetOutsideSurface)
        ));
    }

    #[test]
    fn test_drape_agrees_with_index() {
        let tin = Tin::from_grid(21, 21, 5.0, |x, y| {
            3.0 * (x * 0.15).sin() + 2.0 * (y * 0.2).cos()
        })
        .unwrap();
        let eye = Point3::new(48.0, 52.0, 7.0);
        let index = index_for(&tin, eye);
        for i in 0..20 {
            for j in 0..20 {
                let (x, y) = (2.5 + i as f64 * 5.0, 2.5 + j as f64 * 5.0);
                let z = tin.locate(x, y).elevation().unwrap() + 0.01;
                let target = Point3::new(x, y, z);
                let by_drape = point_visibility_by_drape(&tin, &eye, &target).unwrap();
                let by_index = is_point_visible(&index, &target);
                assert_eq!(by_index, point_visible_brute_force(&index, &target));
                assert_eq!(by_drape, by_index, "drape and index disagree at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_lattice() {
        let tin = make_mesa_tin();
        let index = index_for(&tin, Point3::new(0.0, 0.0, 11.0));
        let lattice = visibility_lattice(&tin, &index, 25, 25, 0.01).unwrap();
        assert_eq!(lattice.values.len(), 625);
        // Centre node sits on the flat top; corners are off the disc.
        assert_eq!(lattice.get(12, 12), Some(true));
        assert_eq!(lattice.get(0, 0), None);
        assert_eq!(lattice.get(25, 0), None);
        assert!(lattice.invisible_count() > lattice.visible_count());

        assert!(matches!(
            visibility_lattice(&tin, &index, 1, 10, 0.0),
            Err(VisibilityError::Unsupported(_))
        ));
    }
}
