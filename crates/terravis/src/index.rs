//! Angle index over the horizon table and the per-eye visibility index.

use std::collections::BTreeSet;

use log::{debug, info};
use terravis_math::Point3;
use terravis_tin::{Location, Surface};

use crate::error::{reserve_chunk, Result, VisibilityError};
use crate::horizon::{build_horizon_table, HorizonLine, HorizonTable};
use crate::settings::VisibilitySettings;
use crate::simplify::simplify;

/// Kind of sweep event. Begins sort before ends at equal angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    /// A line's span opens.
    Begin,
    /// A line's span closes.
    End,
}

/// One sweep event with the snapshot of lines active after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleBreakpoint {
    /// Event azimuth.
    pub angle: f64,
    /// Begin or end.
    pub kind: EventKind,
    /// Table position of the owning line.
    pub line: usize,
    /// `(offset, count)` of the active set in the pool.
    pub slice: (usize, usize),
}

/// Sorted breakpoints and the flattened pool of active line ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngleIndex {
    breakpoints: Vec<AngleBreakpoint>,
    pool: Vec<usize>,
}

impl AngleIndex {
    /// Sweep the active lines of `lines`.
    pub fn build(lines: &[HorizonLine]) -> Result<Self> {
        let mut events: Vec<(f64, EventKind, usize)> = Vec::new();
        for (id, line) in lines.iter().enumerate().filter(|(_, l)| l.active) {
            reserve_chunk(&mut events, "angle events")?;
            events.push((line.ang_start, EventKind::Begin, id));
            reserve_chunk(&mut events, "angle events")?;
            events.push((line.ang_end, EventKind::End, id));
        }
        events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut active = BTreeSet::new();
        let mut breakpoints = Vec::new();
        let mut pool = Vec::new();
        for (angle, kind, line) in events {
            match kind {
                EventKind::Begin => {
                    active.insert(line);
                }
                EventKind::End => {
                    if !active.remove(&line) {
                        return Err(VisibilityError::IndexCorrupt(format!(
                            "line {line} ends at {angle} without having begun"
                        )));
                    }
                }
            }
            let offset = pool.len();
            for &id in &active {
                reserve_chunk(&mut pool, "active pool")?;
                pool.push(id);
            }
            reserve_chunk(&mut breakpoints, "breakpoints")?;
            breakpoints.push(AngleBreakpoint {
                angle,
                kind,
                line,
                slice: (offset, active.len()),
            });
        }
        if !active.is_empty() {
            return Err(VisibilityError::IndexCorrupt(format!(
                "{} lines never ended",
                active.len()
            )));
        }

        debug!(
            "angle index: {} breakpoints, pool of {}",
            breakpoints.len(),
            pool.len()
        );
        Ok(Self { breakpoints, pool })
    }

    /// Sorted breakpoints.
    pub fn breakpoints(&self) -> &[AngleBreakpoint] {
        &self.breakpoints
    }

    /// Ids of the lines whose span may contain `theta`.
    ///
    /// At an exact breakpoint angle the snapshot taken just before the first
    /// end event at that angle is used: it holds every line ending there as
    /// well as every line starting there. Callers still check containment.
    pub fn active_at(&self, theta: f64) -> &[usize] {
        let idx = self.breakpoints.partition_point(|b| b.angle <= theta);
        if idx == 0 {
            return &[];
        }
        let mut pick = idx - 1;
        if self.breakpoints[pick].angle == theta {
            let group_start = self.breakpoints[..idx].partition_point(|b| b.angle < theta);
            if let Some(first_end) =
                (group_start..idx).find(|&k| self.breakpoints[k].kind == EventKind::End)
            {
                if first_end == 0 {
                    return &[];
                }
                pick = first_end - 1;
            }
        }
        let (offset, count) = self.breakpoints[pick].slice;
        &self.pool[offset..offset + count]
    }

    /// Distinct breakpoint angles strictly inside `(lo, hi)`.
    pub fn breakpoints_between(&self, lo: f64, hi: f64) -> Vec<f64> {
        let start = self.breakpoints.partition_point(|b| b.angle <= lo);
        let mut angles: Vec<f64> = self.breakpoints[start..]
            .iter()
            .map(|b| b.angle)
            .take_while(|&a| a < hi)
            .collect();
        angles.dedup();
        angles
    }
}

/// Everything needed to answer visibility queries for one eye on one mesh
/// revision. Immutable once built.
#[derive(Debug, Clone)]
pub struct VisibilityIndex {
    eye: Point3,
    revision: u64,
    table: HorizonTable,
    angles: AngleIndex,
    radius: f64,
}

impl VisibilityIndex {
    /// The eye the index was built for.
    pub fn eye(&self) -> &Point3 {
        &self.eye
    }

    /// Mesh revision the index was built for.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The simplified, compacted horizon table.
    pub fn table(&self) -> &HorizonTable {
        &self.table
    }

    /// The angle index over [`table`](Self::table).
    pub fn angle_index(&self) -> &AngleIndex {
        &self.angles
    }

    /// Diagonal of the mesh bounds; long enough to reach any mesh point.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Whether the index still matches `surface` and `eye`.
    pub fn is_current<S: Surface + ?Sized>(&self, surface: &S, eye: &Point3) -> bool {
        self.revision == surface.revision() && self.eye == *eye
    }

    /// Horizon lines whose span contains `theta`.
    pub fn covering(&self, theta: f64) -> impl Iterator<Item = &HorizonLine> + '_ {
        self.angles
            .active_at(theta)
            .iter()
            .map(move |&id| &self.table.lines()[id])
            .filter(move |l| l.covers_angle(theta))
    }

    /// Horizon lines whose span overlaps `[lo, hi]`, by table position.
    /// Requires `lo <= hi` within `[0, 2π]`.
    pub(crate) fn overlapping(&self, lo: f64, hi: f64) -> Vec<usize> {
        let lines = self.table.lines();
        let mut ids: Vec<usize> = self
            .angles
            .active_at(lo)
            .iter()
            .copied()
            .filter(|&id| lines[id].covers_angle(lo))
            .collect();
        let start = lines.partition_point(|l| l.ang_start <= lo);
        ids.extend((start..lines.len()).take_while(|&id| lines[id].ang_start <= hi));
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Check that the eye is over the surface and not below it. Returns the
/// surface elevation under the eye.
pub fn check_eye<S: Surface + ?Sized>(surface: &S, eye: &Point3) -> Result<f64> {
    match surface.locate(eye.x, eye.y) {
        Location::Triangle { z, .. } if z > eye.z => Err(VisibilityError::EyeBelowSurface),
        Location::Triangle { z, .. } => Ok(z),
        Location::Void | Location::Outside => Err(VisibilityError::EyeOutsideSurface),
    }
}

/// Target counterpart of [`check_eye`].
pub fn check_target<S: Surface + ?Sized>(surface: &S, target: &Point3) -> Result<f64> {
    match surface.locate(target.x, target.y) {
        Location::Triangle { z, .. } if z > target.z => Err(VisibilityError::TargetBelowSurface),
        Location::Triangle { z, .. } => Ok(z),
        Location::Void | Location::Outside => Err(VisibilityError::TargetOutsideSurface),
    }
}

/// Fail with `IndexCorrupt` when `index` was built for an older revision of
/// `surface`.
pub fn ensure_current<S: Surface + ?Sized>(surface: &S, index: &VisibilityIndex) -> Result<()> {
    if index.revision() != surface.revision() {
        return Err(VisibilityError::IndexCorrupt(format!(
            "index built for revision {}, surface is at {}",
            index.revision(),
            surface.revision()
        )));
    }
    Ok(())
}

/// Build the visibility index of `surface` for `eye`.
pub fn build_visibility_index<S: Surface + ?Sized>(
    surface: &S,
    eye: &Point3,
    settings: &VisibilitySettings,
) -> Result<VisibilityIndex> {
    settings.validate()?;
    check_eye(surface, eye)?;
    let radius = surface
        .bounds()
        .ok_or_else(|| VisibilityError::InvalidMesh("surface has no points".into()))?
        .diagonal();

    let mut table = build_horizon_table(surface, eye)?;
    let built = table.len();
    simplify(&mut table, eye, settings)?;
    let angles = AngleIndex::build(table.lines())?;

    info!(
        "visibility index: {} horizon lines ({} before simplification), {} breakpoints",
        table.len(),
        built,
        angles.breakpoints().len()
    );
    Ok(VisibilityIndex {
        eye: *eye,
        revision: surface.revision(),
        table,
        angles,
        radius,
    })
}
