//! Radial viewshed.
//!
//! Radials fan out from the eye at a fixed angular step. Each one is draped
//! onto the surface and walked outward with a running maximum of the
//! elevation angle: a sample is visible while its angle does not drop below
//! the maximum seen so far.

use std::f64::consts::TAU;

use log::{debug, info, warn};
use terravis_math::{planar_distance, Point3};
use terravis_tin::{DrapeKind, Surface};

use crate::error::{Result, VisibilityError};
use crate::feature::FeatureSink;
use crate::index::{check_eye, check_target};
use crate::settings::VisibilitySettings;
use crate::trace::{LineOfSightTrace, StoreMode};

/// Radial count used when the requested spacing is out of range.
pub const DEFAULT_RADIAL_COUNT: usize = 1000;

/// Largest accepted radial count.
pub const MAX_RADIAL_COUNT: usize = 100_000;

/// Increment used when the requested one is out of range.
pub const DEFAULT_INCREMENT_DEGREES: f64 = 0.36;

/// How radials are spaced around the eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadialSpacing {
    /// This many radials over the full circle.
    Count(usize),
    /// One radial every this many degrees.
    IncrementDegrees(f64),
}

impl Default for RadialSpacing {
    fn default() -> Self {
        RadialSpacing::Count(DEFAULT_RADIAL_COUNT)
    }
}

impl RadialSpacing {
    /// Number of radials cast and the angle between them, in radians.
    /// Out-of-range requests fall back to the defaults with a warning.
    pub fn resolve(&self) -> (usize, f64) {
        match *self {
            RadialSpacing::Count(n) => {
                let n = if (1..=MAX_RADIAL_COUNT).contains(&n) {
                    n
                } else {
                    warn!("radial count {} out of range, using {}", n, DEFAULT_RADIAL_COUNT);
                    DEFAULT_RADIAL_COUNT
                };
                (n, TAU / n as f64)
            }
            RadialSpacing::IncrementDegrees(d) => {
                // Below this increment the count would exceed MAX_RADIAL_COUNT.
                let finest = 360.0 / MAX_RADIAL_COUNT as f64;
                let d = if d >= finest && d <= 360.0 {
                    d
                } else {
                    warn!(
                        "radial increment {} out of range, using {}",
                        d, DEFAULT_INCREMENT_DEGREES
                    );
                    DEFAULT_INCREMENT_DEGREES
                };
                let exact = 360.0 / d;
                let count = if (exact - exact.round()).abs() < 1e-9 {
                    exact.round() as usize
                } else {
                    exact.ceil() as usize
                };
                (count, d.to_radians())
            }
        }
    }
}

/// Cast radials around `eye` and emit their visible and invisible runs.
pub fn radial_viewshed<S, F>(
    surface: &S,
    eye: &Point3,
    spacing: RadialSpacing,
    settings: &VisibilitySettings,
    sink: &mut F,
) -> Result<()>
where
    S: Surface + ?Sized,
    F: FeatureSink + ?Sized,
{
    settings.validate()?;
    check_eye(surface, eye)?;
    let length = surface
        .bounds()
        .ok_or_else(|| VisibilityError::InvalidMesh("surface has no points".into()))?
        .diagonal();
    let (count, step) = spacing.resolve();

    let mut trace = LineOfSightTrace::new();
    let mut runs = 0;
    for i in 0..count {
        let theta = i as f64 * step;
        let end = Point3::new(
            eye.x + length * theta.cos(),
            eye.y + length * theta.sin(),
            eye.z,
        );
        trace.clear();
        scan_profile(eye, &profile(surface, eye, &end), &mut trace)?;
        trace.emit(sink);
        runs += trace.len() / 2;
    }

    info!("radial viewshed: {} radials, {} runs", count, runs);
    Ok(())
}

/// Scan a single profile from the eye to `target` and emit its runs.
pub fn radial_visibility<S, F>(
    surface: &S,
    eye: &Point3,
    target: &Point3,
    sink: &mut F,
) -> Result<LineOfSightTrace>
where
    S: Surface + ?Sized,
    F: FeatureSink + ?Sized,
{
    check_eye(surface, eye)?;
    check_target(surface, target)?;

    let mut trace = LineOfSightTrace::new();
    scan_profile(eye, &profile(surface, eye, target), &mut trace)?;
    debug!("radial to {:?}: {} runs", target, trace.len() / 2);
    trace.emit(sink);
    Ok(trace)
}

/// Surface samples of `eye -> end`. Samples over voids or off the surface
/// carry no terrain and are dropped; repeated plan positions collapse.
fn profile<S: Surface + ?Sized>(surface: &S, eye: &Point3, end: &Point3) -> Vec<Point3> {
    let mut samples: Vec<Point3> = surface
        .drape_polyline(&[*eye, *end])
        .into_iter()
        .filter(|s| s.kind == DrapeKind::Surface)
        .map(|s| s.point)
        .collect();
    samples.dedup_by(|b, a| a.x == b.x && a.y == b.y);
    samples
}

/// Walk `samples` outward from the eye, storing visible and invisible runs
/// as pairs. Re-emergence points are interpolated at the blocking angle.
pub(crate) fn scan_profile(eye: &Point3, samples: &[Point3], trace: &mut LineOfSightTrace) -> Result<()> {
    let n = samples.len();
    if n < 2 {
        return Ok(());
    }
    let elevation = |p: &Point3| (p.z - eye.z).atan2(planar_distance(eye, p));

    trace.push(samples[0], true, StoreMode::Always)?;
    let mut max_angle = elevation(&samples[1]);
    let mut i = 2;
    loop {
        while i < n {
            let a = elevation(&samples[i]);
            if a < max_angle {
                break;
            }
            max_angle = a;
            i += 1;
        }
        trace.push(samples[i - 1], true, StoreMode::Always)?;
        if i >= n {
            break;
        }
        trace.push(samples[i - 1], false, StoreMode::Always)?;

        let mut last = elevation(&samples[i - 1]);
        let mut a = elevation(&samples[i]);
        while a < max_angle {
            last = a;
            i += 1;
            if i >= n {
                break;
            }
            a = elevation(&samples[i]);
        }
        if i >= n {
            trace.push(samples[n - 1], false, StoreMode::Always)?;
            break;
        }

        let t = (max_angle - last) / (a - last);
        let x = samples[i - 1] + (samples[i] - samples[i - 1]) * t;
        trace.push(x, false, StoreMode::Always)?;
        trace.push(x, true, StoreMode::Always)?;
        max_angle = a;
        i += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Visibility;
    use crate::horizon::tests::{make_mesa_tin, make_ridge_tin};
    use approx::assert_relative_eq;

    fn transitions(trace: &LineOfSightTrace) -> usize {
        let flags: Vec<bool> = trace.segments().map(|s| s.visible).collect();
        flags.windows(2).filter(|w| w[0] && !w[1]).count()
    }

    #[test]
    fn test_spacing_resolution() {
        assert_eq!(RadialSpacing::Count(7).resolve().0, 7);
        assert_eq!(RadialSpacing::Count(0).resolve().0, DEFAULT_RADIAL_COUNT);
        assert_eq!(RadialSpacing::Count(200_000).resolve().0, DEFAULT_RADIAL_COUNT);
        assert_eq!(RadialSpacing::IncrementDegrees(1.0).resolve().0, 360);
        assert_eq!(RadialSpacing::IncrementDegrees(7.0).resolve().0, 52);
        assert_eq!(RadialSpacing::IncrementDegrees(-1.0).resolve().0, 1000);
        assert_eq!(RadialSpacing::IncrementDegrees(400.0).resolve().0, 1000);
        assert_eq!(RadialSpacing::IncrementDegrees(1e-12).resolve().0, 1000);
        assert_eq!(RadialSpacing::IncrementDegrees(f64::NAN).resolve().0, 1000);
        assert_eq!(
            RadialSpacing::IncrementDegrees(0.0036).resolve().0,
            MAX_RADIAL_COUNT
        );
        let (count, step) = RadialSpacing::IncrementDegrees(90.0).resolve();
        assert_eq!(count, 4);
        assert_relative_eq!(step, TAU / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scan_profile_reemerges() {
        let eye = Point3::new(0.0, 0.0, 1.0);
        // Flat, a bump at x = 3, a dip, then a tall wall.
        let samples: Vec<Point3> = [(1.0, 0.0), (2.0, 0.0), (3.0, 2.0), (4.0, 0.0), (6.0, 0.0), (8.0, 10.0)]
            .iter()
            .map(|&(x, z)| Point3::new(x, 0.0, z))
            .collect();
        let mut trace = LineOfSightTrace::new();
        scan_profile(&eye, &samples, &mut trace).unwrap();

        let segments: Vec<_> = trace.segments().collect();
        assert_eq!(segments.len(), 3);
        assert!(segments[0].visible);
        assert_eq!(segments[0].end.x, 3.0);
        assert!(!segments[1].visible);
        assert!(segments[2].visible);
        // Re-emerges on the climb to the wall.
        let x = segments[1].end.x;
        assert!(x > 6.0 && x < 8.0);
        assert_eq!(segments[2].start, segments[1].end);
        assert_eq!(segments[2].end.x, 8.0);
    }

    #[test]
    fn test_scan_profile_short() {
        let eye = Point3::new(0.0, 0.0, 1.0);
        let mut trace = LineOfSightTrace::new();
        scan_profile(&eye, &[Point3::new(1.0, 0.0, 0.0)], &mut trace).unwrap();
        assert!(trace.is_empty());
    }

    #[test]
    fn test_mesa_single_transition() {
        let tin = make_mesa_tin();
        let eye = Point3::new(0.0, 0.0, 11.0);
        let length = tin.bounds().unwrap().diagonal();
        let (count, step) = RadialSpacing::Count(360).resolve();

        for i in 0..count {
            let theta = i as f64 * step;
            let end = Point3::new(length * theta.cos(), length * theta.sin(), eye.z);
            let mut trace = LineOfSightTrace::new();
            scan_profile(&eye, &profile(&tin, &eye, &end), &mut trace).unwrap();
            assert_eq!(transitions(&trace), 1, "radial {i}");
            let first = trace.segments().next().unwrap();
            assert!(first.visible);
            assert_relative_eq!(planar_distance(&eye, &first.end), 20.0, epsilon = 0.5);
        }
    }

    #[test]
    fn test_radial_viewshed_emits_runs() {
        let tin = make_mesa_tin();
        let eye = Point3::new(0.0, 0.0, 11.0);
        let mut visible = 0;
        let mut invisible = 0;
        let mut sink = |tag: Visibility, geometry: &[Point3]| {
            assert_eq!(geometry.len(), 2);
            match tag {
                Visibility::Visible => visible += 1,
                Visibility::Invisible => invisible += 1,
            }
        };
        radial_viewshed(
            &tin,
            &eye,
            RadialSpacing::Count(90),
            &VisibilitySettings::default(),
            &mut sink,
        )
        .unwrap();
        assert_eq!(visible, 90);
        assert_eq!(invisible, 90);
    }

    #[test]
    fn test_radial_rejects_bad_eye() {
        let tin = make_mesa_tin();
        let mut sink = |_: Visibility, _: &[Point3]| {};
        let err = radial_viewshed(
            &tin,
            &Point3::new(0.0, 0.0, 5.0),
            RadialSpacing::default(),
            &VisibilitySettings::default(),
            &mut sink,
        );
        assert!(matches!(err, Err(VisibilityError::EyeBelowSurface)));
    }

    #[test]
    fn test_radial_to_target() {
        let tin = make_ridge_tin();
        let mut sink = |_: Visibility, _: &[Point3]| {};
        let eye = Point3::new(0.0, 0.0, 1.0);
        let trace = radial_visibility(&tin, &eye, &Point3::new(10.0, 0.0, 0.0), &mut sink).unwrap();
        let last = trace.segments().last().unwrap();
        assert!(!last.visible);

        let high = Point3::new(0.0, 0.0, 5.0);
        let trace = radial_visibility(&tin, &high, &Point3::new(10.0, 0.0, 0.0), &mut sink).unwrap();
        assert!(trace.segments().all(|s| s.visible));

        let err = radial_visibility(&tin, &eye, &Point3::new(10.0, 0.0, -3.0), &mut sink);
        assert!(matches!(err, Err(VisibilityError::TargetBelowSurface)));
    }
}
