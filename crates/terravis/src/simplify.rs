//! Horizon table simplification.
//!
//! Pruning removes lines whose whole span sits behind a nearer line and
//! under its sight plane. The optional iterative stage also clips lines that
//! are only partly hidden, replacing them by their surviving pieces.

use log::debug;
use terravis_math::{planar_distance, Plane, Point3, Tolerance};

use crate::error::{reserve_chunk, Result};
use crate::horizon::{HorizonLine, HorizonTable};
use crate::query::{edge_visibility, EdgeVisibility};
use crate::settings::VisibilitySettings;

/// Simplify `table` in place. The result is compacted and sorted.
pub fn simplify(table: &mut HorizonTable, eye: &Point3, settings: &VisibilitySettings) -> Result<()> {
    if settings.prune_covered_lines {
        let removed = prune_covered_lines(table.lines_mut(), eye);
        debug!("pruned {} covered horizon lines", removed);
    }
    table.compact();
    table.sort();

    if settings.iterative_simplification {
        let passes = clip_partially_covered(table, eye, settings.max_simplify_passes)?;
        debug!("iterative simplification settled after {} passes", passes);
    }
    Ok(())
}

/// Whether `near` hides the whole of `far`, whose span lies inside `near`'s.
fn is_totally_covered(eye: &Point3, near: &HorizonLine, far: &HorizonLine) -> bool {
    let mid = far.mid_angle();
    match (near.radial_distance(eye, mid), far.radial_distance(eye, mid)) {
        (Some(d_near), Some(d_far)) if d_near < d_far => {}
        _ => return false,
    }

    let (z1, z2) = if [near.p1.z, near.p2.z, far.p1.z, far.p2.z]
        .iter()
        .all(|&z| z == eye.z)
    {
        (eye.z, eye.z)
    } else {
        let plane = Plane::through(eye, &near.p1, &near.p2);
        (
            plane.z_at(far.p1.x, far.p1.y),
            plane.z_at(far.p2.x, far.p2.y),
        )
    };

    let tol = Tolerance::DEFAULT.cover;
    (z1 > far.p1.z && z2 > far.p2.z)
        || ((z1 - far.p1.z).abs() < tol && z2 > far.p2.z)
        || ((z2 - far.p2.z).abs() < tol && z1 > far.p1.z)
}

/// Deactivate every line wholly hidden behind a nearer one. `lines` must be
/// in table order. Returns the number of lines deactivated.
pub fn prune_covered_lines(lines: &mut [HorizonLine], eye: &Point3) -> usize {
    let mut removed = 0;
    for i in 0..lines.len() {
        if !lines[i].active {
            continue;
        }
        let near = lines[i];
        let start = lines.partition_point(|l| l.ang_start < near.ang_start);
        for j in start..lines.len() {
            let far = lines[j];
            if far.ang_start > near.ang_end {
                break;
            }
            if j == i || !far.active || far.ang_end > near.ang_end {
                continue;
            }
            if is_totally_covered(eye, &near, &far) {
                lines[j].active = false;
                removed += 1;
            }
        }
    }
    removed
}

/// Replace lines partly hidden behind nearer lines by their visible pieces,
/// until a pass changes nothing or `max_passes` is reached. Returns the
/// number of passes run.
fn clip_partially_covered(table: &mut HorizonTable, eye: &Point3, max_passes: usize) -> Result<usize> {
    let min_length = Tolerance::DEFAULT.linear;
    let mut passes = 0;

    while passes < max_passes {
        passes += 1;
        let lines = table.lines_mut();
        let mut order: Vec<usize> = (0..lines.len()).collect();
        order.sort_by(|&a, &b| {
            let da = planar_distance(eye, &midpoint(&lines[a]));
            let db = planar_distance(eye, &midpoint(&lines[b]));
            da.total_cmp(&db).then(a.cmp(&b))
        });

        let mut added = Vec::new();
        let mut changed = false;
        for (k, &i) in order.iter().enumerate() {
            for &j in &order[k + 1..] {
                let (near, far) = (lines[i], lines[j]);
                if !near.active || !far.active {
                    continue;
                }
                let lo = near.ang_start.max(far.ang_start);
                let hi = near.ang_end.min(far.ang_end);
                if hi <= lo {
                    continue;
                }
                let mid = 0.5 * (lo + hi);
                match (near.radial_distance(eye, mid), far.radial_distance(eye, mid)) {
                    (Some(d_near), Some(d_far)) if d_near < d_far => {}
                    _ => continue,
                }
                let (Some(q_lo), Some(q_hi)) =
                    (far.point_at_angle(eye, lo), far.point_at_angle(eye, hi))
                else {
                    continue;
                };
                if planar_distance(&q_lo, &q_hi) < min_length {
                    continue;
                }

                let kept = match edge_visibility(eye, &near, &q_lo, &q_hi) {
                    EdgeVisibility::Visible(..) => continue,
                    EdgeVisibility::NotVisible => None,
                    EdgeVisibility::Partial(a, b) => Some((a, b)),
                };
                if let Some((a, b)) = kept {
                    if planar_distance(&q_lo, &q_hi) - planar_distance(&a, &b) < min_length {
                        continue;
                    }
                }

                // Pieces ending on the 0° ray keep their 2π end through
                // `HorizonLine::new`.
                let mut pieces = Vec::with_capacity(3);
                if lo > far.ang_start {
                    pieces.push(HorizonLine::new(eye, far.p1, q_lo));
                }
                if let Some((a, b)) = kept {
                    pieces.push(HorizonLine::new(eye, a, b));
                }
                if hi < far.ang_end {
                    pieces.push(HorizonLine::new(eye, q_hi, far.p2));
                }
                for p in pieces.into_iter().filter(|p| p.length() >= min_length) {
                    reserve_chunk(&mut added, "simplified horizon table")?;
                    added.push(p);
                }
                lines[j].active = false;
                changed = true;
            }
        }

        lines.extend(added);
        table.compact();
        table.sort();
        if !changed {
            break;
        }
    }
    Ok(passes)
}

fn midpoint(line: &HorizonLine) -> Point3 {
    Point3::from((line.p1.coords + line.p2.coords) * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;
    use crate::horizon::build_horizon_table;
    use crate::horizon::tests::make_mesa_tin;
    use crate::index::build_visibility_index;
    use crate::query::{is_point_visible, point_visible_brute_force};

    /// Horizontal wall at distance `d` north of the origin.
    fn wall(eye: &Point3, d: f64, half: f64, z: f64) -> HorizonLine {
        HorizonLine::new(eye, Point3::new(half, d, z), Point3::new(-half, d, z))
    }

    #[test]
    fn test_prune_hidden_line() {
        let eye = Point3::new(0.0, 0.0, 1.0);
        let mut table = HorizonTable::from_lines(vec![
            // Near wall rises to z = 5; the far wall at z = 3 sits under its
            // sight plane, the tall far wall pokes above it.
            wall(&eye, 10.0, 10.0, 5.0),
            wall(&eye, 20.0, 5.0, 3.0),
            wall(&eye, 30.0, 5.0, 50.0),
        ]);
        let removed = prune_covered_lines(table.lines_mut(), &eye);
        assert_eq!(removed, 1);
        table.compact();
        assert_eq!(table.len(), 2);
        assert!(table.lines().iter().all(|l| l.p1.z != 3.0));
    }

    #[test]
    fn test_prune_needs_nearer_line() {
        let eye = Point3::new(0.0, 0.0, 1.0);
        // Wide far line behind a narrow near one: the far span is not
        // contained, so nothing is pruned.
        let mut lines = vec![wall(&eye, 30.0, 30.0, 0.0), wall(&eye, 10.0, 1.0, 5.0)];
        lines.sort_by(crate::horizon::compare_lines);
        assert_eq!(prune_covered_lines(&mut lines, &eye), 0);
    }

    #[test]
    fn test_mesa_slope_foot_clipped() {
        let tin = make_mesa_tin();
        let eye = Point3::new(0.5, 0.25, 11.0);
        let table = build_horizon_table(&tin, &eye).unwrap();
        let before = table.len();

        let mut pruned = table.clone();
        simplify(&mut pruned, &eye, &VisibilitySettings::default()).unwrap();
        assert!(pruned.len() <= before);

        let mut clipped = table;
        let settings = VisibilitySettings {
            iterative_simplification: true,
            ..Default::default()
        };
        simplify(&mut clipped, &eye, &settings).unwrap();
        // The foot of the slope at radius 30 hides behind the rim.
        assert!(clipped.len() < before);
        assert!(clipped.lines().iter().all(|l| l.dist_start < 25.0));
    }

    #[test]
    fn test_partial_clip_keeps_visible_part() {
        let eye = Point3::new(0.0, 0.0, 1.0);
        // Near wall covers the lower half of the far wall's span.
        let near = HorizonLine::new(&eye, Point3::new(10.0, 10.0, 5.0), Point3::new(0.0, 10.0, 5.0));
        let far = HorizonLine::new(&eye, Point3::new(10.0, 20.0, 2.0), Point3::new(-10.0, 20.0, 2.0));
        let mut table = HorizonTable::from_lines(vec![near, far]);
        clip_partially_covered(&mut table, &eye, 8).unwrap();

        let far_pieces: Vec<_> = table.lines().iter().filter(|l| l.p1.y == 20.0).collect();
        assert_eq!(far_pieces.len(), 1);
        assert!(far_pieces[0].p1.x.abs() < 1e-9);
        assert!((far_pieces[0].p2.x + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_simplification_toggle_keeps_answers() {
        let tin = make_mesa_tin();
        let eye = Point3::new(0.5, 0.25, 11.0);
        let plain = build_visibility_index(&tin, &eye, &VisibilitySettings::default()).unwrap();
        let iterative = build_visibility_index(
            &tin,
            &eye,
            &VisibilitySettings {
                iterative_simplification: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(iterative.table().len() <= plain.table().len());

        for k in 0..72 {
            let a = TAU * k as f64 / 72.0;
            for r in [8.0, 18.0, 27.0, 45.0] {
                let z = if r < 20.0 { 10.0 } else if r < 30.0 { 2.0 } else { 0.0 };
                let p = Point3::new(r * a.cos(), r * a.sin(), z + 0.01);
                assert_eq!(is_point_visible(&plain, &p), point_visible_brute_force(&plain, &p));
                assert_eq!(is_point_visible(&plain, &p), is_point_visible(&iterative, &p));
            }
        }
    }
}
