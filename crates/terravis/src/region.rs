//! Region viewshed.
//!
//! The surface is cut along the curves where terrain dips under the sight
//! plane of a horizon line. After those break lines are inserted every
//! triangle is wholly visible or wholly hidden, so merging same-class
//! neighbours yields polygons that tile the surface.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::f64::consts::{PI, TAU};

use log::{debug, info, warn};
use terravis_math::{
    azimuth, line_intersection, orient2d, plane_intersection, planar_distance, point_in_triangle,
    signed_plane_distance, Plane, Point3, Tolerance,
};
use terravis_tin::{PointId, Surface, TinError};

use crate::error::Result;
use crate::feature::{FeatureSink, Visibility};
use crate::horizon::HorizonLine;
use crate::index::{build_visibility_index, check_eye, VisibilityIndex};
use crate::query::{is_point_visible, PLANE_TOLERANCE};
use crate::settings::VisibilitySettings;

/// One boundary ring of a viewshed region.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewshedPolygon {
    /// Closed ring, first point repeated last. Exterior rings run
    /// counter-clockwise, holes clockwise.
    pub ring: Vec<Point3>,
    /// Visibility of the region the ring bounds.
    pub visibility: Visibility,
    /// Region the ring belongs to; exterior and holes share it.
    pub region: usize,
}

impl ViewshedPolygon {
    /// Signed plan area, positive for counter-clockwise rings.
    pub fn signed_area(&self) -> f64 {
        let n = self.ring.len();
        if n < 4 {
            return 0.0;
        }
        let mut area = 0.0;
        for i in 0..n - 1 {
            area += self.ring[i].x * self.ring[i + 1].y;
            area -= self.ring[i + 1].x * self.ring[i].y;
        }
        area / 2.0
    }

    /// Is this ring a hole?
    pub fn is_hole(&self) -> bool {
        self.signed_area() < 0.0
    }
}

/// Partition the non-void surface into visible and invisible polygons.
///
/// Works on a clone of `surface`; the caller's surface is untouched. Rings
/// are emitted through `sink` in the order they are returned: regions
/// touching the hull first, then by lowest triangle.
pub fn region_viewshed<S, F>(
    surface: &S,
    eye: &Point3,
    settings: &VisibilitySettings,
    sink: &mut F,
) -> Result<Vec<ViewshedPolygon>>
where
    S: Surface + Clone,
    F: FeatureSink + ?Sized,
{
    settings.validate()?;
    check_eye(surface, eye)?;

    let mut work = surface.clone();
    let index = build_visibility_index(&work, eye, settings)?;

    let breaks = break_segments(&work, &index, settings.break_line_tolerance);
    let chains = chain_breaks(breaks, settings.break_line_tolerance);
    debug!("region viewshed: {} break chains", chains.len());

    let mut skipped = 0;
    for chain in &chains {
        for w in chain.windows(2) {
            match work.insert_constrained_segment(&w[0], &w[1]) {
                Ok(()) => {}
                Err(e @ (TinError::InsertionFailed(_) | TinError::OutsideSurface(..))) => {
                    warn!("skipping break segment {:?} -> {:?}: {}", w[0], w[1], e);
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    work.retriangulate()?;

    let triangles = work.triangles();
    let classes: Vec<Option<bool>> = triangles
        .iter()
        .map(|&[a, b, c]| {
            if work.is_void_triangle(a, b, c) {
                return None;
            }
            let (pa, pb, pc) = (work.point(a), work.point(b), work.point(c));
            let centroid = Point3::from((pa.coords + pb.coords + pc.coords) / 3.0);
            let raised = Point3::new(centroid.x, centroid.y, centroid.z + settings.line_offset);
            Some(is_point_visible(&index, &raised))
        })
        .collect();

    let polygons = collect_regions(&work, &triangles, &classes);
    for polygon in &polygons {
        sink.emit(polygon.visibility, &polygon.ring);
    }

    info!(
        "region viewshed: {} rings over {} triangles ({} break segments skipped)",
        polygons.len(),
        triangles.len(),
        skipped
    );
    Ok(polygons)
}

/// Break segments on every triangle that crosses the sight plane of a
/// horizon line in front of it.
fn break_segments<S: Surface + ?Sized>(
    surface: &S,
    index: &VisibilityIndex,
    min_length: f64,
) -> Vec<(Point3, Point3)> {
    let eye = index.eye();
    let lines = index.table().lines();
    let tol = Tolerance::DEFAULT;
    let mut breaks: Vec<(Point3, Point3)> = Vec::new();
    let mut starts = EndpointGrid::new(tol.linear);

    for [a, b, c] in surface.triangles() {
        if surface.is_void_triangle(a, b, c) {
            continue;
        }
        let tri = [surface.point(a), surface.point(b), surface.point(c)];
        if point_in_triangle(&tri[0], &tri[1], &tri[2], eye) {
            continue;
        }

        let mut seen = BTreeSet::new();
        for (lo, hi) in angular_extent(eye, &tri) {
            for id in index.overlapping(lo, hi) {
                if !seen.insert(id) {
                    continue;
                }
                let line = &lines[id];
                let olo = line.ang_start.max(lo);
                let ohi = line.ang_end.min(hi);
                if ohi <= olo || !in_front(eye, line, &tri, 0.5 * (olo + ohi)) {
                    continue;
                }
                if !crosses_sight_plane(eye, line, &tri) {
                    continue;
                }
                let Some((p, q)) = clip_break(eye, line, &tri) else {
                    continue;
                };
                if planar_distance(&p, &q) < min_length {
                    continue;
                }
                let matches = |from: &Point3, to: &Point3| {
                    starts.near(from).any(|i| {
                        let (u, v) = &breaks[i];
                        tol.plan_equal(u, from) && tol.plan_equal(v, to)
                    })
                };
                if !matches(&p, &q) && !matches(&q, &p) {
                    starts.insert(&p, breaks.len());
                    breaks.push((p, q));
                }
            }
        }
    }
    breaks
}

/// Azimuth range of a triangle seen from outside it, split at 0° into
/// ranges within `[0, 2π]`.
fn angular_extent(eye: &Point3, tri: &[Point3; 3]) -> Vec<(f64, f64)> {
    let base = azimuth(eye, &tri[0]);
    let relative = |p: &Point3| {
        let d = azimuth(eye, p) - base;
        if d > PI {
            d - TAU
        } else if d <= -PI {
            d + TAU
        } else {
            d
        }
    };
    let (db, dc) = (relative(&tri[1]), relative(&tri[2]));
    let lo = base + db.min(dc).min(0.0);
    let hi = base + db.max(dc).max(0.0);
    if lo < 0.0 {
        vec![(lo + TAU, TAU), (0.0, hi)]
    } else if hi > TAU {
        vec![(lo, TAU), (0.0, hi - TAU)]
    } else {
        vec![(lo, hi)]
    }
}

/// Whether `line` lies strictly nearer the eye than the triangle along the
/// bearing `theta`.
fn in_front(eye: &Point3, line: &HorizonLine, tri: &[Point3; 3], theta: f64) -> bool {
    let Some(d_line) = line.radial_distance(eye, theta) else {
        return false;
    };
    let far = Point3::new(eye.x + theta.cos(), eye.y + theta.sin(), eye.z);
    let nearest = (0..3)
        .filter_map(|i| line_intersection(eye, &far, &tri[i], &tri[(i + 1) % 3]))
        .filter(|&(s, t)| s > 0.0 && (0.0..=1.0).contains(&t))
        .map(|(s, _)| s)
        .fold(f64::INFINITY, f64::min);
    d_line > 0.0 && d_line < nearest
}

/// Whether the triangle has vertices clearly on both sides of the sight
/// plane of `line`.
fn crosses_sight_plane(eye: &Point3, line: &HorizonLine, tri: &[Point3; 3]) -> bool {
    let mut above = false;
    let mut below = false;
    for v in tri {
        match signed_plane_distance(eye, &line.p2, &line.p1, v) {
            Some(d) if d >= PLANE_TOLERANCE => below = true,
            Some(d) if d <= -PLANE_TOLERANCE => above = true,
            Some(_) => {}
            None => return false,
        }
    }
    above && below
}

/// Part of the triangle's intersection with the sight plane that lies in
/// the line's wedge and beyond the line.
fn clip_break(eye: &Point3, line: &HorizonLine, tri: &[Point3; 3]) -> Option<(Point3, Point3)> {
    let face = Plane::through(&tri[0], &tri[1], &tri[2]);
    let sight = Plane::through(eye, &line.p2, &line.p1);
    let (origin, dir) = plane_intersection(&face, &sight)?;
    let at = |s: f64| origin + dir * s;
    let ahead = at(1.0);

    // Half-planes `sign * orient2d(a, b, X) >= 0`.
    let bounds = [
        (tri[0], tri[1], 1.0),
        (tri[1], tri[2], 1.0),
        (tri[2], tri[0], 1.0),
        (*eye, line.p1, 1.0),
        (*eye, line.p2, -1.0),
        (line.p1, line.p2, -1.0),
    ];
    let (mut lo, mut hi) = (f64::NEG_INFINITY, f64::INFINITY);
    for (a, b, sign) in bounds {
        let f0 = sign * orient2d(&a, &b, &origin);
        let k = sign * orient2d(&a, &b, &ahead) - f0;
        if k == 0.0 {
            if f0 < 0.0 {
                return None;
            }
            continue;
        }
        let s = -f0 / k;
        if k > 0.0 {
            lo = lo.max(s);
        } else {
            hi = hi.min(s);
        }
    }
    if !(lo.is_finite() && hi.is_finite() && hi > lo) {
        return None;
    }
    Some((at(lo), at(hi)))
}

/// Segment ids bucketed by snapped plan position. Points closer than the
/// cell size always fall in neighbouring cells.
struct EndpointGrid {
    cell: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl EndpointGrid {
    fn new(cell: f64) -> Self {
        Self {
            cell,
            buckets: HashMap::new(),
        }
    }

    fn key(&self, p: &Point3) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    fn insert(&mut self, p: &Point3, id: usize) {
        let key = self.key(p);
        self.buckets.entry(key).or_default().push(id);
    }

    /// Ids registered in the 3x3 block of cells around `p`.
    fn near(&self, p: &Point3) -> impl Iterator<Item = usize> + '_ {
        let (kx, ky) = self.key(p);
        (-1..=1)
            .flat_map(move |dy| (-1..=1).map(move |dx| (kx + dx, ky + dy)))
            .filter_map(|key| self.buckets.get(&key))
            .flatten()
            .copied()
    }
}

/// Join break segments end to end into polylines.
fn chain_breaks(segments: Vec<(Point3, Point3)>, min_length: f64) -> Vec<Vec<Point3>> {
    let eps = Tolerance::DEFAULT.linear;
    let mut ends = EndpointGrid::new(eps);
    for (i, (a, b)) in segments.iter().enumerate() {
        ends.insert(a, i);
        ends.insert(b, i);
    }
    let mut used = vec![false; segments.len()];

    // Lowest unused segment touching `at`, with its far endpoint.
    let attach = |at: &Point3, used: &[bool]| -> Option<(usize, Point3)> {
        ends.near(at)
            .filter(|&i| !used[i])
            .filter_map(|i| {
                let (a, b) = segments[i];
                if planar_distance(&a, at) < eps {
                    Some((i, b))
                } else if planar_distance(&b, at) < eps {
                    Some((i, a))
                } else {
                    None
                }
            })
            .min_by_key(|&(i, _)| i)
    };

    let mut chains: Vec<Vec<Point3>> = Vec::new();
    for first in 0..segments.len() {
        if used[first] {
            continue;
        }
        used[first] = true;
        let (start, end) = segments[first];
        let mut chain = VecDeque::from([start, end]);

        while let Some((i, next)) = chain.back().and_then(|tail| attach(tail, &used)) {
            used[i] = true;
            chain.push_back(next);
        }
        while let Some((i, next)) = chain.front().and_then(|head| attach(head, &used)) {
            used[i] = true;
            chain.push_front(next);
        }

        let chain: Vec<Point3> = chain.into();
        let length: f64 = chain.windows(2).map(|w| planar_distance(&w[0], &w[1])).sum();
        if length >= min_length {
            chains.push(chain);
        }
    }
    chains
}

/// Group same-class triangles into regions and walk their boundaries.
fn collect_regions<S: Surface + ?Sized>(
    surface: &S,
    triangles: &[[PointId; 3]],
    classes: &[Option<bool>],
) -> Vec<ViewshedPolygon> {
    let mut owner: HashMap<(PointId, PointId), usize> = HashMap::with_capacity(triangles.len() * 3);
    for (t, tri) in triangles.iter().enumerate() {
        for i in 0..3 {
            owner.insert((tri[i], tri[(i + 1) % 3]), t);
        }
    }

    let mut region_of: Vec<Option<usize>> = vec![None; triangles.len()];
    let mut members: Vec<Vec<usize>> = Vec::new();
    for seed in 0..triangles.len() {
        if classes[seed].is_none() || region_of[seed].is_some() {
            continue;
        }
        let region = members.len();
        let mut stack = vec![seed];
        let mut list = Vec::new();
        region_of[seed] = Some(region);
        while let Some(t) = stack.pop() {
            list.push(t);
            let tri = triangles[t];
            for i in 0..3 {
                let Some(&n) = owner.get(&(tri[(i + 1) % 3], tri[i])) else {
                    continue;
                };
                if region_of[n].is_none() && classes[n] == classes[seed] {
                    region_of[n] = Some(region);
                    stack.push(n);
                }
            }
        }
        members.push(list);
    }

    let hull = hull_edges(surface, &owner);
    let mut regions: Vec<(bool, usize, Vec<(PointId, PointId)>)> = members
        .iter()
        .enumerate()
        .map(|(region, list)| {
            let mut boundary = Vec::new();
            for &t in list {
                let tri = triangles[t];
                for i in 0..3 {
                    let (u, v) = (tri[i], tri[(i + 1) % 3]);
                    let twin = owner.get(&(v, u)).and_then(|&n| region_of[n]);
                    if twin != Some(region) {
                        boundary.push((u, v));
                    }
                }
            }
            boundary.sort_unstable();
            let on_hull = boundary.iter().any(|e| hull.contains(e));
            (on_hull, region, boundary)
        })
        .collect();
    regions.sort_by_key(|&(on_hull, region, _)| (!on_hull, region));

    let mut polygons = Vec::new();
    for (order, (_, region, boundary)) in regions.into_iter().enumerate() {
        let Some(visible) = classes[members[region][0]] else {
            continue;
        };
        let mut rings: Vec<ViewshedPolygon> = boundary_rings(surface, &boundary)
            .into_iter()
            .map(|ids| ViewshedPolygon {
                ring: ids.into_iter().map(|id| surface.point(id)).collect(),
                visibility: Visibility::from_flag(visible),
                region: order,
            })
            .collect();
        rings.sort_by(|a, b| b.signed_area().abs().total_cmp(&a.signed_area().abs()));
        polygons.extend(rings);
    }
    polygons
}

/// Directed hull edges, counter-clockwise, one ring at a time. Edges with
/// no twin in `owner` seed further rings, so every fan of a pinched hull is
/// covered.
fn hull_edges<S: Surface + ?Sized>(
    surface: &S,
    owner: &HashMap<(PointId, PointId), usize>,
) -> HashSet<(PointId, PointId)> {
    let mut seeds: Vec<(PointId, PointId)> = owner
        .keys()
        .copied()
        .filter(|&(u, v)| !owner.contains_key(&(v, u)))
        .collect();
    seeds.sort_unstable();

    let mut edges = HashSet::with_capacity(seeds.len());
    for start in surface.hull_start().into_iter().chain(seeds) {
        if !edges.insert(start) {
            continue;
        }
        let (mut from, mut to) = start;
        for _ in 0..owner.len() {
            let Some(next) = surface.hull_next(from, to) else {
                break;
            };
            if !edges.insert((to, next)) {
                break;
            }
            from = to;
            to = next;
        }
    }
    edges
}

/// Close directed boundary edges into rings. At a vertex with several
/// outgoing edges the walk takes the first one clockwise from the edge it
/// arrived on, which keeps rings that touch at a point separate.
fn boundary_rings<S: Surface + ?Sized>(
    surface: &S,
    edges: &[(PointId, PointId)],
) -> Vec<Vec<PointId>> {
    let mut outgoing: HashMap<PointId, Vec<PointId>> = HashMap::new();
    for &(u, v) in edges {
        outgoing.entry(u).or_default().push(v);
    }

    let successor = |u: PointId, v: PointId| -> Option<PointId> {
        let (pu, pv) = (surface.point(u), surface.point(v));
        let back = (pu.y - pv.y).atan2(pu.x - pv.x);
        outgoing.get(&v)?.iter().copied().min_by(|&a, &b| {
            let turn = |w: PointId| {
                let pw = surface.point(w);
                let cw = (back - (pw.y - pv.y).atan2(pw.x - pv.x)).rem_euclid(TAU);
                if cw == 0.0 {
                    TAU
                } else {
                    cw
                }
            };
            turn(a).total_cmp(&turn(b))
        })
    };

    let mut used: HashSet<(PointId, PointId)> = HashSet::with_capacity(edges.len());
    let mut rings = Vec::new();
    for &(u0, v0) in edges {
        if !used.insert((u0, v0)) {
            continue;
        }
        let mut ring = vec![u0];
        let (mut u, mut v) = (u0, v0);
        let closed = loop {
            ring.push(v);
            let Some(w) = successor(u, v) else {
                break false;
            };
            if (v, w) == (u0, v0) {
                break true;
            }
            if !used.insert((v, w)) {
                break false;
            }
            (u, v) = (v, w);
        };
        if closed && ring.len() >= 4 {
            rings.push(ring);
        } else {
            debug!("dropping open boundary walk from point {}", u0);
        }
    }
    rings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizon::tests::make_mesa_tin;
    use terravis_tin::Tin;

    /// Crest at x = 20, a valley at x = 40, then a long climb that rises
    /// back above the sight line from behind the crest.
    fn make_valley_tin() -> Tin {
        Tin::from_grid(11, 11, 10.0, |x, _| {
            if x <= 20.0 {
                x / 4.0
            } else if x <= 40.0 {
                5.0 - (x - 20.0) / 4.0
            } else {
                (x - 40.0) / 2.0
            }
        })
        .unwrap()
    }

    fn total_area(polygons: &[ViewshedPolygon]) -> f64 {
        polygons.iter().map(|p| p.signed_area()).sum()
    }

    fn area_of(polygons: &[ViewshedPolygon], tag: Visibility) -> f64 {
        polygons
            .iter()
            .filter(|p| p.visibility == tag)
            .map(|p| p.signed_area())
            .sum()
    }

    #[test]
    fn test_mesa_regions() {
        let tin = make_mesa_tin();
        let eye = Point3::new(0.0, 0.0, 11.0);
        let mut emitted = 0;
        let mut sink = |_: Visibility, ring: &[Point3]| {
            assert_eq!(ring.first(), ring.last());
            emitted += 1;
        };
        let polygons = region_viewshed(&tin, &eye, &VisibilitySettings::default(), &mut sink).unwrap();
        assert_eq!(emitted, polygons.len());

        // Hidden annulus with the visible top as its hole.
        assert_eq!(polygons.len(), 3);
        assert_eq!(polygons[0].visibility, Visibility::Invisible);
        assert!(!polygons[0].is_hole());
        assert!(polygons[1].is_hole());
        assert_eq!(polygons[1].region, 0);
        assert_eq!(polygons[2].visibility, Visibility::Visible);

        let n = 64.0;
        let ngon = |r: f64| 0.5 * n * r * r * (TAU / n).sin();
        assert!((total_area(&polygons) - ngon(60.0)).abs() < 1e-6);
        assert!((area_of(&polygons, Visibility::Visible) - ngon(20.0)).abs() < 1e-6);
    }

    #[test]
    fn test_break_line_inserted() {
        let tin = make_valley_tin();
        let eye = Point3::new(5.0, 55.0, 3.0);
        let mut sink = |_: Visibility, _: &[Point3]| {};
        let polygons = region_viewshed(&tin, &eye, &VisibilitySettings::default(), &mut sink).unwrap();

        assert!((total_area(&polygons) - 10_000.0).abs() < 1e-6);
        assert!(polygons.iter().all(|p| !p.is_hole()));
        let regions: BTreeSet<usize> = polygons.iter().map(|p| p.region).collect();
        assert_eq!(regions.len(), 3);

        // Sight line over the crest meets the far slope at x = 670 / 11.
        let hidden = area_of(&polygons, Visibility::Invisible);
        assert!((hidden - (670.0 / 11.0 - 20.0) * 100.0).abs() < 0.5, "hidden area {hidden}");
        // The input surface is left alone.
        assert_eq!(tin.triangle_count(), 200);
    }

    #[test]
    fn test_void_triangles_left_out() {
        let mut tin = make_valley_tin();
        tin.set_void(0, true).unwrap();
        tin.set_void(1, true).unwrap();
        let eye = Point3::new(5.0, 55.0, 3.0);
        let mut sink = |_: Visibility, _: &[Point3]| {};
        let polygons = region_viewshed(&tin, &eye, &VisibilitySettings::default(), &mut sink).unwrap();
        assert!((total_area(&polygons) - 9_900.0).abs() < 1e-6);
    }

    #[test]
    fn test_hull_edges_cover_pinched_hull() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(-2.0, 1.0, 0.0),
            Point3::new(-2.0, -1.0, 0.0),
            Point3::new(2.0, -1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        ];
        let tin = Tin::new(points, vec![[0, 1, 2], [0, 3, 4]]).unwrap();
        let mut owner = HashMap::new();
        for (t, tri) in tin.triangles().iter().enumerate() {
            for i in 0..3 {
                owner.insert((tri[i], tri[(i + 1) % 3]), t);
            }
        }
        let hull = hull_edges(&tin, &owner);
        assert_eq!(hull.len(), 6);
        assert!(hull.contains(&(0, 3)) && hull.contains(&(4, 0)));
    }

    #[test]
    fn test_endpoint_grid_matches_across_cells() {
        let mut grid = EndpointGrid::new(1e-6);
        grid.insert(&Point3::new(1.0 - 1e-7, 2.0, 0.0), 7);
        let near: Vec<usize> = grid.near(&Point3::new(1.0 + 1e-7, 2.0, 0.0)).collect();
        assert_eq!(near, vec![7]);
        assert_eq!(grid.near(&Point3::new(1.0, 2.1, 0.0)).count(), 0);
    }

    #[test]
    fn test_chain_breaks() {
        let p = |x: f64, y: f64| Point3::new(x, y, 0.0);
        let chains = chain_breaks(
            vec![
                (p(1.0, 0.0), p(2.0, 0.0)),
                (p(5.0, 5.0), p(6.0, 5.0)),
                (p(0.0, 0.0), p(1.0, 0.0)),
                (p(3.0, 0.0), p(2.0, 0.0)),
                (p(9.0, 9.0), p(9.0, 9.0 + 1e-9)),
            ],
            1e-6,
        );
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].len(), 4);
        assert_eq!(chains[0].first().unwrap().x, 0.0);
        assert_eq!(chains[0].last().unwrap().x, 3.0);
    }

    #[test]
    fn test_angular_extent_wraps() {
        let eye = Point3::new(0.0, 0.0, 0.0);
        let tri = [
            Point3::new(5.0, -1.0, 0.0),
            Point3::new(6.0, 1.0, 0.0),
            Point3::new(5.0, 1.0, 0.0),
        ];
        let ranges = angular_extent(&eye, &tri);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].1, TAU);
        assert_eq!(ranges[1].0, 0.0);
    }
}
