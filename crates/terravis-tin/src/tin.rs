//! In-memory triangulated irregular network.

use std::collections::{HashMap, HashSet};

use log::debug;
use terravis_math::{orient2d, segment_intersection, Bounds2, Plane, Point3, Tolerance};

use crate::accel::{triangle_bbox, TriangleGrid};
use crate::error::{Result, TinError};
use crate::surface::{DrapeKind, DrapePoint, Location, PointId, Surface};

/// Normalised key for an undirected edge.
pub(crate) fn edge_key(a: PointId, b: PointId) -> (PointId, PointId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Barycentric containment test in plan, tolerant of points on edges.
fn contains_xy(v: [&Point3; 3], x: f64, y: f64) -> bool {
    let (v0, v1, v2) = (v[0], v[1], v[2]);

    let d00 = (v1.x - v0.x) * (v1.x - v0.x) + (v1.y - v0.y) * (v1.y - v0.y);
    let d01 = (v1.x - v0.x) * (v2.x - v0.x) + (v1.y - v0.y) * (v2.y - v0.y);
    let d11 = (v2.x - v0.x) * (v2.x - v0.x) + (v2.y - v0.y) * (v2.y - v0.y);
    let d20 = (x - v0.x) * (v1.x - v0.x) + (y - v0.y) * (v1.y - v0.y);
    let d21 = (x - v0.x) * (v2.x - v0.x) + (y - v0.y) * (v2.y - v0.y);

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < f64::MIN_POSITIVE {
        return false;
    }

    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;

    let eps = -1e-8;
    u >= eps && v >= eps && w >= eps
}

/// A triangulated surface held in memory.
///
/// Triangles are stored counter-clockwise. A directed-edge map gives the
/// triangle on the left of every edge, which answers the clockwise and
/// counter-clockwise neighbour queries in constant time.
#[derive(Debug, Clone)]
pub struct Tin {
    pub(crate) points: Vec<Point3>,
    pub(crate) triangles: Vec<[PointId; 3]>,
    pub(crate) void: Vec<bool>,
    pub(crate) edge_map: HashMap<(PointId, PointId), usize>,
    pub(crate) constrained: HashSet<(PointId, PointId)>,
    pub(crate) grid: TriangleGrid,
    pub(crate) tolerance: Tolerance,
    revision: u64,
}

impl Tin {
    /// Build a TIN from points and triangle vertex indices.
    ///
    /// Clockwise triangles are reoriented. Degenerate triangles and edges
    /// used twice in the same direction are rejected.
    pub fn new(points: Vec<Point3>, triangles: Vec<[PointId; 3]>) -> Result<Self> {
        if triangles.is_empty() {
            return Err(TinError::Empty);
        }

        let count = points.len();
        let mut oriented = Vec::with_capacity(triangles.len());
        for (i, t) in triangles.iter().enumerate() {
            if let Some(&point) = t.iter().find(|&&p| p >= count) {
                return Err(TinError::IndexOutOfRange {
                    triangle: i,
                    point,
                    count,
                });
            }
            if t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
                return Err(TinError::DegenerateTriangle(i));
            }
            let o = orient2d(&points[t[0]], &points[t[1]], &points[t[2]]);
            if o == 0.0 {
                return Err(TinError::DegenerateTriangle(i));
            }
            oriented.push(if o > 0.0 { *t } else { [t[0], t[2], t[1]] });
        }

        let mut edge_map = HashMap::with_capacity(oriented.len() * 3);
        for (i, t) in oriented.iter().enumerate() {
            for k in 0..3 {
                let e = (t[k], t[(k + 1) % 3]);
                if edge_map.insert(e, i).is_some() {
                    return Err(TinError::NonManifoldEdge(e.0, e.1));
                }
            }
        }

        let grid = TriangleGrid::new(&points, &oriented);
        let void = vec![false; oriented.len()];
        let tin = Self {
            points,
            triangles: oriented,
            void,
            edge_map,
            constrained: HashSet::new(),
            grid,
            tolerance: Tolerance::DEFAULT,
            revision: 0,
        };
        debug!(
            "built tin with {} points and {} triangles",
            tin.points.len(),
            tin.triangles.len()
        );
        Ok(tin)
    }

    /// Build a regular grid TIN of `nx` by `ny` points with elevations from
    /// `f(x, y)`. Each cell is split along its rising diagonal.
    pub fn from_grid(
        nx: usize,
        ny: usize,
        spacing: f64,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self> {
        let mut points = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                let x = i as f64 * spacing;
                let y = j as f64 * spacing;
                points.push(Point3::new(x, y, f(x, y)));
            }
        }
        let mut triangles = Vec::new();
        for j in 0..ny.saturating_sub(1) {
            for i in 0..nx.saturating_sub(1) {
                let a = j * nx + i;
                let b = a + 1;
                let c = a + nx + 1;
                let d = a + nx;
                triangles.push([a, b, c]);
                triangles.push([a, c, d]);
            }
        }
        Self::new(points, triangles)
    }

    /// All points.
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// Number of triangles, void ones included.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Vertices of triangle `idx`, counter-clockwise.
    pub fn triangle(&self, idx: usize) -> [PointId; 3] {
        self.triangles[idx]
    }

    /// Whether triangle `idx` is void.
    pub fn is_void(&self, idx: usize) -> bool {
        self.void[idx]
    }

    /// Mark triangle `idx` as void (or clear the flag).
    pub fn set_void(&mut self, idx: usize, void: bool) -> Result<()> {
        let count = self.triangles.len();
        let flag = self
            .void
            .get_mut(idx)
            .ok_or(TinError::IndexOutOfRange {
                triangle: idx,
                point: idx,
                count,
            })?;
        *flag = void;
        self.touch();
        Ok(())
    }

    /// Whether the undirected edge `a-b` is constrained.
    pub fn is_constrained(&self, a: PointId, b: PointId) -> bool {
        self.constrained.contains(&edge_key(a, b))
    }

    /// Whether the undirected edge `a-b` exists.
    pub fn has_edge(&self, a: PointId, b: PointId) -> bool {
        self.edge_map.contains_key(&(a, b)) || self.edge_map.contains_key(&(b, a))
    }

    /// Tolerances used for snapping during insertion.
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    pub(crate) fn third_vertex(&self, t: usize, a: PointId, b: PointId) -> PointId {
        let v = self.triangles[t];
        if v[0] != a && v[0] != b {
            v[0]
        } else if v[1] != a && v[1] != b {
            v[1]
        } else {
            v[2]
        }
    }

    /// Containing triangle, preferring non-void triangles on shared edges.
    pub(crate) fn locate_triangle(&self, x: f64, y: f64) -> Option<usize> {
        let mut void_hit = None;
        for &t in self.grid.query_point(x, y) {
            let v = self.triangles[t];
            if contains_xy([&self.points[v[0]], &self.points[v[1]], &self.points[v[2]]], x, y) {
                if !self.void[t] {
                    return Some(t);
                }
                void_hit.get_or_insert(t);
            }
        }
        void_hit
    }

    pub(crate) fn plane_of(&self, t: usize) -> Plane {
        let v = self.triangles[t];
        Plane::through(&self.points[v[0]], &self.points[v[1]], &self.points[v[2]])
    }

    fn unregister(&mut self, t: usize) {
        let v = self.triangles[t];
        for k in 0..3 {
            let e = (v[k], v[(k + 1) % 3]);
            if self.edge_map.get(&e) == Some(&t) {
                self.edge_map.remove(&e);
            }
        }
    }

    fn register(&mut self, t: usize) {
        let v = self.triangles[t];
        for k in 0..3 {
            self.edge_map.insert((v[k], v[(k + 1) % 3]), t);
        }
        let bbox = triangle_bbox([&self.points[v[0]], &self.points[v[1]], &self.points[v[2]]]);
        self.grid.insert(t, bbox);
    }

    pub(crate) fn replace_triangle(&mut self, t: usize, vertices: [PointId; 3]) {
        self.unregister(t);
        self.triangles[t] = vertices;
        self.register(t);
    }

    pub(crate) fn push_triangle(&mut self, vertices: [PointId; 3], void: bool) -> usize {
        let t = self.triangles.len();
        self.triangles.push(vertices);
        self.void.push(void);
        self.register(t);
        t
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    /// Whether `a -> b` is a boundary edge with the surface on its left.
    fn is_hull_edge(&self, a: PointId, b: PointId) -> bool {
        self.edge_map.contains_key(&(a, b)) && !self.edge_map.contains_key(&(b, a))
    }

    fn drape_sample(&self, p: &Point3) -> DrapePoint {
        match self.locate(p.x, p.y) {
            Location::Triangle { z, .. } => DrapePoint {
                point: Point3::new(p.x, p.y, z),
                kind: DrapeKind::Surface,
            },
            Location::Void => DrapePoint {
                point: *p,
                kind: DrapeKind::Void,
            },
            Location::Outside => DrapePoint {
                point: *p,
                kind: DrapeKind::External,
            },
        }
    }
}

impl Surface for Tin {
    fn point_count(&self) -> usize {
        self.points.len()
    }

    fn point(&self, id: PointId) -> Point3 {
        self.points[id]
    }

    fn edges(&self) -> Vec<(PointId, PointId)> {
        let mut seen = HashSet::with_capacity(self.triangles.len() * 2);
        let mut edges = Vec::with_capacity(self.triangles.len() * 2);
        for v in &self.triangles {
            for k in 0..3 {
                let e = edge_key(v[k], v[(k + 1) % 3]);
                if seen.insert(e) {
                    edges.push(e);
                }
            }
        }
        edges
    }

    fn triangles(&self) -> Vec<[PointId; 3]> {
        self.triangles.clone()
    }

    fn next_clockwise(&self, p1: PointId, p2: PointId) -> Option<PointId> {
        self.edge_map
            .get(&(p2, p1))
            .map(|&t| self.third_vertex(t, p1, p2))
    }

    fn next_counter_clockwise(&self, p1: PointId, p2: PointId) -> Option<PointId> {
        self.edge_map
            .get(&(p1, p2))
            .map(|&t| self.third_vertex(t, p1, p2))
    }

    fn is_void_edge(&self, p1: PointId, p2: PointId) -> bool {
        let left = self.edge_map.get(&(p1, p2));
        let right = self.edge_map.get(&(p2, p1));
        if left.is_none() && right.is_none() {
            return false;
        }
        left.map_or(true, |&t| self.void[t]) && right.map_or(true, |&t| self.void[t])
    }

    fn is_void_triangle(&self, p1: PointId, p2: PointId, p3: PointId) -> bool {
        [(p1, p2), (p2, p1)].iter().any(|e| {
            self.edge_map
                .get(e)
                .is_some_and(|&t| self.third_vertex(t, e.0, e.1) == p3 && self.void[t])
        })
    }

    fn hull_start(&self) -> Option<(PointId, PointId)> {
        self.edge_map
            .keys()
            .copied()
            .filter(|&(a, b)| self.is_hull_edge(a, b))
            .min_by(|&(a, b), &(c, d)| {
                let (pa, pc) = (&self.points[a], &self.points[c]);
                pa.x.total_cmp(&pc.x)
                    .then(pa.y.total_cmp(&pc.y))
                    .then(a.cmp(&c))
                    .then(b.cmp(&d))
            })
    }

    fn hull_next(&self, from: PointId, to: PointId) -> Option<PointId> {
        if !self.is_hull_edge(from, to) {
            return None;
        }
        // Rotate clockwise around `to` through the fan of `from -> to` until
        // the outgoing edge has no twin.
        let mut t = *self.edge_map.get(&(from, to))?;
        let mut prev = from;
        for _ in 0..self.triangles.len() {
            let c = self.third_vertex(t, prev, to);
            match self.edge_map.get(&(c, to)) {
                Some(&n) => {
                    t = n;
                    prev = c;
                }
                None => return Some(c),
            }
        }
        None
    }

    fn locate(&self, x: f64, y: f64) -> Location {
        match self.locate_triangle(x, y) {
            Some(t) if !self.void[t] => Location::Triangle {
                vertices: self.triangles[t],
                z: self.plane_of(t).z_at(x, y),
            },
            Some(_) => Location::Void,
            None => Location::Outside,
        }
    }

    fn drape_polyline(&self, path: &[Point3]) -> Vec<DrapePoint> {
        let mut out = Vec::new();
        if let [single] = path {
            out.push(self.drape_sample(single));
            return out;
        }

        for (k, w) in path.windows(2).enumerate() {
            let (a, b) = (&w[0], &w[1]);
            let mut params = vec![0.0, 1.0];
            for t in self.grid.query_segment(a, b) {
                let v = self.triangles[t];
                for e in 0..3 {
                    let p = &self.points[v[e]];
                    let q = &self.points[v[(e + 1) % 3]];
                    if let Some((s, _)) = segment_intersection(a, b, p, q) {
                        params.push(s);
                    }
                }
            }
            params.sort_by(|x, y| x.total_cmp(y));
            params.dedup_by(|x, y| (*x - *y).abs() < 1e-12);

            for (i, s) in params.iter().enumerate() {
                // Interior path vertices are shared by consecutive legs.
                if k > 0 && i == 0 {
                    continue;
                }
                out.push(self.drape_sample(&(a + (b - a) * *s)));
            }
        }
        out
    }

    fn insert_constrained_segment(&mut self, a: &Point3, b: &Point3) -> Result<()> {
        // A failed insertion may already have split triangles.
        let inserted = self.insert_constraint(a, b);
        self.touch();
        inserted
    }

    fn retriangulate(&mut self) -> Result<()> {
        let flips = self.flip_coplanar_edges();
        debug!("retriangulation flipped {} edges", flips);
        self.grid = TriangleGrid::new(&self.points, &self.triangles);
        self.touch();
        Ok(())
    }

    fn bounds(&self) -> Option<Bounds2> {
        Bounds2::from_points(&self.points)
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_square_tin() -> Tin {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(10.0, 10.0, 10.0),
            Point3::new(0.0, 10.0, 0.0),
        ];
        // Second triangle given clockwise on purpose.
        Tin::new(points, vec![[0, 1, 2], [0, 3, 2]]).unwrap()
    }

    #[test]
    fn test_rejects_bad_input() {
        let pts = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];
        assert_eq!(Tin::new(pts.clone(), vec![]).unwrap_err(), TinError::Empty);
        assert!(matches!(
            Tin::new(pts.clone(), vec![[0, 1, 9]]),
            Err(TinError::IndexOutOfRange { point: 9, .. })
        ));
        assert_eq!(
            Tin::new(pts.clone(), vec![[0, 1, 3]]).unwrap_err(),
            TinError::DegenerateTriangle(0)
        );
        assert!(matches!(
            Tin::new(pts, vec![[0, 1, 2], [0, 1, 2]]),
            Err(TinError::NonManifoldEdge(..))
        ));
    }

    #[test]
    fn test_neighbour_queries() {
        let tin = make_square_tin();
        // Diagonal 0-2: triangle [0,1,2] lies to its right, [0,2,3] to its left.
        assert_eq!(tin.next_counter_clockwise(0, 2), Some(3));
        assert_eq!(tin.next_clockwise(0, 2), Some(1));
        // Hull edge 0-1 has no triangle on its right.
        assert_eq!(tin.next_counter_clockwise(0, 1), Some(2));
        assert_eq!(tin.next_clockwise(0, 1), None);
        assert_eq!(tin.edges().len(), 5);
    }

    fn walk_hull(tin: &Tin) -> Vec<PointId> {
        let (start, mut to) = tin.hull_start().unwrap();
        let mut from = start;
        let mut walk = vec![start];
        while to != start {
            walk.push(to);
            let next = tin.hull_next(from, to).unwrap();
            from = to;
            to = next;
            assert!(walk.len() <= tin.point_count());
        }
        walk
    }

    #[test]
    fn test_hull_walk() {
        let tin = make_square_tin();
        assert_eq!(tin.hull_start(), Some((0, 1)));
        assert_eq!(walk_hull(&tin), vec![0, 1, 2, 3]);
        // Interior edges are not on the hull.
        assert_eq!(tin.hull_next(0, 2), None);
    }

    #[test]
    fn test_hull_walk_through_pinch_vertex() {
        // Two triangles touching only at the origin.
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(-2.0, 1.0, 0.0),
            Point3::new(-2.0, -1.0, 0.0),
            Point3::new(2.0, -1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        ];
        let tin = Tin::new(points, vec![[0, 1, 2], [0, 3, 4]]).unwrap();
        assert_eq!(tin.hull_start(), Some((2, 0)));
        // Both fans leave the origin; each edge continues on its own fan.
        assert_eq!(tin.hull_next(2, 0), Some(1));
        assert_eq!(tin.hull_next(4, 0), Some(3));
        assert_eq!(walk_hull(&tin), vec![2, 0, 1]);
    }

    #[test]
    fn test_locate_and_void() {
        let mut tin = make_square_tin();
        let loc = tin.locate(8.0, 2.0);
        assert_relative_eq!(loc.elevation().unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(tin.locate(20.0, 5.0), Location::Outside);

        tin.set_void(1, true).unwrap();
        assert_eq!(tin.locate(2.0, 8.0), Location::Void);
        assert!(tin.is_void_triangle(0, 2, 3));
        assert!(!tin.is_void_edge(0, 2));
        assert!(tin.is_void_edge(2, 3));
        assert_eq!(tin.revision(), 1);
    }

    #[test]
    fn test_drape_crosses_diagonal() {
        let tin = make_square_tin();
        let path = [Point3::new(2.0, 5.0, 0.0), Point3::new(8.0, 5.0, 0.0)];
        let drape = tin.drape_polyline(&path);
        assert_eq!(drape.len(), 3);
        assert!(drape.iter().all(|d| d.kind == DrapeKind::Surface));
        assert_relative_eq!(drape[1].point.x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(drape[1].point.z, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_drape_leaves_surface() {
        let tin = make_square_tin();
        let path = [Point3::new(5.0, 2.0, 0.0), Point3::new(15.0, 2.0, 0.0)];
        let drape = tin.drape_polyline(&path);
        assert_eq!(drape.first().unwrap().kind, DrapeKind::Surface);
        assert_eq!(drape.last().unwrap().kind, DrapeKind::External);
    }

    #[test]
    fn test_from_grid() {
        let tin = Tin::from_grid(4, 3, 2.0, |x, y| x + y).unwrap();
        assert_eq!(tin.point_count(), 12);
        assert_eq!(tin.triangle_count(), 12);
        let b = tin.bounds().unwrap();
        assert_relative_eq!(b.width(), 6.0);
        assert_relative_eq!(b.height(), 4.0);
    }
}
