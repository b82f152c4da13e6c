//! Constrained segment insertion and shape-preserving retriangulation.
//!
//! Segments are forced into the triangulation by splitting every edge they
//! cross, so the surface keeps its exact shape. Retriangulation afterwards
//! only flips edges between coplanar triangles.

use log::trace;
use terravis_math::{line_intersection, orient2d, planar_distance, signed_plane_distance, Point3};

use crate::error::{Result, TinError};
use crate::surface::PointId;
use crate::tin::{edge_key, Tin};

/// Coplanarity threshold for edge flips.
const FLIP_PLANE_TOLERANCE: f64 = 1e-9;

/// Where a segment leaving a vertex first meets the triangulation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Crossing {
    /// The segment passes through this vertex.
    Vertex(PointId),
    /// The segment crosses edge `p-q` at parameter `t` along it.
    Edge(PointId, PointId, f64),
}

/// Positive when `d` lies inside the circumcircle of counter-clockwise `a, b, c`.
fn in_circle(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> f64 {
    let (adx, ady) = (a.x - d.x, a.y - d.y);
    let (bdx, bdy) = (b.x - d.x, b.y - d.y);
    let (cdx, cdy) = (c.x - d.x, c.y - d.y);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    adx * (bdy * cd - bd * cdy) - ady * (bdx * cd - bd * cdx) + ad * (bdx * cdy - bdy * cdx)
}

impl Tin {
    /// Insert a point on the surface and return its vertex id.
    ///
    /// Points within the linear tolerance of an existing vertex snap to it.
    /// Points on an edge split that edge; anything else splits the containing
    /// triangle. The new vertex takes its elevation from the surface.
    pub fn insert_point(&mut self, p: &Point3) -> Result<PointId> {
        let count = self.points.len();
        let id = self.insert_vertex(p)?;
        if self.points.len() > count {
            self.touch();
        }
        Ok(id)
    }

    fn insert_vertex(&mut self, p: &Point3) -> Result<PointId> {
        let t = self
            .locate_triangle(p.x, p.y)
            .ok_or(TinError::OutsideSurface(p.x, p.y))?;
        let v = self.triangles[t];
        let snap = self.tolerance.linear;

        if let Some(&id) = v
            .iter()
            .find(|&&id| planar_distance(&self.points[id], p) < snap)
        {
            return Ok(id);
        }

        for k in 0..3 {
            let (a, b) = (v[k], v[(k + 1) % 3]);
            let (pa, pb) = (self.points[a], self.points[b]);
            let len = planar_distance(&pa, &pb);
            if orient2d(&pa, &pb, p).abs() / len < snap {
                let s = ((p.x - pa.x) * (pb.x - pa.x) + (p.y - pa.y) * (pb.y - pa.y)) / (len * len);
                return Ok(self.split_edge(a, b, pa + (pb - pa) * s));
            }
        }

        let z = self.plane_of(t).z_at(p.x, p.y);
        Ok(self.split_triangle(t, Point3::new(p.x, p.y, z)))
    }

    /// Split edge `a-b` at `q`, replacing each adjacent triangle by two.
    pub(crate) fn split_edge(&mut self, a: PointId, b: PointId, q: Point3) -> PointId {
        let w = self.points.len();
        self.points.push(q);

        if let Some(&t1) = self.edge_map.get(&(a, b)) {
            let c = self.third_vertex(t1, a, b);
            let void = self.void[t1];
            self.replace_triangle(t1, [a, w, c]);
            self.push_triangle([w, b, c], void);
        }
        if let Some(&t2) = self.edge_map.get(&(b, a)) {
            let d = self.third_vertex(t2, a, b);
            let void = self.void[t2];
            self.replace_triangle(t2, [b, w, d]);
            self.push_triangle([w, a, d], void);
        }
        if self.constrained.remove(&edge_key(a, b)) {
            self.constrained.insert(edge_key(a, w));
            self.constrained.insert(edge_key(w, b));
        }
        trace!("split edge {}-{} at vertex {}", a, b, w);
        w
    }

    /// Split triangle `t` into three around `q`.
    pub(crate) fn split_triangle(&mut self, t: usize, q: Point3) -> PointId {
        let w = self.points.len();
        self.points.push(q);
        let [a, b, c] = self.triangles[t];
        let void = self.void[t];
        self.replace_triangle(t, [a, b, w]);
        self.push_triangle([b, c, w], void);
        self.push_triangle([c, a, w], void);
        trace!("split triangle {} at vertex {}", t, w);
        w
    }

    /// Insert both endpoints and constrain the segment between them.
    pub(crate) fn insert_constraint(&mut self, a: &Point3, b: &Point3) -> Result<()> {
        let va = self.insert_vertex(a)?;
        let vb = self.insert_vertex(b)?;
        self.insert_segment(va, vb)
    }

    /// Make `u-v` a chain of constrained edges.
    pub(crate) fn insert_segment(&mut self, u: PointId, v: PointId) -> Result<()> {
        let mut pending = vec![(u, v)];
        let limit = 4 * self.triangles.len() + 64;
        let mut steps = 0usize;

        while let Some((u, v)) = pending.pop() {
            if u == v {
                continue;
            }
            steps += 1;
            if steps > limit {
                return Err(TinError::InsertionFailed(format!(
                    "segment {u}-{v} did not converge"
                )));
            }
            if self.has_edge(u, v) {
                self.constrained.insert(edge_key(u, v));
                continue;
            }
            match self.next_crossing(u, v) {
                Some(Crossing::Vertex(w)) => {
                    pending.push((w, v));
                    pending.push((u, w));
                }
                Some(Crossing::Edge(p, q, s)) => {
                    let (pp, pq) = (self.points[p], self.points[q]);
                    let w = self.split_edge(p, q, pp + (pq - pp) * s);
                    pending.push((w, v));
                    pending.push((u, w));
                }
                None => {
                    return Err(TinError::InsertionFailed(format!(
                        "no triangle around vertex {u} faces vertex {v}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn next_crossing(&self, u: PointId, v: PointId) -> Option<Crossing> {
        let pu = self.points[u];
        let pv = self.points[v];
        let len = planar_distance(&pu, &pv);
        let snap = self.tolerance.linear;

        // Every triangle around `u` is registered in the grid cell of `u`.
        for &idx in self.grid.query_point(pu.x, pu.y) {
            let tri = &self.triangles[idx];
            let Some(k) = tri.iter().position(|&x| x == u) else {
                continue;
            };
            let p = tri[(k + 1) % 3];
            let q = tri[(k + 2) % 3];
            let (pp, pq) = (&self.points[p], &self.points[q]);

            for (id, pt) in [(p, pp), (q, pq)] {
                let along = ((pt.x - pu.x) * (pv.x - pu.x) + (pt.y - pu.y) * (pv.y - pu.y))
                    / (len * len);
                if along > 0.0 && along < 1.0 && orient2d(&pu, &pv, pt).abs() / len < snap {
                    return Some(Crossing::Vertex(id));
                }
            }

            if orient2d(&pu, pp, &pv) > 0.0 && orient2d(&pu, pq, &pv) < 0.0 {
                let (_, t) = line_intersection(&pu, &pv, pp, pq)?;
                let edge_len = planar_distance(pp, pq);
                if t * edge_len < snap {
                    return Some(Crossing::Vertex(p));
                }
                if (1.0 - t) * edge_len < snap {
                    return Some(Crossing::Vertex(q));
                }
                return Some(Crossing::Edge(p, q, t));
            }
        }
        None
    }

    /// Flip interior, unconstrained edges between coplanar triangles toward
    /// the Delaunay condition. Returns the number of flips.
    pub(crate) fn flip_coplanar_edges(&mut self) -> usize {
        let mut flips = 0;
        let max_passes = self.triangles.len() + 16;

        for _ in 0..max_passes {
            let mut keys: Vec<(PointId, PointId)> = self
                .edge_map
                .keys()
                .copied()
                .filter(|&(a, b)| a < b && self.edge_map.contains_key(&(b, a)))
                .collect();
            keys.sort_unstable();

            let mut changed = false;
            for (a, b) in keys {
                let (Some(&t1), Some(&t2)) = (self.edge_map.get(&(a, b)), self.edge_map.get(&(b, a)))
                else {
                    continue;
                };
                if self.constrained.contains(&edge_key(a, b)) || self.void[t1] != self.void[t2] {
                    continue;
                }
                let c = self.third_vertex(t1, a, b);
                let d = self.third_vertex(t2, a, b);
                let (pa, pb, pc, pd) = (self.points[a], self.points[b], self.points[c], self.points[d]);

                if orient2d(&pc, &pd, &pa) * orient2d(&pc, &pd, &pb) >= 0.0 {
                    continue;
                }
                let coplanar = signed_plane_distance(&pa, &pb, &pc, &pd)
                    .is_some_and(|dist| dist.abs() < FLIP_PLANE_TOLERANCE);
                if !coplanar || in_circle(&pa, &pb, &pc, &pd) <= 0.0 {
                    continue;
                }

                self.replace_triangle(t1, [a, d, c]);
                self.replace_triangle(t2, [d, b, c]);
                flips += 1;
                changed = true;
            }
            if !changed {
                break;
            }
        }
        flips
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;
    use approx::assert_relative_eq;

    fn make_plane_tin() -> Tin {
        // z = x + 2y over a 4x4 grid of 10 m cells.
        Tin::from_grid(5, 5, 10.0, |x, y| x + 2.0 * y).unwrap()
    }

    fn total_area(tin: &Tin) -> f64 {
        tin.triangles()
            .iter()
            .map(|t| {
                let p = tin.points();
                orient2d(&p[t[0]], &p[t[1]], &p[t[2]]) * 0.5
            })
            .sum()
    }

    #[test]
    fn test_insert_point_snaps_to_vertex() {
        let mut tin = make_plane_tin();
        let before = tin.point_count();
        let id = tin.insert_point(&Point3::new(10.0, 10.0 + 1e-9, 0.0)).unwrap();
        assert_eq!(id, 6);
        assert_eq!(tin.point_count(), before);
        assert_eq!(tin.revision(), 0);
    }

    #[test]
    fn test_insert_point_on_edge_and_inside() {
        let mut tin = make_plane_tin();
        let t0 = tin.triangle_count();
        let e = tin.insert_point(&Point3::new(5.0, 0.0, 0.0)).unwrap();
        // Hull edge: one triangle becomes two.
        assert_eq!(tin.triangle_count(), t0 + 1);
        assert_relative_eq!(tin.point(e).z, 5.0, epsilon = 1e-9);

        let i = tin.insert_point(&Point3::new(17.0, 13.0, 0.0)).unwrap();
        assert_eq!(tin.triangle_count(), t0 + 3);
        assert_relative_eq!(tin.point(i).z, 43.0, epsilon = 1e-9);
        assert_eq!(tin.revision(), 2);

        assert!(matches!(
            tin.insert_point(&Point3::new(-5.0, 0.0, 0.0)),
            Err(TinError::OutsideSurface(..))
        ));
    }

    #[test]
    fn test_constrained_segment_keeps_surface() {
        let mut tin = make_plane_tin();
        let area = total_area(&tin);
        let a = Point3::new(3.0, 4.0, 0.0);
        let b = Point3::new(36.0, 27.0, 0.0);
        tin.insert_constrained_segment(&a, &b).unwrap();

        let va = tin.insert_point(&a).unwrap();
        let vb = tin.insert_point(&b).unwrap();
        assert!(!tin.has_edge(va, vb) || tin.is_constrained(va, vb));
        assert!(tin.constrained.len() > 1);

        for p in tin.points() {
            assert_relative_eq!(p.z, p.x + 2.0 * p.y, epsilon = 1e-6);
        }
        assert_relative_eq!(total_area(&tin), area, epsilon = 1e-6);
        assert_eq!(tin.revision(), 1);
    }

    #[test]
    fn test_many_segments_on_fine_grid() {
        let mut tin = Tin::from_grid(41, 41, 1.0, |x, y| 0.5 * x - 0.25 * y).unwrap();
        let area = total_area(&tin);
        for k in 0..20 {
            let y = 0.7 + 1.9 * k as f64;
            let (a, b) = (Point3::new(0.3, y, 0.0), Point3::new(39.6, y + 0.37, 0.0));
            tin.insert_constrained_segment(&a, &b).unwrap();
        }
        assert_eq!(tin.revision(), 20);
        for &(p, q) in &tin.constrained {
            assert!(tin.has_edge(p, q), "constrained edge {p}-{q} missing");
        }
        for p in tin.points() {
            assert_relative_eq!(p.z, 0.5 * p.x - 0.25 * p.y, epsilon = 1e-6);
        }
        assert_relative_eq!(total_area(&tin), area, epsilon = 1e-6);
    }

    #[test]
    fn test_retriangulate_keeps_constraints() {
        let mut tin = make_plane_tin();
        let a = Point3::new(1.0, 1.0, 0.0);
        let b = Point3::new(39.0, 2.0, 0.0);
        tin.insert_constrained_segment(&a, &b).unwrap();
        let constrained: Vec<_> = tin.constrained.iter().copied().collect();
        let area = total_area(&tin);

        tin.retriangulate().unwrap();

        for (p, q) in constrained {
            assert!(tin.has_edge(p, q), "constrained edge {p}-{q} lost");
        }
        assert_relative_eq!(total_area(&tin), area, epsilon = 1e-6);
        for t in tin.triangles() {
            let p = tin.points();
            assert!(orient2d(&p[t[0]], &p[t[1]], &p[t[2]]) > 0.0);
        }
    }

    #[test]
    fn test_flip_skips_folded_surface() {
        // Two triangles folded along their shared edge must not flip.
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(10.0, 1.0, 5.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let mut tin = Tin::new(points, vec![[0, 1, 2], [0, 2, 3]]).unwrap();
        assert_eq!(tin.flip_coplanar_edges(), 0);
    }

    #[test]
    fn test_in_circle_sign() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        assert!(in_circle(&a, &b, &c, &Point3::new(0.5, 0.5, 0.0)) > 0.0);
        assert!(in_circle(&a, &b, &c, &Point3::new(2.0, 2.0, 0.0)) < 0.0);
    }
}
