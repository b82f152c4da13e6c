//! 2D spatial acceleration for triangle lookup.

use std::collections::HashMap;

use terravis_math::Point3;

/// Uniform grid of cells holding the ids of triangles whose plan bounding
/// box overlaps the cell.
#[derive(Debug, Clone)]
pub struct TriangleGrid {
    cell_size: f64,
    bounds: [f64; 4], // [min_x, min_y, max_x, max_y]
    grid_nx: usize,
    grid_ny: usize,
    cells: HashMap<(usize, usize), Vec<usize>>,
}

/// Plan bounding box of a triangle as `[min_x, min_y, max_x, max_y]`.
pub fn triangle_bbox(v: [&Point3; 3]) -> [f64; 4] {
    [
        v[0].x.min(v[1].x).min(v[2].x),
        v[0].y.min(v[1].y).min(v[2].y),
        v[0].x.max(v[1].x).max(v[2].x),
        v[0].y.max(v[1].y).max(v[2].y),
    ]
}

impl TriangleGrid {
    /// Build a grid over `points` and register every triangle.
    ///
    /// The cell size is chosen so that a cell holds a handful of triangles
    /// on average.
    pub fn new(points: &[Point3], triangles: &[[usize; 3]]) -> Self {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        let area = ((max_x - min_x) * (max_y - min_y)).max(f64::MIN_POSITIVE);
        let mut cell_size = (area / triangles.len().max(1) as f64).sqrt() * 2.0;
        if !cell_size.is_finite() || cell_size <= 0.0 {
            cell_size = 1.0;
        }

        // Add small padding
        let padding = cell_size * 0.1;
        min_x -= padding;
        min_y -= padding;
        max_x += padding;
        max_y += padding;

        let grid_nx = ((max_x - min_x) / cell_size).ceil() as usize + 1;
        let grid_ny = ((max_y - min_y) / cell_size).ceil() as usize + 1;

        let mut grid = Self {
            cell_size,
            bounds: [min_x, min_y, max_x, max_y],
            grid_nx,
            grid_ny,
            cells: HashMap::new(),
        };

        for (idx, t) in triangles.iter().enumerate() {
            grid.insert(idx, triangle_bbox([&points[t[0]], &points[t[1]], &points[t[2]]]));
        }
        grid
    }

    fn cell_of(&self, x: f64, y: f64) -> (isize, isize) {
        (
            ((x - self.bounds[0]) / self.cell_size).floor() as isize,
            ((y - self.bounds[1]) / self.cell_size).floor() as isize,
        )
    }

    fn clamp_x(&self, ix: isize) -> usize {
        ix.clamp(0, self.grid_nx as isize - 1) as usize
    }

    fn clamp_y(&self, iy: isize) -> usize {
        iy.clamp(0, self.grid_ny as isize - 1) as usize
    }

    /// Register a triangle under every cell its bounding box touches.
    ///
    /// Re-registering an index whose triangle shrank is harmless: lookups
    /// always confirm containment against the live triangle.
    pub fn insert(&mut self, idx: usize, bbox: [f64; 4]) {
        let (x0, y0) = self.cell_of(bbox[0], bbox[1]);
        let (x1, y1) = self.cell_of(bbox[2], bbox[3]);
        for iy in self.clamp_y(y0)..=self.clamp_y(y1) {
            for ix in self.clamp_x(x0)..=self.clamp_x(x1) {
                let cell = self.cells.entry((ix, iy)).or_default();
                if !cell.contains(&idx) {
                    cell.push(idx);
                }
            }
        }
    }

    /// Triangles that may contain the plan point `(x, y)`.
    pub fn query_point(&self, x: f64, y: f64) -> &[usize] {
        let (ix, iy) = self.cell_of(x, y);
        if ix < 0 || iy < 0 || ix >= self.grid_nx as isize || iy >= self.grid_ny as isize {
            return &[];
        }
        self.cells
            .get(&(ix as usize, iy as usize))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Triangles that may intersect the plan segment `a-b`, sorted and
    /// deduplicated.
    pub fn query_segment(&self, a: &Point3, b: &Point3) -> Vec<usize> {
        let mut result = Vec::new();
        let len = (b.x - a.x).hypot(b.y - a.y);
        let steps = ((len / (self.cell_size * 0.5)).ceil() as usize).max(1);
        let mut last = None;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let (ix, iy) = self.cell_of(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y));
            if last == Some((ix, iy)) {
                continue;
            }
            last = Some((ix, iy));
            // Neighbouring cells cover the corners a sampled walk can skip.
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (cx, cy) = (ix + dx, iy + dy);
                    if cx < 0 || cy < 0 || cx >= self.grid_nx as isize || cy >= self.grid_ny as isize
                    {
                        continue;
                    }
                    if let Some(indices) = self.cells.get(&(cx as usize, cy as usize)) {
                        result.extend_from_slice(indices);
                    }
                }
            }
        }
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Get the grid bounds.
    pub fn bounds(&self) -> [f64; 4] {
        self.bounds
    }
}
