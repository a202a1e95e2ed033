//! Uniform spatial grid with a forward-neighbor pair scan.
//!
//! The grid is ephemeral: rebuilt at the start of every pass that needs it
//! (collisions, connections, magnetism), each with its own cell size. Pair
//! deduplication comes from scanning only *forward* neighbor cells — right,
//! down, down-right, down-left — plus index-ordered same-cell pairs, so
//! every unordered pair is visited exactly once without a seen-set.

use egui::Vec2;

/// Smallest cell we will ever use; below this the bucketing overhead wins.
const MIN_CELL: f32 = 20.0;

/// Target particles per cell when the interaction radius is so large that
/// radius-derived cells would degenerate into near-global buckets.
const TARGET_PER_CELL: f32 = 25.0;

pub struct SpatialGrid {
    cell_size: f32,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<u32>>,
}

/// Picks a cell size for an interaction radius over a `width` x `height`
/// field holding `count` particles. Normally `radius * 1.2` (clamped to a
/// floor); when that would pack more than ~25 particles per cell the size
/// is derived from density instead. Density-derived cells can be smaller
/// than the radius, which trades a few missed far pairs for frame rate.
pub fn cell_size_for(radius: f32, width: f32, height: f32, count: usize) -> f32 {
    let base = (radius * 1.2).max(MIN_CELL);
    let area = (width * height).max(1.0);
    let per_cell = count as f32 * (base * base) / area;
    if per_cell > TARGET_PER_CELL {
        (area * TARGET_PER_CELL / count.max(1) as f32).sqrt().max(MIN_CELL)
    } else {
        base
    }
}

impl SpatialGrid {
    pub fn new(width: f32, height: f32, cell_size: f32) -> Self {
        let cell_size = cell_size.max(1.0);
        let cols = (width / cell_size).ceil().max(1.0) as usize;
        let rows = (height / cell_size).ceil().max(1.0) as usize;
        Self {
            cell_size,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        }
    }

    /// Builds a grid and buckets every position in one go.
    pub fn build<'a>(
        width: f32,
        height: f32,
        cell_size: f32,
        positions: impl Iterator<Item = &'a Vec2>,
    ) -> Self {
        let mut grid = Self::new(width, height, cell_size);
        for (i, pos) in positions.enumerate() {
            grid.insert(i, *pos);
        }
        grid
    }

    /// Row-major cell key. Out-of-bounds positions clamp to the edge cell
    /// so wrapped/overshooting particles still land somewhere valid.
    fn key(&self, pos: Vec2) -> usize {
        let col = ((pos.x / self.cell_size) as isize).clamp(0, self.cols as isize - 1) as usize;
        let row = ((pos.y / self.cell_size) as isize).clamp(0, self.rows as isize - 1) as usize;
        row * self.cols + col
    }

    pub fn insert(&mut self, index: usize, pos: Vec2) {
        if !pos.x.is_finite() || !pos.y.is_finite() {
            return;
        }
        let key = self.key(pos);
        self.cells[key].push(index as u32);
    }

    /// Visits every unordered particle pair within one cell of each other
    /// exactly once. Same-cell pairs are deduplicated by index order;
    /// cross-cell pairs by only looking at the four forward neighbors.
    pub fn for_each_pair(&self, mut f: impl FnMut(usize, usize)) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let here = &self.cells[row * self.cols + col];
                if here.is_empty() {
                    continue;
                }

                // Same-cell pairs, index-ordered.
                for a in 0..here.len() {
                    for b in (a + 1)..here.len() {
                        f(here[a] as usize, here[b] as usize);
                    }
                }

                // Forward neighbors: right, down-left, down, down-right.
                for (dc, dr) in [(1isize, 0isize), (-1, 1), (0, 1), (1, 1)] {
                    let nc = col as isize + dc;
                    let nr = row as isize + dr;
                    if nc < 0 || nc >= self.cols as isize || nr >= self.rows as isize {
                        continue;
                    }
                    let there = &self.cells[nr as usize * self.cols + nc as usize];
                    for &a in here {
                        for &b in there {
                            f(a as usize, b as usize);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scatter(n: usize, w: f32, h: f32) -> Vec<Vec2> {
        // Deterministic pseudo-scatter; avoids pulling rand into the test.
        (0..n)
            .map(|i| {
                let t = i as f32 * 0.731;
                Vec2::new((t.sin() * 0.5 + 0.5) * w, (t.cos() * 0.5 + 0.5) * h)
            })
            .collect()
    }

    #[test]
    fn pair_scan_matches_brute_force() {
        let (w, h) = (400.0, 300.0);
        let radius = 45.0;
        let positions = scatter(120, w, h);
        let cell = cell_size_for(radius, w, h, positions.len());
        assert!(cell >= radius); // with 120 particles density fallback stays off
        let grid = SpatialGrid::build(w, h, cell, positions.iter());

        let mut from_grid = HashSet::new();
        grid.for_each_pair(|a, b| {
            let key = (a.min(b), a.max(b));
            assert!(from_grid.insert(key), "pair {:?} visited twice", key);
        });

        // Every pair within the radius must have been visited.
        for a in 0..positions.len() {
            for b in (a + 1)..positions.len() {
                let d = positions[a] - positions[b];
                if (d.x * d.x + d.y * d.y).sqrt() <= radius {
                    assert!(
                        from_grid.contains(&(a, b)),
                        "pair ({}, {}) missed by grid scan",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn same_cell_pairs_visited_once() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 50.0);
        for i in 0..4 {
            grid.insert(i, Vec2::new(10.0 + i as f32, 10.0));
        }
        let mut count = 0;
        grid.for_each_pair(|_, _| count += 1);
        assert_eq!(count, 6); // C(4, 2)
    }

    #[test]
    fn large_radius_falls_back_to_density() {
        // A connection distance spanning the whole field with many particles
        // must not produce a near-global bucket.
        let cell = cell_size_for(800.0, 800.0, 600.0, 5000);
        assert!(cell < 800.0 * 1.2);
        let per_cell = 5000.0 * cell * cell / (800.0 * 600.0);
        assert!(per_cell <= TARGET_PER_CELL * 1.01);
    }

    #[test]
    fn out_of_bounds_positions_clamp() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 50.0);
        grid.insert(0, Vec2::new(-30.0, 500.0));
        grid.insert(1, Vec2::new(f32::NAN, 10.0)); // dropped
        let mut seen = 0;
        grid.for_each_pair(|_, _| seen += 1);
        assert_eq!(seen, 0);
    }
}
