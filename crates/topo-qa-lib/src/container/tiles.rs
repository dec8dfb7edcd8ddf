//! Tile grid over the verified extent
//!
//! Tiles are numbered in scan order: rows by ascending y, columns by ascending x. A position
//! belongs to the tile whose half-open range `[min, max)` contains it, except on the last row
//! and column which also own their upper boundary.

use geo::{Coord, Rect};

/// Inclusive range of tile rows and columns touched by a rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileRange {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct TileGrid {
    all_box: Rect<f64>,
    tile_size: f64,
    columns: usize,
    rows: usize,
}

impl TileGrid {
    pub fn new(all_box: Rect<f64>, tile_size: f64) -> Self {
        let count = |extent: f64| ((extent / tile_size).ceil() as usize).max(1);
        Self {
            all_box,
            tile_size,
            columns: count(all_box.width()),
            rows: count(all_box.height()),
        }
    }

    pub fn count(&self) -> usize {
        self.columns * self.rows
    }

    pub fn all_box(&self) -> Rect<f64> {
        self.all_box
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.columns + col
    }

    fn bounds(&self, i: usize, n: usize, min: f64, max: f64) -> (f64, f64) {
        let lo = if i == 0 {
            min
        } else {
            min + i as f64 * self.tile_size
        };
        let hi = if i + 1 == n {
            max
        } else {
            min + (i + 1) as f64 * self.tile_size
        };
        (lo, hi)
    }

    /// Closed bounds of a tile
    pub fn tile_box(&self, index: usize) -> Rect<f64> {
        let (row, col) = (index / self.columns, index % self.columns);
        let min = self.all_box.min();
        let max = self.all_box.max();
        let (x0, x1) = self.bounds(col, self.columns, min.x, max.x);
        let (y0, y1) = self.bounds(row, self.rows, min.y, max.y);
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    fn cell(&self, v: f64, min: f64, n: usize) -> usize {
        if n == 1 {
            return 0;
        }
        let i = ((v - min) / self.tile_size).floor();
        if i <= 0.0 {
            0
        } else {
            (i as usize).min(n - 1)
        }
    }

    pub fn column_of(&self, x: f64) -> usize {
        self.cell(x, self.all_box.min().x, self.columns)
    }

    pub fn row_of(&self, y: f64) -> usize {
        self.cell(y, self.all_box.min().y, self.rows)
    }

    pub fn range(&self, rect: Rect<f64>) -> TileRange {
        TileRange {
            row_min: self.row_of(rect.min().y),
            row_max: self.row_of(rect.max().y),
            col_min: self.column_of(rect.min().x),
            col_max: self.column_of(rect.max().x),
        }
    }

    /// First tile in scan order touched by `range`
    pub fn first(&self, range: &TileRange) -> usize {
        self.index(range.row_min, range.col_min)
    }

    /// Last tile in scan order touched by `range`
    pub fn last(&self, range: &TileRange) -> usize {
        self.index(range.row_max, range.col_max)
    }

    pub fn contains(&self, range: &TileRange, index: usize) -> bool {
        let (row, col) = (index / self.columns, index % self.columns);
        (range.row_min..=range.row_max).contains(&row)
            && (range.col_min..=range.col_max).contains(&col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(tile_size: f64) -> TileGrid {
        TileGrid::new(
            Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 4.0 }),
            tile_size,
        )
    }

    #[test]
    fn test_tile_count() {
        assert_eq!(grid(1000.0).count(), 1);
        assert_eq!(grid(5.0).count(), 2);
        assert_eq!(grid(3.0).count(), 4 * 2);
        assert_eq!(grid(f64::INFINITY).count(), 1);
    }

    #[test]
    fn test_tile_boxes_in_scan_order() {
        let g = grid(3.0);
        assert_eq!(g.tile_box(0), Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 3.0, y: 3.0 }));
        // last column is clipped to the extent
        assert_eq!(g.tile_box(3), Rect::new(Coord { x: 9.0, y: 0.0 }, Coord { x: 10.0, y: 3.0 }));
        assert_eq!(g.tile_box(4), Rect::new(Coord { x: 0.0, y: 3.0 }, Coord { x: 3.0, y: 4.0 }));

        let whole = grid(f64::INFINITY);
        assert_eq!(whole.tile_box(0), whole.all_box());
    }

    fn tile_of(g: &TileGrid, p: Coord<f64>) -> usize {
        g.first(&g.range(Rect::new(p, p)))
    }

    #[test]
    fn test_half_open_ownership() {
        let g = grid(5.0);
        assert_eq!(tile_of(&g, Coord { x: 4.999, y: 1.0 }), 0);
        assert_eq!(tile_of(&g, Coord { x: 5.0, y: 1.0 }), 1);
        // upper boundary of the last column belongs to it
        assert_eq!(tile_of(&g, Coord { x: 10.0, y: 4.0 }), 1);
        assert_eq!(tile_of(&g, Coord { x: -3.0, y: 1.0 }), 0);
    }

    #[test]
    fn test_range() {
        let g = grid(3.0);
        let range = g.range(Rect::new(Coord { x: 2.0, y: 1.0 }, Coord { x: 7.0, y: 3.5 }));
        assert_eq!(g.first(&range), 0);
        assert_eq!(g.last(&range), g.index(1, 2));
        assert!(g.contains(&range, g.index(1, 1)));
        assert!(!g.contains(&range, 3));
    }
}
