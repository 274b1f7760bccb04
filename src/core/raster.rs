//! Polygon rasterization
//!
//! A clip polygon becomes a 0/1 occupancy grid over its bounding box, anchored
//! at the top-left corner with rows running south (image convention). Cells are
//! filled with the any-touch rule: a cell is occupied if the polygon touches it
//! at all, not only when its centre is covered.

use geo::{Area, BoundingRect, Coord, Polygon, Rect};

use crate::core::crs::CrsTransform;
use crate::core::error::{Error, Result};

/// A 2D affine transform from grid to ground coordinates.
///
///   x = a * col + b * row + c
///   y = d * col + e * row + f
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with the top-left corner at `(west, north)`.
    pub fn from_origin(west: f64, north: f64, x_size: f64, y_size: f64) -> Self {
        Self::new(x_size, 0.0, west, 0.0, -y_size, north)
    }

    /// Apply the forward transform: (col, row) -> (x, y).
    pub fn forward(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// Compute the inverse affine transform.
    pub fn inverse(&self) -> Result<GeoTransform> {
        let det = self.a * self.e - self.b * self.d;
        if det.abs() < f64::EPSILON {
            return Err(Error::DegeneratePolygon(
                "singular grid transform (determinant is zero)".into(),
            ));
        }
        let inv_det = 1.0 / det;
        Ok(GeoTransform {
            a: self.e * inv_det,
            b: -self.b * inv_det,
            c: (self.b * self.f - self.e * self.c) * inv_det,
            d: -self.d * inv_det,
            e: self.a * inv_det,
            f: (self.d * self.c - self.a * self.f) * inv_det,
        })
    }
}

/// A simple polygon (one exterior ring) tagged with its EPSG code
#[derive(Debug, Clone)]
pub struct ClipPolygon {
    polygon: Polygon<f64>,
    epsg: u32,
}

impl ClipPolygon {
    /// Holed polygons are rejected, as are rings with fewer than three vertices.
    pub fn new(polygon: Polygon<f64>, epsg: u32) -> Result<Self> {
        if !polygon.interiors().is_empty() {
            return Err(Error::UnsupportedGeometry(format!(
                "polygon has {} interior ring(s); only a single exterior ring is supported",
                polygon.interiors().len()
            )));
        }
        // A closed ring repeats its first vertex.
        if polygon.exterior().0.len() < 4 {
            return Err(Error::DegeneratePolygon(
                "exterior ring needs at least three vertices".into(),
            ));
        }
        Ok(Self { polygon, epsg })
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Reproject to `target_epsg`; a no-op when already there.
    pub fn to_epsg(&self, target_epsg: u32) -> Result<ClipPolygon> {
        if self.epsg == target_epsg {
            return Ok(self.clone());
        }
        let transform = CrsTransform::new(self.epsg, target_epsg)?;
        ClipPolygon::new(transform.transform_polygon(&self.polygon)?, target_epsg)
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.polygon.bounding_rect()
    }
}

/// Occupancy grid plus the transform that places it on the ground
#[derive(Debug, Clone)]
pub struct RasterMask {
    rows: usize,
    cols: usize,
    cells: Vec<u8>,
    transform: GeoTransform,
    inverse: GeoTransform,
    extent: Rect<f64>,
}

impl RasterMask {
    fn empty(rows: usize, cols: usize, transform: GeoTransform) -> Result<Self> {
        let extent = Rect::new(
            transform.forward(0.0, 0.0),
            transform.forward(cols as f64, rows as f64),
        );
        Ok(Self {
            rows,
            cols,
            cells: vec![0; rows * cols],
            inverse: transform.inverse()?,
            transform,
            extent,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.cells[row * self.cols + col] == 1
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == 1).count()
    }

    /// Fractional (col, row) of a ground coordinate.
    fn grid_position(&self, x: f64, y: f64) -> (f64, f64) {
        self.inverse.forward(x, y)
    }

    /// Cell containing a ground coordinate, or `None` when it falls off the grid.
    ///
    /// The grid is closed: points on its east and south edges belong to the
    /// last column and row. The bounds test runs on the ground coordinate
    /// before any index is computed, so a point east of the grid is outside,
    /// never the last column.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        let (min, max) = (self.extent.min(), self.extent.max());
        if x < min.x || x > max.x || y < min.y || y > max.y {
            return None;
        }
        // Rounding in the inverse transform can push an edge point a hair
        // past the first or last index.
        let (gc, gr) = self.grid_position(x, y);
        let col = (gc.floor().max(0.0) as usize).min(self.cols - 1);
        let row = (gr.floor().max(0.0) as usize).min(self.rows - 1);
        Some((row, col))
    }

    /// Whether a ground coordinate lands in an occupied cell.
    pub fn covers(&self, x: f64, y: f64) -> bool {
        self.cell_of(x, y).is_some_and(|(row, col)| self.get(row, col))
    }

    fn touch(&mut self, row: i64, col: i64) {
        if row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols {
            self.cells[row as usize * self.cols + col as usize] = 1;
        }
    }

    /// Mark cells whose centre lies inside the ring (even-odd scanline).
    fn fill_centres(&mut self, ring: &[Coord<f64>]) {
        let mut crossings = Vec::new();
        for row in 0..self.rows {
            let (_, yc) = self.transform.forward(0.0, row as f64 + 0.5);
            crossings.clear();
            for edge in ring.windows(2) {
                let (p, q) = (edge[0], edge[1]);
                if (p.y <= yc) != (q.y <= yc) {
                    crossings.push(p.x + (yc - p.y) * (q.x - p.x) / (q.y - p.y));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));

            for span in crossings.chunks_exact(2) {
                let (gc_start, _) = self.grid_position(span[0], yc);
                let (gc_end, _) = self.grid_position(span[1], yc);
                let first = (gc_start - 0.5).ceil().max(0.0) as i64;
                let last = (gc_end - 0.5).floor().min(self.cols as f64 - 1.0) as i64;
                for col in first..=last {
                    self.touch(row as i64, col);
                }
            }
        }
    }

    /// Mark every cell a segment passes through (grid traversal).
    ///
    /// When the segment crosses a cell corner exactly, both cells sharing that
    /// corner are marked as well.
    fn trace_segment(&mut self, from: Coord<f64>, to: Coord<f64>) {
        let (gx0, gy0) = self.grid_position(from.x, from.y);
        let (gx1, gy1) = self.grid_position(to.x, to.y);
        if !(gx0.is_finite() && gy0.is_finite() && gx1.is_finite() && gy1.is_finite()) {
            return;
        }

        let (mut col, mut row) = (gx0.floor() as i64, gy0.floor() as i64);
        let (end_col, end_row) = (gx1.floor() as i64, gy1.floor() as i64);
        let (dx, dy) = (gx1 - gx0, gy1 - gy0);
        let step_col = dx.signum() as i64;
        let step_row = dy.signum() as i64;

        let t_delta_x = if dx != 0.0 { 1.0 / dx.abs() } else { f64::INFINITY };
        let t_delta_y = if dy != 0.0 { 1.0 / dy.abs() } else { f64::INFINITY };
        let mut t_max_x = match step_col {
            1 => ((col + 1) as f64 - gx0) / dx,
            -1 => (col as f64 - gx0) / dx,
            _ => f64::INFINITY,
        };
        let mut t_max_y = match step_row {
            1 => ((row + 1) as f64 - gy0) / dy,
            -1 => (row as f64 - gy0) / dy,
            _ => f64::INFINITY,
        };

        self.touch(row, col);
        let max_steps = (end_col - col).abs() + (end_row - row).abs();
        let mut steps = 0;
        while (col, row) != (end_col, end_row) && steps < max_steps {
            if (t_max_x - t_max_y).abs() < 1e-12 {
                self.touch(row, col + step_col);
                self.touch(row + step_row, col);
                col += step_col;
                row += step_row;
                t_max_x += t_delta_x;
                t_max_y += t_delta_y;
                steps += 2;
            } else if t_max_x < t_max_y {
                col += step_col;
                t_max_x += t_delta_x;
                steps += 1;
            } else {
                row += step_row;
                t_max_y += t_delta_y;
                steps += 1;
            }
            self.touch(row, col);
        }
    }
}

/// Rasterize a clip polygon at `resolution` ground units per cell.
///
/// The grid covers the polygon's bounding box with
/// `rows = floor(height / resolution)` and `cols = floor(width / resolution)`.
pub fn rasterize(polygon: &ClipPolygon, resolution: f64) -> Result<RasterMask> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(Error::InvalidConfiguration(format!(
            "raster resolution must be positive, got {resolution}"
        )));
    }
    let bounds = polygon
        .bounds()
        .ok_or_else(|| Error::DegeneratePolygon("polygon has no extent".into()))?;
    let (width, height) = (bounds.width(), bounds.height());
    if width <= 0.0 || height <= 0.0 || polygon.polygon().unsigned_area() <= 0.0 {
        return Err(Error::DegeneratePolygon(format!(
            "bounding box {width} x {height} has zero area"
        )));
    }

    let rows = (height / resolution).floor() as usize;
    let cols = (width / resolution).floor() as usize;
    if rows == 0 || cols == 0 {
        return Err(Error::DegeneratePolygon(format!(
            "bounding box {width} x {height} is smaller than one {resolution} cell"
        )));
    }

    let transform =
        GeoTransform::from_origin(bounds.min().x, bounds.max().y, resolution, resolution);
    let mut mask = RasterMask::empty(rows, cols, transform)?;

    let ring = &polygon.polygon().exterior().0;
    mask.fill_centres(ring);
    for edge in ring.windows(2) {
        mask.trace_segment(edge[0], edge[1]);
    }

    log::debug!(
        "Rasterized polygon into {rows}x{cols} grid at {resolution} ({} occupied cells)",
        mask.occupied_count()
    );
    Ok(mask)
}
