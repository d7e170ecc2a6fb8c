use std::collections::BTreeSet;

use geo::{coord, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;

/// Reserved NoData code for classified rasters.
pub const NODATA_CLASS: u32 = u32::MAX;

/// Square metres per hectare.
pub const M2_PER_HA: f64 = 10_000.0;

/// North-up affine placement of a grid: row 0 is the top (max y) edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridTransform {
    /// x of the left edge of column 0.
    pub origin_x: f64,
    /// y of the top edge of row 0.
    pub origin_y: f64,
    /// Cell size along x, positive.
    pub cell_width: f64,
    /// Cell size along y, positive (rows advance downward).
    pub cell_height: f64,
}

impl GridTransform {
    pub fn new(origin_x: f64, origin_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self { origin_x, origin_y, cell_width, cell_height }
    }

    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_width,
            self.origin_y - (row as f64 + 0.5) * self.cell_height,
        )
    }

    /// Planar area of one cell in CRS units squared.
    #[inline]
    pub fn cell_area(&self) -> f64 {
        (self.cell_width * self.cell_height).abs()
    }

    /// Cell containing (x, y), if inside a `width × height` grid.
    pub fn cell_at(&self, x: f64, y: f64, width: usize, height: usize) -> Option<(usize, usize)> {
        let fc = (x - self.origin_x) / self.cell_width;
        let fr = (self.origin_y - y) / self.cell_height;
        if !fc.is_finite() || !fr.is_finite() || fc < 0.0 || fr < 0.0 {
            return None;
        }
        let (col, row) = (fc.floor() as usize, fr.floor() as usize);
        (col < width && row < height).then_some((row, col))
    }
}

/// A 2D raster over a uniform grid, row-major.
///
/// `RasterGrid<u32>` holds LULC class codes with [`NODATA_CLASS`] as the
/// default sentinel; `RasterGrid<f32>` holds carbon density with NaN NoData.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterGrid<T = u32> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub transform: GridTransform,
    /// `None` when the source carried no CRS; rejected by the reprojector.
    pub crs: Option<Crs>,
    pub nodata: T,
}

impl<T: Copy> RasterGrid<T> {
    /// Create a new grid filled with the given value.
    pub fn new(width: usize, height: usize, transform: GridTransform, crs: Option<Crs>, fill: T, nodata: T) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            transform,
            crs,
            nodata,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Outer extent of the grid.
    pub fn bounds(&self) -> Rect<f64> {
        let t = &self.transform;
        Rect::new(
            coord! { x: t.origin_x, y: t.origin_y - self.height as f64 * t.cell_height },
            coord! { x: t.origin_x + self.width as f64 * t.cell_width, y: t.origin_y },
        )
    }

    /// Inclusive (row0, row1, col0, col1) window of cells whose centres lie in `rect`.
    pub fn window_for(&self, rect: Rect<f64>) -> Option<(usize, usize, usize, usize)> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let t = &self.transform;
        let c0 = ((rect.min().x - t.origin_x) / t.cell_width - 0.5).ceil();
        let c1 = ((rect.max().x - t.origin_x) / t.cell_width - 0.5).floor();
        let r0 = ((t.origin_y - rect.max().y) / t.cell_height - 0.5).ceil();
        let r1 = ((t.origin_y - rect.min().y) / t.cell_height - 0.5).floor();
        if !(c0.is_finite() && c1.is_finite() && r0.is_finite() && r1.is_finite()) {
            return None;
        }
        let max_c = (self.width - 1) as f64;
        let max_r = (self.height - 1) as f64;
        if c1 < 0.0 || r1 < 0.0 || c0 > max_c || r0 > max_r {
            return None;
        }
        let (c0, c1) = (c0.max(0.0) as usize, c1.min(max_c) as usize);
        let (r0, r1) = (r0.max(0.0) as usize, r1.min(max_r) as usize);
        (c0 <= c1 && r0 <= r1).then_some((r0, r1, c0, c1))
    }
}

impl RasterGrid<u32> {
    /// A classified grid with the standard NoData sentinel.
    pub fn classified(width: usize, height: usize, transform: GridTransform, crs: Option<Crs>) -> Self {
        Self::new(width, height, transform, crs, NODATA_CLASS, NODATA_CLASS)
    }

    #[inline]
    pub fn is_nodata(&self, row: usize, col: usize) -> bool {
        self.get(row, col) == self.nodata
    }

    /// Every class code present in the grid, NoData excluded.
    pub fn observed_classes(&self) -> BTreeSet<u32> {
        self.data.iter().copied().filter(|&v| v != self.nodata).collect()
    }

    /// Area of one cell in hectares. Only meaningful in a projected metric CRS.
    pub fn cell_area_ha(&self) -> f64 {
        self.transform.cell_area() / M2_PER_HA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_4x3() -> RasterGrid<u32> {
        // 4 columns, 3 rows of 10 m cells with the top-left corner at (100, 30).
        let mut g = RasterGrid::classified(4, 3, GridTransform::new(100.0, 30.0, 10.0, 10.0), Some(Crs::EQUAL_AREA));
        for r in 0..3 {
            for c in 0..4 {
                g.set(r, c, (r * 4 + c) as u32 % 3 + 1);
            }
        }
        g.set(2, 3, NODATA_CLASS);
        g
    }

    #[test]
    fn cell_center_and_cell_at_agree() {
        let g = grid_4x3();
        for r in 0..g.height {
            for c in 0..g.width {
                let (x, y) = g.transform.cell_center(r, c);
                assert_eq!(g.transform.cell_at(x, y, g.width, g.height), Some((r, c)));
            }
        }
        assert_eq!(g.transform.cell_at(99.0, 25.0, g.width, g.height), None);
        assert_eq!(g.transform.cell_at(101.0, 31.0, g.width, g.height), None);
    }

    #[test]
    fn observed_classes_skip_nodata() {
        let g = grid_4x3();
        let seen: Vec<u32> = g.observed_classes().into_iter().collect();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(g.is_nodata(2, 3));
    }

    #[test]
    fn window_for_selects_centres_inside_rect() {
        let g = grid_4x3();
        // Covers centres x ∈ {115, 125}, y ∈ {25, 15}.
        let rect = Rect::new(coord! { x: 110.0, y: 10.0 }, coord! { x: 130.0, y: 30.0 });
        assert_eq!(g.window_for(rect), Some((0, 1, 1, 2)));

        let outside = Rect::new(coord! { x: 500.0, y: 500.0 }, coord! { x: 600.0, y: 600.0 });
        assert_eq!(g.window_for(outside), None);
    }

    #[test]
    fn cell_area_in_hectares() {
        let g = RasterGrid::classified(1, 1, GridTransform::new(0.0, 0.0, 500.0, 500.0), Some(Crs::EQUAL_AREA));
        assert!((g.cell_area_ha() - 25.0).abs() < 1e-12);
    }
}
