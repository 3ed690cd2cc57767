//! Affine geotransformation shared by pixel-aligned datasets

use serde::{Deserialize, Serialize};

use super::Extent;

/// Affine transformation coefficients for georeferencing rasters.
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Two datasets are pixel-aligned when they have the same dimensions and
/// transforms that compare equal under [`GeoTransform::approx_eq`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Usually negative for north-up images
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// From GDAL order `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`
    pub fn from_gdal(c: [f64; 6]) -> Self {
        Self {
            origin_x: c[0],
            pixel_width: c[1],
            row_rotation: c[2],
            origin_y: c[3],
            col_rotation: c[4],
            pixel_height: c[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Georeferenced position of a pixel corner (fractional pixel coordinates allowed)
    pub fn corner(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Georeferenced centre of a pixel
    pub fn pixel_centre(&self, col: usize, row: usize) -> (f64, f64) {
        self.corner(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Bounding box of the cells `[col0, col1) x [row0, row1)`
    pub fn block_extent(&self, col0: usize, row0: usize, col1: usize, row1: usize) -> Extent {
        let corners = [
            self.corner(col0 as f64, row0 as f64),
            self.corner(col1 as f64, row0 as f64),
            self.corner(col0 as f64, row1 as f64),
            self.corner(col1 as f64, row1 as f64),
        ];
        corners.iter().skip(1).fold(
            Extent::new(corners[0].0, corners[0].1, corners[0].0, corners[0].1),
            |e, &(x, y)| Extent {
                min_x: e.min_x.min(x),
                min_y: e.min_y.min(y),
                max_x: e.max_x.max(x),
                max_y: e.max_y.max(y),
            },
        )
    }

    /// Bounding box of a single pixel
    pub fn pixel_extent(&self, col: usize, row: usize) -> Extent {
        self.block_extent(col, row, col + 1, row + 1)
    }

    /// Bounding box of a raster with the given dimensions
    pub fn bounds(&self, cols: usize, rows: usize) -> Extent {
        self.block_extent(0, 0, cols, rows)
    }

    /// Coefficient-wise comparison with a tolerance relative to the pixel size
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let scale = self.pixel_width.abs().max(self.pixel_height.abs()).max(1.0);
        let tol = 1e-9 * scale;
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tol.max(1e-9 * a.abs().max(b.abs())))
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
