//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// For north-up images, `row_rotation` and `col_rotation` are typically 0,
/// and `pixel_height` is negative. A positive `pixel_height` or negative
/// `pixel_width` means the raster is stored flipped relative to world
/// orientation, which the engine accounts for with per-tile flip masks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
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

    /// Create from GDAL-style array [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    /// Convert to GDAL-style array
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

    /// The transform of a window whose upper-left pixel sits at
    /// `(col, row)` of this raster. Used when a tile is a view into a
    /// larger file and must be written with its own georeferencing.
    pub fn window(&self, col: usize, row: usize) -> GeoTransform {
        let col_f = col as f64;
        let row_f = row as f64;
        GeoTransform {
            origin_x: self.origin_x + col_f * self.pixel_width + row_f * self.row_rotation,
            origin_y: self.origin_y + col_f * self.col_rotation + row_f * self.pixel_height,
            ..*self
        }
    }

    /// Convert pixel coordinates to geographic coordinates (pixel center)
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        let col_f = col as f64 + 0.5;
        let row_f = row as f64 + 0.5;

        let x = self.origin_x + col_f * self.pixel_width + row_f * self.row_rotation;
        let y = self.origin_y + col_f * self.col_rotation + row_f * self.pixel_height;

        (x, y)
    }

    /// Get the cell size (assumes square pixels and no rotation)
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
