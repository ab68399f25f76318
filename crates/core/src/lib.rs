//! # TerraFill Core
//!
//! Core types and I/O for the TerraFill depression-filling engine.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `Crs`: Coordinate Reference System handling
//! - Windowed GeoTIFF reading, dtype-faithful writing
//! - Layout-file parsing for pre-tiled datasets
//! - The on-disk tile cache used by disk retention

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::Crs;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
}
