//! I/O operations: GeoTIFF files, layout indexes and the tile cache

mod cache;
mod geotiff;
mod layout;

pub use cache::{dump_raster, load_raster};
pub use geotiff::{
    probe, read_geotiff, read_window, write_geotiff, ElevKind, RasterProbe, TiffElement,
};
pub use layout::{Layout, LayoutWriter};
