//! On-disk tile cache
//!
//! When a consumer's retention strategy is a path template, the tile's
//! elevation and label grids are serialized here between phase 1 and
//! phase 2 instead of being held in memory or re-read from the source.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct CacheRecord<T> {
    rows: usize,
    cols: usize,
    transform: GeoTransform,
    nodata: Option<T>,
    data: Vec<T>,
}

/// Serialize a raster to a cache file.
pub fn dump_raster<T: RasterElement>(raster: &Raster<T>, path: &Path) -> Result<()> {
    let record = CacheRecord {
        rows: raster.rows(),
        cols: raster.cols(),
        transform: *raster.transform(),
        nodata: raster.nodata(),
        data: raster.data().iter().copied().collect(),
    };
    let bytes = bincode::serde::encode_to_vec(&record, bincode::config::standard())
        .map_err(|e| Error::Cache(e.to_string()))?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Load a raster previously written by [`dump_raster`].
pub fn load_raster<T: RasterElement>(path: &Path) -> Result<Raster<T>> {
    let bytes = fs::read(path)?;
    let (record, _): (CacheRecord<T>, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| Error::Cache(e.to_string()))?;

    let mut raster = Raster::from_vec(record.data, record.rows, record.cols)?;
    raster.set_transform(record.transform);
    raster.set_nodata(record.nodata);
    Ok(raster)
}
