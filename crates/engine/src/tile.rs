//! Tile descriptors
//!
//! A `TileInfo` identifies one rectangular region of the global raster and
//! everything a consumer needs to process it: where to read it, where to
//! write it, how to hold it between phases, which of its sides lie on the
//! outer raster boundary, and how it is oriented on disk.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Watershed label. 0 is unlabeled, 1 is the shared outer-boundary
/// watershed, values >= 2 are local watersheds.
pub type Label = u32;

/// Edge-mask bit: the tile's top row lies on the outer raster boundary
pub const GRID_TOP: u8 = 1;
/// Edge-mask bit: bottom row on the outer boundary
pub const GRID_BOTTOM: u8 = 2;
/// Edge-mask bit: left column on the outer boundary
pub const GRID_LEFT: u8 = 4;
/// Edge-mask bit: right column on the outer boundary
pub const GRID_RIGHT: u8 = 8;

/// Flip-mask bit: the tile is stored vertically mirrored
pub const FLIP_VERT: u8 = 1;
/// Flip-mask bit: the tile is stored horizontally mirrored
pub const FLIP_HORZ: u8 = 2;

/// How a consumer holds a tile between phase 1 and phase 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    /// Discard after phase 1; reload from the source (and re-flood) in phase 2
    Evict,
    /// Keep the elevation and label grids in consumer memory
    Retain,
    /// Serialize both grids to this path prefix between phases
    Cache(PathBuf),
}

/// Descriptor of one tile of the global raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileInfo {
    /// Which sides of this tile drain freely off the raster
    pub edge: u8,
    /// On-disk orientation relative to world orientation
    pub flip: u8,
    /// Pixel offset of the tile window into the source file
    pub x: usize,
    pub y: usize,
    /// Position in the tile matrix
    pub gridx: usize,
    pub gridy: usize,
    pub width: usize,
    pub height: usize,
    /// A layout-file hole: no data exists here
    pub null_tile: bool,
    /// Layout-file mode: the tile is its own file rather than a window
    pub many: bool,
    /// Assigned during aggregation: this tile's base in the global label
    /// namespace, and the width of its slice
    pub label_offset: Label,
    pub label_increment: Label,
    pub filename: PathBuf,
    pub outputname: PathBuf,
    pub retention: Retention,
}

impl TileInfo {
    /// A null tile: a hole in the layout grid
    pub fn null() -> Self {
        Self {
            edge: 0,
            flip: 0,
            x: 0,
            y: 0,
            gridx: 0,
            gridy: 0,
            width: 0,
            height: 0,
            null_tile: true,
            many: false,
            label_offset: 0,
            label_increment: 0,
            filename: PathBuf::new(),
            outputname: PathBuf::new(),
            retention: Retention::Evict,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filename: PathBuf,
        outputname: PathBuf,
        retention: Retention,
        gridx: usize,
        gridy: usize,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        many: bool,
    ) -> Self {
        Self {
            edge: 0,
            flip: 0,
            x,
            y,
            gridx,
            gridy,
            width,
            height,
            null_tile: false,
            many,
            label_offset: 0,
            label_increment: 0,
            filename,
            outputname,
            retention,
        }
    }
}

/// The tile matrix, row-major. Owned by the producer; consumers only ever
/// see the descriptor of the tile they are working on.
pub type TileGrid = Vec<Vec<TileInfo>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_tile() {
        let t = TileInfo::null();
        assert!(t.null_tile);
        assert_eq!(t.edge, 0);
    }

    #[test]
    fn test_edge_bits_are_distinct() {
        let all = GRID_TOP | GRID_BOTTOM | GRID_LEFT | GRID_RIGHT;
        assert_eq!(all.count_ones(), 4);
    }
}
