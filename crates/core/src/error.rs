//! Error types for TerraFill

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for TerraFill operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(String),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Tile '{path}' had unexpected {axis}. Found {found} expected {expected}")]
    TileSizeMismatch {
        path: PathBuf,
        axis: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Complex data types are not supported")]
    ComplexDataType,

    #[error("Bad layout file: {0}")]
    BadLayout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Communication failure: {0}")]
    Comm(String),

    #[error("Tile cache error: {0}")]
    Cache(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for TerraFill operations
pub type Result<T> = std::result::Result<T, Error>;
