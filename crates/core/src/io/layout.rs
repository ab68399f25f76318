//! Layout files: text indexes of pre-tiled datasets
//!
//! Each line of a layout file is one row of the tile matrix, with entries
//! separated by semicolons. An empty entry is a null tile: no file exists
//! there and its neighbors drain freely along the shared side. Entry paths
//! are resolved relative to the layout file's directory.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// A parsed layout file.
#[derive(Debug, Clone)]
pub struct Layout {
    rows: Vec<Vec<Option<String>>>,
    dir: PathBuf,
}

impl Layout {
    /// Read and parse a layout file. Ragged rows are padded with null tiles
    /// so the grid is always rectangular.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entries = line
                .split(';')
                .map(|s| {
                    let t = s.trim();
                    if t.is_empty() {
                        None
                    } else {
                        Some(t.to_string())
                    }
                })
                .collect();
            rows.push(entries);
        }

        if rows.is_empty() {
            return Err(Error::BadLayout("layout file has no rows".into()));
        }

        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, None);
        }

        Ok(Self { rows, dir })
    }

    /// Number of tile rows
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Number of tile columns
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }

    /// The grid of entries; `None` marks a null tile
    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    /// Resolve an entry against the layout file's directory
    pub fn resolve(&self, entry: &str) -> PathBuf {
        self.dir.join(entry)
    }

    /// The file stem of an entry, used for `%f` substitution
    pub fn basename(entry: &str) -> String {
        Path::new(entry)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.to_string())
    }

    /// The `x_y` grid location name of a position, used for `%n` substitution
    pub fn grid_loc_name(gridx: usize, gridy: usize) -> String {
        format!("{}_{}", gridx, gridy)
    }
}

/// Writes the output layout file that mirrors an input layout.
#[derive(Debug)]
pub struct LayoutWriter {
    path: PathBuf,
    rows: Vec<Vec<String>>,
}

impl LayoutWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            rows: Vec::new(),
        }
    }

    /// Begin a new row of the output grid
    pub fn add_row(&mut self) {
        self.rows.push(Vec::new());
    }

    /// Append an entry to the current row; pass "" for a null tile
    pub fn add_entry(&mut self, entry: &str) {
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
        }
        if let Some(row) = self.rows.last_mut() {
            row.push(entry.to_string());
        }
    }

    /// Write the accumulated grid to disk
    pub fn write(&self) -> Result<()> {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&row.join(";"));
            out.push('\n');
        }
        fs::write(&self.path, out)?;
        Ok(())
    }
}
