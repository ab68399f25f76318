//! Partitioning the input into a tile matrix
//!
//! In `many` mode the input is a layout file naming one raster file per
//! tile; in `one` mode a single raster is divided into a grid of windows
//! by the configured block size, clamping the last row and column. Either
//! way the result is a `TileGrid` with edge bits on the outer perimeter
//! (and, in many mode, next to internal null tiles), flip masks derived
//! from the geotransform XOR the user's request, and per-tile output and
//! retention paths derived from the `%f`/`%n` templates.

use crate::tile::{
    Retention, TileGrid, TileInfo, FLIP_HORZ, FLIP_VERT, GRID_BOTTOM, GRID_LEFT, GRID_RIGHT,
    GRID_TOP,
};
use std::path::PathBuf;
use terrafill_core::io::{probe, ElevKind, Layout, LayoutWriter, RasterProbe};
use terrafill_core::{Error, Result};
use tracing::{error, info};

/// Tiling mode: one file per tile, or one file cut into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Many,
    One,
}

/// Everything a run needs, as gathered from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    /// `@evict`, `@retain`, or a path template containing `%f` or `%n`
    pub retention: String,
    pub input: PathBuf,
    /// Output path template containing `%f` xor `%n`
    pub output: String,
    /// Block width in cells, or -1 for the full raster extent
    pub bwidth: i64,
    /// Block height in cells, or -1 for the full raster extent
    pub bheight: i64,
    pub flip_h: bool,
    pub flip_v: bool,
    /// Number of consumers; the producer makes the total one more
    pub workers: usize,
}

/// Partition the input into tiles and probe the element kind of the run.
pub fn prepare(config: &RunConfig) -> Result<(TileGrid, ElevKind)> {
    let (mut tiles, kind) = match config.mode {
        Mode::Many => prepare_many(config)?,
        Mode::One => prepare_one(config)?,
    };
    mark_outer_edges(&mut tiles);
    info!("c Flip horizontal = {}", if config.flip_h { "YES" } else { "NO" });
    info!("c Flip vertical =   {}", if config.flip_v { "YES" } else { "NO" });
    info!("c Input data type = {}", kind.name());
    Ok((tiles, kind))
}

fn substitute(template: &str, basename: &str, loc: &str) -> Option<String> {
    if template.contains("%f") {
        Some(template.replacen("%f", basename, 1))
    } else if template.contains("%n") {
        Some(template.replacen("%n", loc, 1))
    } else {
        None
    }
}

fn retention_for(template: &str, basename: &str, loc: &str) -> Result<Retention> {
    match template {
        "@evict" => Ok(Retention::Evict),
        "@retain" => Ok(Retention::Retain),
        _ => {
            let path = substitute(template, basename, loc).ok_or_else(|| {
                Error::Config("retention path must contain '%f' or '%n'".into())
            })?;
            Ok(Retention::Cache(PathBuf::from(path)))
        }
    }
}

fn output_layout_path(template: &str) -> Result<PathBuf> {
    substitute(template, "layout", "layout")
        .map(PathBuf::from)
        .ok_or_else(|| Error::Config("output name must contain '%f' or '%n'".into()))
}

fn prepare_many(config: &RunConfig) -> Result<(TileGrid, ElevKind)> {
    let layout = Layout::read(&config.input)?;
    let mut out_layout = LayoutWriter::new(output_layout_path(&config.output)?);

    let mut tiles: TileGrid = Vec::with_capacity(layout.height());
    let mut probe_info: Option<RasterProbe> = None;
    let mut cell_count: u64 = 0;
    let mut not_null_tiles: u64 = 0;

    for (gy, row) in layout.rows().iter().enumerate() {
        let mut tile_row = Vec::with_capacity(row.len());
        out_layout.add_row();

        for (gx, entry) in row.iter().enumerate() {
            let Some(entry) = entry else {
                tile_row.push(TileInfo::null());
                out_layout.add_entry("");
                continue;
            };
            not_null_tiles += 1;

            let full_path = layout.resolve(entry);
            // Every tile is assumed to share the first tile's dimensions,
            // dtype and geotransform; opening thousands of files here to
            // check would be expensive. The consumer verifies dimensions
            // as it reads each tile.
            let file_info = match probe_info {
                Some(info) => info,
                None => {
                    let info = probe(&full_path).map_err(|e| {
                        Error::Config(format!(
                            "error getting file information from '{}': {}",
                            full_path.display(),
                            e
                        ))
                    })?;
                    probe_info = Some(info);
                    info
                }
            };
            cell_count += (file_info.width * file_info.height) as u64;

            let basename = Layout::basename(entry);
            let loc = Layout::grid_loc_name(gx, gy);

            let retention = retention_for(&config.retention, &basename, &loc)?;
            let output_name = substitute(&config.output, &basename, &loc).ok_or_else(|| {
                Error::Config("output name must contain '%f' or '%n'".into())
            })?;
            out_layout.add_entry(&output_name);

            let mut tile = TileInfo::new(
                full_path,
                PathBuf::from(output_name),
                retention,
                gx,
                gy,
                0,
                0,
                file_info.width,
                file_info.height,
                true,
            );

            apply_flips(&mut tile, &file_info, config);
            tile_row.push(tile);
        }
        tiles.push(tile_row);
    }

    let kind = match probe_info {
        Some(info) => info.kind,
        None => return Err(Error::Config("layout file contains no tiles".into())),
    };

    info!(
        "c Loaded {} rows each of which had {} columns.",
        tiles.len(),
        tiles.first().map_or(0, |r| r.len())
    );
    info!("m Total cells to be processed = {}", cell_count);
    info!("m Number of tiles which were not null = {}", not_null_tiles);

    mark_null_adjacency(&mut tiles);

    out_layout.write()?;

    Ok((tiles, kind))
}

/// Null tiles imply that the tiles around them have edges, as though they
/// were on the edge of the raster.
fn mark_null_adjacency(tiles: &mut TileGrid) {
    let gridheight = tiles.len();
    let gridwidth = tiles.first().map_or(0, |r| r.len());

    // TODO: the x > 0 / y > 0 guards below skip some row-0/column-0 tiles;
    // verify the intent against reference outputs before relaxing them.
    for y in 0..gridheight {
        for x in 0..gridwidth {
            if tiles[y][x].null_tile {
                continue;
            }
            if y > 1 && x > 0 && tiles[y - 1][x].null_tile {
                tiles[y][x].edge |= GRID_TOP;
            }
            if y + 1 < gridheight && x > 0 && tiles[y + 1][x].null_tile {
                tiles[y][x].edge |= GRID_BOTTOM;
            }
            if y > 0 && x > 1 && tiles[y][x - 1].null_tile {
                tiles[y][x].edge |= GRID_LEFT;
            }
            if y > 0 && x + 1 < gridwidth && tiles[y][x + 1].null_tile {
                tiles[y][x].edge |= GRID_RIGHT;
            }
        }
    }
}

fn prepare_one(config: &RunConfig) -> Result<(TileGrid, ElevKind)> {
    let file_info = probe(&config.input).map_err(|e| {
        Error::Config(format!(
            "error getting file information from '{}': {}",
            config.input.display(),
            e
        ))
    })?;

    let total_width = file_info.width;
    let total_height = file_info.height;

    // -1 means the entire extent of the raster along that axis
    let bwidth = if config.bwidth == -1 {
        total_width
    } else {
        config.bwidth as usize
    };
    let bheight = if config.bheight == -1 {
        total_height
    } else {
        config.bheight as usize
    };

    info!("m Total width =  {}", total_width);
    info!("m Total height = {}", total_height);
    info!("m Block width =  {}", bwidth);
    info!("m Block height = {}", bheight);
    info!("m Total cells to be processed = {}", total_width * total_height);

    if !matches!(config.retention.as_str(), "@evict" | "@retain")
        && !config.retention.contains("%n")
    {
        return Err(Error::Config(
            "in <one> mode '%n' must be present in the retention path".into(),
        ));
    }
    if !config.output.contains("%n") {
        return Err(Error::Config(
            "in <one> mode '%n' must be present in the output path".into(),
        ));
    }

    let mut tiles: TileGrid = Vec::new();
    let mut y = 0;
    let mut gridy = 0;
    while y < total_height {
        let mut tile_row = Vec::new();
        let mut x = 0;
        let mut gridx = 0;
        while x < total_width {
            if total_height - y < 100 {
                error!(
                    "E At least one tile is <100 cells in height; I suggest bheight={}",
                    suggest_tile_size(bheight, total_height, 100)
                );
                return Err(Error::Config(format!(
                    "tile height too small; suggest bheight={}",
                    suggest_tile_size(bheight, total_height, 100)
                )));
            }
            if total_width - x < 100 {
                error!(
                    "E At least one tile is <100 cells in width; I suggest bwidth={}",
                    suggest_tile_size(bwidth, total_width, 100)
                );
                return Err(Error::Config(format!(
                    "tile width too small; suggest bwidth={}",
                    suggest_tile_size(bwidth, total_width, 100)
                )));
            }

            let loc = format!("{}_{}", gridx, gridy);
            let retention = retention_for(&config.retention, &loc, &loc)?;
            let output_name = config.output.replacen("%n", &loc, 1);

            let width = bwidth.min(total_width - x);
            let height = bheight.min(total_height - y);

            let mut tile = TileInfo::new(
                config.input.clone(),
                PathBuf::from(output_name),
                retention,
                gridx,
                gridy,
                x,
                y,
                width,
                height,
                false,
            );
            apply_flips(&mut tile, &file_info, config);
            tile_row.push(tile);

            x += bwidth;
            gridx += 1;
        }
        tiles.push(tile_row);
        y += bheight;
        gridy += 1;
    }

    Ok((tiles, file_info.kind))
}

/// Flip tiles if the geotransform demands it, then flip (or reverse the
/// geotransform's flip) per the user's request.
fn apply_flips(tile: &mut TileInfo, file_info: &RasterProbe, config: &RunConfig) {
    if file_info.transform.pixel_width < 0.0 {
        tile.flip ^= FLIP_HORZ;
    }
    if file_info.transform.pixel_height > 0.0 {
        tile.flip ^= FLIP_VERT;
    }
    if config.flip_h {
        tile.flip ^= FLIP_HORZ;
    }
    if config.flip_v {
        tile.flip ^= FLIP_VERT;
    }
}

/// Tiles on the outer perimeter of the tile matrix drain freely along
/// those sides.
fn mark_outer_edges(tiles: &mut TileGrid) {
    if let Some(first) = tiles.first_mut() {
        for tile in first.iter_mut() {
            tile.edge |= GRID_TOP;
        }
    }
    if let Some(last) = tiles.last_mut() {
        for tile in last.iter_mut() {
            tile.edge |= GRID_BOTTOM;
        }
    }
    for row in tiles.iter_mut() {
        if let Some(first) = row.first_mut() {
            first.edge |= GRID_LEFT;
        }
        if let Some(last) = row.last_mut() {
            last.edge |= GRID_RIGHT;
        }
    }
}

/// Scan for a block size near the selected one whose final row/column
/// remainder stays above the minimum.
fn suggest_tile_size(selected: usize, size: usize, min: usize) -> usize {
    let mut best = 999_999_999usize;
    for x in 1..size {
        if size % x > min && x.abs_diff(selected) < best.abs_diff(selected) {
            best = x;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use terrafill_core::io::write_geotiff;
    use terrafill_core::{GeoTransform, Raster};

    fn stage_raster(dir: &TempDir, name: &str, rows: usize, cols: usize) -> PathBuf {
        let mut raster = Raster::<f64>::filled(rows, cols, 5.0);
        raster.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        let path = dir.path().join(name);
        write_geotiff(&raster, &path).unwrap();
        path
    }

    fn many_config(input: PathBuf, dir: &TempDir) -> RunConfig {
        RunConfig {
            mode: Mode::Many,
            retention: "@evict".into(),
            input,
            output: dir.path().join("%f_out.tif").to_string_lossy().into_owned(),
            bwidth: -1,
            bheight: -1,
            flip_h: false,
            flip_v: false,
            workers: 1,
        }
    }

    #[test]
    fn test_many_mode_grid_and_edges() {
        let dir = TempDir::new().unwrap();
        stage_raster(&dir, "a.tif", 4, 4);
        stage_raster(&dir, "b.tif", 4, 4);
        stage_raster(&dir, "c.tif", 4, 4);
        stage_raster(&dir, "d.tif", 4, 4);
        let layout = dir.path().join("layout.txt");
        fs::write(&layout, "a.tif;b.tif\nc.tif;d.tif\n").unwrap();

        let config = many_config(layout, &dir);
        let (tiles, kind) = prepare(&config).unwrap();

        assert_eq!(kind, ElevKind::F64);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].len(), 2);

        assert_eq!(tiles[0][0].edge, GRID_TOP | GRID_LEFT);
        assert_eq!(tiles[0][1].edge, GRID_TOP | GRID_RIGHT);
        assert_eq!(tiles[1][0].edge, GRID_BOTTOM | GRID_LEFT);
        assert_eq!(tiles[1][1].edge, GRID_BOTTOM | GRID_RIGHT);

        assert!(tiles[0][0]
            .outputname
            .to_string_lossy()
            .ends_with("a_out.tif"));

        // The output layout mirrors the input grid
        let out_layout = Layout::read(&dir.path().join("layout_out.tif")).unwrap();
        assert_eq!(out_layout.height(), 2);
        assert_eq!(out_layout.width(), 2);
    }

    #[test]
    fn test_many_mode_null_adjacency() {
        let dir = TempDir::new().unwrap();
        for name in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            stage_raster(&dir, &format!("{}.tif", name), 4, 4);
        }
        let layout = dir.path().join("layout.txt");
        fs::write(&layout, "a.tif;b.tif;c.tif\nd.tif;;e.tif\nf.tif;g.tif;h.tif\n").unwrap();

        let config = many_config(layout, &dir);
        let (tiles, _) = prepare(&config).unwrap();

        assert!(tiles[1][1].null_tile);
        // Tiles around the hole drain toward it
        assert_ne!(tiles[0][1].edge & GRID_BOTTOM, 0);
        assert_ne!(tiles[2][1].edge & GRID_TOP, 0);
        assert_ne!(tiles[1][2].edge & GRID_LEFT, 0);
        assert_ne!(tiles[1][0].edge & GRID_RIGHT, 0);
    }

    #[test]
    fn test_null_adjacency_guards_skip_first_row_and_column() {
        let dir = TempDir::new().unwrap();
        for name in ["a", "c", "d", "e", "f"] {
            stage_raster(&dir, &format!("{}.tif", name), 4, 4);
        }
        let layout = dir.path().join("layout.txt");
        fs::write(&layout, "a.tif;;c.tif\nd.tif;e.tif;f.tif\n").unwrap();

        let config = many_config(layout, &dir);
        let (tiles, _) = prepare(&config).unwrap();

        // (1,1) sits below the hole but the y > 1 guard skips it
        assert_eq!(tiles[1][1].edge & GRID_TOP, 0);
        // (0,0) sits left of the hole but the y > 0 guard skips it
        assert_eq!(tiles[0][0].edge & GRID_RIGHT, 0);
        // (0,2) sits right of the hole; same guard
        assert_eq!(tiles[0][2].edge & GRID_LEFT, 0);
    }

    #[test]
    fn test_one_mode_partitions_and_clamps() {
        let dir = TempDir::new().unwrap();
        let input = stage_raster(&dir, "big.tif", 250, 370);

        let config = RunConfig {
            mode: Mode::One,
            retention: "@retain".into(),
            input,
            output: dir.path().join("out_%n.tif").to_string_lossy().into_owned(),
            bwidth: 200,
            bheight: 130,
            flip_h: false,
            flip_v: false,
            workers: 1,
        };
        let (tiles, _) = prepare(&config).unwrap();

        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].len(), 2);
        // Last column and row clamp to the raster extent
        assert_eq!(tiles[0][1].width, 170);
        assert_eq!(tiles[1][0].height, 120);
        assert_eq!(tiles[1][1].x, 200);
        assert_eq!(tiles[1][1].y, 130);
        assert!(!tiles[0][0].many);
        assert!(tiles[0][0]
            .outputname
            .to_string_lossy()
            .ends_with("out_0_0.tif"));
    }

    #[test]
    fn test_one_mode_rejects_slivers_with_suggestion() {
        let dir = TempDir::new().unwrap();
        let input = stage_raster(&dir, "big.tif", 150, 199);

        let config = RunConfig {
            mode: Mode::One,
            retention: "@evict".into(),
            input,
            output: dir.path().join("out_%n.tif").to_string_lossy().into_owned(),
            bwidth: 150,
            bheight: -1,
            flip_h: false,
            flip_v: false,
            workers: 1,
        };
        // Second column would be 49 cells wide
        let result = prepare(&config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_one_mode_requires_loc_substitution() {
        let dir = TempDir::new().unwrap();
        let input = stage_raster(&dir, "big.tif", 120, 120);

        let config = RunConfig {
            mode: Mode::One,
            retention: "@evict".into(),
            input,
            output: dir.path().join("out.tif").to_string_lossy().into_owned(),
            bwidth: -1,
            bheight: -1,
            flip_h: false,
            flip_v: false,
            workers: 1,
        };
        assert!(matches!(prepare(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_user_flip_xors_geotransform_flip() {
        let dir = TempDir::new().unwrap();
        // South-up raster: positive pixel height
        let mut raster = Raster::<f64>::filled(120, 120, 5.0);
        raster.set_transform(GeoTransform::new(0.0, 0.0, 1.0, 1.0));
        let input = dir.path().join("southup.tif");
        write_geotiff(&raster, &input).unwrap();

        let mut config = RunConfig {
            mode: Mode::One,
            retention: "@evict".into(),
            input,
            output: dir.path().join("out_%n.tif").to_string_lossy().into_owned(),
            bwidth: -1,
            bheight: -1,
            flip_h: false,
            flip_v: false,
            workers: 1,
        };
        let (tiles, _) = prepare(&config).unwrap();
        assert_eq!(tiles[0][0].flip, FLIP_VERT);

        // A user flip on top cancels the geotransform's
        config.flip_v = true;
        let (tiles, _) = prepare(&config).unwrap();
        assert_eq!(tiles[0][0].flip, 0);
    }

    #[test]
    fn test_suggest_tile_size() {
        let suggestion = suggest_tile_size(150, 350, 100);
        assert_eq!(suggestion, 124);
        assert!(350 % suggestion > 100);
    }
}
