//! End-to-end runs of the two-phase engine over staged tile files.
//!
//! Every test stages real TIFF tiles in a temporary directory, runs the
//! producer/consumer pipeline, and reads the written outputs back.

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use terrafill_core::io::{read_geotiff, write_geotiff};
use terrafill_core::{GeoTransform, Raster, RasterElement};
use terrafill_engine::flood::flood_tile;
use terrafill_engine::tile::{GRID_BOTTOM, GRID_LEFT, GRID_RIGHT, GRID_TOP};
use terrafill_engine::{run, Mode, RunConfig};

const ALL_EDGES: u8 = GRID_TOP | GRID_BOTTOM | GRID_LEFT | GRID_RIGHT;

fn north_up(rows: usize) -> GeoTransform {
    GeoTransform::new(0.0, rows as f64, 1.0, -1.0)
}

fn write_tile(dir: &Path, name: &str, rows: usize, cols: usize, values: Vec<f64>) {
    let mut raster = Raster::from_vec(values, rows, cols).unwrap();
    raster.set_transform(north_up(rows));
    write_geotiff(&raster, &dir.join(name)).unwrap();
}

fn many_config(dir: &Path, retention: &str, workers: usize) -> RunConfig {
    RunConfig {
        mode: Mode::Many,
        retention: retention.to_string(),
        input: dir.join("layout.txt"),
        output: dir.join("%f_filled.tif").to_string_lossy().into_owned(),
        bwidth: -1,
        bheight: -1,
        flip_h: false,
        flip_v: false,
        workers,
    }
}

fn run_many(dir: &Path, layout_text: &str, retention: &str, workers: usize) {
    fs::write(dir.join("layout.txt"), layout_text).unwrap();
    run(&many_config(dir, retention, workers)).unwrap();
}

fn read_filled(dir: &Path, base: &str) -> Raster<f64> {
    read_geotiff(&dir.join(format!("{}_filled.tif", base))).unwrap()
}

fn cells<T: RasterElement>(raster: &Raster<T>) -> Vec<T> {
    raster.data().iter().copied().collect()
}

// ─── Scenarios ──────────────────────────────────────────────────────────

#[test]
fn flat_square_is_untouched() {
    let dir = TempDir::new().unwrap();
    for name in ["a", "b", "c", "d"] {
        write_tile(dir.path(), &format!("{}.tif", name), 5, 5, vec![5.0; 25]);
    }
    run_many(dir.path(), "a.tif;b.tif\nc.tif;d.tif\n", "@evict", 2);

    for name in ["a", "b", "c", "d"] {
        let out = read_filled(dir.path(), name);
        assert_eq!(cells(&out), vec![5.0; 25], "tile {} changed", name);
    }
}

#[test]
fn single_pit_fills_to_its_ring() {
    let dir = TempDir::new().unwrap();
    let mut values = vec![10.0; 25];
    values[2 * 5 + 2] = 3.0;
    write_tile(dir.path(), "pit.tif", 5, 5, values);

    run_many(dir.path(), "pit.tif\n", "@evict", 2);

    let out = read_filled(dir.path(), "pit");
    assert_eq!(out.get(2, 2).unwrap(), 10.0);
    for ((r, c), &v) in out.data().indexed_iter() {
        if (r, c) != (2, 2) {
            assert_eq!(v, 10.0);
        }
    }
}

#[test]
fn pit_spills_across_the_tile_boundary() {
    // The left tile's pit can only escape through the pass at 5 on its
    // right side, into the all-5 right tile, and on out of the raster.
    let dir = TempDir::new().unwrap();
    write_tile(
        dir.path(),
        "left.tif",
        3,
        3,
        vec![
            9.0, 9.0, 9.0, //
            9.0, 1.0, 5.0, //
            9.0, 9.0, 9.0,
        ],
    );
    write_tile(dir.path(), "right.tif", 3, 3, vec![5.0; 9]);

    run_many(dir.path(), "left.tif;right.tif\n", "@evict", 2);

    let left = read_filled(dir.path(), "left");
    assert_eq!(left.get(1, 1).unwrap(), 5.0, "pit fills to the pass level");
    assert_eq!(left.get(1, 2).unwrap(), 5.0);
    for ((r, c), &v) in left.data().indexed_iter() {
        if r != 1 {
            assert_eq!(v, 9.0, "ring cell ({}, {}) must not move", r, c);
        }
    }

    let right = read_filled(dir.path(), "right");
    assert_eq!(cells(&right), vec![5.0; 9]);
}

#[test]
fn null_tile_moat_drains_everything() {
    let dir = TempDir::new().unwrap();
    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    for name in names {
        write_tile(dir.path(), &format!("{}.tif", name), 4, 4, vec![7.0; 16]);
    }
    run_many(
        dir.path(),
        "a.tif;b.tif;c.tif\nd.tif;;e.tif\nf.tif;g.tif;h.tif\n",
        "@evict",
        3,
    );

    for name in names {
        let out = read_filled(dir.path(), name);
        assert_eq!(cells(&out), vec![7.0; 16], "tile {} changed", name);
    }

    // The output layout mirrors the input, hole included
    let layout_text = fs::read_to_string(
        dir.path().join("layout_filled.tif"),
    )
    .unwrap();
    let second_row: Vec<&str> = layout_text.lines().nth(1).unwrap().split(';').collect();
    assert_eq!(second_row[1], "");
}

#[test]
fn integer_and_float_runs_raise_the_same_cells() {
    let pattern: Vec<f64> = vec![
        9.0, 9.0, 9.0, //
        9.0, 1.0, 5.0, //
        9.0, 9.0, 9.0,
    ];

    let f_dir = TempDir::new().unwrap();
    write_tile(f_dir.path(), "left.tif", 3, 3, pattern.clone());
    write_tile(f_dir.path(), "right.tif", 3, 3, vec![5.0; 9]);
    run_many(f_dir.path(), "left.tif;right.tif\n", "@evict", 2);

    let i_dir = TempDir::new().unwrap();
    let mut left_i = Raster::<i32>::from_vec(pattern.iter().map(|&v| v as i32).collect(), 3, 3).unwrap();
    left_i.set_transform(north_up(3));
    write_geotiff(&left_i, &i_dir.path().join("left.tif")).unwrap();
    let mut right_i = Raster::<i32>::filled(3, 3, 5);
    right_i.set_transform(north_up(3));
    write_geotiff(&right_i, &i_dir.path().join("right.tif")).unwrap();
    run_many(i_dir.path(), "left.tif;right.tif\n", "@evict", 2);

    let left_f = read_filled(f_dir.path(), "left");
    let left_i_out: Raster<i32> =
        read_geotiff(&i_dir.path().join("left_filled.tif")).unwrap();

    for ((r, c), &v) in left_i_out.data().indexed_iter() {
        assert_eq!(f64::from(v), left_f.get(r, c).unwrap(), "cell ({}, {})", r, c);
    }
}

#[test]
fn retention_strategies_agree_bit_for_bit() {
    let stage = |dir: &Path| {
        write_tile(
            dir,
            "left.tif",
            3,
            3,
            vec![
                9.0, 9.0, 9.0, //
                9.0, 1.0, 5.0, //
                9.0, 9.0, 9.0,
            ],
        );
        write_tile(dir, "right.tif", 3, 3, vec![5.0; 9]);
    };

    let evict = TempDir::new().unwrap();
    stage(evict.path());
    run_many(evict.path(), "left.tif;right.tif\n", "@evict", 2);

    let retain = TempDir::new().unwrap();
    stage(retain.path());
    run_many(retain.path(), "left.tif;right.tif\n", "@retain", 2);

    let cached = TempDir::new().unwrap();
    stage(cached.path());
    let cache_template = cached
        .path()
        .join("cache_%n_")
        .to_string_lossy()
        .into_owned();
    run_many(cached.path(), "left.tif;right.tif\n", &cache_template, 2);

    for base in ["left", "right"] {
        let a = cells(&read_filled(evict.path(), base));
        let b = cells(&read_filled(retain.path(), base));
        let c = cells(&read_filled(cached.path(), base));
        assert_eq!(a, b, "evict vs retain on {}", base);
        assert_eq!(a, c, "evict vs cache on {}", base);
    }
}

// ─── Laws ───────────────────────────────────────────────────────────────

/// An 8x8 raster with a pit straddling all four quadrants.
fn quad_pit_raster() -> Vec<f64> {
    let mut values: Vec<f64> = (0..64)
        .map(|i| {
            let (r, c) = (i / 8, i % 8);
            ((r * 13 + c * 7) % 5) as f64 + 5.0
        })
        .collect();
    for (r, c) in [(3, 3), (3, 4), (4, 3), (4, 4)] {
        values[r * 8 + c] = 1.0;
    }
    values
}

fn quadrant(values: &[f64], r0: usize, c0: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(16);
    for r in 0..4 {
        for c in 0..4 {
            out.push(values[(r0 + r) * 8 + (c0 + c)]);
        }
    }
    out
}

#[test]
fn tile_partition_does_not_change_the_answer() {
    let values = quad_pit_raster();

    // Whole raster as one tile
    let whole = TempDir::new().unwrap();
    write_tile(whole.path(), "all.tif", 8, 8, values.clone());
    run_many(whole.path(), "all.tif\n", "@evict", 2);
    let whole_out = read_filled(whole.path(), "all");

    // Same raster as 2x2 tiles of 4x4
    let split = TempDir::new().unwrap();
    write_tile(split.path(), "nw.tif", 4, 4, quadrant(&values, 0, 0));
    write_tile(split.path(), "ne.tif", 4, 4, quadrant(&values, 0, 4));
    write_tile(split.path(), "sw.tif", 4, 4, quadrant(&values, 4, 0));
    write_tile(split.path(), "se.tif", 4, 4, quadrant(&values, 4, 4));
    run_many(split.path(), "nw.tif;ne.tif\nsw.tif;se.tif\n", "@evict", 3);

    for (name, r0, c0) in [("nw", 0, 0), ("ne", 0, 4), ("sw", 4, 0), ("se", 4, 4)] {
        let tile_out = read_filled(split.path(), name);
        for ((r, c), &v) in tile_out.data().indexed_iter() {
            assert_eq!(
                v,
                whole_out.get(r0 + r, c0 + c).unwrap(),
                "{} cell ({}, {})",
                name,
                r,
                c
            );
        }
    }
}

#[test]
fn single_tile_run_equals_serial_flood() {
    let values = quad_pit_raster();

    let dir = TempDir::new().unwrap();
    write_tile(dir.path(), "all.tif", 8, 8, values.clone());
    run_many(dir.path(), "all.tif\n", "@evict", 2);
    let pipeline_out = read_filled(dir.path(), "all");

    let mut serial = Raster::from_vec(values, 8, 8).unwrap();
    let mut labels = serial.with_same_meta::<u32>(8, 8);
    flood_tile(&mut serial, &mut labels, ALL_EDGES, 0);

    assert_eq!(cells(&pipeline_out), cells(&serial));
}

#[test]
fn output_never_below_input() {
    let values = quad_pit_raster();
    let dir = TempDir::new().unwrap();
    write_tile(dir.path(), "nw.tif", 4, 4, quadrant(&values, 0, 0));
    write_tile(dir.path(), "ne.tif", 4, 4, quadrant(&values, 0, 4));
    write_tile(dir.path(), "sw.tif", 4, 4, quadrant(&values, 4, 0));
    write_tile(dir.path(), "se.tif", 4, 4, quadrant(&values, 4, 4));
    run_many(dir.path(), "nw.tif;ne.tif\nsw.tif;se.tif\n", "@retain", 2);

    for (name, r0, c0) in [("nw", 0, 0), ("ne", 0, 4), ("sw", 4, 0), ("se", 4, 4)] {
        let out = read_filled(dir.path(), name);
        for ((r, c), &v) in out.data().indexed_iter() {
            assert!(v >= values[(r0 + r) * 8 + (c0 + c)], "{} ({}, {})", name, r, c);
        }
    }
}

#[test]
fn filling_is_idempotent() {
    let values = quad_pit_raster();

    let dir = TempDir::new().unwrap();
    write_tile(dir.path(), "nw.tif", 4, 4, quadrant(&values, 0, 0));
    write_tile(dir.path(), "ne.tif", 4, 4, quadrant(&values, 0, 4));
    write_tile(dir.path(), "sw.tif", 4, 4, quadrant(&values, 4, 0));
    write_tile(dir.path(), "se.tif", 4, 4, quadrant(&values, 4, 4));
    run_many(dir.path(), "nw.tif;ne.tif\nsw.tif;se.tif\n", "@evict", 2);

    // Feed the filled tiles back through as a second run
    fs::write(
        dir.path().join("layout2.txt"),
        "nw_filled.tif;ne_filled.tif\nsw_filled.tif;se_filled.tif\n",
    )
    .unwrap();
    let config = RunConfig {
        mode: Mode::Many,
        retention: "@evict".to_string(),
        input: dir.path().join("layout2.txt"),
        output: dir.path().join("%f_again.tif").to_string_lossy().into_owned(),
        bwidth: -1,
        bheight: -1,
        flip_h: false,
        flip_v: false,
        workers: 2,
    };
    run(&config).unwrap();

    for name in ["nw", "ne", "sw", "se"] {
        let first = read_filled(dir.path(), name);
        let second: Raster<f64> = read_geotiff(
            &dir.path().join(format!("{}_filled_again.tif", name)),
        )
        .unwrap();
        assert_eq!(cells(&first), cells(&second), "tile {}", name);
    }
}

#[test]
fn flipped_input_unflips_to_the_same_answer() {
    // Run the bridge both north-up and stored vertically mirrored (with a
    // south-up geotransform, so the flip mask is derived, not requested).
    // The left tile is vertically asymmetric so a mishandled flip cannot
    // cancel out.
    let left = vec![
        9.0, 9.0, 9.0, //
        9.0, 1.0, 5.0, //
        8.0, 8.0, 8.0,
    ];

    let plain = TempDir::new().unwrap();
    write_tile(plain.path(), "left.tif", 3, 3, left.clone());
    write_tile(plain.path(), "right.tif", 3, 3, vec![5.0; 9]);
    run_many(plain.path(), "left.tif;right.tif\n", "@evict", 2);

    let flipped = TempDir::new().unwrap();
    let flip_rows = |v: &[f64]| -> Vec<f64> {
        let mut out = Vec::with_capacity(v.len());
        for r in (0..3).rev() {
            out.extend_from_slice(&v[r * 3..r * 3 + 3]);
        }
        out
    };
    let south_up = GeoTransform::new(0.0, 0.0, 1.0, 1.0);
    let mut left_f = Raster::from_vec(flip_rows(&left), 3, 3).unwrap();
    left_f.set_transform(south_up);
    write_geotiff(&left_f, &flipped.path().join("left.tif")).unwrap();
    let mut right_f = Raster::<f64>::filled(3, 3, 5.0);
    right_f.set_transform(south_up);
    write_geotiff(&right_f, &flipped.path().join("right.tif")).unwrap();
    run_many(flipped.path(), "left.tif;right.tif\n", "@evict", 2);

    for base in ["left", "right"] {
        let plain_out = cells(&read_filled(plain.path(), base));
        let flipped_out = cells(&read_filled(flipped.path(), base));
        assert_eq!(
            plain_out,
            flip_rows(&flipped_out),
            "unflipped {} output differs",
            base
        );
    }
}

#[test]
fn one_mode_matches_whole_raster_run() {
    // 120x240 raster with a pit straddling the seam between two 120x120
    // blocks
    let rows = 120;
    let cols = 240;
    let mut values: Vec<f64> = (0..rows * cols)
        .map(|i| {
            let (r, c) = (i / cols, i % cols);
            ((r * 13 + c * 7) % 5) as f64 + 5.0
        })
        .collect();
    for r in 58..62 {
        for c in 118..122 {
            values[r * cols + c] = 1.0;
        }
    }

    let stage_one = |dir: &Path, bwidth: i64| -> RunConfig {
        let mut raster = Raster::from_vec(values.clone(), rows, cols).unwrap();
        raster.set_transform(north_up(rows));
        write_geotiff(&raster, &dir.join("big.tif")).unwrap();
        RunConfig {
            mode: Mode::One,
            retention: "@retain".to_string(),
            input: dir.join("big.tif"),
            output: dir.join("out_%n.tif").to_string_lossy().into_owned(),
            bwidth,
            bheight: -1,
            flip_h: false,
            flip_v: false,
            workers: 2,
        }
    };

    let whole = TempDir::new().unwrap();
    run(&stage_one(whole.path(), -1)).unwrap();
    let whole_out: Raster<f64> = read_geotiff(&whole.path().join("out_0_0.tif")).unwrap();

    let split = TempDir::new().unwrap();
    run(&stage_one(split.path(), 120)).unwrap();
    let left_out: Raster<f64> = read_geotiff(&split.path().join("out_0_0.tif")).unwrap();
    let right_out: Raster<f64> = read_geotiff(&split.path().join("out_1_0.tif")).unwrap();

    assert_eq!(left_out.shape(), (120, 120));
    assert_eq!(right_out.shape(), (120, 120));

    for ((r, c), &v) in left_out.data().indexed_iter() {
        assert_eq!(v, whole_out.get(r, c).unwrap(), "left ({}, {})", r, c);
    }
    for ((r, c), &v) in right_out.data().indexed_iter() {
        assert_eq!(v, whole_out.get(r, c + 120).unwrap(), "right ({}, {})", r, c);
    }

    // The pit itself was raised to its true spill level, never lowered
    for r in 58..62 {
        for c in 118..122 {
            assert!(whole_out.get(r, c).unwrap() >= 1.0);
            assert!(whole_out.get(r, c).unwrap() <= 9.0);
        }
    }
}

#[test]
fn downhill_paths_exist_after_filling() {
    // Invariant: from every cell there is a monotonically non-increasing
    // path to the raster boundary.
    let values = quad_pit_raster();
    let dir = TempDir::new().unwrap();
    write_tile(dir.path(), "all.tif", 8, 8, values);
    run_many(dir.path(), "all.tif\n", "@evict", 2);
    let out = read_filled(dir.path(), "all");

    // Flood-fill along non-increasing steps from the boundary inward;
    // every cell must be reachable.
    let (rows, cols) = out.shape();
    let mut drained = vec![false; rows * cols];
    let mut frontier: Vec<(usize, usize)> = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            if r == 0 || r == rows - 1 || c == 0 || c == cols - 1 {
                drained[r * cols + c] = true;
                frontier.push((r, c));
            }
        }
    }
    while let Some((r, c)) = frontier.pop() {
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                if drained[nr * cols + nc] {
                    continue;
                }
                // Water flows from the higher (or equal) inner cell out
                if out.get(nr, nc).unwrap() >= out.get(r, c).unwrap() {
                    drained[nr * cols + nc] = true;
                    frontier.push((nr, nc));
                }
            }
        }
    }
    assert!(drained.iter().all(|&d| d), "some cell cannot drain");
}
