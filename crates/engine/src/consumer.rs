//! Consumer: a single-tile worker
//!
//! Each consumer owns one tile at a time and processes jobs synchronously
//! in a blocking receive loop. A phase-1 job loads the tile, floods it and
//! ships the perimeter summary back; a phase-2 job restores the tile per
//! its retention strategy, applies the fill-elevation slice and writes the
//! output raster. A fatal error is reported as a fault and ends the
//! consumer; the producer aborts the run.

use crate::comm::ConsumerComm;
use crate::flood::flood_tile;
use crate::graph::SpilloverGraph;
use crate::messages::{Job1, TimeInfo, ToConsumer, ToProducer};
use crate::tile::{Label, Retention, TileInfo, FLIP_HORZ, FLIP_VERT};
use crate::timing::{process_mem_usage, Timer};
use std::collections::HashMap;
use std::mem;
use std::path::{Path, PathBuf};
use terrafill_core::io::{dump_raster, load_raster, read_geotiff, read_window, write_geotiff, TiffElement};
use terrafill_core::{Error, Raster, Result};
use tracing::error;

/// Tiles retained in consumer memory between the phases, keyed by grid
/// position.
type Storage<T> = HashMap<(usize, usize), (Raster<T>, Raster<Label>)>;

/// Run a consumer until it is killed or faults.
pub fn run<T: TiffElement>(comm: ConsumerComm<T>) {
    let mut storage: Storage<T> = HashMap::new();

    loop {
        let msg = match comm.recv() {
            Ok(msg) => msg,
            Err(_) => return,
        };

        match msg {
            ToConsumer::Kill => return,

            ToConsumer::JobFirst(tile) => match first_job(&tile, &mut storage) {
                Ok(job1) => {
                    if comm.send(ToProducer::DoneFirst(Box::new(job1))).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("E {}", e);
                    let _ = comm.send(ToProducer::Fault(e.to_string()));
                    return;
                }
            },

            ToConsumer::JobSecond { tile, fill } => match second_job(&tile, &fill, &mut storage) {
                Ok(time_info) => {
                    if comm.send(ToProducer::DoneSecond(time_info)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("E {}", e);
                    let _ = comm.send(ToProducer::Fault(e.to_string()));
                    return;
                }
            },
        }
    }
}

fn first_job<T: TiffElement>(tile: &TileInfo, storage: &mut Storage<T>) -> Result<Job1<T>> {
    let mut timer_overall = Timer::default();
    timer_overall.start();

    let mut worker = Worker::load_from_source(tile)?;
    let mut job1 = worker.first_round(tile);

    let (calc, io) = match &tile.retention {
        // Nothing to hold: phase 2 re-reads and re-floods the source
        Retention::Evict => worker.timer_totals(),
        Retention::Cache(base) => {
            worker.save_to_cache(base)?;
            worker.timer_totals()
        }
        Retention::Retain => {
            let totals = worker.timer_totals();
            worker.into_retained(tile, storage);
            totals
        }
    };

    timer_overall.stop();
    let (vmpeak, vmhwm) = process_mem_usage();
    job1.time_info = TimeInfo::new(calc, timer_overall.accumulated(), io, vmpeak, vmhwm);
    Ok(job1)
}

fn second_job<T: TiffElement>(
    tile: &TileInfo,
    fill: &[T],
    storage: &mut Storage<T>,
) -> Result<TimeInfo> {
    let mut timer_overall = Timer::default();
    timer_overall.start();

    let mut worker = match &tile.retention {
        // The labels were never persisted: reload and re-flood
        Retention::Evict => Worker::load_from_source(tile)?,
        Retention::Retain => Worker::load_from_retain(tile, storage)?,
        Retention::Cache(base) => Worker::load_from_cache(base)?,
    };

    worker.apply_fill(fill);
    worker.write_output(tile)?;

    timer_overall.stop();
    let (vmpeak, vmhwm) = process_mem_usage();
    Ok(TimeInfo::new(
        worker.timer_calc.accumulated(),
        timer_overall.accumulated(),
        worker.timer_io.accumulated(),
        vmpeak,
        vmhwm,
    ))
}

/// The tile state a consumer holds while working one job.
struct Worker<T: TiffElement> {
    dem: Raster<T>,
    labels: Raster<Label>,
    graph: SpilloverGraph<T>,
    timer_io: Timer,
    timer_calc: Timer,
}

impl<T: TiffElement> Worker<T> {
    /// Read the tile from its source file and flood it.
    fn load_from_source(tile: &TileInfo) -> Result<Self> {
        let mut timer_io = Timer::default();
        let mut timer_calc = Timer::default();

        timer_io.start();
        let mut dem: Raster<T> = if tile.many {
            let dem = read_geotiff(&tile.filename)?;
            if dem.cols() != tile.width {
                return Err(Error::TileSizeMismatch {
                    path: tile.filename.clone(),
                    axis: "width",
                    found: dem.cols(),
                    expected: tile.width,
                });
            }
            if dem.rows() != tile.height {
                return Err(Error::TileSizeMismatch {
                    path: tile.filename.clone(),
                    axis: "height",
                    found: dem.rows(),
                    expected: tile.height,
                });
            }
            dem
        } else {
            read_window(&tile.filename, tile.x, tile.y, tile.width, tile.height)?
        };
        timer_io.stop();

        let mut labels: Raster<Label> = dem.with_same_meta(tile.height, tile.width);

        timer_calc.start();
        let graph = flood_tile(&mut dem, &mut labels, tile.edge, tile.flip);
        timer_calc.stop();

        Ok(Self {
            dem,
            labels,
            graph,
            timer_io,
            timer_calc,
        })
    }

    /// Assemble the phase-1 reply: move the spillover graph out and copy
    /// the four perimeters of both grids, reoriented to world order.
    ///
    /// Only the perimeters are ever reoriented; flipping the tile bulk
    /// would shuffle the whole grid for no benefit, since nothing else
    /// crosses the tile-boundary join.
    fn first_round(&mut self, tile: &TileInfo) -> Job1<T> {
        let mut job = Job1::for_grid_pos(tile.gridx, tile.gridy);
        job.graph = mem::take(&mut self.graph);

        job.top_elev = self.dem.top_row();
        job.bot_elev = self.dem.bottom_row();
        job.left_elev = self.dem.left_column();
        job.right_elev = self.dem.right_column();

        job.top_label = self.labels.top_row();
        job.bot_label = self.labels.bottom_row();
        job.left_label = self.labels.left_column();
        job.right_label = self.labels.right_column();

        if tile.flip & FLIP_VERT != 0 {
            mem::swap(&mut job.top_elev, &mut job.bot_elev);
            mem::swap(&mut job.top_label, &mut job.bot_label);
            job.left_elev.reverse();
            job.right_elev.reverse();
            job.left_label.reverse();
            job.right_label.reverse();
        }
        if tile.flip & FLIP_HORZ != 0 {
            mem::swap(&mut job.left_elev, &mut job.right_elev);
            mem::swap(&mut job.left_label, &mut job.right_label);
            job.top_elev.reverse();
            job.bot_elev.reverse();
            job.top_label.reverse();
            job.bot_label.reverse();
        }

        job
    }

    /// Raise every cell of a local watershed to that watershed's global
    /// fill elevation. Label 1 cells already sit at their final level.
    fn apply_fill(&mut self, fill: &[T]) {
        self.timer_calc.start();
        let labels = self.labels.data();
        let dem = self.dem.data_mut();
        for ((r, c), &label) in labels.indexed_iter() {
            if label > 1 {
                let target = fill[label as usize];
                if dem[(r, c)] < target {
                    dem[(r, c)] = target;
                }
            }
        }
        self.timer_calc.stop();
    }

    /// Accumulated (calc, io) seconds for this job so far.
    fn timer_totals(&self) -> (f64, f64) {
        (self.timer_calc.accumulated(), self.timer_io.accumulated())
    }

    fn write_output(&mut self, tile: &TileInfo) -> Result<()> {
        self.timer_io.start();
        write_geotiff(&self.dem, &tile.outputname)?;
        self.timer_io.stop();
        Ok(())
    }

    fn into_retained(self, tile: &TileInfo, storage: &mut Storage<T>) {
        storage.insert((tile.gridy, tile.gridx), (self.dem, self.labels));
    }

    fn load_from_retain(tile: &TileInfo, storage: &mut Storage<T>) -> Result<Self> {
        let (dem, labels) = storage
            .remove(&(tile.gridy, tile.gridx))
            .ok_or_else(|| Error::Other(format!(
                "tile ({}, {}) was not retained",
                tile.gridy, tile.gridx
            )))?;
        Ok(Self {
            dem,
            labels,
            graph: SpilloverGraph::default(),
            timer_io: Timer::default(),
            timer_calc: Timer::default(),
        })
    }

    fn save_to_cache(&mut self, base: &Path) -> Result<()> {
        self.timer_io.start();
        dump_raster(&self.dem, &cache_path(base, "dem.dat"))?;
        dump_raster(&self.labels, &cache_path(base, "labels.dat"))?;
        self.timer_io.stop();
        Ok(())
    }

    fn load_from_cache(base: &Path) -> Result<Self> {
        let mut timer_io = Timer::default();
        timer_io.start();
        let dem: Raster<T> = load_raster(&cache_path(base, "dem.dat"))?;
        let labels: Raster<Label> = load_raster(&cache_path(base, "labels.dat"))?;
        timer_io.stop();
        Ok(Self {
            dem,
            labels,
            graph: SpilloverGraph::default(),
            timer_io,
            timer_calc: Timer::default(),
        })
    }
}

/// Cache file name: the per-tile retention prefix with a grid suffix
/// appended. The prefix already carries the tile identifier from `%f`/`%n`
/// substitution, so concurrent consumers never collide.
fn cache_path(base: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", base.display(), suffix))
}
