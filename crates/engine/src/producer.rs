//! Producer: job dispatch and the global solve
//!
//! The producer walks the tile matrix twice. Phase 1 round-robins every
//! non-null tile to the consumers and collects their perimeter summaries;
//! the spillover graphs are then merged and flooded to obtain the global
//! fill-elevation table. Phase 2 sends each tile its slice of that table
//! and collects timing reports. Finally every consumer is told to quit.

use crate::aggregate::aggregate_flood;
use crate::comm::ProducerComm;
use crate::graph::build_master;
use crate::messages::{Job1, Job1Grid, TimeInfo, ToConsumer, ToProducer};
use crate::tile::TileGrid;
use crate::timing::{process_mem_usage, Timer};
use terrafill_core::{Error, Result};
use tracing::info;

/// Run both phases over the tile matrix. Always shuts the consumers down,
/// whether the run succeeded or failed.
pub fn run<T: terrafill_core::RasterElement>(
    comm: &mut ProducerComm<T>,
    tiles: &mut TileGrid,
) -> Result<()> {
    let result = run_phases(comm, tiles);
    comm.kill_all();
    result
}

fn run_phases<T: terrafill_core::RasterElement>(
    comm: &mut ProducerComm<T>,
    tiles: &mut TileGrid,
) -> Result<()> {
    let mut timer_overall = Timer::default();
    let mut timer_calc = Timer::default();
    timer_overall.start();

    let gridheight = tiles.len();
    let gridwidth = tiles.first().map_or(0, |r| r.len());
    let active_consumer_limit = comm.consumers();

    ////////////////////////////////////////////////////////////
    // Phase 1: dispatch every non-null tile round-robin

    let mut jobs_out = 0usize;
    for y in 0..gridheight {
        for x in 0..gridwidth {
            if tiles[y][x].null_tile {
                continue;
            }
            let rank = (jobs_out % active_consumer_limit) + 1;
            comm.send(rank, ToConsumer::JobFirst(Box::new(tiles[y][x].clone())))?;
            jobs_out += 1;
        }
    }
    info!("m Jobs created = {}", jobs_out);

    let mut jobs1: Job1Grid<T> = vec![vec![Job1::default(); gridwidth]; gridheight];
    let mut remaining = jobs_out;
    while remaining > 0 {
        remaining -= 1;
        info!("p Jobs remaining = {}", remaining);
        match comm.recv()? {
            ToProducer::DoneFirst(job) => {
                let (gy, gx) = (job.gridy, job.gridx);
                jobs1[gy][gx] = *job;
            }
            ToProducer::Fault(msg) => {
                return Err(Error::Other(format!("consumer fault: {}", msg)))
            }
            ToProducer::DoneSecond(_) => {
                return Err(Error::Comm("unexpected phase-2 reply during phase 1".into()))
            }
        }
    }

    info!("n First stage Tx = {} B", comm.bytes_sent());
    info!("n First stage Rx = {} B", comm.bytes_recv());
    comm.reset_bytes();

    let mut time_first_total = TimeInfo::default();
    for row in &jobs1 {
        for job in row {
            time_first_total.absorb(&job.time_info);
        }
    }

    ////////////////////////////////////////////////////////////
    // Solve the between-tile spill problem on the producer

    timer_calc.start();
    let master = build_master(tiles, &mut jobs1);
    // The perimeter payloads have served their purpose
    drop(jobs1);
    let fill_elev = aggregate_flood(&master);
    timer_calc.stop();

    ////////////////////////////////////////////////////////////
    // Phase 2: send each tile its slice of the fill table

    let mut jobs_out = 0usize;
    for y in 0..gridheight {
        for x in 0..gridwidth {
            if tiles[y][x].null_tile {
                continue;
            }
            let tile = &tiles[y][x];
            let lo = tile.label_offset as usize;
            let hi = lo + tile.label_increment as usize;
            let rank = (jobs_out % active_consumer_limit) + 1;
            comm.send(
                rank,
                ToConsumer::JobSecond {
                    tile: Box::new(tile.clone()),
                    fill: fill_elev[lo..hi].to_vec(),
                },
            )?;
            jobs_out += 1;
        }
    }
    drop(fill_elev);
    drop(master);

    let mut time_second_total = TimeInfo::default();
    let mut remaining = jobs_out;
    while remaining > 0 {
        remaining -= 1;
        info!("p Jobs left to receive = {}", remaining);
        match comm.recv()? {
            ToProducer::DoneSecond(time_info) => time_second_total.absorb(&time_info),
            ToProducer::Fault(msg) => {
                return Err(Error::Other(format!("consumer fault: {}", msg)))
            }
            ToProducer::DoneFirst(_) => {
                return Err(Error::Comm("unexpected phase-1 reply during phase 2".into()))
            }
        }
    }

    timer_overall.stop();

    info!("t First stage total overall time = {} s", time_first_total.overall);
    info!("t First stage total io time = {} s", time_first_total.io);
    info!("t First stage total calc time = {} s", time_first_total.calc);
    info!("r First stage peak child VmPeak = {}", time_first_total.vmpeak);
    info!("r First stage peak child VmHWM = {}", time_first_total.vmhwm);

    info!("n Second stage Tx = {} B", comm.bytes_sent());
    info!("n Second stage Rx = {} B", comm.bytes_recv());

    info!("t Second stage total overall time = {} s", time_second_total.overall);
    info!("t Second stage total io time = {} s", time_second_total.io);
    info!("t Second stage total calc time = {} s", time_second_total.calc);
    info!("r Second stage peak child VmPeak = {}", time_second_total.vmpeak);
    info!("r Second stage peak child VmHWM = {}", time_second_total.vmhwm);

    info!("t Producer overall time = {} s", timer_overall.accumulated());
    info!("t Producer calc time = {} s", timer_calc.accumulated());

    let (vmpeak, vmhwm) = process_mem_usage();
    info!("r Producer's VmPeak = {}", vmpeak);
    info!("r Producer's VmHWM = {}", vmhwm);

    Ok(())
}
