//! # TerraFill Engine
//!
//! Distributed two-phase priority-flood depression filling for tiled
//! digital elevation models, after Barnes (2016).
//!
//! The input raster is divided into tiles. Phase 1 floods each tile
//! independently, labeling watersheds and summarizing its perimeter
//! interactions into a compact spillover graph. The producer joins the
//! per-tile graphs across tile boundaries, floods the joined graph to
//! obtain a global fill elevation per watershed, and phase 2 applies those
//! elevations back to each tile. Memory stays bounded by the tile size
//! and the perimeter summaries, never the full raster.
//!
//! One producer and `N` consumers run as threads of a single process,
//! exchanging tagged messages over channels; each consumer works one tile
//! at a time with no internal concurrency.

pub mod aggregate;
pub mod comm;
pub mod consumer;
pub mod flood;
pub mod graph;
pub mod messages;
pub mod prepare;
pub mod producer;
pub mod tile;
pub mod timing;

pub use prepare::{prepare, Mode, RunConfig};
pub use terrafill_core::io::ElevKind;
pub use terrafill_core::{Error, Result};
pub use tile::{Label, TileGrid, TileInfo};

use terrafill_core::io::TiffElement;
use tracing::info;

/// Partition the input and run both phases to completion.
pub fn run(config: &RunConfig) -> Result<()> {
    let (tiles, kind) = prepare(config)?;
    execute(tiles, kind, config)
}

/// Run both phases over an already-partitioned tile matrix, dispatching on
/// the probed element kind.
pub fn execute(tiles: TileGrid, kind: ElevKind, config: &RunConfig) -> Result<()> {
    match kind {
        ElevKind::U8 => drive::<u8>(tiles, config),
        ElevKind::U16 => drive::<u16>(tiles, config),
        ElevKind::I16 => drive::<i16>(tiles, config),
        ElevKind::U32 => drive::<u32>(tiles, config),
        ElevKind::I32 => drive::<i32>(tiles, config),
        ElevKind::F32 => drive::<f32>(tiles, config),
        ElevKind::F64 => drive::<f64>(tiles, config),
    }
}

fn drive<T: TiffElement>(mut tiles: TileGrid, config: &RunConfig) -> Result<()> {
    if config.workers == 0 {
        return Err(Error::Config(
            "must run with at least two participants: one producer and one consumer".into(),
        ));
    }

    let (mut producer_comm, endpoints) = comm::channel_mesh::<T>(config.workers);
    info!("c Running with = {} processes", producer_comm.size());

    std::thread::scope(|scope| {
        for endpoint in endpoints {
            scope.spawn(move || consumer::run(endpoint));
        }
        producer::run(&mut producer_comm, &mut tiles)
    })
}
