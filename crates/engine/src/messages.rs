//! Wire payloads exchanged between the producer and its consumers
//!
//! Message variants stand in for the tag table of the wire protocol: a
//! `JobFirst`/`JobSecond` travels producer-to-consumer, a
//! `DoneFirst`/`DoneSecond` comes back, and `Kill` ends a consumer's
//! receive loop.

use crate::graph::SpilloverGraph;
use crate::tile::{Label, TileInfo};
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Wall-clock and memory counters a consumer reports with each reply.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeInfo {
    /// Seconds spent in flood/fill computation
    pub calc: f64,
    /// Seconds for the whole job
    pub overall: f64,
    /// Seconds spent reading and writing tiles
    pub io: f64,
    /// Peak virtual memory of the reporting process, in kB
    pub vmpeak: i64,
    /// Peak resident set of the reporting process, in kB
    pub vmhwm: i64,
}

impl TimeInfo {
    pub fn new(calc: f64, overall: f64, io: f64, vmpeak: i64, vmhwm: i64) -> Self {
        Self {
            calc,
            overall,
            io,
            vmpeak,
            vmhwm,
        }
    }

    /// Fold another report into this one: times accumulate, memory peaks
    /// take the maximum.
    pub fn absorb(&mut self, other: &TimeInfo) {
        self.calc += other.calc;
        self.overall += other.overall;
        self.io += other.io;
        self.vmpeak = self.vmpeak.max(other.vmpeak);
        self.vmhwm = self.vmhwm.max(other.vmhwm);
    }
}

/// A consumer's phase-1 reply: the four perimeter elevation arrays, the
/// four perimeter label arrays (both already reoriented to world order),
/// the tile's spillover graph, and timing counters. Re-indexed on the
/// producer by the grid position carried here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job1<T> {
    pub top_elev: Vec<T>,
    pub bot_elev: Vec<T>,
    pub left_elev: Vec<T>,
    pub right_elev: Vec<T>,
    pub top_label: Vec<Label>,
    pub bot_label: Vec<Label>,
    pub left_label: Vec<Label>,
    pub right_label: Vec<Label>,
    pub graph: SpilloverGraph<T>,
    pub time_info: TimeInfo,
    pub gridy: usize,
    pub gridx: usize,
}

impl<T> Default for Job1<T> {
    fn default() -> Self {
        Self {
            top_elev: Vec::new(),
            bot_elev: Vec::new(),
            left_elev: Vec::new(),
            right_elev: Vec::new(),
            top_label: Vec::new(),
            bot_label: Vec::new(),
            left_label: Vec::new(),
            right_label: Vec::new(),
            graph: SpilloverGraph::default(),
            time_info: TimeInfo::default(),
            gridy: 0,
            gridx: 0,
        }
    }
}

impl<T> Job1<T> {
    pub fn for_grid_pos(gridx: usize, gridy: usize) -> Self {
        Self {
            gridx,
            gridy,
            ..Self::default()
        }
    }

    /// Approximate payload size in bytes, for the transport counters.
    pub fn approx_size(&self) -> u64 {
        let elev = (self.top_elev.len()
            + self.bot_elev.len()
            + self.left_elev.len()
            + self.right_elev.len())
            * size_of::<T>();
        let label = (self.top_label.len()
            + self.bot_label.len()
            + self.left_label.len()
            + self.right_label.len())
            * size_of::<Label>();
        let graph = self.graph.edge_count() * (size_of::<Label>() + size_of::<T>());
        (elev + label + graph + size_of::<TimeInfo>() + 2 * size_of::<usize>()) as u64
    }
}

/// Messages the producer sends to a consumer.
#[derive(Debug)]
pub enum ToConsumer<T> {
    /// Phase 1: flood this tile
    JobFirst(Box<TileInfo>),
    /// Phase 2: apply this slice of the fill-elevation table and write out
    JobSecond { tile: Box<TileInfo>, fill: Vec<T> },
    /// Shut down
    Kill,
}

impl<T> ToConsumer<T> {
    pub fn approx_size(&self) -> u64 {
        match self {
            ToConsumer::JobFirst(_) => size_of::<TileInfo>() as u64,
            ToConsumer::JobSecond { fill, .. } => {
                (size_of::<TileInfo>() + fill.len() * size_of::<T>()) as u64
            }
            ToConsumer::Kill => size_of::<u64>() as u64,
        }
    }
}

/// Messages a consumer sends back to the producer.
#[derive(Debug)]
pub enum ToProducer<T> {
    DoneFirst(Box<Job1<T>>),
    DoneSecond(TimeInfo),
    /// A fatal error on the consumer; the whole run aborts
    Fault(String),
}

impl<T> ToProducer<T> {
    pub fn approx_size(&self) -> u64 {
        match self {
            ToProducer::DoneFirst(job) => job.approx_size(),
            ToProducer::DoneSecond(_) => size_of::<TimeInfo>() as u64,
            ToProducer::Fault(msg) => msg.len() as u64,
        }
    }
}

/// Phase-1 replies arranged in tile-matrix shape.
pub type Job1Grid<T> = Vec<Vec<Job1<T>>>;
