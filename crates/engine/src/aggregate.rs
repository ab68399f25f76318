//! Aggregated priority-flood over the master graph
//!
//! Vertex 1 is the outside of the raster as a whole. Flooding the graph
//! from it yields, for every global label, the lowest elevation at which
//! water in that watershed can reach the outside: its fill elevation.
//! The graph has a vertex per perimeter watershed rather than a cell per
//! raster cell, so this global solve is tiny compared to the tile floods.

use crate::graph::{max_elev, SpilloverGraph};
use crate::tile::Label;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use terrafill_core::RasterElement;

#[derive(Debug, Clone, Copy)]
struct GraphNode<T> {
    elev: T,
    vertex: Label,
}

impl<T: RasterElement> PartialEq for GraphNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: RasterElement> Eq for GraphNode<T> {}

impl<T: RasterElement> PartialOrd for GraphNode<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reverse ordering so BinaryHeap pops the lowest elevation first; ties
// break on vertex number for determinism
impl<T: RasterElement> Ord for GraphNode<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.elev.partial_cmp(&self.elev) {
            Some(Ordering::Equal) | None => other.vertex.cmp(&self.vertex),
            Some(ordering) => ordering,
        }
    }
}

/// Flood the master graph from vertex 1, producing the dense
/// fill-elevation table indexed by global label.
///
/// Each vertex is assigned on first visit; later pops of the same vertex
/// are discarded. A label's fill elevation is the maximum edge weight on
/// its cheapest path back to vertex 1.
pub fn aggregate_flood<T: RasterElement>(master: &SpilloverGraph<T>) -> Vec<T> {
    let n = master.len();
    let mut fill_elev = vec![T::zero(); n];
    if n <= 1 {
        return fill_elev;
    }

    let mut visited = vec![false; n];
    let mut open = BinaryHeap::new();

    open.push(GraphNode {
        elev: T::min_value(),
        vertex: 1,
    });

    while let Some(GraphNode { elev, vertex }) = open.pop() {
        let v = vertex as usize;
        if visited[v] {
            continue;
        }
        visited[v] = true;
        fill_elev[v] = elev;

        for (neighbor, weight) in master.neighbors(vertex) {
            if visited[neighbor as usize] {
                continue;
            }
            open.push(GraphNode {
                elev: max_elev(elev, weight),
                vertex: neighbor,
            });
        }
    }

    fill_elev
}
