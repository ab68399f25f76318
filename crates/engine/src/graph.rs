//! Spillover graphs
//!
//! Watershed labels are vertices; an edge weight is the lowest elevation at
//! which water in one watershed could spill into the other. Each tile flood
//! produces one of these over its local labels; the producer joins them,
//! together with the cross-boundary spills, into a single master graph over
//! globally offset labels.

use crate::messages::Job1Grid;
use crate::tile::{Label, TileGrid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use terrafill_core::RasterElement;
use tracing::info;

/// The larger of two elevations. Falls back to the first operand when the
/// comparison is undefined (NaN).
pub(crate) fn max_elev<T: PartialOrd + Copy>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

/// Apply a tile's base offset to one of its local labels. Label 1 is the
/// single shared outer-boundary watershed and is never offset; label 0
/// never appears in a completed tile.
pub(crate) fn offset_label(label: Label, offset: Label) -> Label {
    if label > 1 {
        label + offset
    } else {
        label
    }
}

/// A symmetric weighted multigraph over watershed labels, stored as an
/// adjacency mapping per vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpilloverGraph<T> {
    adj: Vec<BTreeMap<Label, T>>,
}

impl<T> Default for SpilloverGraph<T> {
    fn default() -> Self {
        Self { adj: Vec::new() }
    }
}

impl<T> SpilloverGraph<T> {
    /// Number of stored directed edges.
    pub fn edge_count(&self) -> usize {
        self.adj.iter().map(|m| m.len()).sum()
    }
}

impl<T: RasterElement> SpilloverGraph<T> {
    /// A graph with `n` isolated vertices.
    pub fn with_vertices(n: usize) -> Self {
        Self {
            adj: vec![BTreeMap::new(); n],
        }
    }

    /// Number of vertex slots (used and unused).
    pub fn len(&self) -> usize {
        self.adj.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adj.is_empty()
    }

    /// Drop vertex slots beyond the labels actually used. The flood kernel
    /// over-allocates to the perimeter length and shrinks afterwards.
    pub fn shrink_to(&mut self, n: usize) {
        self.adj.truncate(n);
    }

    /// Record a spill between two watersheds, keeping the lowest elevation
    /// seen for the pair. Both directions are written.
    pub fn link_min(&mut self, a: Label, b: Label, elev: T) {
        debug_assert_ne!(a, b);
        let keep = match self.adj[a as usize].get(&b) {
            Some(&current) => elev < current,
            None => true,
        };
        if keep {
            self.adj[a as usize].insert(b, elev);
            self.adj[b as usize].insert(a, elev);
        }
    }

    /// Set an edge unconditionally, both directions.
    pub fn set(&mut self, a: Label, b: Label, elev: T) {
        self.adj[a as usize].insert(b, elev);
        self.adj[b as usize].insert(a, elev);
    }

    /// Weight of the edge `a -> b`, if present.
    pub fn weight(&self, a: Label, b: Label) -> Option<T> {
        self.adj.get(a as usize).and_then(|m| m.get(&b).copied())
    }

    /// Neighbors of a vertex with their spill elevations.
    pub fn neighbors(&self, v: Label) -> impl Iterator<Item = (Label, T)> + '_ {
        self.adj[v as usize].iter().map(|(&n, &w)| (n, w))
    }

    /// All directed edges.
    pub fn edges(&self) -> impl Iterator<Item = (Label, Label, T)> + '_ {
        self.adj
            .iter()
            .enumerate()
            .flat_map(|(a, m)| m.iter().map(move |(&b, &w)| (a as Label, b, w)))
    }
}

/// Join one pair of touching tile perimeters into the master graph.
///
/// Position `i` of side `a` is compared against positions `i-1`, `i` and
/// `i+1` of side `b`, which covers the diagonal adjacencies along the seam.
fn handle_edge<T: RasterElement>(
    master: &mut SpilloverGraph<T>,
    elev_a: &[T],
    elev_b: &[T],
    label_a: &[Label],
    label_b: &[Label],
    offset_a: Label,
    offset_b: Label,
) {
    debug_assert_eq!(elev_a.len(), elev_b.len());
    debug_assert_eq!(label_a.len(), label_b.len());
    debug_assert_eq!(elev_a.len(), label_a.len());

    let len = elev_a.len();
    for i in 0..len {
        let c_l = offset_label(label_a[i], offset_a);

        for ni in i.saturating_sub(1)..=usize::min(i + 1, len - 1) {
            let n_l = offset_label(label_b[ni], offset_b);
            if c_l == n_l {
                continue;
            }
            let spill = max_elev(elev_a[i], elev_b[ni]);
            master.link_min(c_l, n_l, spill);
        }
    }
}

/// Join a diagonal corner contact between two tiles: a single cell pair.
#[allow(clippy::too_many_arguments)]
fn handle_corner<T: RasterElement>(
    master: &mut SpilloverGraph<T>,
    elev_a: T,
    elev_b: T,
    label_a: Label,
    label_b: Label,
    offset_a: Label,
    offset_b: Label,
) {
    let l_a = offset_label(label_a, offset_a);
    let l_b = offset_label(label_b, offset_b);
    if l_a == l_b {
        return;
    }
    master.link_min(l_a, l_b, max_elev(elev_a, elev_b));
}

/// Merge the per-tile spillover graphs and the cross-boundary perimeter
/// joins into a single master graph over globally offset labels.
///
/// Assigns each non-null tile its `label_offset` (the running sum of graph
/// sizes over tiles preceding it in row-major order) and `label_increment`
/// (its own graph size), and empties the per-tile graphs as it goes.
pub fn build_master<T: RasterElement>(
    tiles: &mut TileGrid,
    jobs: &mut Job1Grid<T>,
) -> SpilloverGraph<T> {
    let gridheight = tiles.len();
    let gridwidth = tiles.first().map_or(0, |r| r.len());

    let mut total: Label = 0;
    for row in jobs.iter() {
        for job in row {
            total += job.graph.len() as Label;
        }
    }
    info!("m Total labels required = {}", total);

    let mut master = SpilloverGraph::with_vertices(total as usize);

    // Re-emit every intra-tile edge under the tile's global offset.
    let mut offset: Label = 0;
    for y in 0..gridheight {
        for x in 0..gridwidth {
            if tiles[y][x].null_tile {
                continue;
            }
            tiles[y][x].label_offset = offset;

            let graph = std::mem::take(&mut jobs[y][x].graph);
            let size = graph.len() as Label;
            for (a, b, w) in graph.edges() {
                master.set(offset_label(a, offset), offset_label(b, offset), w);
            }

            tiles[y][x].label_increment = size;
            offset += size;
        }
    }

    // Join touching perimeters of adjacent tiles, then the four diagonal
    // corner contacts.
    for y in 0..gridheight {
        for x in 0..gridwidth {
            if tiles[y][x].null_tile {
                continue;
            }
            let off_c = tiles[y][x].label_offset;
            let c = &jobs[y][x];

            if y > 0 && !tiles[y - 1][x].null_tile {
                let n = &jobs[y - 1][x];
                handle_edge(
                    &mut master,
                    &c.top_elev,
                    &n.bot_elev,
                    &c.top_label,
                    &n.bot_label,
                    off_c,
                    tiles[y - 1][x].label_offset,
                );
            }

            if y < gridheight - 1 && !tiles[y + 1][x].null_tile {
                let n = &jobs[y + 1][x];
                handle_edge(
                    &mut master,
                    &c.bot_elev,
                    &n.top_elev,
                    &c.bot_label,
                    &n.top_label,
                    off_c,
                    tiles[y + 1][x].label_offset,
                );
            }

            if x > 0 && !tiles[y][x - 1].null_tile {
                let n = &jobs[y][x - 1];
                handle_edge(
                    &mut master,
                    &c.left_elev,
                    &n.right_elev,
                    &c.left_label,
                    &n.right_label,
                    off_c,
                    tiles[y][x - 1].label_offset,
                );
            }

            if x < gridwidth - 1 && !tiles[y][x + 1].null_tile {
                let n = &jobs[y][x + 1];
                handle_edge(
                    &mut master,
                    &c.right_elev,
                    &n.left_elev,
                    &c.right_label,
                    &n.left_label,
                    off_c,
                    tiles[y][x + 1].label_offset,
                );
            }

            // Top left
            if y > 0 && x > 0 && !tiles[y - 1][x - 1].null_tile {
                let n = &jobs[y - 1][x - 1];
                handle_corner(
                    &mut master,
                    c.top_elev[0],
                    n.bot_elev[n.bot_elev.len() - 1],
                    c.top_label[0],
                    n.bot_label[n.bot_label.len() - 1],
                    off_c,
                    tiles[y - 1][x - 1].label_offset,
                );
            }

            // Bottom right
            if y < gridheight - 1 && x < gridwidth - 1 && !tiles[y + 1][x + 1].null_tile {
                let n = &jobs[y + 1][x + 1];
                handle_corner(
                    &mut master,
                    c.bot_elev[c.bot_elev.len() - 1],
                    n.top_elev[0],
                    c.bot_label[c.bot_label.len() - 1],
                    n.top_label[0],
                    off_c,
                    tiles[y + 1][x + 1].label_offset,
                );
            }

            // Top right
            if y > 0 && x < gridwidth - 1 && !tiles[y - 1][x + 1].null_tile {
                let n = &jobs[y - 1][x + 1];
                handle_corner(
                    &mut master,
                    c.top_elev[c.top_elev.len() - 1],
                    n.bot_elev[0],
                    c.top_label[c.top_label.len() - 1],
                    n.bot_label[0],
                    off_c,
                    tiles[y - 1][x + 1].label_offset,
                );
            }

            // Bottom left
            if x > 0 && y < gridheight - 1 && !tiles[y + 1][x - 1].null_tile {
                let n = &jobs[y + 1][x - 1];
                handle_corner(
                    &mut master,
                    c.bot_elev[0],
                    n.top_elev[n.top_elev.len() - 1],
                    c.bot_label[0],
                    n.top_label[n.top_label.len() - 1],
                    off_c,
                    tiles[y + 1][x - 1].label_offset,
                );
            }
        }
    }

    master
}
