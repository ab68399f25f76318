//! Labeled priority-flood of a single tile
//!
//! The Zhou, Sun and Fu (2015) variant of Priority-Flood, modified to label
//! watersheds in the manner of Barnes, Lehman and Mulla (2014). Each tile is
//! flooded from its perimeter inward: cells on the true outer raster
//! boundary seed the shared outer watershed (label 1), every other
//! perimeter cell seeds a fresh local watershed, and depressions internal
//! to the tile are filled to their within-tile spill level as labels
//! propagate. Spills between distinct watersheds are recorded in the tile's
//! spillover graph for the between-tile solve.
//!
//! References:
//! Zhou, G., Sun, Z., Fu, S., 2016. An efficient variant of the
//! Priority-Flood algorithm for filling depressions in raster digital
//! elevation models. Computers & Geosciences 90, 87-96.
//! Barnes, R., 2016. Parallel priority-flood depression filling for
//! trillion cell digital elevation models on desktops or clusters.
//! Computers & Geosciences. doi:10.1016/j.cageo.2016.07.001

use crate::graph::{max_elev, SpilloverGraph};
use crate::tile::{Label, FLIP_HORZ, FLIP_VERT, GRID_BOTTOM, GRID_LEFT, GRID_RIGHT, GRID_TOP};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use terrafill_core::{Raster, RasterElement};

/// D8 neighbor offsets: (row_offset, col_offset)
const D8_OFFSETS: [(isize, isize); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1),           (0, 1),
    (1, -1),  (1, 0),  (1, 1),
];

/// A cell in the priority queue, ordered by elevation with a stable FIFO
/// tie break: of two cells at the same elevation, the first inserted pops
/// first.
#[derive(Debug, Clone)]
struct QueueCell<T> {
    elev: T,
    seq: u64,
    row: usize,
    col: usize,
}

impl<T: RasterElement> PartialEq for QueueCell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: RasterElement> Eq for QueueCell<T> {}

impl<T: RasterElement> PartialOrd for QueueCell<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reverse ordering so BinaryHeap (a max-heap) acts as a min-heap
impl<T: RasterElement> Ord for QueueCell<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.elev.partial_cmp(&self.elev) {
            Some(Ordering::Equal) | None => other.seq.cmp(&self.seq),
            Some(ordering) => ordering,
        }
    }
}

/// Flood one tile, labeling every cell and filling its internal
/// depressions to their within-tile spill level.
///
/// `edge` says which sides of the tile lie on the outer raster boundary,
/// expressed in world orientation; `flip` says how the tile is stored on
/// disk, so the kernel inverts the side-to-bit mapping accordingly (with
/// `FLIP_VERT` set, the tile's bottom row seeds under the `GRID_TOP` bit).
///
/// Returns the tile's spillover graph, shrunk to the labels actually used.
pub fn flood_tile<T: RasterElement>(
    dem: &mut Raster<T>,
    labels: &mut Raster<Label>,
    edge: u8,
    flip: u8,
) -> SpilloverGraph<T> {
    let (rows, cols) = dem.shape();
    debug_assert_eq!((rows, cols), labels.shape());

    // The number of unique watersheds is bounded by the number of
    // perimeter cells. The graph is shrunk to the labels used below.
    let mut graph = SpilloverGraph::with_vertices(2 * (rows + cols));
    if rows == 0 || cols == 0 {
        graph.shrink_to(2);
        return graph;
    }

    let flip_v = flip & FLIP_VERT != 0;
    let flip_h = flip & FLIP_HORZ != 0;
    let top_outer = edge & (if flip_v { GRID_BOTTOM } else { GRID_TOP }) != 0;
    let bottom_outer = edge & (if flip_v { GRID_TOP } else { GRID_BOTTOM }) != 0;
    let left_outer = edge & (if flip_h { GRID_RIGHT } else { GRID_LEFT }) != 0;
    let right_outer = edge & (if flip_h { GRID_LEFT } else { GRID_RIGHT }) != 0;

    let dem_g = dem.data_mut();
    let lab_g = labels.data_mut();

    let mut open: BinaryHeap<QueueCell<T>> = BinaryHeap::new();
    let mut pit: VecDeque<(T, usize, usize)> = VecDeque::new();
    let mut seq: u64 = 0;
    let mut next_label: Label = 2;

    // Seed every perimeter cell. Cells on an outer side join watershed 1;
    // the rest each open a fresh watershed.
    for r in 0..rows {
        for c in 0..cols {
            if r != 0 && r != rows - 1 && c != 0 && c != cols - 1 {
                continue;
            }
            let outer = (r == 0 && top_outer)
                || (r == rows - 1 && bottom_outer)
                || (c == 0 && left_outer)
                || (c == cols - 1 && right_outer);
            let label = if outer {
                1
            } else {
                let l = next_label;
                next_label += 1;
                l
            };
            lab_g[(r, c)] = label;
            open.push(QueueCell {
                elev: dem_g[(r, c)],
                seq,
                row: r,
                col: c,
            });
            seq += 1;
        }
    }

    // Flood inward in spill-elevation order. Neighbors at or below the
    // popped elevation are inside a depression: raise them to the popped
    // level and drain them through the FIFO ahead of the heap.
    while !(open.is_empty() && pit.is_empty()) {
        let (celev, r, c) = match pit.pop_front() {
            Some(cell) => cell,
            None => match open.pop() {
                Some(cell) => (cell.elev, cell.row, cell.col),
                None => break,
            },
        };
        let clab = lab_g[(r, c)];

        for &(dr, dc) in &D8_OFFSETS {
            let nr = r as isize + dr;
            let nc = c as isize + dc;
            if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);

            let nlab = lab_g[(nr, nc)];
            if nlab == 0 {
                lab_g[(nr, nc)] = clab;
                let nelev = dem_g[(nr, nc)];
                if nelev <= celev {
                    dem_g[(nr, nc)] = celev;
                    pit.push_back((celev, nr, nc));
                } else {
                    open.push(QueueCell {
                        elev: nelev,
                        seq,
                        row: nr,
                        col: nc,
                    });
                    seq += 1;
                }
            } else if nlab != clab {
                let spill = max_elev(celev, dem_g[(nr, nc)]);
                graph.link_min(clab, nlab, spill);
            }
        }
    }

    graph.shrink_to(next_label as usize);
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{GRID_BOTTOM, GRID_LEFT, GRID_RIGHT, GRID_TOP};

    const ALL_EDGES: u8 = GRID_TOP | GRID_BOTTOM | GRID_LEFT | GRID_RIGHT;

    fn flood(values: Vec<f64>, rows: usize, cols: usize, edge: u8, flip: u8)
        -> (Raster<f64>, Raster<u32>, SpilloverGraph<f64>)
    {
        let mut dem = Raster::from_vec(values, rows, cols).unwrap();
        let mut labels = dem.with_same_meta::<u32>(rows, cols);
        let graph = flood_tile(&mut dem, &mut labels, edge, flip);
        (dem, labels, graph)
    }

    #[test]
    fn test_fills_central_pit_on_full_edge_tile() {
        let (dem, labels, _) = flood(
            vec![
                10.0, 10.0, 10.0, 10.0, 10.0,
                10.0, 10.0, 10.0, 10.0, 10.0,
                10.0, 10.0, 3.0, 10.0, 10.0,
                10.0, 10.0, 10.0, 10.0, 10.0,
                10.0, 10.0, 10.0, 10.0, 10.0,
            ],
            5,
            5,
            ALL_EDGES,
            0,
        );

        // The pit has no drainable escape below the surrounding ring
        assert_eq!(dem.get(2, 2).unwrap(), 10.0);
        // Every other cell is untouched
        assert_eq!(dem.get(0, 0).unwrap(), 10.0);
        assert_eq!(dem.get(1, 1).unwrap(), 10.0);
        // A tile whose whole perimeter is outer boundary drains as one
        // watershed
        for ((_, _), &l) in labels.data().indexed_iter() {
            assert_eq!(l, 1);
        }
    }

    #[test]
    fn test_flat_tile_stays_flat_and_fully_labeled() {
        let (dem, labels, _) = flood(vec![5.0; 25], 5, 5, ALL_EDGES, 0);

        for ((_, _), &v) in dem.data().indexed_iter() {
            assert_eq!(v, 5.0);
        }
        for ((_, _), &l) in labels.data().indexed_iter() {
            assert_eq!(l, 1);
        }
    }

    #[test]
    fn test_no_cell_left_unlabeled() {
        let (_, labels, _) = flood(
            (0..36).map(|v| f64::from(v % 7)).collect(),
            6,
            6,
            GRID_TOP | GRID_LEFT,
            0,
        );
        for ((_, _), &l) in labels.data().indexed_iter() {
            assert_ne!(l, 0);
        }
    }

    #[test]
    fn test_never_lowers_elevation() {
        let values: Vec<f64> = vec![
            9.0, 9.0, 9.0, 9.0,
            9.0, 1.0, 2.0, 9.0,
            9.0, 2.0, 1.0, 9.0,
            9.0, 9.0, 9.0, 9.0,
        ];
        let (dem, _, _) = flood(values.clone(), 4, 4, ALL_EDGES, 0);
        for (i, ((r, c), &v)) in dem.data().indexed_iter().enumerate() {
            assert!(
                v >= values[i],
                "cell ({}, {}) lowered from {} to {}",
                r,
                c,
                values[i],
                v
            );
        }
    }

    #[test]
    fn test_interior_sides_get_fresh_watersheds() {
        // Only the top row is outer; the other perimeter cells open their
        // own watersheds
        let (_, labels, graph) = flood(vec![5.0; 9], 3, 3, GRID_TOP, 0);

        assert_eq!(labels.get(0, 0).unwrap(), 1);
        assert_eq!(labels.get(0, 2).unwrap(), 1);
        assert!(labels.get(2, 0).unwrap() >= 2);
        assert!(labels.get(2, 2).unwrap() >= 2);

        // Flat ground: adjacent distinct watersheds spill at the common
        // elevation
        let a = labels.get(2, 0).unwrap();
        let b = labels.get(2, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(graph.weight(a, b), Some(5.0));
    }

    #[test]
    fn test_flip_vert_seeds_bottom_row_for_top_bit() {
        // edge = TOP only, tile stored vertically mirrored: the on-disk
        // bottom row is the world top and must carry label 1
        let (_, labels, _) = flood(vec![5.0; 9], 3, 3, GRID_TOP, FLIP_VERT);

        assert_eq!(labels.get(2, 0).unwrap(), 1);
        assert_eq!(labels.get(2, 2).unwrap(), 1);
        assert!(labels.get(0, 1).unwrap() >= 2);
    }

    #[test]
    fn test_flip_horz_seeds_right_column_for_left_bit() {
        let (_, labels, _) = flood(vec![5.0; 9], 3, 3, GRID_LEFT, FLIP_HORZ);

        assert_eq!(labels.get(0, 2).unwrap(), 1);
        assert_eq!(labels.get(2, 2).unwrap(), 1);
        assert!(labels.get(1, 0).unwrap() >= 2);
    }

    #[test]
    fn test_pit_drains_to_low_outlet_not_high_ring() {
        // Border of 10 with an outlet at 2 on the bottom edge; sink of 1
        // in the middle fills to the outlet level, not the ring level
        let values = vec![
            10.0, 10.0, 10.0, 10.0, 10.0,
            10.0, 5.0, 5.0, 5.0, 10.0,
            10.0, 5.0, 1.0, 5.0, 10.0,
            10.0, 5.0, 2.0, 5.0, 10.0,
            10.0, 10.0, 2.0, 10.0, 10.0,
        ];
        let (dem, _, _) = flood(values, 5, 5, ALL_EDGES, 0);

        assert_eq!(dem.get(2, 2).unwrap(), 2.0);
        assert_eq!(dem.get(3, 2).unwrap(), 2.0);
        // The 5-ring is above the outlet and keeps its elevation
        assert_eq!(dem.get(1, 1).unwrap(), 5.0);
    }

    #[test]
    fn test_graph_shrinks_to_used_labels() {
        let (_, _, graph) = flood(vec![5.0; 9], 3, 3, ALL_EDGES, 0);
        // Only labels 0 and 1 are in play on a fully outer tile
        assert_eq!(graph.len(), 2);
    }
}
