//! Neighbour offset tables for Newton's third law traversals

use super::GridGeometry;
use crate::utils::linear_offset;

/// A neighbour cell relative to some base cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborOffset {
    /// Offset in cell coordinates
    pub offset: [isize; 3],
    /// Offset in the linear cell array
    pub linear: isize,
}

/// A pair of cells relative to the lower corner of a block of cells
///
/// Both cells lie inside the block `[base, base + halo_width]` along every axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPair {
    pub first: [usize; 3],
    pub second: [usize; 3],
    pub first_linear: usize,
    pub second_linear: usize,
}

/// Precomputed neighbour offsets of the cell grid
///
/// The forward offsets are the neighbours that come after a cell in the linear
/// ordering, the backward offsets those that come before it. Every pair of cells
/// within interaction range appears exactly once if only forward offsets are
/// walked from every cell.
#[derive(Clone, Debug, Default)]
pub struct NeighborOffsetTable {
    forward: Vec<NeighborOffset>,
    backward: Vec<NeighborOffset>,
    block_pairs: Vec<BlockPair>,
}

impl NeighborOffsetTable {
    /// Compute the offsets for a given geometry
    ///
    /// All cells within the halo width along every axis are candidates. A
    /// candidate is kept if the minimal distance between the two cells is not
    /// larger than the cutoff radius (the distance along one axis is the cell
    /// length times the number of cells strictly between the two).
    pub fn new(geometry: &GridGeometry) -> Self {
        let dims = geometry.cells_per_dim;
        let h = geometry.halo_width.map(|h| h as isize);
        let cutoff_sqr = geometry.cutoff * geometry.cutoff;
        let mut forward = vec![];
        let mut backward = vec![];
        for z in -h[2]..=h[2] {
            for y in -h[1]..=h[1] {
                for x in -h[0]..=h[0] {
                    let offset = [x, y, z];
                    let distance_sqr: f64 = (0..3)
                        .map(|d| {
                            let gap = (offset[d].abs() - 1).max(0) as f64 * geometry.cell_length[d];
                            gap * gap
                        })
                        .sum();
                    if distance_sqr > cutoff_sqr {
                        continue;
                    }
                    let linear = linear_offset(offset, dims);
                    if linear > 0 {
                        forward.push(NeighborOffset { offset, linear });
                    }
                    else if linear < 0 {
                        backward.push(NeighborOffset { offset, linear });
                    }
                }
            }
        }
        // Every forward offset becomes one pair inside the block anchored at the
        // lower corner spanned by the two cells
        let block_pairs = forward.iter()
            .map(|n| {
                let first = [0, 1, 2].map(|d| (-n.offset[d]).max(0) as usize);
                let second = [0, 1, 2].map(|d| (first[d] as isize + n.offset[d]) as usize);
                BlockPair {
                    first, second,
                    first_linear: linear_offset(first.map(|x| x as isize), dims) as usize,
                    second_linear: linear_offset(second.map(|x| x as isize), dims) as usize,
                }
            })
            .collect::<Vec<_>>();
        Self {
            forward, backward, block_pairs
        }
    }

    pub fn forward(&self) -> &[NeighborOffset] {
        &self.forward
    }

    pub fn backward(&self) -> &[NeighborOffset] {
        &self.backward
    }

    /// Cell pairs of one block step (one pair per forward offset)
    pub fn block_pairs(&self) -> &[BlockPair] {
        &self.block_pairs
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thirteen_forward_neighbours() {
        let geometry = GridGeometry::new([0.0; 3], [4.0; 3], 1.0, 1).unwrap();
        let table = NeighborOffsetTable::new(&geometry);
        assert_eq!(table.forward().len(), 13);
        assert_eq!(table.backward().len(), 13);
        let dims = geometry.cells_per_dim;
        assert!(table.forward().iter().any(|n| n.linear == linear_offset([1, 1, 1], dims)));
        // Backward offsets mirror the forward ones
        for n in table.forward() {
            assert!(table.backward().iter().any(|b| b.linear == -n.linear));
        }
    }

    #[test]
    fn block_pairs_stay_inside_block() {
        let geometry = GridGeometry::new([0.0; 3], [6.0; 3], 1.0, 2).unwrap();
        let table = NeighborOffsetTable::new(&geometry);
        assert_eq!(table.block_pairs().len(), table.forward().len());
        for (pair, n) in table.block_pairs().iter().zip(table.forward()) {
            for d in 0..3 {
                assert!(pair.first[d] <= 2 && pair.second[d] <= 2);
                assert_eq!(pair.second[d] as isize - pair.first[d] as isize, n.offset[d]);
            }
        }
    }

    #[test]
    fn corner_cells_outside_cutoff_are_dropped() {
        // Exactly two cells per cutoff: even the far corners are within range
        let geometry = GridGeometry::new([0.0; 3], [6.0; 3], 1.0, 2).unwrap();
        assert_eq!(NeighborOffsetTable::new(&geometry).forward().len(), 62);
        // Stretched cells (length 0.58) push the (2,2,2) corners out of range
        let geometry = GridGeometry::new([0.0; 3], [2.9; 3], 1.0, 2).unwrap();
        let table = NeighborOffsetTable::new(&geometry);
        assert!(!table.forward().iter().any(|n| n.offset == [2, 2, 2]));
        assert!(table.forward().iter().any(|n| n.offset == [2, 0, 0]));
        assert!(table.forward().iter().any(|n| n.offset == [2, 2, 1]));
        assert_eq!(table.forward().len(), 58);
    }
}
