//! Cell pair traversals
//!
//! Every traversal visits the same set of work items: each non-halo cell once
//! on its own and every unordered pair of cells within interaction range once,
//! unless both cells of the pair are halo cells. The strategies only differ in
//! how this work is ordered and distributed over threads.

use std::sync::RwLock;

use rayon::{ThreadPool, prelude::*};

use crate::{config::TraversalKind, decompose_index_to_coords_3d, get_index_from_coords_3d,
    grid::{Cell, CellRegion, SpatialGrid}, utils::apply_offset};

mod c08;
mod original;
#[cfg(feature = "scheduled")]
mod scheduled;
mod sliced;
mod tuner;

pub use c08::*;
pub use original::*;
#[cfg(feature = "scheduled")]
pub use scheduled::*;
pub use sliced::*;
pub use tuner::*;

/// Computation applied to cells and cell pairs during a traversal
///
/// `process_cell` and `process_cell_pair` are called concurrently for disjoint
/// cells, so all shared accumulators of an implementation must be
/// synchronised.
pub trait CellProcessor: Sync {
    /// Called once before a (partial) traversal
    fn init_traversal(&mut self) {}

    /// Interactions between the particles of a single cell
    fn process_cell(&self, cell: &mut Cell);

    /// Interactions between the particles of two distinct cells
    fn process_cell_pair(&self, first: &mut Cell, second: &mut Cell);

    /// Called once after a (partial) traversal
    fn end_traversal(&mut self) {}

    /// True if forces accumulated on halo copies must be folded back into their origins
    fn requires_force_exchange(&self) -> bool {
        false
    }
}

/// A strategy that enumerates the cell pairs of a grid
///
/// Instances are built for one grid generation and must be rebuilt when the
/// grid geometry changes.
pub trait CellPairTraversal: Send + Sync {
    fn kind(&self) -> TraversalKind;

    /// Grid generation this traversal was built for
    fn generation(&self) -> u64;

    /// Process all cells and cell pairs
    fn traverse(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool);

    /// Process all work that touches boundary or halo cells
    fn traverse_outer(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool);

    /// Process one of `stage_count` parts of the work that only touches inner cells
    fn traverse_inner(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool,
        stage: usize, stage_count: usize);
}

/// Process a single cell
#[inline]
pub(crate) fn process_single(cells: &[RwLock<Cell>], idx: usize, processor: &dyn CellProcessor) {
    let mut cell = cells[idx].write().unwrap();
    processor.process_cell(&mut cell);
}

/// Process a pair of distinct cells, locking them in index order
///
/// Colours, slabs and task chains already keep concurrent workers on disjoint
/// cells, so these locks are uncontended. They only turn that partitioning into
/// safe `&mut Cell` borrows.
#[inline]
pub(crate) fn process_pair(cells: &[RwLock<Cell>], a: usize, b: usize, processor: &dyn CellProcessor) {
    debug_assert_ne!(a, b);
    let (mut first, mut second) = if a < b {
        let first = cells[a].write().unwrap();
        let second = cells[b].write().unwrap();
        (first, second)
    }
    else {
        let second = cells[b].write().unwrap();
        let first = cells[a].write().unwrap();
        (first, second)
    };
    processor.process_cell_pair(&mut first, &mut second);
}

/// Cell classification and neighbour offsets of one grid generation
///
/// Block-based traversals work on base cells: the base cell `b` owns the
/// block `[b, b + halo_width]` and processes one cell pair per forward offset
/// inside that block (plus itself if it is not a halo cell). Bases range over
/// `[0, dims - halo_width)` along every axis, which covers every pair with at
/// least one non-halo cell exactly once.
#[derive(Clone, Debug)]
pub(crate) struct CellLayout {
    pub dims: [usize; 3],
    pub halo_width: [usize; 3],
    pub generation: u64,
    regions: Vec<CellRegion>,
    inner_most: Vec<bool>,
    forward: Vec<isize>,
    backward: Vec<isize>,
    /// Linear offsets (relative to the base) of the cell pairs in a block
    block_pairs: Vec<(usize, usize)>,
}

impl CellLayout {
    pub fn new(grid: &SpatialGrid) -> Self {
        let (regions, inner_most) = grid.cells().iter()
            .map(|cell| {
                let cell = cell.read().unwrap();
                (cell.region(), cell.is_inner_most())
            })
            .unzip();
        let offsets = grid.offsets();
        Self {
            dims: grid.dims(),
            halo_width: grid.geometry().halo_width,
            generation: grid.generation(),
            regions, inner_most,
            forward: offsets.forward().iter().map(|n| n.linear).collect(),
            backward: offsets.backward().iter().map(|n| n.linear).collect(),
            block_pairs: offsets.block_pairs().iter().map(|p| (p.first_linear, p.second_linear)).collect(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.regions.len()
    }

    pub fn is_halo(&self, idx: usize) -> bool {
        self.regions[idx] == CellRegion::Halo
    }

    pub fn is_inner(&self, idx: usize) -> bool {
        self.regions[idx] == CellRegion::Inner
    }

    pub fn is_inner_most(&self, idx: usize) -> bool {
        self.inner_most[idx]
    }

    pub fn forward(&self) -> &[isize] {
        &self.forward
    }

    pub fn backward(&self) -> &[isize] {
        &self.backward
    }

    pub fn coords(&self, idx: usize) -> [usize; 3] {
        decompose_index_to_coords_3d!(idx, self.dims)
    }

    pub fn index(&self, coords: [usize; 3]) -> usize {
        get_index_from_coords_3d!(coords, self.dims)
    }

    /// Number of base cells along each axis
    pub fn base_dims(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| self.dims[d] - self.halo_width[d])
    }

    /// All base cells in linear order
    pub fn bases(&self) -> Vec<usize> {
        let base_dims = self.base_dims();
        let mut bases = Vec::with_capacity(base_dims.iter().product());
        for z in 0..base_dims[2] {
            for y in 0..base_dims[1] {
                for x in 0..base_dims[0] {
                    bases.push(self.index([x, y, z]));
                }
            }
        }
        bases
    }

    /// True if every cell of the block of a base is an inner cell
    pub fn block_is_inner(&self, base: usize) -> bool {
        let c = self.coords(base);
        let h = self.halo_width;
        for z in c[2]..=c[2] + h[2] {
            for y in c[1]..=c[1] + h[1] {
                for x in c[0]..=c[0] + h[0] {
                    if !self.is_inner(self.index([x, y, z])) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Split bases into (outer, inner) by `block_is_inner`
    pub fn partition_bases(&self) -> (Vec<usize>, Vec<usize>) {
        self.bases().into_iter().partition(|b| !self.block_is_inner(*b))
    }

    /// Process the block of one base cell
    pub fn process_block(&self, cells: &[RwLock<Cell>], base: usize, processor: &dyn CellProcessor) {
        for (first, second) in &self.block_pairs {
            let a = base + first;
            let b = base + second;
            if self.is_halo(a) && self.is_halo(b) {
                continue;
            }
            process_pair(cells, a, b, processor);
        }
        if !self.is_halo(base) {
            process_single(cells, base, processor);
        }
    }

    /// Process a cell and its neighbours the way the classic linked-cell loop does
    ///
    /// Forward neighbours are always processed, backward neighbours only if
    /// they are halo cells (these pairs are not reached from the halo side).
    pub fn process_cell_with_neighbours(&self, cells: &[RwLock<Cell>], idx: usize, processor: &dyn CellProcessor) {
        process_single(cells, idx, processor);
        for offset in &self.forward {
            process_pair(cells, idx, apply_offset(idx, *offset), processor);
        }
        for offset in &self.backward {
            let neighbour = apply_offset(idx, *offset);
            if self.is_halo(neighbour) {
                process_pair(cells, idx, neighbour, processor);
            }
        }
    }

    /// Group bases by colour: blocks of bases with the same colour never share a cell
    pub fn colour_bases(&self, bases: &[usize]) -> Vec<Vec<usize>> {
        let stride = self.halo_width.map(|h| h + 1);
        let num_colours: usize = stride.iter().product();
        let mut colours = vec![vec![]; num_colours];
        for base in bases {
            let c = self.coords(*base);
            let colour = get_index_from_coords_3d!([c[0] % stride[0], c[1] % stride[1], c[2] % stride[2]], stride);
            colours[colour].push(*base);
        }
        colours
    }

    /// Process coloured bases, one colour after the other, each colour in parallel
    pub fn run_coloured(&self, grid: &SpatialGrid, colours: &[Vec<usize>], processor: &dyn CellProcessor, pool: &ThreadPool) {
        let cells = grid.cells();
        pool.install(|| {
            for colour in colours {
                colour.par_iter().for_each(|base| self.process_block(cells, *base, processor));
            }
        });
    }

    /// Check that a traversal built for this layout may run on a grid
    pub fn check_grid(&self, grid: &SpatialGrid) {
        if grid.generation() != self.generation || grid.cell_count() != self.num_cells() {
            panic!("Traversal was built for grid generation {} but the grid is at generation {}",
                self.generation, grid.generation());
        }
        grid.assert_valid();
    }
}
