//! Classic serial linked-cell traversal

use rayon::ThreadPool;

use super::{CellLayout, CellPairTraversal, CellProcessor};
use crate::{config::TraversalKind, grid::SpatialGrid, utils::IndexRange};

/// Walks all non-halo cells in linear order on the calling thread
///
/// Every cell processes itself, its forward neighbours and those backward
/// neighbours that are halo cells.
pub struct OriginalTraversal {
    layout: CellLayout,
    /// Non-halo cells with a neighbour outside the inner cells
    outer_cells: Vec<usize>,
    /// Inner-most cells
    inner_cells: Vec<usize>,
}

impl OriginalTraversal {
    pub fn new(grid: &SpatialGrid) -> Self {
        let layout = CellLayout::new(grid);
        let (inner_cells, outer_cells) = (0..layout.num_cells())
            .filter(|idx| !layout.is_halo(*idx))
            .partition(|idx| layout.is_inner_most(*idx));
        Self {
            layout, outer_cells, inner_cells
        }
    }

    fn process_cells(&self, grid: &SpatialGrid, cells: &[usize], processor: &dyn CellProcessor) {
        let grid_cells = grid.cells();
        for idx in cells {
            self.layout.process_cell_with_neighbours(grid_cells, *idx, processor);
        }
    }
}

impl CellPairTraversal for OriginalTraversal {
    fn kind(&self) -> TraversalKind {
        TraversalKind::Original
    }

    fn generation(&self) -> u64 {
        self.layout.generation
    }

    fn traverse(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, _pool: &ThreadPool) {
        self.layout.check_grid(grid);
        for idx in 0..self.layout.num_cells() {
            if !self.layout.is_halo(idx) {
                self.layout.process_cell_with_neighbours(grid.cells(), idx, processor);
            }
        }
    }

    fn traverse_outer(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, _pool: &ThreadPool) {
        self.layout.check_grid(grid);
        self.process_cells(grid, &self.outer_cells, processor);
    }

    fn traverse_inner(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, _pool: &ThreadPool,
        stage: usize, stage_count: usize)
    {
        self.layout.check_grid(grid);
        let part = &IndexRange::new(0, self.inner_cells.len()).split(stage_count)[stage];
        self.process_cells(grid, &self.inner_cells[part.to_range()], processor);
    }
}
