//! Coloured block traversal

use rayon::ThreadPool;

use super::{CellLayout, CellPairTraversal, CellProcessor};
use crate::{config::TraversalKind, grid::SpatialGrid, utils::IndexRange};

/// Processes the blocks of all base cells colour by colour
///
/// With halo width `h` there are `(h+1)^3` colours (eight for `h = 1`). Blocks
/// of one colour are disjoint and run in parallel; the colours run one after
/// the other.
pub struct C08Traversal {
    layout: CellLayout,
    all: Vec<Vec<usize>>,
    outer: Vec<Vec<usize>>,
    /// Bases whose block only contains inner cells
    inner: Vec<usize>,
}

impl C08Traversal {
    pub fn new(grid: &SpatialGrid) -> Self {
        let layout = CellLayout::new(grid);
        let all = layout.colour_bases(&layout.bases());
        let (outer, inner) = layout.partition_bases();
        let outer = layout.colour_bases(&outer);
        Self {
            layout, all, outer, inner
        }
    }
}

impl CellPairTraversal for C08Traversal {
    fn kind(&self) -> TraversalKind {
        TraversalKind::C08
    }

    fn generation(&self) -> u64 {
        self.layout.generation
    }

    fn traverse(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool) {
        self.layout.check_grid(grid);
        self.layout.run_coloured(grid, &self.all, processor, pool);
    }

    fn traverse_outer(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool) {
        self.layout.check_grid(grid);
        self.layout.run_coloured(grid, &self.outer, processor, pool);
    }

    fn traverse_inner(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool,
        stage: usize, stage_count: usize)
    {
        self.layout.check_grid(grid);
        let part = &IndexRange::new(0, self.inner.len()).split(stage_count)[stage];
        let colours = self.layout.colour_bases(&self.inner[part.to_range()]);
        self.layout.run_coloured(grid, &colours, processor, pool);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::GridConfig, traversal::test_util::*};

    #[test]
    fn visits_every_pair_once() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        for (extent, cells_in_cutoff) in [(3.0, 1), (4.0, 1), (5.5, 2), (6.2, 3)] {
            let config = GridConfig::builder(1.0).with_cells_in_cutoff(cells_in_cutoff).with_num_threads(4).build().unwrap();
            let grid = SpatialGrid::new([0.0; 3], [extent, 4.0, 3.0], &config).unwrap();
            let traversal = C08Traversal::new(&grid);
            let recorder = PairRecorder::default();
            traversal.traverse(&grid, &recorder, &pool);
            assert_exact_cover(&grid, &recorder);
        }
    }

    #[test]
    fn outer_and_inner_stages_add_up() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let config = GridConfig::builder(1.0).with_num_threads(2).build().unwrap();
        let grid = SpatialGrid::new([0.0; 3], [6.0, 7.0, 8.0], &config).unwrap();
        let traversal = C08Traversal::new(&grid);
        let recorder = PairRecorder::default();
        traversal.traverse_outer(&grid, &recorder, &pool);
        for stage in 0..4 {
            traversal.traverse_inner(&grid, &recorder, &pool, stage, 4);
        }
        assert_exact_cover(&grid, &recorder);
    }
}
