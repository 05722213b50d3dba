//! Slab traversal along the longest axis

use std::sync::Mutex;

use rayon::ThreadPool;

use super::{CellLayout, CellPairTraversal, CellProcessor};
use crate::{config::TraversalKind, grid::SpatialGrid, utils::{argmax, IndexRange}};

/// Splits the base cells into one slab of layers per thread
///
/// The blocks of the last `h` layers of a slab overlap with the blocks of the
/// first `h` layers of the next slab. Each slab has a lock that its owner
/// holds while processing its first `h` layers and that the previous slab's
/// owner takes for its last `h` layers, which serialises the overlap.
pub struct SlicedTraversal {
    layout: CellLayout,
    num_threads: usize,
    /// Axis along which the slabs are cut
    axis: usize,
    /// Base cell layers of every slab
    slabs: Vec<IndexRange>,
    outer: Vec<Vec<usize>>,
    inner: Vec<usize>,
}

impl SlicedTraversal {
    pub fn new(grid: &SpatialGrid, num_threads: usize) -> Self {
        let layout = CellLayout::new(grid);
        let base_dims = layout.base_dims();
        let axis = argmax(&base_dims);
        let slabs = IndexRange::new(0, base_dims[axis]).split(num_threads);
        let (outer, inner) = layout.partition_bases();
        let outer = layout.colour_bases(&outer);
        Self {
            layout, num_threads, axis, slabs, outer, inner
        }
    }

    /// A grid can be sliced if every thread gets at least two halo widths of base layers
    pub fn is_applicable(dims: [usize; 3], halo_width: [usize; 3], num_threads: usize) -> bool {
        let base_dims = [0, 1, 2].map(|d| dims[d].saturating_sub(halo_width[d]));
        let axis = argmax(&base_dims);
        base_dims[axis] >= 2 * halo_width[axis] * num_threads
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Process all bases of one layer along the slab axis
    fn process_layer(&self, grid: &SpatialGrid, layer: usize, processor: &dyn CellProcessor) {
        let base_dims = self.layout.base_dims();
        let (u, v) = ((self.axis + 1) % 3, (self.axis + 2) % 3);
        let (u, v) = (u.min(v), u.max(v));
        let cells = grid.cells();
        for j in 0..base_dims[v] {
            for i in 0..base_dims[u] {
                let mut c = [0; 3];
                c[self.axis] = layer;
                c[u] = i;
                c[v] = j;
                self.layout.process_block(cells, self.layout.index(c), processor);
            }
        }
    }
}

impl CellPairTraversal for SlicedTraversal {
    fn kind(&self) -> TraversalKind {
        TraversalKind::Sliced
    }

    fn generation(&self) -> u64 {
        self.layout.generation
    }

    fn traverse(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool) {
        self.layout.check_grid(grid);
        let h = self.layout.halo_width[self.axis];
        let locks = (0..self.slabs.len()).map(|_| Mutex::new(())).collect::<Vec<_>>();
        let locks = &locks;
        pool.scope(|s| {
            for (t, slab) in self.slabs.iter().enumerate() {
                s.spawn(move |_| {
                    let mut own = Some(locks[t].lock().unwrap());
                    let mut next = None;
                    for layer in slab.to_range() {
                        if layer >= slab.start + h {
                            own = None;
                        }
                        if t + 1 < locks.len() && next.is_none() && layer + h >= slab.end {
                            next = Some(locks[t + 1].lock().unwrap());
                        }
                        self.process_layer(grid, layer, processor);
                    }
                    drop(own);
                    drop(next);
                });
            }
        });
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
