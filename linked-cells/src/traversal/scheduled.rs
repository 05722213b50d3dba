//! Task traversal driven by a dependency graph

use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use rayon::{Scope, ThreadPool};

use super::{CellLayout, CellPairTraversal, CellProcessor};
use crate::{config::TraversalKind, get_index_from_coords_3d, grid::SpatialGrid, utils::{ceil_div, IndexRange}};

/// One task: a box of base cells and the cell blocks it touches
#[derive(Clone, Debug)]
struct Task {
    base_start: [usize; 3],
    base_end: [usize; 3],
    resources: Vec<usize>,
    /// Tasks that may only start after this one has finished
    successors: Vec<usize>,
    num_predecessors: usize,
}

/// Cuts the base cells into blocks of `task_block_size` and runs them as a
/// task graph on the pool
///
/// The cell grid is tiled into resource blocks of the same size. Tasks that
/// touch a common resource block are chained in task order, so two of them
/// never run at the same time. A task is spawned as soon as the last of its
/// predecessors completes.
pub struct ScheduledTraversal {
    layout: CellLayout,
    tasks: Vec<Task>,
    roots: Vec<usize>,
    outer: Vec<Vec<usize>>,
    inner: Vec<usize>,
}

impl ScheduledTraversal {
    pub fn new(grid: &SpatialGrid, task_block_size: [usize; 3]) -> Self {
        let layout = CellLayout::new(grid);
        let base_dims = layout.base_dims();
        let h = layout.halo_width;
        let task_dims = [0, 1, 2].map(|d| ceil_div(base_dims[d], task_block_size[d]));
        let resource_dims = [0, 1, 2].map(|d| ceil_div(layout.dims[d], task_block_size[d]));
        let mut tasks = Vec::with_capacity(task_dims.iter().product());
        for z in 0..task_dims[2] {
            for y in 0..task_dims[1] {
                for x in 0..task_dims[0] {
                    let t = [x, y, z];
                    let base_start = [0, 1, 2].map(|d| t[d] * task_block_size[d]);
                    let base_end = [0, 1, 2].map(|d| ((t[d] + 1) * task_block_size[d]).min(base_dims[d]));
                    // The blocks of the last bases reach h cells further
                    let first = [0, 1, 2].map(|d| base_start[d] / task_block_size[d]);
                    let last = [0, 1, 2].map(|d| (base_end[d] - 1 + h[d]) / task_block_size[d]);
                    let mut resources = vec![];
                    for rz in first[2]..=last[2] {
                        for ry in first[1]..=last[1] {
                            for rx in first[0]..=last[0] {
                                resources.push(get_index_from_coords_3d!([rx, ry, rz], resource_dims));
                            }
                        }
                    }
                    tasks.push(Task { base_start, base_end, resources, successors: vec![], num_predecessors: 0 });
                }
            }
        }

        // Chain the users of every resource in task order
        let mut last_user: Vec<Option<usize>> = vec![None; resource_dims.iter().product()];
        for t in 0..tasks.len() {
            let mut predecessors = vec![];
            for r in &tasks[t].resources {
                if let Some(prev) = last_user[*r].replace(t) {
                    predecessors.push(prev);
                }
            }
            predecessors.sort_unstable();
            predecessors.dedup();
            tasks[t].num_predecessors = predecessors.len();
            for prev in predecessors {
                tasks[prev].successors.push(t);
            }
        }
        let roots = (0..tasks.len()).filter(|t| tasks[*t].num_predecessors == 0).collect();

        let (outer, inner) = layout.partition_bases();
        let outer = layout.colour_bases(&outer);
        Self { layout, tasks, roots, outer, inner }
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn process_task(&self, grid: &SpatialGrid, task: &Task, processor: &dyn CellProcessor) {
        let cells = grid.cells();
        for z in task.base_start[2]..task.base_end[2] {
            for y in task.base_start[1]..task.base_end[1] {
                for x in task.base_start[0]..task.base_end[0] {
                    self.layout.process_block(cells, self.layout.index([x, y, z]), processor);
                }
            }
        }
    }

    /// Run one task, then spawn every successor whose last dependency this was
    fn run_task<'s>(&'s self, scope: &Scope<'s>, task: usize, grid: &'s SpatialGrid,
        processor: &'s dyn CellProcessor, pending: &'s [AtomicUsize])
    {
        self.process_task(grid, &self.tasks[task], processor);
        for next in &self.tasks[task].successors {
            if pending[*next].fetch_sub(1, Ordering::AcqRel) == 1 {
                let next = *next;
                scope.spawn(move |s| self.run_task(s, next, grid, processor, pending));
            }
        }
    }
}

impl CellPairTraversal for ScheduledTraversal {
    fn kind(&self) -> TraversalKind {
        TraversalKind::Scheduled
    }

    fn generation(&self) -> u64 {
        self.layout.generation
    }

    fn traverse(&self, grid: &SpatialGrid, processor: &dyn CellProcessor, pool: &ThreadPool) {
        self.layout.check_grid(grid);
        let pending = self.tasks.iter()
            .map(|task| AtomicUsize::new(task.num_predecessors))
            .collect::<Vec<_>>();
        let pending = &pending[..];
        pool.scope(|s| {
            for root in &self.roots {
                let root = *root;
                s.spawn(move |s| self.run_task(s, root, grid, processor, pending));
            }
        });
        debug_assert!(pending.iter().all(|p| p.load(Ordering::Relaxed) == 0));
        trace!("Scheduled traversal: {} tasks from {} roots", self.tasks.len(), self.roots.len());
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
