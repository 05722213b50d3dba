//! Configuration of the linked-cell grid and the traversal selection

use anyhow::{anyhow, Result};
use log::warn;
use strum_macros::{Display, EnumIter, EnumString};

/// Available cell pair traversal strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum TraversalKind {
    /// Forward neighbours for inner cells, forward and backward-halo neighbours for boundary cells
    Original,
    /// Eight-colour block traversal
    C08,
    /// Slabs along the longest axis, one per thread
    Sliced,
    /// Task graph executed by a work-stealing scheduler
    Scheduled,
}

impl TraversalKind {
    /// Default policy: coloured blocks for more than one thread, sliced otherwise
    pub fn default_for_threads(num_threads: usize) -> Self {
        if num_threads > 1 { TraversalKind::C08 } else { TraversalKind::Sliced }
    }

    /// Interpret a free-form selector string
    ///
    /// Accepts the exact names as well as the abbreviations of the legacy
    /// selector (`ori`, `slice`, `qui`). Returns `None` (after logging a
    /// warning) if nothing matches, in which case the default policy applies.
    pub fn from_selector(selector: &str) -> Option<Self> {
        if let Ok(kind) = selector.trim().parse::<TraversalKind>() {
            return Some(kind);
        }
        let selector = selector.to_lowercase();
        if selector.contains("c08") {
            Some(TraversalKind::C08)
        }
        else if selector.contains("qui") || selector.contains("sched") {
            Some(TraversalKind::Scheduled)
        }
        else if selector.contains("slice") {
            Some(TraversalKind::Sliced)
        }
        else if selector.contains("ori") {
            Some(TraversalKind::Original)
        }
        else {
            warn!("No traversal matches selector '{}', falling back to the default traversal", selector);
            None
        }
    }
}

/// Validated grid and traversal configuration
#[derive(Clone, Debug)]
pub struct GridConfig {
    /// Interaction cutoff radius (determines cell size and halo width)
    pub cutoff: f64,
    /// Lennard-Jones cutoff radius (never larger than `cutoff`)
    pub lj_cutoff: f64,
    /// Number of cells spanning one cutoff radius
    pub cells_in_cutoff: usize,
    /// Explicitly selected traversal (None means default policy)
    pub traversal: Option<TraversalKind>,
    /// Base cells per task along each axis for the scheduled traversal
    pub task_block_size: [usize; 3],
    /// Number of worker threads for traversals
    pub num_threads: usize,
}

impl GridConfig {
    pub fn builder(cutoff: f64) -> GridConfigBuilder {
        GridConfigBuilder::new(cutoff)
    }

    /// The traversal that will actually be used
    pub fn selected_traversal(&self) -> TraversalKind {
        self.traversal.unwrap_or_else(|| TraversalKind::default_for_threads(self.num_threads))
    }
}

/// Builder for `GridConfig` with default values
pub struct GridConfigBuilder {
    cutoff: f64,
    lj_cutoff: Option<f64>,
    cells_in_cutoff: usize,
    traversal: Option<TraversalKind>,
    task_block_size: [usize; 3],
    num_threads: Option<usize>,
}

impl GridConfigBuilder {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff,
            lj_cutoff: None,
            cells_in_cutoff: 1,
            traversal: None,
            task_block_size: [2, 2, 2],
            num_threads: None
        }
    }

    pub fn with_lj_cutoff(mut self, lj_cutoff: f64) -> Self {
        self.lj_cutoff = Some(lj_cutoff);
        self
    }

    pub fn with_cells_in_cutoff(mut self, cells_in_cutoff: usize) -> Self {
        self.cells_in_cutoff = cells_in_cutoff;
        self
    }

    pub fn with_traversal(mut self, traversal: TraversalKind) -> Self {
        self.traversal = Some(traversal);
        self
    }

    /// Select the traversal from a selector string (see `TraversalKind::from_selector`)
    pub fn with_traversal_selector(mut self, selector: &str) -> Self {
        self.traversal = TraversalKind::from_selector(selector);
        self
    }

    pub fn with_task_block_size(mut self, task_block_size: [usize; 3]) -> Self {
        self.task_block_size = task_block_size;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn build(self) -> Result<GridConfig> {
        if !(self.cutoff.is_finite() && self.cutoff > 0.0) {
            return Err(anyhow!("Cutoff radius must be positive and finite (was {})", self.cutoff));
        }
        let lj_cutoff = self.lj_cutoff.unwrap_or(self.cutoff);
        if !(lj_cutoff > 0.0 && lj_cutoff <= self.cutoff) {
            return Err(anyhow!("LJ cutoff radius {} must be positive and not larger than the cutoff radius {}",
                lj_cutoff, self.cutoff));
        }
        if self.cells_in_cutoff == 0 {
            return Err(anyhow!("Number of cells in cutoff radius must be at least 1"));
        }
        for (d, size) in self.task_block_size.iter().enumerate() {
            if *size < 2 {
                return Err(anyhow!("Task block size in {} direction is <2 and thereby invalid! ({})",
                    ['x', 'y', 'z'][d], size));
            }
        }
        let num_threads = self.num_threads.unwrap_or_else(rayon::current_num_threads);
        if num_threads == 0 {
            return Err(anyhow!("Number of worker threads must be at least 1"));
        }
        Ok(GridConfig {
            cutoff: self.cutoff,
            lj_cutoff,
            cells_in_cutoff: self.cells_in_cutoff,
            traversal: self.traversal,
            task_block_size: self.task_block_size,
            num_threads
        })
    }
}
