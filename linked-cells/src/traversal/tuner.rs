//! Selection and life cycle of the traversal strategies

use anyhow::{anyhow, Result};
use log::{debug, info};
use rayon::ThreadPool;
use strum::IntoEnumIterator;

use super::{C08Traversal, CellPairTraversal, CellProcessor, OriginalTraversal, SlicedTraversal};
#[cfg(feature = "scheduled")]
use super::ScheduledTraversal;
use crate::{config::{GridConfig, TraversalKind}, grid::SpatialGrid};

/// Life cycle of the tuner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunerState {
    /// No grid seen yet
    Uninitialized,
    /// Traversals built for the current grid generation, none selected
    Built,
    /// Selected traversal is ready to run
    Ready,
}

/// Owns the traversal instances of one grid and the worker pool they run on
///
/// The traversal is selected by configuration. Whenever the grid generation
/// changes, all traversals are rebuilt and the selection is checked again
/// before the next traversal runs.
pub struct TraversalTuner {
    selected: TraversalKind,
    task_block_size: [usize; 3],
    num_threads: usize,
    thread_pool: ThreadPool,
    traversals: Vec<Box<dyn CellPairTraversal>>,
    optimal: Option<usize>,
    state: TunerState,
}

impl TraversalTuner {
    pub fn new(config: &GridConfig) -> Result<Self> {
        let selected = config.selected_traversal();
        if !Self::is_available(selected) {
            return Err(anyhow!("The {} traversal was requested, but this build does not include it \
                (enable the `scheduled` feature)", selected));
        }
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()?;
        Ok(Self {
            selected,
            task_block_size: config.task_block_size,
            num_threads: config.num_threads,
            thread_pool,
            traversals: vec![],
            optimal: None,
            state: TunerState::Uninitialized,
        })
    }

    /// True if the traversal kind is compiled into this build
    pub fn is_available(kind: TraversalKind) -> bool {
        match kind {
            TraversalKind::Scheduled => cfg!(feature = "scheduled"),
            _ => true,
        }
    }

    /// True if a traversal kind can run on a grid of the given shape
    pub fn is_applicable(kind: TraversalKind, dims: [usize; 3], halo_width: [usize; 3], num_threads: usize) -> bool {
        match kind {
            TraversalKind::Original | TraversalKind::C08 => true,
            TraversalKind::Sliced => SlicedTraversal::is_applicable(dims, halo_width, num_threads),
            TraversalKind::Scheduled => Self::is_available(kind),
        }
    }

    pub fn selected(&self) -> TraversalKind {
        self.selected
    }

    pub fn state(&self) -> TunerState {
        self.state
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// The worker pool traversals run on
    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    fn build(&self, kind: TraversalKind, grid: &SpatialGrid) -> Result<Box<dyn CellPairTraversal>> {
        Ok(match kind {
            TraversalKind::Original => Box::new(OriginalTraversal::new(grid)),
            TraversalKind::C08 => Box::new(C08Traversal::new(grid)),
            TraversalKind::Sliced => Box::new(SlicedTraversal::new(grid, self.num_threads)),
            #[cfg(feature = "scheduled")]
            TraversalKind::Scheduled => Box::new(ScheduledTraversal::new(grid, self.task_block_size)),
            #[cfg(not(feature = "scheduled"))]
            TraversalKind::Scheduled => return Err(anyhow!("The scheduled traversal is not part of this build")),
        })
    }

    /// Bind to a grid generation: build all applicable traversals and drop the selection
    pub fn rebuild(&mut self, grid: &SpatialGrid) -> Result<()> {
        let geometry = grid.geometry();
        let mut traversals = vec![];
        for kind in TraversalKind::iter() {
            if Self::is_available(kind)
                && Self::is_applicable(kind, geometry.cells_per_dim, geometry.halo_width, self.num_threads)
            {
                traversals.push(self.build(kind, grid)?);
            }
        }
        debug!("Built {} traversals for grid generation {}", traversals.len(), grid.generation());
        self.traversals = traversals;
        self.optimal = None;
        self.state = TunerState::Built;
        Ok(())
    }

    /// Select the configured traversal among the built ones
    pub fn find_optimal_traversal(&mut self, grid: &SpatialGrid) -> Result<()> {
        if self.state == TunerState::Uninitialized {
            return Err(anyhow!("Traversal tuner has not been bound to a grid"));
        }
        let position = self.traversals.iter().position(|t| t.kind() == self.selected);
        match position {
            Some(idx) => {
                info!("Using {} traversal with {} threads", self.selected, self.num_threads);
                self.optimal = Some(idx);
                self.state = TunerState::Ready;
                Ok(())
            }
            None => Err(anyhow!("The {} traversal is not applicable to a grid of {:?} cells (halo width {:?}) with {} threads",
                self.selected, grid.dims(), grid.geometry().halo_width, self.num_threads)),
        }
    }

    /// Bring the tuner into the ready state for the current grid generation
    pub fn prepare(&mut self, grid: &SpatialGrid) -> Result<()> {
        let stale = self.traversals.first().map_or(true, |t| t.generation() != grid.generation());
        if self.state == TunerState::Uninitialized || stale {
            self.rebuild(grid)?;
        }
        if self.state == TunerState::Built {
            self.find_optimal_traversal(grid)?;
        }
        Ok(())
    }

    fn optimal_traversal(&self) -> &dyn CellPairTraversal {
        match self.optimal {
            Some(idx) => self.traversals[idx].as_ref(),
            None => panic!("No traversal selected, call prepare() first"),
        }
    }

    /// Full traversal with the selected strategy
    pub fn traverse(&mut self, grid: &SpatialGrid, processor: &mut dyn CellProcessor) -> Result<()> {
        self.prepare(grid)?;
        processor.init_traversal();
        self.optimal_traversal().traverse(grid, processor, &self.thread_pool);
        processor.end_traversal();
        Ok(())
    }

    /// Work touching boundary or halo cells, with the selected strategy
    pub fn traverse_outer(&mut self, grid: &SpatialGrid, processor: &mut dyn CellProcessor) -> Result<()> {
        self.prepare(grid)?;
        processor.init_traversal();
        self.optimal_traversal().traverse_outer(grid, processor, &self.thread_pool);
        processor.end_traversal();
        Ok(())
    }

    /// One of `stage_count` stages of the inner work, with the selected strategy
    pub fn traverse_inner(&mut self, grid: &SpatialGrid, processor: &mut dyn CellProcessor,
        stage: usize, stage_count: usize) -> Result<()>
    {
        if stage_count == 0 || stage >= stage_count {
            return Err(anyhow!("Invalid inner traversal stage {} of {}", stage, stage_count));
        }
        self.prepare(grid)?;
        processor.init_traversal();
        self.optimal_traversal().traverse_inner(grid, processor, &self.thread_pool, stage, stage_count);
        processor.end_traversal();
        Ok(())
    }

    /// Full traversal with a specific strategy, leaving the selection untouched
    pub fn traverse_with(&mut self, kind: TraversalKind, grid: &SpatialGrid, processor: &mut dyn CellProcessor) -> Result<()> {
        if kind == self.selected {
            return self.traverse(grid, processor);
        }
        let geometry = grid.geometry();
        if !Self::is_available(kind) || !Self::is_applicable(kind, geometry.cells_per_dim, geometry.halo_width, self.num_threads) {
            return Err(anyhow!("The {} traversal cannot run on a grid of {:?} cells with {} threads",
                kind, grid.dims(), self.num_threads));
        }
        let traversal = self.build(kind, grid)?;
        processor.init_traversal();
        traversal.traverse(grid, processor, &self.thread_pool);
        processor.end_traversal();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::traversal::test_util::*;

    #[test]
    fn state_machine() {
        let config = GridConfig::builder(1.0).with_num_threads(2).build().unwrap();
        let mut grid = SpatialGrid::new([0.0; 3], [5.0; 3], &config).unwrap();
        let mut tuner = TraversalTuner::new(&config).unwrap();
        assert_eq!(tuner.state(), TunerState::Uninitialized);
        assert_eq!(tuner.selected(), TraversalKind::C08);
        tuner.rebuild(&grid).unwrap();
        assert_eq!(tuner.state(), TunerState::Built);
        tuner.find_optimal_traversal(&grid).unwrap();
        assert_eq!(tuner.state(), TunerState::Ready);

        // A new grid generation forces a rebuild on next use
        grid.rebuild([0.0; 3], [4.0; 3]).unwrap();
        let mut recorder = PairRecorder::default();
        tuner.traverse(&grid, &mut recorder).unwrap();
        assert_eq!(tuner.state(), TunerState::Ready);
        assert_eq!((recorder.inits, recorder.ends), (1, 1));
        assert_exact_cover(&grid, &recorder);
    }

    #[test]
    fn sliced_not_applicable_is_an_error() {
        let config = GridConfig::builder(1.0).with_traversal(TraversalKind::Sliced).with_num_threads(4).build().unwrap();
        let grid = SpatialGrid::new([0.0; 3], [4.0; 3], &config).unwrap();
        let mut tuner = TraversalTuner::new(&config).unwrap();
        let mut recorder = PairRecorder::default();
        assert!(tuner.traverse(&grid, &mut recorder).is_err());
        // Other strategies still work for one-off traversals
        tuner.traverse_with(TraversalKind::C08, &grid, &mut recorder).unwrap();
        assert_exact_cover(&grid, &recorder);
    }

    #[cfg(not(feature = "scheduled"))]
    #[test]
    fn scheduled_unavailable() {
        let config = GridConfig::builder(1.0).with_traversal(TraversalKind::Scheduled).build().unwrap();
        assert!(TraversalTuner::new(&config).is_err());
    }

    #[test]
    fn invalid_stage() {
        let config = GridConfig::builder(1.0).with_num_threads(1).build().unwrap();
        let grid = SpatialGrid::new([0.0; 3], [4.0; 3], &config).unwrap();
        let mut tuner = TraversalTuner::new(&config).unwrap();
        let mut recorder = PairRecorder::default();
        assert!(tuner.traverse_inner(&grid, &mut recorder, 2, 2).is_err());
    }
}
