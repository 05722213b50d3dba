//! The linked-cell grid of one process
//!
//! The grid covers the region owned by this process plus a halo layer that is
//! at least one cutoff radius wide. Particles are bucketed by position; the
//! halo layer holds copies of neighbouring particles (and, between a position
//! update and the next exchange, particles that left the owned region).

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, atomic::{AtomicBool, Ordering}};

use anyhow::Result;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{config::GridConfig, decompose_index_to_coords_3d, get_index_from_coords_3d, particles::Particle};

mod cell;
mod geometry;
mod offsets;
mod region;

pub use cell::*;
pub use geometry::*;
pub use offsets::*;
pub use region::*;

/// Tolerance for locating a particle by its position
pub const POSITION_EPSILON: f64 = 1e-10;

/// Selects which cells an iteration visits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterateType {
    /// Every cell
    All,
    /// Owned cells only (inner and boundary)
    InnerAndBoundary,
    /// Halo cells only
    Halo,
}

impl IterateType {
    fn accepts(&self, region: CellRegion) -> bool {
        match self {
            IterateType::All => true,
            IterateType::InnerAndBoundary => region != CellRegion::Halo,
            IterateType::Halo => region == CellRegion::Halo,
        }
    }
}

/// Linked-cell container for the region owned by one process
pub struct SpatialGrid {
    /// Cell geometry (halo included)
    geometry: GridGeometry,
    /// Neighbour offsets for the current geometry
    offsets: NeighborOffsetTable,
    /// All cells in row-major order (halo included)
    cells: Vec<RwLock<Cell>>,
    /// True if every particle sits in the cell matching its position
    valid: AtomicBool,
    /// Incremented on every rebuild; traversals compare against it to detect staleness
    generation: u64,
}

impl SpatialGrid {
    /// Create an empty grid for the owned box [bbox_min, bbox_max)
    pub fn new(bbox_min: [f64; 3], bbox_max: [f64; 3], config: &GridConfig) -> Result<Self> {
        let geometry = GridGeometry::new(bbox_min, bbox_max, config.cutoff, config.cells_in_cutoff)?;
        let mut grid = Self {
            offsets: NeighborOffsetTable::default(),
            cells: vec![],
            geometry,
            valid: AtomicBool::new(true),
            generation: 0,
        };
        grid.initialize_cells();
        Ok(grid)
    }

    /// Recompute the cell geometry for a new owned box
    ///
    /// Particles inside the new halo-extended box are kept, all others are
    /// dropped (they belong to other processes now). Any traversal built for
    /// the previous geometry becomes stale.
    pub fn rebuild(&mut self, bbox_min: [f64; 3], bbox_max: [f64; 3]) -> Result<()> {
        let geometry = GridGeometry::new(bbox_min, bbox_max, self.geometry.cutoff, self.geometry.cells_in_cutoff)?;
        let particles = self.cells.iter_mut()
            .flat_map(|cell| cell.get_mut().unwrap().take_particles())
            .collect::<Vec<_>>();
        self.geometry = geometry;
        self.initialize_cells();
        self.generation += 1;
        let mut dropped = 0;
        for particle in particles {
            if self.geometry.in_halo_box(&particle.r) {
                self.insert_unchecked(particle);
            }
            else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("Rebuild dropped {} particles outside the new halo box", dropped);
        }
        self.valid.store(true, Ordering::Release);
        Ok(())
    }

    /// Create all cells, classify them and compute the neighbour offsets
    fn initialize_cells(&mut self) {
        let geometry = &self.geometry;
        let dims = geometry.cells_per_dim;
        let h = geometry.halo_width;
        let classify = |c: [usize; 3], margin: usize| {
            (0..3).any(|d| c[d] < margin * h[d] || c[d] >= dims[d] - margin * h[d])
        };
        self.cells = (0..geometry.num_cells())
            .map(|idx| {
                let coords: [usize; 3] = decompose_index_to_coords_3d!(idx, dims);
                let region = if classify(coords, 1) {
                    CellRegion::Halo
                }
                else if classify(coords, 2) {
                    CellRegion::Boundary
                }
                else {
                    CellRegion::Inner
                };
                let inner_most = !classify(coords, 3);
                let (box_min, box_max) = geometry.cell_bounds(coords);
                RwLock::new(Cell::new(idx, region, inner_most, box_min, box_max))
            })
            .collect();
        self.offsets = NeighborOffsetTable::new(geometry);
        info!("Linked cells: {:?} cells (halo width {:?}), cell length {:?}, {} forward neighbours",
            dims, h, geometry.cell_length, self.offsets.forward().len());
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn offsets(&self) -> &NeighborOffsetTable {
        &self.offsets
    }

    pub fn dims(&self) -> [usize; 3] {
        self.geometry.cells_per_dim
    }

    pub fn cutoff(&self) -> f64 {
        self.geometry.cutoff
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// The cell array (for traversals)
    pub fn cells(&self) -> &[RwLock<Cell>] {
        &self.cells
    }

    /// Borrow a single cell
    pub fn cell(&self, idx: usize) -> RwLockReadGuard<Cell> {
        self.cells[idx].read().unwrap()
    }

    /// Borrow a single cell mutably
    pub fn cell_mut(&self, idx: usize) -> RwLockWriteGuard<Cell> {
        self.cells[idx].write().unwrap()
    }

    pub fn three_d_index_of(&self, idx: usize) -> [usize; 3] {
        decompose_index_to_coords_3d!(idx, self.geometry.cells_per_dim)
    }

    pub fn linear_index_of(&self, coords: [usize; 3]) -> usize {
        get_index_from_coords_3d!(coords, self.geometry.cells_per_dim)
    }

    /// Index of the cell containing a point (fatal if outside the halo-extended box)
    pub fn cell_index_of_point(&self, point: &[f64; 3]) -> usize {
        match self.geometry.cell_index_of_point(point) {
            Some(idx) => idx,
            None => panic!("Point {:?} is outside the halo-extended box [{:?}, {:?})",
                point, self.geometry.halo_min, self.geometry.halo_max),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the particle-to-cell assignment as stale (positions were changed)
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Abort if the particle-to-cell assignment is stale
    pub fn assert_valid(&self) {
        if !self.is_valid() {
            panic!("Cell structure is invalid: particle positions changed without calling update()");
        }
    }

    /// Move every particle whose position no longer matches its cell
    pub fn update(&mut self) {
        let geometry = &self.geometry;
        // Collect leavers in parallel, every cell only touches itself
        let leavers = self.cells.par_iter_mut()
            .flat_map_iter(|cell| {
                let cell = cell.get_mut().unwrap();
                let idx = cell.index();
                cell.drain_where(|p| geometry.cell_index_of_point(&p.r) != Some(idx))
            })
            .collect::<Vec<_>>();
        let moved = leavers.len();
        for particle in leavers {
            let idx = match geometry.cell_index_of_point(&particle.r) {
                Some(idx) => idx,
                None => panic!("Particle {} at {:?} has left the halo-extended box [{:?}, {:?}) in a single step",
                    particle.id, particle.r, geometry.halo_min, geometry.halo_max),
            };
            self.cells[idx].get_mut().unwrap().add_particle(particle, false);
        }
        debug!("Cell update moved {} particles", moved);
        self.valid.store(true, Ordering::Release);
    }

    fn insert_unchecked(&mut self, particle: Particle) {
        let idx = self.cell_index_of_point(&particle.r);
        self.cells[idx].get_mut().unwrap().add_particle(particle, false);
    }

    /// Insert a particle into the cell matching its position
    ///
    /// A particle outside the halo-extended box is a stale particle that should
    /// have been migrated or deleted, which is fatal. Returns false if
    /// `check_duplicate` is set and a particle with the same id already sits in
    /// the target cell.
    pub fn add_particle(&self, particle: Particle, check_duplicate: bool) -> bool {
        let idx = match self.geometry.cell_index_of_point(&particle.r) {
            Some(idx) => idx,
            None => panic!("Cannot add particle {} at {:?}: outside the halo-extended box [{:?}, {:?})",
                particle.id, particle.r, self.geometry.halo_min, self.geometry.halo_max),
        };
        self.cells[idx].write().unwrap().add_particle(particle, check_duplicate)
    }

    /// Insert a batch of particles, returns the number actually inserted
    pub fn add_particles(&self, particles: Vec<Particle>, check_duplicate: bool) -> usize {
        particles.into_iter()
            .filter(|p| self.add_particle(*p, check_duplicate))
            .count()
    }

    /// Visit the cells that may contain particles of the box [low, high)
    fn for_each_cell_in_region<F: FnMut(&RwLock<Cell>)>(&self, low: &[f64; 3], high: &[f64; 3], mut f: F) {
        let (start, end) = match self.geometry.cell_coord_range(low, high) {
            Some(range) => range,
            None => return,
        };
        for z in start[2]..=end[2] {
            for y in start[1]..=end[1] {
                for x in start[0]..=end[0] {
                    f(&self.cells[self.linear_index_of([x, y, z])]);
                }
            }
        }
    }

    /// Copies of all particles inside the box [low, high)
    pub fn get_region(&self, low: &[f64; 3], high: &[f64; 3]) -> Vec<Particle> {
        self.assert_valid();
        let mut particles = vec![];
        self.for_each_cell_in_region(low, high, |cell| {
            let cell = cell.read().unwrap();
            particles.extend(cell.particles().iter().filter(|p| p.in_box(low, high)));
        });
        particles
    }

    /// Remove and return all particles inside the box [low, high)
    pub fn take_region(&self, low: &[f64; 3], high: &[f64; 3]) -> Vec<Particle> {
        self.assert_valid();
        let mut particles = vec![];
        self.for_each_cell_in_region(low, high, |cell| {
            particles.extend(cell.write().unwrap().drain_where(|p| p.in_box(low, high)));
        });
        particles
    }

    /// Apply a function to every particle inside the box [low, high)
    pub fn for_each_in_region_mut<F: FnMut(&mut Particle)>(&self, low: &[f64; 3], high: &[f64; 3], mut f: F) {
        self.assert_valid();
        self.for_each_cell_in_region(low, high, |cell| {
            let mut cell = cell.write().unwrap();
            cell.particles_mut().iter_mut()
                .filter(|p| p.in_box(low, high))
                .for_each(&mut f);
        });
    }

    /// Modify the particle with the given id located at `position` (within `epsilon`)
    ///
    /// Returns false if no such particle exists.
    pub fn modify_particle_at<F: FnOnce(&mut Particle)>(&self, position: &[f64; 3], id: u64, epsilon: f64, f: F) -> bool {
        self.assert_valid();
        let low = position.map(|x| x - epsilon);
        let high = position.map(|x| x + epsilon);
        let matches = |p: &Particle| p.id == id && (0..3).all(|d| (p.r[d] - position[d]).abs() <= epsilon);
        let (start, end) = match self.geometry.cell_coord_range(&low, &high) {
            Some(range) => range,
            None => return false,
        };
        for z in start[2]..=end[2] {
            for y in start[1]..=end[1] {
                for x in start[0]..=end[0] {
                    let mut cell = self.cells[self.linear_index_of([x, y, z])].write().unwrap();
                    if let Some(p) = cell.particles_mut().iter_mut().find(|p| matches(&**p)) {
                        f(p);
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Copy of the particle at `position` (within `epsilon`), if any
    pub fn particle_at_position(&self, position: &[f64; 3], epsilon: f64) -> Option<Particle> {
        self.assert_valid();
        let low = position.map(|x| x - epsilon);
        let high = position.map(|x| x + epsilon);
        let mut found = None;
        self.for_each_cell_in_region(&low, &high, |cell| {
            if found.is_none() {
                found = cell.read().unwrap().particles().iter()
                    .find(|p| (0..3).all(|d| (p.r[d] - position[d]).abs() <= epsilon))
                    .copied();
            }
        });
        found
    }

    /// Delete the particle with the given id from the cell at `position`
    pub fn delete_particle(&self, id: u64, position: &[f64; 3]) -> Option<Particle> {
        let idx = self.cell_index_of_point(position);
        self.cells[idx].write().unwrap().delete_particle_by_id(id)
    }

    /// Drop every particle in the halo layer
    pub fn delete_outer_particles(&self) -> usize {
        self.cells.iter()
            .map(|cell| {
                let mut cell = cell.write().unwrap();
                if cell.is_halo() {
                    let n = cell.len();
                    cell.clear();
                    n
                }
                else {
                    0
                }
            })
            .sum()
    }

    /// Drop every particle
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.get_mut().unwrap().clear();
        }
        self.valid.store(true, Ordering::Release);
    }

    /// Number of particles in the selected cells
    pub fn number_of_particles(&self, which: IterateType) -> usize {
        self.cells.iter()
            .map(|cell| cell.read().unwrap())
            .filter(|cell| which.accepts(cell.region()))
            .map(|cell| cell.len())
            .sum()
    }

    /// Number of owned particles of one component
    pub fn count_particles(&self, component: u64) -> usize {
        self.cells.iter()
            .map(|cell| cell.read().unwrap())
            .filter(|cell| !cell.is_halo())
            .map(|cell| cell.particles().iter().filter(|p| p.component == component).count())
            .sum()
    }

    /// Visit every particle of the selected cells
    pub fn for_each_particle<F: FnMut(&Particle)>(&self, which: IterateType, mut f: F) {
        for cell in &self.cells {
            let cell = cell.read().unwrap();
            if which.accepts(cell.region()) {
                cell.particles().iter().for_each(&mut f);
            }
        }
    }

    /// Mutate every particle of the selected cells
    ///
    /// Positions may change, so the grid is marked invalid until the next `update()`.
    pub fn for_each_particle_mut<F: FnMut(&mut Particle)>(&mut self, which: IterateType, mut f: F) {
        for cell in &mut self.cells {
            let cell = cell.get_mut().unwrap();
            if which.accepts(cell.region()) {
                cell.particles_mut().iter_mut().for_each(&mut f);
            }
        }
        self.invalidate();
    }

    /// Reset force, torque and virial of every particle (keeps the grid valid)
    pub fn clear_forces(&mut self) {
        self.cells.par_iter_mut().for_each(|cell| {
            cell.get_mut().unwrap().particles_mut().iter_mut().for_each(|p| p.clear_fm());
        });
    }
}
