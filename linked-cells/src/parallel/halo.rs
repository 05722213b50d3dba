//! Face-by-face exchange of leaving particles, halo copies and halo forces

use anyhow::Result;
use log::{debug, trace};

use super::{CommunicationBackend, DomainDecomposition};
use crate::{grid::{Face, SpatialGrid, POSITION_EPSILON}, particles::Particle};

fn shift_positions(particles: &mut [Particle], shift: &[f64; 3]) {
    for p in particles {
        for d in 0..3 {
            p.r[d] += shift[d];
        }
    }
}

/// Halo exchange protocol of one process
///
/// Corner and edge neighbours are never addressed directly: the axes are
/// processed one after another (x, y, z) and every face region spans the
/// halo-extended box along the other axes, so particles reach diagonal
/// neighbours as a composition of face exchanges.
#[derive(Clone, Debug)]
pub struct HaloExchange {
    decomposition: DomainDecomposition,
}

impl HaloExchange {
    pub fn new(decomposition: DomainDecomposition) -> Self {
        Self {
            decomposition
        }
    }

    pub fn decomposition(&self) -> &DomainDecomposition {
        &self.decomposition
    }

    /// Move leavers to their new owners, then refresh the halo layer
    ///
    /// The halo layer must be free of stale copies (only leavers may sit in
    /// halo cells) and the grid must be valid.
    pub fn exchange_particles(&self, grid: &SpatialGrid, backend: &dyn CommunicationBackend) -> Result<()> {
        let mut moved = 0;
        for dim in 0..3 {
            moved += self.handle_domain_leaving_particles(dim, grid, backend)?;
        }
        let mut copied = 0;
        for dim in 0..3 {
            copied += self.populate_halo_layer_with_copies(dim, grid, backend)?;
        }
        debug!("Rank {}: sent {} leaving particles and {} halo copies", backend.rank(), moved, copied);
        Ok(())
    }

    /// Send particles that crossed the faces of one axis to the neighbours
    /// across these faces and insert what the opposite neighbours sent
    ///
    /// Returns the number of particles sent.
    pub fn handle_domain_leaving_particles(&self, dim: usize, grid: &SpatialGrid, backend: &dyn CommunicationBackend) -> Result<usize> {
        let mut sent = 0;
        for face in Face::of_axis(dim) {
            let (low, high) = grid.geometry().halo_region(face);
            let mut leavers = grid.take_region(&low, &high);
            shift_positions(&mut leavers, &self.decomposition.shift(face));
            sent += leavers.len();
            trace!("Rank {}: {} particles leave through {:?}", backend.rank(), leavers.len(), face);
            let arrivals = backend.exchange_particles(face, leavers)?;
            grid.add_particles(arrivals, false);
        }
        Ok(sent)
    }

    /// Send copies of the boundary particles along one axis to the neighbours
    /// and insert the copies received from the opposite neighbours into the halo
    ///
    /// Returns the number of copies sent.
    pub fn populate_halo_layer_with_copies(&self, dim: usize, grid: &SpatialGrid, backend: &dyn CommunicationBackend) -> Result<usize> {
        let mut sent = 0;
        for face in Face::of_axis(dim) {
            let (low, high) = grid.geometry().boundary_region(face);
            let mut copies = grid.get_region(&low, &high);
            shift_positions(&mut copies, &self.decomposition.shift(face));
            sent += copies.len();
            trace!("Rank {}: {} halo copies cross {:?}", backend.rank(), copies.len(), face);
            let arrivals = backend.exchange_particles(face, copies)?;
            grid.add_particles(arrivals, false);
        }
        Ok(sent)
    }

    /// Fold forces, torques and virials accumulated on halo copies back into
    /// the particles they were copied from
    ///
    /// The axes are processed in reverse order (z, y, x) so that copies of
    /// copies first fold into the intermediate copy, which is then folded
    /// further. Positions must not have changed since the halo was populated.
    pub fn exchange_forces(&self, grid: &SpatialGrid, backend: &dyn CommunicationBackend) -> Result<()> {
        for dim in (0..3).rev() {
            self.handle_force_exchange(dim, grid, backend)?;
        }
        Ok(())
    }

    /// Force folding along one axis
    pub fn handle_force_exchange(&self, dim: usize, grid: &SpatialGrid, backend: &dyn CommunicationBackend) -> Result<()> {
        for face in Face::of_axis(dim) {
            let (low, high) = grid.geometry().halo_region(face);
            let mut copies = vec![];
            // Reset the sent accumulators so nothing is folded twice by a later axis
            grid.for_each_in_region_mut(&low, &high, |p| {
                copies.push(*p);
                p.clear_fm();
            });
            shift_positions(&mut copies, &self.decomposition.shift(face));
            trace!("Rank {}: folding {} halo forces across {:?}", backend.rank(), copies.len(), face);
            let arrivals = backend.exchange_particles(face, copies)?;
            for copy in arrivals {
                let found = grid.modify_particle_at(&copy.r, copy.id, POSITION_EPSILON, |original| original.absorb(&copy));
                if !found {
                    panic!("Rank {}: no origin for halo copy of particle {} at {:?} (received across {:?})",
                        backend.rank(), copy.id, copy.r, face.opposite());
                }
            }
        }
        Ok(())
    }
}
