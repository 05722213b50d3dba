//! Per-step driver tying grid, halo exchange and traversal together

use std::thread;

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::{
    config::GridConfig,
    grid::{GridGeometry, IterateType, SpatialGrid},
    parallel::{global_particle_count, CommunicationBackend, DomainDecomposition, HaloExchange},
    particles::Particle,
    traversal::{CellProcessor, TraversalTuner},
};

/// Builder for `Simulation` with default values
pub struct SimulationBuilder {
    config: GridConfig,
    decomposition: DomainDecomposition,
    inner_stages: usize,
}

impl SimulationBuilder {
    pub fn new(config: GridConfig, decomposition: DomainDecomposition) -> Self {
        Self {
            config,
            decomposition,
            inner_stages: 1,
        }
    }

    /// Number of stages the inner traversal is split into in overlapped steps
    pub fn with_inner_stages(mut self, inner_stages: usize) -> Self {
        self.inner_stages = inner_stages;
        self
    }

    pub fn build<B, P>(self, backend: B, processor: P) -> Result<Simulation<B, P>>
        where B: CommunicationBackend, P: CellProcessor + Send
    {
        if backend.rank() != self.decomposition.rank() || backend.num_processes() != self.decomposition.num_processes() {
            return Err(anyhow!("Backend is rank {} of {} but the decomposition describes rank {} of {}",
                backend.rank(), backend.num_processes(), self.decomposition.rank(), self.decomposition.num_processes()));
        }
        if self.inner_stages == 0 {
            return Err(anyhow!("Number of inner traversal stages must be at least 1"));
        }
        let (low, high) = self.decomposition.local_bounds();
        let grid = SpatialGrid::new(low, high, &self.config)?;
        let tuner = TraversalTuner::new(&self.config)?;
        info!("Rank {}/{}: owning [{:?}, {:?}) in a {:?} process grid",
            backend.rank(), backend.num_processes(), low, high, self.decomposition.process_grid());
        Ok(Simulation {
            grid, tuner, backend, processor,
            halo: HaloExchange::new(self.decomposition),
            inner_stages: self.inner_stages,
            steps: 0,
        })
    }
}

/// Everything one process needs to compute forces on its particles
///
/// A force computation runs `update -> exchange -> traverse -> fold -> discard`.
/// Halo copies only exist between the exchange and the end of the force
/// computation, so positions can never change while copies are alive.
pub struct Simulation<B: CommunicationBackend, P: CellProcessor + Send> {
    grid: SpatialGrid,
    tuner: TraversalTuner,
    halo: HaloExchange,
    backend: B,
    processor: P,
    inner_stages: usize,
    steps: usize,
}

impl<B: CommunicationBackend, P: CellProcessor + Send> Simulation<B, P> {
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn tuner(&self) -> &TraversalTuner {
        &self.tuner
    }

    pub fn tuner_mut(&mut self) -> &mut TraversalTuner {
        &mut self.tuner
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    pub fn decomposition(&self) -> &DomainDecomposition {
        self.halo.decomposition()
    }

    /// Number of completed force computations
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Insert a particle if this process owns its position
    pub fn add_particle(&mut self, particle: Particle) -> bool {
        if !self.decomposition().owns_position(&particle.r) {
            return false;
        }
        self.grid.add_particle(particle, true)
    }

    /// Apply a function to every owned particle (e.g. an integrator step)
    ///
    /// The grid is invalid afterwards until the next force computation updates it.
    pub fn for_each_particle_mut<F: FnMut(&mut Particle)>(&mut self, f: F) {
        self.grid.for_each_particle_mut(IterateType::InnerAndBoundary, f);
    }

    /// Number of owned particles on all processes
    pub fn global_particle_count(&self) -> Result<usize> {
        global_particle_count(&self.backend, self.grid.number_of_particles(IterateType::InnerAndBoundary))
    }

    /// Switch to a new decomposition of the simulation box
    ///
    /// The grid is rebuilt for the new owned region and the halo exchange takes
    /// over the new neighbours and periodic shifts. Particles that end up in
    /// the new halo layer migrate to their owner during the next force
    /// computation. On a single process every particle is first wrapped into
    /// the new global box; with several processes a particle further than the
    /// halo width from the new owned region cannot be handed over and is an
    /// error. Traversals are rebuilt on next use.
    pub fn rebuild(&mut self, decomposition: DomainDecomposition) -> Result<()> {
        if self.backend.rank() != decomposition.rank() || self.backend.num_processes() != decomposition.num_processes() {
            return Err(anyhow!("Backend is rank {} of {} but the new decomposition describes rank {} of {}",
                self.backend.rank(), self.backend.num_processes(), decomposition.rank(), decomposition.num_processes()));
        }
        let (low, high) = decomposition.local_bounds();
        let current = self.grid.geometry();
        let geometry = GridGeometry::new(low, high, current.cutoff, current.cells_in_cutoff)?;
        if decomposition.num_processes() == 1 {
            self.grid.for_each_particle_mut(IterateType::All, |p| decomposition.wrap_position(&mut p.r));
        }
        else {
            let mut stranded = None;
            self.grid.for_each_particle(IterateType::All, |p| {
                if stranded.is_none() && !geometry.in_halo_box(&p.r) {
                    stranded = Some((p.id, p.r));
                }
            });
            if let Some((id, r)) = stranded {
                return Err(anyhow!("Rank {}: particle {} at {:?} is too far from the new region [{:?}, {:?})",
                    self.backend.rank(), id, r, low, high));
            }
        }
        self.grid.rebuild(low, high)?;
        info!("Rank {}/{}: now owning [{:?}, {:?}) in a {:?} process grid",
            self.backend.rank(), self.backend.num_processes(), low, high, decomposition.process_grid());
        self.halo = HaloExchange::new(decomposition);
        Ok(())
    }

    fn prepare_exchange(&mut self) {
        self.grid.update();
        self.grid.clear_forces();
    }

    fn finish_forces(&mut self) -> Result<()> {
        if self.processor.requires_force_exchange() {
            self.halo.exchange_forces(&self.grid, &self.backend)?;
        }
        let discarded = self.grid.delete_outer_particles();
        debug!("Rank {}: discarded {} halo particles", self.backend.rank(), discarded);
        self.steps += 1;
        Ok(())
    }

    /// Compute forces on all owned particles
    pub fn compute_forces(&mut self) -> Result<()> {
        self.prepare_exchange();
        self.halo.exchange_particles(&self.grid, &self.backend)?;
        self.tuner.traverse(&self.grid, &mut self.processor)?;
        self.finish_forces()
    }

    /// Compute forces while overlapping the halo refresh with the inner traversal
    ///
    /// Leavers are moved first since they may land in inner cells. The inner
    /// stages then run on a separate thread while the halo copies are
    /// exchanged; the outer traversal follows once both are done.
    pub fn compute_forces_overlapped(&mut self) -> Result<()> {
        self.prepare_exchange();
        for dim in 0..3 {
            self.halo.handle_domain_leaving_particles(dim, &self.grid, &self.backend)?;
        }
        // Select the traversal before the grid is shared between threads
        self.tuner.prepare(&self.grid)?;
        let Self { grid, tuner, halo, backend, processor, inner_stages, .. } = self;
        let grid = &*grid;
        let stages = *inner_stages;
        thread::scope(|s| -> Result<()> {
            let inner = s.spawn(move || -> Result<()> {
                for stage in 0..stages {
                    tuner.traverse_inner(grid, &mut *processor, stage, stages)?;
                }
                Ok(())
            });
            let exchanged = (0..3).try_for_each(|dim| {
                halo.populate_halo_layer_with_copies(dim, grid, &*backend).map(|_| ())
            });
            match inner.join() {
                Ok(result) => result?,
                Err(panic) => std::panic::resume_unwind(panic),
            }
            exchanged
        })?;
        self.tuner.traverse_outer(&self.grid, &mut self.processor)?;
        self.finish_forces()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{parallel::SingleProcess, processors::LennardJonesProcessor};

    fn lattice(extent: f64, spacing: f64) -> Vec<Particle> {
        let n = (extent / spacing).round() as usize;
        let mut particles = vec![];
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let r = [x, y, z].map(|i| (i as f64 + 0.5) * spacing);
                    particles.push(Particle::new(particles.len() as u64, 0, r));
                }
            }
        }
        particles
    }

    fn simulation(extent: f64, threads: usize) -> Simulation<SingleProcess, LennardJonesProcessor> {
        let config = GridConfig::builder(2.5).with_num_threads(threads).build().unwrap();
        let dd = DomainDecomposition::single([0.0; 3], [extent; 3]).unwrap();
        let lj = LennardJonesProcessor::new(1.0, 1.0, 2.5).unwrap();
        let mut sim = SimulationBuilder::new(config, dd).with_inner_stages(2).build(SingleProcess::new(), lj).unwrap();
        for p in lattice(extent, 1.1) {
            assert!(sim.add_particle(p));
        }
        sim
    }

    #[test]
    fn perfect_lattice_has_no_net_force() {
        let mut sim = simulation(11.0, 2);
        sim.compute_forces().unwrap();
        assert_eq!(sim.grid().number_of_particles(IterateType::Halo), 0);
        assert_eq!(sim.global_particle_count().unwrap(), 1000);
        // Periodic simple cubic lattice: every particle sees a symmetric neighbourhood
        sim.grid().for_each_particle(IterateType::All, |p| {
            assert!(p.f.iter().all(|f| f.abs() < 1e-9), "Particle {} has force {:?}", p.id, p.f);
        });
        assert!(sim.processor().upot() < 0.0);
        assert_eq!(sim.steps(), 1);
    }

    #[test]
    fn overlapped_matches_plain() {
        let mut plain = simulation(11.0, 2);
        let mut overlapped = simulation(11.0, 2);
        // Perturb both identically
        let kick = |p: &mut Particle| p.r[0] += 0.01 * ((p.id % 7) as f64 - 3.0);
        plain.for_each_particle_mut(kick);
        overlapped.for_each_particle_mut(kick);
        plain.compute_forces().unwrap();
        overlapped.compute_forces_overlapped().unwrap();
        let mut forces = vec![[0.0; 3]; 1000];
        plain.grid().for_each_particle(IterateType::All, |p| forces[p.id as usize] = p.f);
        overlapped.grid().for_each_particle(IterateType::All, |p| {
            for d in 0..3 {
                assert!((forces[p.id as usize][d] - p.f[d]).abs() < 1e-9);
            }
        });
        assert!((plain.processor().upot() - overlapped.processor().upot()).abs() < 1e-9 * plain.processor().upot().abs());
    }

    #[test]
    fn rebuild_keeps_every_particle() {
        let config = GridConfig::builder(1.0).with_num_threads(1).build().unwrap();
        let dd = DomainDecomposition::single([0.0; 3], [4.0; 3]).unwrap();
        let lj = LennardJonesProcessor::new(1.0, 1.0, 1.0).unwrap();
        let mut sim = SimulationBuilder::new(config, dd).build(SingleProcess::new(), lj).unwrap();
        assert!(sim.add_particle(Particle::new(0, 0, [3.5, 1.0, 1.0])));
        assert!(sim.add_particle(Particle::new(1, 0, [1.5, 1.0, 1.0])));
        // Far outside the new halo box as well
        assert!(sim.add_particle(Particle::new(2, 0, [1.0, 3.9, 3.9])));
        sim.compute_forces().unwrap();

        sim.rebuild(DomainDecomposition::single([0.0; 3], [3.0; 3]).unwrap()).unwrap();
        assert_eq!(sim.decomposition().local_bounds(), ([0.0; 3], [3.0; 3]));
        assert_eq!(sim.grid().dims(), [5, 5, 5]);
        sim.compute_forces().unwrap();
        assert_eq!(sim.global_particle_count().unwrap(), 3);
        sim.grid().for_each_particle(IterateType::All, |p| {
            assert!(sim.decomposition().owns_position(&p.r), "Particle {} left at {:?}", p.id, p.r);
        });
        // The particle at x = 3.5 re-enters at the lower face
        assert!(sim.grid().particle_at_position(&[0.5, 1.0, 1.0], 1e-9).is_some());
    }

    #[test]
    fn rebuild_rejects_mismatched_decompositions() {
        let mut sim = simulation(11.0, 1);
        let other_rank = DomainDecomposition::regular([0.0; 3], [11.0; 3], 2, 1).unwrap();
        assert!(sim.rebuild(other_rank).is_err());
        // Too small for the halo
        assert!(sim.rebuild(DomainDecomposition::single([0.0; 3], [4.0; 3]).unwrap()).is_err());
        assert_eq!(sim.decomposition().local_bounds(), ([0.0; 3], [11.0; 3]));
        assert_eq!(sim.global_particle_count().unwrap(), 1000);
    }

    #[test]
    fn rebuild_refuses_to_strand_particles() {
        let decompositions = (0..2)
            .map(|rank| DomainDecomposition::regular([0.0; 3], [8.0; 3], 2, rank).unwrap())
            .collect::<Vec<_>>();
        let mut endpoints = crate::parallel::LocalCluster::create(&decompositions).unwrap();
        let config = GridConfig::builder(1.0).with_num_threads(1).build().unwrap();
        let lj = LennardJonesProcessor::new(1.0, 1.0, 1.0).unwrap();
        let dd = decompositions[0].clone();
        let mut sim = SimulationBuilder::new(config, dd).build(endpoints.swap_remove(0), lj).unwrap();
        assert!(sim.add_particle(Particle::new(0, 0, [3.5, 1.0, 1.0])));
        let shifted = DomainDecomposition::regular([8.0, 0.0, 0.0], [16.0, 8.0, 8.0], 2, 0).unwrap();
        assert!(sim.rebuild(shifted).is_err());
        assert_eq!(sim.grid().number_of_particles(IterateType::All), 1);
    }

    #[test]
    fn foreign_particles_are_rejected() {
        let mut sim = simulation(11.0, 1);
        assert!(!sim.add_particle(Particle::new(5000, 0, [12.0, 1.0, 1.0])));
        assert!(!sim.add_particle(Particle::new(0, 0, [0.55, 0.55, 0.55])), "Duplicate id accepted");
    }
}
