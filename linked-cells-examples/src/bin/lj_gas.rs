use std::thread;

use anyhow::{Result, anyhow};
use log::info;
use ndarray::prelude::*;
use rand::{Rng, SeedableRng};

use linked_cells::*;

const NUM_THREADS: usize = 2;
const EXTENT: f64 = 12.0;
const SPACING: f64 = 1.2;
const CUTOFF: f64 = 2.5;
const DT: f64 = 1e-3;
const NUM_STEPS: usize = 500;
const SEED: u64 = 3078663951407816208;

/// Simple cubic lattice with random velocities (identical on every rank)
fn initial_particles() -> Vec<Particle> {
    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(SEED);
    let n = (EXTENT / SPACING).round() as usize;
    let mut particles = Vec::with_capacity(n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let r = [x, y, z].map(|i| (i as f64 + 0.5) * SPACING);
                let v = [rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5)];
                particles.push(Particle::new(particles.len() as u64, 0, r).with_velocity(v));
            }
        }
    }
    particles
}

/// Velocity Verlet run of one rank, returning the global (upot, ekin) of every step
fn run_rank<B: CommunicationBackend>(decomposition: DomainDecomposition, backend: B) -> Result<Array2<f64>> {
    let config = GridConfig::builder(CUTOFF)
        .with_num_threads(NUM_THREADS)
        .build()?;
    let lj = LennardJonesProcessor::from_config(&config, 1.0, 1.0)?;
    let mut sim = SimulationBuilder::new(config, decomposition)
        .with_inner_stages(2)
        .build(backend, lj)?;
    for p in initial_particles() {
        sim.add_particle(p);
    }
    let num_particles = sim.global_particle_count()?;
    sim.compute_forces()?;

    let mut energies: Array2<f64> = Array2::zeros((NUM_STEPS, 2));
    for step in 0..NUM_STEPS {
        sim.for_each_particle_mut(|p| {
            for d in 0..3 {
                p.v[d] += 0.5 * DT * p.f[d];
                p.r[d] += DT * p.v[d];
            }
        });
        sim.processor_mut().reset_totals();
        sim.compute_forces_overlapped()?;
        sim.for_each_particle_mut(|p| {
            for d in 0..3 {
                p.v[d] += 0.5 * DT * p.f[d];
            }
        });
        let mut ekin = 0.0;
        sim.grid().for_each_particle(IterateType::InnerAndBoundary, |p| {
            ekin += 0.5 * p.v.iter().map(|v| v * v).sum::<f64>();
        });
        let mut totals = [sim.processor().upot(), ekin];
        sim.backend().all_reduce_sum(&mut totals)?;
        energies.row_mut(step).assign(&array![totals[0], totals[1]]);
        if step % 100 == 0 && sim.backend().rank() == 0 {
            info!("Step {}: Upot/N = {:.5}, Ekin/N = {:.5}", step,
                totals[0] / num_particles as f64, totals[1] / num_particles as f64);
        }
    }
    if sim.global_particle_count()? != num_particles {
        return Err(anyhow!("Particle count changed during the run"));
    }
    Ok(energies)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    // Read output path and optional rank count from args
    let output_file = std::env::args().nth(1).ok_or(anyhow!("Usage: lj_gas <output path> [ranks]"))?;
    let num_ranks = match std::env::args().nth(2) {
        Some(arg) => arg.parse::<usize>()?,
        None => 1,
    };

    let energies = if num_ranks == 1 {
        let dd = DomainDecomposition::single([0.0; 3], [EXTENT; 3])?;
        run_rank(dd, SingleProcess::new())?
    }
    else {
        let decompositions = (0..num_ranks)
            .map(|rank| DomainDecomposition::regular([0.0; 3], [EXTENT; 3], num_ranks, rank))
            .collect::<Result<Vec<_>>>()?;
        let endpoints = LocalCluster::create(&decompositions)?;
        let mut results = thread::scope(|s| {
            let handles = decompositions.into_iter()
                .zip(endpoints)
                .map(|(dd, backend)| s.spawn(move || run_rank(dd, backend)))
                .collect::<Vec<_>>();
            handles.into_iter()
                .map(|h| h.join().map_err(|_| anyhow!("Rank thread panicked"))?)
                .collect::<Result<Vec<_>>>()
        })?;
        results.swap_remove(0)
    };

    let mut writer = ndarray_npy::NpzWriter::new(std::fs::File::create(output_file)?);
    writer.add_array("upot", &energies.column(0).to_owned())?;
    writer.add_array("ekin", &energies.column(1).to_owned())?;
    writer.add_array("dt", &array![DT])?;
    writer.finish()?;

    Ok(())
}
