//! Multi-process behaviour on an in-process cluster of 2x2x2 ranks

use std::thread;

use linked_cells::*;
use rand::SeedableRng;
use rand_distr::Distribution;

const NUM_RANKS: usize = 8;
const NUM_THREADS: usize = 2;
const POS_RNG_SEED: u64 = 10182137663237893456;
const NUM_STEPS: usize = 5;
const NUM_PARTICLES: usize = 1000;

const CUTOFF: f64 = 1.0;
const DOMAIN_SIZE: f64 = 8.0;

fn decompositions() -> Vec<DomainDecomposition> {
    (0..NUM_RANKS)
        .map(|rank| DomainDecomposition::regular([0.0; 3], [DOMAIN_SIZE; 3], NUM_RANKS, rank).unwrap())
        .collect()
}

/// Jittered simple cubic lattice (spacing 0.8, jitter below 0.1)
fn jittered_lattice(seed: u64) -> Vec<Particle> {
    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(seed);
    let jitter = rand_distr::Uniform::new(-0.1, 0.1);
    let n = 10;
    let spacing = DOMAIN_SIZE / n as f64;
    let mut particles = vec![];
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let r = [x, y, z].map(|i| (i as f64 + 0.5) * spacing + jitter.sample(&mut rng));
                particles.push(Particle::new(particles.len() as u64, 0, r));
            }
        }
    }
    particles
}

/// Run a closure on every rank of a fresh cluster and collect the results in rank order
fn on_cluster<T, F>(f: F) -> Vec<T>
    where T: Send, F: Fn(DomainDecomposition, LocalCluster) -> T + Sync
{
    let decompositions = decompositions();
    let endpoints = LocalCluster::create(&decompositions).unwrap();
    let f = &f;
    thread::scope(|s| {
        let handles = decompositions.into_iter()
            .zip(endpoints)
            .map(|(dd, backend)| s.spawn(move || f(dd, backend)))
            .collect::<Vec<_>>();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn particle_count_is_conserved() {
    let owned = on_cluster(|dd, backend| {
        let config = GridConfig::builder(CUTOFF).with_num_threads(NUM_THREADS).build().unwrap();
        let lj = LennardJonesProcessor::new(0.1, 0.5, CUTOFF).unwrap();
        let rank = dd.rank() as u64;
        let mut sim = SimulationBuilder::new(config, dd).build(backend, lj).unwrap();
        for p in jittered_lattice(POS_RNG_SEED) {
            sim.add_particle(p);
        }
        assert_eq!(sim.global_particle_count().unwrap(), NUM_PARTICLES);
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(POS_RNG_SEED + rank);
        let step = rand_distr::Normal::new(0.0, 0.15).unwrap();
        for _ in 0..NUM_STEPS {
            sim.for_each_particle_mut(|p| {
                for d in 0..3 {
                    p.r[d] += step.sample(&mut rng);
                }
            });
            sim.compute_forces().unwrap();
            assert_eq!(sim.global_particle_count().unwrap(), NUM_PARTICLES);
        }
        let mut ids = vec![];
        sim.grid().for_each_particle(IterateType::All, |p| {
            assert!(sim.decomposition().owns_position(&p.r), "Rank holds foreign particle {} at {:?}", p.id, p.r);
            ids.push(p.id);
        });
        ids
    });
    let mut ids = owned.into_iter().flatten().collect::<Vec<_>>();
    ids.sort_unstable();
    assert_eq!(ids, (0..NUM_PARTICLES as u64).collect::<Vec<_>>(), "Particles were lost or are owned twice");
}

#[test]
fn halo_copies_mirror_owned_particles() {
    let snapshots = on_cluster(|dd, backend| {
        let config = GridConfig::builder(CUTOFF).with_num_threads(1).build().unwrap();
        let (low, high) = dd.local_bounds();
        let grid = SpatialGrid::new(low, high, &config).unwrap();
        for p in jittered_lattice(POS_RNG_SEED) {
            if dd.owns_position(&p.r) {
                grid.add_particle(p, false);
            }
        }
        let halo = HaloExchange::new(dd);
        halo.exchange_particles(&grid, &backend).unwrap();
        let mut owned = vec![];
        let mut copies = vec![];
        grid.for_each_particle(IterateType::InnerAndBoundary, |p| owned.push(*p));
        grid.for_each_particle(IterateType::Halo, |p| copies.push(*p));
        (owned, copies)
    });
    let owned = snapshots.iter().flat_map(|(owned, _)| owned.clone()).collect::<Vec<_>>();
    let mut total_copies = 0;
    for (copies_of_rank, (_, copies)) in snapshots.iter().enumerate() {
        for copy in copies {
            total_copies += 1;
            let origin = owned.iter().find(|p| p.id == copy.id)
                .unwrap_or_else(|| panic!("Rank {}: halo copy {} has no owner", copies_of_rank, copy.id));
            for d in 0..3 {
                let dx = copy.r[d] - origin.r[d];
                let wrapped = dx - (dx / DOMAIN_SIZE).round() * DOMAIN_SIZE;
                assert!(wrapped.abs() < 1e-9, "Copy of {} at {:?} is not a periodic image of {:?}", copy.id, copy.r, origin.r);
            }
        }
    }
    assert!(total_copies > 0);
}

#[test]
fn forces_match_single_process() {
    let reference = {
        let config = GridConfig::builder(CUTOFF).with_num_threads(NUM_THREADS).build().unwrap();
        let dd = DomainDecomposition::single([0.0; 3], [DOMAIN_SIZE; 3]).unwrap();
        let lj = LennardJonesProcessor::new(0.5, 0.9, CUTOFF).unwrap();
        let mut sim = SimulationBuilder::new(config, dd).build(SingleProcess::new(), lj).unwrap();
        for p in jittered_lattice(POS_RNG_SEED) {
            sim.add_particle(p);
        }
        sim.compute_forces().unwrap();
        let mut forces = vec![[0.0; 3]; NUM_PARTICLES];
        sim.grid().for_each_particle(IterateType::All, |p| forces[p.id as usize] = p.f);
        (forces, sim.processor().upot())
    };
    let results = on_cluster(|dd, backend| {
        let config = GridConfig::builder(CUTOFF).with_num_threads(NUM_THREADS).build().unwrap();
        let lj = LennardJonesProcessor::new(0.5, 0.9, CUTOFF).unwrap();
        let mut sim = SimulationBuilder::new(config, dd).with_inner_stages(2).build(backend, lj).unwrap();
        for p in jittered_lattice(POS_RNG_SEED) {
            sim.add_particle(p);
        }
        sim.compute_forces_overlapped().unwrap();
        let mut forces = vec![];
        sim.grid().for_each_particle(IterateType::All, |p| forces.push((p.id, p.f)));
        let mut upot = [sim.processor().upot()];
        sim.backend().all_reduce_sum(&mut upot).unwrap();
        (forces, upot[0])
    });
    for (forces, upot) in results {
        assert!((upot - reference.1).abs() <= 1e-9 * reference.1.abs().max(1.0));
        for (id, f) in forces {
            for d in 0..3 {
                let expected = reference.0[id as usize][d];
                assert!((f[d] - expected).abs() <= 1e-9 * expected.abs().max(1.0), "Force on {} differs", id);
            }
        }
    }
}

/// Counts the neighbours of every particle in `f[0]`; pairs with a halo copy
/// are only evaluated on one side and folded back through the force exchange
struct NeighbourCounter;

impl NeighbourCounter {
    fn count(a: &mut Particle, a_halo: bool, b: &mut Particle, b_halo: bool) {
        if a.distance_sqr(b) >= CUTOFF * CUTOFF {
            return;
        }
        let owned_smaller = if a_halo { b.id < a.id } else if b_halo { a.id < b.id } else { true };
        if owned_smaller {
            a.f[0] += 1.0;
            b.f[0] += 1.0;
        }
    }
}

impl CellProcessor for NeighbourCounter {
    fn process_cell(&self, cell: &mut Cell) {
        let particles = cell.particles_mut();
        for i in 0..particles.len() {
            let (head, tail) = particles.split_at_mut(i + 1);
            for b in tail {
                Self::count(&mut head[i], false, b, false);
            }
        }
    }

    fn process_cell_pair(&self, first: &mut Cell, second: &mut Cell) {
        let (first_halo, second_halo) = (first.is_halo(), second.is_halo());
        let others = second.particles_mut();
        for a in first.particles_mut() {
            for b in others.iter_mut() {
                Self::count(a, first_halo, b, second_halo);
            }
        }
    }

    fn requires_force_exchange(&self) -> bool {
        true
    }
}

#[test]
fn force_exchange_folds_halo_contributions() {
    let particles = jittered_lattice(POS_RNG_SEED);
    let min_image_sqr = |a: &Particle, b: &Particle| -> f64 {
        (0..3).map(|d| {
            let dx = (a.r[d] - b.r[d]).abs();
            let dx = if dx > DOMAIN_SIZE / 2.0 { DOMAIN_SIZE - dx } else { dx };
            dx * dx
        }).sum()
    };
    let expected = particles.iter()
        .map(|a| particles.iter().filter(|b| a.id != b.id && min_image_sqr(a, b) < CUTOFF * CUTOFF).count() as f64)
        .collect::<Vec<_>>();
    assert!(expected.iter().any(|n| *n > 0.0), "Lattice too sparse for a meaningful test");

    let counts = on_cluster(|dd, backend| {
        let config = GridConfig::builder(CUTOFF).with_num_threads(NUM_THREADS).build().unwrap();
        let mut sim = SimulationBuilder::new(config, dd).build(backend, NeighbourCounter).unwrap();
        for p in jittered_lattice(POS_RNG_SEED) {
            sim.add_particle(p);
        }
        sim.compute_forces().unwrap();
        let mut counts = vec![];
        sim.grid().for_each_particle(IterateType::All, |p| counts.push((p.id, p.f[0])));
        counts
    });
    let mut seen = 0;
    for (id, count) in counts.into_iter().flatten() {
        seen += 1;
        assert_eq!(count, expected[id as usize], "Particle {} has the wrong number of neighbours", id);
    }
    assert_eq!(seen, NUM_PARTICLES);
}
