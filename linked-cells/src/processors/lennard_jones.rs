//! Truncated 12-6 Lennard-Jones cell processor

use std::sync::{atomic::{AtomicUsize, Ordering}, Mutex};

use anyhow::{anyhow, Result};

use crate::{config::GridConfig, grid::Cell, particles::Particle, traversal::CellProcessor};

/// Single-component Lennard-Jones interaction with Newton's third law
///
/// Forces are added to both particles of a pair. Potential energy and virial
/// of pairs with a halo partner only count half, since the mirrored pair is
/// also evaluated by the neighbouring process.
pub struct LennardJonesProcessor {
    epsilon: f64,
    sigma_sqr: f64,
    cutoff_sqr: f64,
    /// Potential energy and virial of the running traversal
    accumulator: Mutex<[f64; 2]>,
    /// Evaluated particle pairs within the cutoff radius
    interactions: AtomicUsize,
    upot: f64,
    virial: f64,
}

impl LennardJonesProcessor {
    pub fn new(epsilon: f64, sigma: f64, cutoff: f64) -> Result<Self> {
        if !(epsilon > 0.0 && sigma > 0.0 && cutoff > 0.0) {
            return Err(anyhow!("Lennard-Jones parameters must be positive (epsilon {}, sigma {}, cutoff {})",
                epsilon, sigma, cutoff));
        }
        Ok(Self {
            epsilon,
            sigma_sqr: sigma * sigma,
            cutoff_sqr: cutoff * cutoff,
            accumulator: Mutex::new([0.0; 2]),
            interactions: AtomicUsize::new(0),
            upot: 0.0,
            virial: 0.0,
        })
    }

    /// Interaction truncated at the LJ cutoff radius of a grid configuration
    pub fn from_config(config: &GridConfig, epsilon: f64, sigma: f64) -> Result<Self> {
        Self::new(epsilon, sigma, config.lj_cutoff)
    }

    /// Potential energy accumulated since the last `reset_totals`
    pub fn upot(&self) -> f64 {
        self.upot
    }

    /// Virial accumulated since the last `reset_totals`
    pub fn virial(&self) -> f64 {
        self.virial
    }

    /// Particle pairs within the cutoff radius since the last `reset_totals`
    pub fn interactions(&self) -> usize {
        self.interactions.load(Ordering::Relaxed)
    }

    pub fn reset_totals(&mut self) {
        self.upot = 0.0;
        self.virial = 0.0;
        self.interactions.store(0, Ordering::Relaxed);
    }

    /// Interact two particles, adding weighted energy and virial to `sums`
    #[inline]
    fn interact(&self, a: &mut Particle, b: &mut Particle, sums: &mut [f64; 2], weight: f64, count: &mut usize) {
        let mut dr = [0.0; 3];
        for d in 0..3 {
            dr[d] = a.r[d] - b.r[d];
        }
        let r_sqr = dr[0]*dr[0] + dr[1]*dr[1] + dr[2]*dr[2];
        if r_sqr > self.cutoff_sqr {
            return;
        }
        let lj2 = self.sigma_sqr / r_sqr;
        let lj6 = lj2 * lj2 * lj2;
        let lj12 = lj6 * lj6;
        let scale = 24.0 * self.epsilon * (2.0 * lj12 - lj6) / r_sqr;
        let mut f = [0.0; 3];
        let mut vi = [0.0; 3];
        for d in 0..3 {
            f[d] = scale * dr[d];
            vi[d] = 0.5 * dr[d] * f[d];
        }
        a.f_add(&f);
        b.f_sub(&f);
        a.vi_add(&vi);
        b.vi_add(&vi);
        sums[0] += weight * 4.0 * self.epsilon * (lj12 - lj6);
        sums[1] += weight * (vi[0] + vi[1] + vi[2]) * 2.0;
        *count += 1;
    }

    fn flush(&self, sums: [f64; 2], count: usize) {
        if count > 0 {
            let mut acc = self.accumulator.lock().unwrap();
            acc[0] += sums[0];
            acc[1] += sums[1];
            self.interactions.fetch_add(count, Ordering::Relaxed);
        }
    }
}

impl CellProcessor for LennardJonesProcessor {
    fn init_traversal(&mut self) {
        *self.accumulator.get_mut().unwrap() = [0.0; 2];
    }

    fn process_cell(&self, cell: &mut Cell) {
        let mut sums = [0.0; 2];
        let mut count = 0;
        let weight = if cell.is_halo() { 0.5 } else { 1.0 };
        let particles = cell.particles_mut();
        for i in 0..particles.len() {
            let (head, tail) = particles.split_at_mut(i + 1);
            let a = &mut head[i];
            for b in tail.iter_mut() {
                self.interact(a, b, &mut sums, weight, &mut count);
            }
        }
        self.flush(sums, count);
    }

    fn process_cell_pair(&self, first: &mut Cell, second: &mut Cell) {
        let mut sums = [0.0; 2];
        let mut count = 0;
        let weight = if first.is_halo() || second.is_halo() { 0.5 } else { 1.0 };
        let others = second.particles_mut();
        for a in first.particles_mut() {
            for b in others.iter_mut() {
                self.interact(a, b, &mut sums, weight, &mut count);
            }
        }
        self.flush(sums, count);
    }

    fn end_traversal(&mut self) {
        let acc = *self.accumulator.get_mut().unwrap();
        self.upot += acc[0];
        self.virial += acc[1];
    }
}
