//! Per-particle state as stored in the cells

use bytemuck::{Pod, Zeroable};

/// State of a single particle (molecule)
///
/// The layout is plain old data so that batches of particles can be shipped
/// between processes as raw bytes (see `ParticleBuffer`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Globally unique id
    pub id: u64,
    /// Component (species) id
    pub component: u64,
    /// Position
    pub r: [f64; 3],
    /// Velocity
    pub v: [f64; 3],
    /// Orientation quaternion (w, x, y, z)
    pub q: [f64; 4],
    /// Angular momentum
    pub d: [f64; 3],
    /// Accumulated force
    pub f: [f64; 3],
    /// Accumulated torque
    pub m: [f64; 3],
    /// Accumulated virial (diagonal)
    pub vi: [f64; 3],
}

impl Particle {
    /// Create a resting particle at the given position
    pub fn new(id: u64, component: u64, r: [f64; 3]) -> Self {
        Self {
            id, component, r,
            q: [1.0, 0.0, 0.0, 0.0],
            ..Default::default()
        }
    }

    pub fn with_velocity(mut self, v: [f64; 3]) -> Self {
        self.v = v;
        self
    }

    /// Returns true if the position lies in the half-open box [low, high)
    #[inline(always)]
    pub fn in_box(&self, low: &[f64; 3], high: &[f64; 3]) -> bool {
        (0..3).all(|d| self.r[d] >= low[d] && self.r[d] < high[d])
    }

    /// Reset force, torque and virial accumulators
    pub fn clear_fm(&mut self) {
        self.f = [0.0; 3];
        self.m = [0.0; 3];
        self.vi = [0.0; 3];
    }

    #[inline(always)]
    pub fn f_add(&mut self, f: &[f64; 3]) {
        for d in 0..3 { self.f[d] += f[d]; }
    }

    #[inline(always)]
    pub fn f_sub(&mut self, f: &[f64; 3]) {
        for d in 0..3 { self.f[d] -= f[d]; }
    }

    #[inline(always)]
    pub fn m_add(&mut self, m: &[f64; 3]) {
        for d in 0..3 { self.m[d] += m[d]; }
    }

    #[inline(always)]
    pub fn vi_add(&mut self, vi: &[f64; 3]) {
        for d in 0..3 { self.vi[d] += vi[d]; }
    }

    /// Fold the accumulators of a halo copy into this particle
    pub fn absorb(&mut self, copy: &Particle) {
        self.f_add(&copy.f);
        self.m_add(&copy.m);
        self.vi_add(&copy.vi);
    }

    /// Squared distance between the positions of two particles
    #[inline(always)]
    pub fn distance_sqr(&self, other: &Particle) -> f64 {
        (0..3).map(|d| (self.r[d] - other.r[d]).powi(2)).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn half_open_box() {
        let low = [0.0, 0.0, 0.0];
        let high = [1.0, 1.0, 1.0];
        assert!(Particle::new(0, 0, [0.0, 0.5, 0.5]).in_box(&low, &high));
        assert!(!Particle::new(0, 0, [1.0, 0.5, 0.5]).in_box(&low, &high),
            "Upper bound must be exclusive");
        assert!(!Particle::new(0, 0, [0.5, -1e-12, 0.5]).in_box(&low, &high));
    }

    #[test]
    fn absorb_accumulators() {
        let mut original = Particle::new(7, 0, [0.0; 3]);
        let mut copy = original;
        copy.f = [1.0, 2.0, 3.0];
        copy.m = [0.5, 0.0, 0.0];
        copy.vi = [0.0, 0.0, 4.0];
        original.f = [1.0, 1.0, 1.0];
        original.absorb(&copy);
        assert_eq!(original.f, [2.0, 3.0, 4.0]);
        assert_eq!(original.m, [0.5, 0.0, 0.0]);
        assert_eq!(original.vi, [0.0, 0.0, 4.0]);
    }
}
