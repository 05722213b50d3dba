//! A single spatial bucket of the linked-cell grid

use crate::particles::Particle;

/// Classification of a cell within the halo-extended grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellRegion {
    /// Owned cell whose whole neighbourhood is owned as well
    Inner,
    /// Owned cell within one halo width of the owned box surface
    Boundary,
    /// Cell outside the owned box (holds halo copies and leavers)
    Halo,
}

/// Axis-aligned cell [box_min, box_max) with the particles currently inside
#[derive(Clone, Debug)]
pub struct Cell {
    index: usize,
    region: CellRegion,
    /// Inner cell whose neighbours within one halo width are all inner cells
    inner_most: bool,
    box_min: [f64; 3],
    box_max: [f64; 3],
    particles: Vec<Particle>,
}

impl Cell {
    pub fn new(index: usize, region: CellRegion, inner_most: bool, box_min: [f64; 3], box_max: [f64; 3]) -> Self {
        Self {
            index, region, inner_most, box_min, box_max,
            particles: Vec::new()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn region(&self) -> CellRegion {
        self.region
    }

    pub fn is_halo(&self) -> bool {
        self.region == CellRegion::Halo
    }

    pub fn is_boundary(&self) -> bool {
        self.region == CellRegion::Boundary
    }

    pub fn is_inner(&self) -> bool {
        self.region == CellRegion::Inner
    }

    pub fn is_inner_most(&self) -> bool {
        self.inner_most
    }

    pub fn box_min(&self) -> &[f64; 3] {
        &self.box_min
    }

    pub fn box_max(&self) -> &[f64; 3] {
        &self.box_max
    }

    /// Returns true if the point lies inside this cell
    pub fn test_point_in_cell(&self, point: &[f64; 3]) -> bool {
        (0..3).all(|d| self.box_min[d] <= point[d] && point[d] < self.box_max[d])
    }

    /// Add a particle, optionally refusing it if a particle with the same id is present
    ///
    /// Returns true if the particle was inserted.
    pub fn add_particle(&mut self, particle: Particle, check_duplicate: bool) -> bool {
        if check_duplicate && self.particles.iter().any(|p| p.id == particle.id) {
            return false;
        }
        self.particles.push(particle);
        true
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Remove the particle with the given id
    pub fn delete_particle_by_id(&mut self, id: u64) -> Option<Particle> {
        let idx = self.particles.iter().position(|p| p.id == id)?;
        Some(self.particles.swap_remove(idx))
    }

    /// Remove and return all particles for which the predicate holds
    pub fn drain_where<F: FnMut(&Particle) -> bool>(&mut self, mut predicate: F) -> Vec<Particle> {
        let mut drained = vec![];
        let mut write_idx = 0;
        for read_idx in 0..self.particles.len() {
            let particle = self.particles[read_idx];
            if predicate(&particle) {
                drained.push(particle);
            }
            else {
                self.particles[write_idx] = particle;
                write_idx += 1;
            }
        }
        self.particles.truncate(write_idx);
        drained
    }

    /// Remove and return all particles
    pub fn take_particles(&mut self) -> Vec<Particle> {
        std::mem::take(&mut self.particles)
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_cell() -> Cell {
        Cell::new(0, CellRegion::Inner, false, [0.0; 3], [1.0; 3])
    }

    #[test]
    fn duplicate_check() {
        let mut cell = unit_cell();
        assert!(cell.add_particle(Particle::new(1, 0, [0.5; 3]), true));
        assert!(!cell.add_particle(Particle::new(1, 0, [0.5; 3]), true),
            "Duplicate id was inserted despite check");
        assert!(cell.add_particle(Particle::new(1, 0, [0.5; 3]), false));
        assert_eq!(cell.len(), 2);
    }

    #[test]
    fn drain_keeps_order_of_rest() {
        let mut cell = unit_cell();
        for id in 0..6 {
            cell.add_particle(Particle::new(id, 0, [0.1 * id as f64; 3]), false);
        }
        let drained = cell.drain_where(|p| p.id % 2 == 1);
        assert_eq!(drained.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(cell.particles().iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 2, 4]);
        assert!(cell.delete_particle_by_id(2).is_some());
        assert!(cell.delete_particle_by_id(2).is_none());
    }

    #[test]
    fn point_test_is_half_open() {
        let cell = unit_cell();
        assert!(cell.test_point_in_cell(&[0.0, 0.0, 0.0]));
        assert!(!cell.test_point_in_cell(&[0.0, 1.0, 0.0]));
    }
}
