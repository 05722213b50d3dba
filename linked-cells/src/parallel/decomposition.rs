//! Regular decomposition of the periodic global box into per-process boxes

use anyhow::{anyhow, Result};

use crate::{decompose_index_to_coords_3d, get_index_from_coords_3d, grid::Face};

/// Prime factor decomposition (panics on 0)
pub(crate) fn prime_factors(n: usize) -> Vec<usize> {
    assert_ne!(n, 0);
    let mut left = n;
    let mut factors = vec![];
    let mut i = 2;
    while left >= i*i {
        while left % i == 0 {
            factors.push(i);
            left /= i;
        }
        i += 1;
    }
    if left > 1 {
        factors.push(left);
    }
    factors
}

/// Split a box into `num` sub-boxes while trying to keep the contact surface small
///
/// Every prime factor of `num` (largest first) cuts the currently longest
/// sub-box edge. Returns the number of sub-boxes along each axis.
fn split_box(extent: [f64; 3], num: usize) -> [usize; 3] {
    let mut factors = prime_factors(num);
    factors.reverse();
    let mut sub_extent = extent;
    let mut grid = [1, 1, 1];
    for fac in factors {
        let mut i = 0;
        for d in 1..3 {
            if sub_extent[d] > sub_extent[i] {
                i = d;
            }
        }
        sub_extent[i] /= fac as f64;
        grid[i] *= fac;
    }
    grid
}

/// Position of one process in a regular, periodic process grid
#[derive(Clone, Debug, PartialEq)]
pub struct DomainDecomposition {
    global_min: [f64; 3],
    global_max: [f64; 3],
    /// Processes along each axis
    process_grid: [usize; 3],
    rank: usize,
    /// 3d coordinates of this process in the process grid
    coords: [usize; 3],
}

impl DomainDecomposition {
    /// Decompose the global box [global_min, global_max) for `num_processes`
    /// processes and return the view of process `rank`
    pub fn regular(global_min: [f64; 3], global_max: [f64; 3], num_processes: usize, rank: usize) -> Result<Self> {
        if num_processes == 0 {
            return Err(anyhow!("Number of processes must be at least 1"));
        }
        if rank >= num_processes {
            return Err(anyhow!("Rank {} out of range for {} processes", rank, num_processes));
        }
        let mut extent = [0.0; 3];
        for d in 0..3 {
            extent[d] = global_max[d] - global_min[d];
            if !(extent[d] > 0.0) {
                return Err(anyhow!("Global box is empty along axis {} ([{}, {}])", d, global_min[d], global_max[d]));
            }
        }
        let process_grid = split_box(extent, num_processes);
        Ok(Self {
            global_min, global_max, process_grid, rank,
            coords: decompose_index_to_coords_3d!(rank, process_grid),
        })
    }

    /// Decomposition with one process owning the whole box
    pub fn single(global_min: [f64; 3], global_max: [f64; 3]) -> Result<Self> {
        Self::regular(global_min, global_max, 1, 0)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_processes(&self) -> usize {
        self.process_grid.iter().product()
    }

    pub fn process_grid(&self) -> [usize; 3] {
        self.process_grid
    }

    pub fn coords(&self) -> [usize; 3] {
        self.coords
    }

    pub fn global_bounds(&self) -> ([f64; 3], [f64; 3]) {
        (self.global_min, self.global_max)
    }

    pub fn global_length(&self, d: usize) -> f64 {
        self.global_max[d] - self.global_min[d]
    }

    /// Owned box [low, high) of this process
    pub fn local_bounds(&self) -> ([f64; 3], [f64; 3]) {
        let mut low = [0.0; 3];
        let mut high = [0.0; 3];
        for d in 0..3 {
            let width = self.global_length(d) / self.process_grid[d] as f64;
            low[d] = self.global_min[d] + self.coords[d] as f64 * width;
            high[d] = if self.coords[d] + 1 == self.process_grid[d] {
                self.global_max[d]
            }
            else {
                self.global_min[d] + (self.coords[d] + 1) as f64 * width
            };
        }
        (low, high)
    }

    /// Returns true if this process owns the position
    pub fn owns_position(&self, r: &[f64; 3]) -> bool {
        let (low, high) = self.local_bounds();
        (0..3).all(|d| r[d] >= low[d] && r[d] < high[d])
    }

    /// Rank of the process at the given process grid coordinates
    pub fn rank_of(&self, coords: [usize; 3]) -> usize {
        get_index_from_coords_3d!(coords, self.process_grid)
    }

    /// Rank of the process across a face (periodic)
    pub fn neighbour_rank(&self, face: Face) -> usize {
        let d = face.dim;
        let n = self.process_grid[d];
        let mut coords = self.coords;
        coords[d] = if face.high { (coords[d] + 1) % n } else { (coords[d] + n - 1) % n };
        self.rank_of(coords)
    }

    /// Ranks of the neighbours across all faces, indexed by `Face::index`
    pub fn neighbour_ranks(&self) -> [usize; 6] {
        Face::ALL.map(|face| self.neighbour_rank(face))
    }

    /// Position shift for particles sent across a face
    ///
    /// Zero across an interior boundary, minus/plus the global box length when
    /// crossing the periodic wrap through the upper/lower face.
    pub fn shift(&self, face: Face) -> [f64; 3] {
        let d = face.dim;
        let mut shift = [0.0; 3];
        if face.high && self.coords[d] + 1 == self.process_grid[d] {
            shift[d] = -self.global_length(d);
        }
        else if !face.high && self.coords[d] == 0 {
            shift[d] = self.global_length(d);
        }
        shift
    }

    /// Map a position into the global box (periodic boundaries)
    pub fn wrap_position(&self, r: &mut [f64; 3]) {
        for d in 0..3 {
            let length = self.global_length(d);
            if r[d] < self.global_min[d] || r[d] >= self.global_max[d] {
                r[d] = self.global_min[d] + (r[d] - self.global_min[d]).rem_euclid(length);
                // rem_euclid can round up to exactly `length`
                if r[d] >= self.global_max[d] {
                    r[d] = self.global_min[d];
                }
            }
        }
    }
}
