//! Faces and halo slabs of the owned region

use super::GridGeometry;

/// One of the six faces of the owned box
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Face {
    /// Axis normal to the face
    pub dim: usize,
    /// True for the face at the upper end of the axis
    pub high: bool,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face { dim: 0, high: false }, Face { dim: 0, high: true },
        Face { dim: 1, high: false }, Face { dim: 1, high: true },
        Face { dim: 2, high: false }, Face { dim: 2, high: true },
    ];

    pub fn new(dim: usize, high: bool) -> Self {
        assert!(dim < 3, "Invalid axis {}", dim);
        Self { dim, high }
    }

    /// Both faces of one axis, lower face first
    pub fn of_axis(dim: usize) -> [Face; 2] {
        [Face::new(dim, false), Face::new(dim, true)]
    }

    pub fn opposite(&self) -> Face {
        Face { dim: self.dim, high: !self.high }
    }

    /// -1 for the lower face, +1 for the upper face
    pub fn sign(&self) -> f64 {
        if self.high { 1.0 } else { -1.0 }
    }

    /// Position in `Face::ALL`
    pub fn index(&self) -> usize {
        2 * self.dim + self.high as usize
    }

    /// Offset of the neighbouring region across this face
    pub fn offset(&self) -> [i8; 3] {
        let mut offset = [0; 3];
        offset[self.dim] = if self.high { 1 } else { -1 };
        offset
    }
}

impl GridGeometry {
    /// Halo slab beyond a face, spanning the whole halo-extended box along the other axes
    pub fn halo_region(&self, face: Face) -> ([f64; 3], [f64; 3]) {
        let mut low = self.halo_min;
        let mut high = self.halo_max;
        if face.high {
            low[face.dim] = self.bbox_max[face.dim];
        }
        else {
            high[face.dim] = self.bbox_min[face.dim];
        }
        (low, high)
    }

    /// Owned slab one halo width deep behind a face, spanning the whole
    /// halo-extended box along the other axes
    pub fn boundary_region(&self, face: Face) -> ([f64; 3], [f64; 3]) {
        let mut low = self.halo_min;
        let mut high = self.halo_max;
        if face.high {
            low[face.dim] = self.bbox_max[face.dim] - self.halo_length[face.dim];
            high[face.dim] = self.bbox_max[face.dim];
        }
        else {
            low[face.dim] = self.bbox_min[face.dim];
            high[face.dim] = self.bbox_min[face.dim] + self.halo_length[face.dim];
        }
        (low, high)
    }
}
