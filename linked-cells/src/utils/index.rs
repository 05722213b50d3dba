//! Index arithmetic for the row-major cell array

use std::{iter, ops::Range};

/// Row-major linear index of 3d cell coordinates (x runs fastest)
#[macro_export]
macro_rules! get_index_from_coords_3d {
    ($ixyz:expr, $nxyz:expr) => {
        $ixyz[0] + $ixyz[1] * $nxyz[0] + $ixyz[2] * $nxyz[0] * $nxyz[1]
    };
}

/// Inverse of `get_index_from_coords_3d!`
#[macro_export]
macro_rules! decompose_index_to_coords_3d {
    ($idx:expr, $nxyz:expr) => { {
        let (tmp, ix) = num::Integer::div_rem(&$idx, &$nxyz[0]);
        let (iz, iy) = num::Integer::div_rem(&tmp, &$nxyz[1]);
        [ix, iy, iz]
    }};
}

/// Linear offset of a (possibly negative) 3d cell offset
pub fn linear_offset(offset: [isize; 3], dims: [usize; 3]) -> isize {
    offset[0] + offset[1] * dims[0] as isize + offset[2] * (dims[0] * dims[1]) as isize
}

/// Apply a linear offset to a cell index
#[inline(always)]
pub fn apply_offset(idx: usize, offset: isize) -> usize {
    (idx as isize + offset) as usize
}

/// Index of the longest of three extents (first one wins on ties)
pub fn argmax(s: &[usize; 3]) -> usize {
    let mut current_max_pos = 0;
    for i in 1..3 {
        if s[i] > s[current_max_pos] {
            current_max_pos = i;
        }
    }
    current_max_pos
}

pub fn ceil_div(x: usize, y: usize) -> usize {
    (x+y-1)/y
}

/// Half-open range of indices that can be split into work packages
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start, end
        }
    }

    /// Split range into n roughly equal subranges (trailing ones may be empty)
    pub fn split(&self, n: usize) -> Vec<IndexRange> {
        assert!(n > 0);
        let len = self.len();
        let newlen = ceil_div(len, n);
        let clamp = |x: usize| (self.start + x).min(self.end);
        (0..(n-1))
            .map(|i| IndexRange::new(clamp(i*newlen), clamp((i+1)*newlen)))
            .chain(iter::once(IndexRange::new(clamp((n-1)*newlen), self.end)))
            .collect::<Vec<_>>()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn to_range(&self) -> Range<usize> {
        self.start..self.end
    }
}
