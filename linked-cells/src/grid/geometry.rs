//! Geometry of the halo-extended cell grid

use anyhow::{anyhow, Result};

use crate::get_index_from_coords_3d;

/// Cell geometry for one process' region
///
/// The cell length is chosen so that an integral number of cells spans the
/// owned bounding box exactly while each cell is at least
/// `cutoff / cells_in_cutoff` long. The grid then extends by `halo_width`
/// cells on every side.
#[derive(Clone, Debug, PartialEq)]
pub struct GridGeometry {
    /// Lower corner of the owned region
    pub bbox_min: [f64; 3],
    /// Upper corner of the owned region
    pub bbox_max: [f64; 3],
    /// Lower corner of the halo-extended region
    pub halo_min: [f64; 3],
    /// Upper corner of the halo-extended region
    pub halo_max: [f64; 3],
    /// Cells along each axis, halo included
    pub cells_per_dim: [usize; 3],
    /// Cells of the owned region along each axis
    pub box_width_in_cells: [usize; 3],
    /// Halo width in cells
    pub halo_width: [usize; 3],
    /// Edge length of a cell along each axis
    pub cell_length: [f64; 3],
    /// Width of the halo layer in length units
    pub halo_length: [f64; 3],
    pub cutoff: f64,
    pub cells_in_cutoff: usize,
}

impl GridGeometry {
    pub fn new(bbox_min: [f64; 3], bbox_max: [f64; 3], cutoff: f64, cells_in_cutoff: usize) -> Result<Self> {
        let mut geometry = Self {
            bbox_min, bbox_max,
            halo_min: [0.0; 3],
            halo_max: [0.0; 3],
            cells_per_dim: [0; 3],
            box_width_in_cells: [0; 3],
            halo_width: [0; 3],
            cell_length: [0.0; 3],
            halo_length: [0.0; 3],
            cutoff,
            cells_in_cutoff
        };
        for d in 0..3 {
            let extent = bbox_max[d] - bbox_min[d];
            if !(extent > 0.0) {
                return Err(anyhow!("Bounding box is empty along axis {} ([{}, {}])", d, bbox_min[d], bbox_max[d]));
            }
            let box_width = (extent / cutoff * cells_in_cutoff as f64).floor() as usize;
            let halo_width = cells_in_cutoff;
            // The halo of one side must never reach into the halo of the other side
            if box_width < 2 * halo_width {
                return Err(anyhow!("Bounding box too small for calculated cell length along axis {}: \
                    {} cells in box, but the halo needs {} cells on each side (extent {}, cutoff {})",
                    d, box_width, halo_width, extent, cutoff));
            }
            geometry.box_width_in_cells[d] = box_width;
            geometry.halo_width[d] = halo_width;
            geometry.cell_length[d] = extent / box_width as f64;
            geometry.halo_length[d] = halo_width as f64 * geometry.cell_length[d];
            geometry.halo_min[d] = bbox_min[d] - geometry.halo_length[d];
            geometry.halo_max[d] = bbox_max[d] + geometry.halo_length[d];
            geometry.cells_per_dim[d] = box_width + 2 * halo_width;
        }
        Ok(geometry)
    }

    /// Total number of cells (halo included)
    pub fn num_cells(&self) -> usize {
        self.cells_per_dim.iter().product()
    }

    /// Returns true if the point is inside the halo-extended box
    pub fn in_halo_box(&self, point: &[f64; 3]) -> bool {
        (0..3).all(|d| point[d] >= self.halo_min[d] && point[d] < self.halo_max[d])
    }

    /// 3d cell coordinates of a point, `None` if outside the halo-extended box
    ///
    /// Rounding is corrected so that points inside the owned box always land in
    /// a non-halo cell and points outside it always land in a halo cell.
    pub fn cell_coords_of_point(&self, point: &[f64; 3]) -> Option<[usize; 3]> {
        if !self.in_halo_box(point) {
            return None;
        }
        let mut coords = [0usize; 3];
        for d in 0..3 {
            let n = self.cells_per_dim[d];
            let h = self.halo_width[d];
            let raw = ((point[d] - self.halo_min[d]) / self.cell_length[d]).floor();
            let mut idx = if raw < 0.0 { 0 } else { (raw as usize).min(n - 1) };
            if point[d] < self.bbox_min[d] {
                idx = idx.min(h - 1);
            }
            else if point[d] >= self.bbox_max[d] {
                idx = idx.max(n - h);
            }
            else {
                idx = idx.clamp(h, n - h - 1);
            }
            coords[d] = idx;
        }
        Some(coords)
    }

    /// Linear cell index of a point, `None` if outside the halo-extended box
    pub fn cell_index_of_point(&self, point: &[f64; 3]) -> Option<usize> {
        self.cell_coords_of_point(point)
            .map(|c| get_index_from_coords_3d!(c, self.cells_per_dim))
    }

    /// Corners of the cell with the given 3d coordinates
    pub fn cell_bounds(&self, coords: [usize; 3]) -> ([f64; 3], [f64; 3]) {
        let mut low = [0.0; 3];
        let mut high = [0.0; 3];
        for d in 0..3 {
            let h = self.halo_width[d] as isize;
            let n = self.cells_per_dim[d];
            // Measure from the owned box so inner cell faces match the box exactly
            let i = coords[d] as isize - h;
            low[d] = self.bbox_min[d] + i as f64 * self.cell_length[d];
            high[d] = self.bbox_min[d] + (i + 1) as f64 * self.cell_length[d];
            if coords[d] == h as usize { low[d] = self.bbox_min[d]; }
            if coords[d] + 1 == n - h as usize { high[d] = self.bbox_max[d]; }
            if coords[d] == 0 { low[d] = self.halo_min[d]; }
            if coords[d] + 1 == n { high[d] = self.halo_max[d]; }
        }
        (low, high)
    }

    /// Inclusive range of cell coordinates covering the box [low, high), clamped to the grid
    pub fn cell_coord_range(&self, low: &[f64; 3], high: &[f64; 3]) -> Option<([usize; 3], [usize; 3])> {
        let mut start = [0usize; 3];
        let mut end = [0usize; 3];
        for d in 0..3 {
            let lo = low[d].max(self.halo_min[d]);
            let hi = high[d].min(self.halo_max[d]);
            if lo >= hi {
                return None;
            }
            let n = self.cells_per_dim[d];
            let to_idx = |x: f64| {
                let raw = ((x - self.halo_min[d]) / self.cell_length[d]).floor();
                if raw < 0.0 { 0 } else { (raw as usize).min(n - 1) }
            };
            // Widen by one cell to be robust against rounding at cell faces
            start[d] = to_idx(lo).saturating_sub(1);
            end[d] = (to_idx(hi) + 1).min(n - 1);
        }
        Some((start, end))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cell_count_spans_halo_box() {
        let geometry = GridGeometry::new([0.0, 0.0, 0.0], [10.0, 7.5, 4.0], 1.2, 2).unwrap();
        for d in 0..3 {
            let span = geometry.cell_length[d] * geometry.cells_per_dim[d] as f64;
            assert!((span - (geometry.halo_max[d] - geometry.halo_min[d])).abs() < 1e-12);
            assert!(geometry.cell_length[d] >= 1.2 / 2.0);
            assert_eq!(geometry.halo_width[d], 2);
        }
        assert_eq!(geometry.box_width_in_cells, [16, 12, 6]);
    }

    #[test]
    fn too_small_box_is_rejected() {
        assert!(GridGeometry::new([0.0; 3], [1.5, 10.0, 10.0], 1.0, 1).is_err());
        assert!(GridGeometry::new([0.0; 3], [2.0, 10.0, 10.0], 1.0, 1).is_ok());
    }

    #[test]
    fn upper_face_belongs_to_next_cell() {
        let geometry = GridGeometry::new([0.0; 3], [4.0; 3], 1.0, 1).unwrap();
        assert_eq!(geometry.cell_coords_of_point(&[1.0, 0.0, 0.0]), Some([2, 1, 1]));
        assert_eq!(geometry.cell_coords_of_point(&[0.999, 0.0, 0.0]), Some([1, 1, 1]));
        assert_eq!(geometry.cell_coords_of_point(&[-0.5, 3.999, 4.0]), Some([0, 4, 5]));
        assert_eq!(geometry.cell_coords_of_point(&[5.0, 0.0, 0.0]), None,
            "Upper end of the halo box must be exclusive");
        assert_eq!(geometry.cell_coords_of_point(&[-1.0 - 1e-9, 0.0, 0.0]), None);
    }

    #[test]
    fn region_to_cells() {
        let geometry = GridGeometry::new([0.0; 3], [4.0; 3], 1.0, 1).unwrap();
        let (start, end) = geometry.cell_coord_range(&[-1.0, -1.0, -1.0], &[0.0, 5.0, 5.0]).unwrap();
        assert_eq!(start, [0, 0, 0]);
        assert_eq!(end, [2, 5, 5]);
        assert!(geometry.cell_coord_range(&[6.0, 0.0, 0.0], &[7.0, 1.0, 1.0]).is_none());
    }
}
