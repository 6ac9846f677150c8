//! Dense 3D volume with its voxel-to-world affine
//!
//! Voxel data is stored flat in NIfTI (Fortran) order:
//! `index = x + y*nx + z*nx*ny`. The affine is a row-major 4x4 matrix.
//! Volumes are never mutated after construction; geometry changes produce
//! a new volume.

use std::path::Path;

use crate::error::{Result, RpopError};
use crate::nifti_io;

pub type Dims = (usize, usize, usize);

/// Index into a 3D array (Fortran/column-major order)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    data: Vec<f64>,
    dims: Dims,
    voxel_size: (f64, f64, f64),
    affine: [f64; 16],
}

impl Volume {
    /// Fails with `VoxelCount` when `data` does not hold `nx*ny*nz` voxels.
    pub fn new(data: Vec<f64>, dims: Dims, voxel_size: (f64, f64, f64), affine: [f64; 16]) -> Result<Self> {
        let expected = dims.0 * dims.1 * dims.2;
        if data.len() != expected {
            return Err(RpopError::VoxelCount {
                dims,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { data, dims, voxel_size, affine })
    }

    /// Volume filled with a single value and an isotropic diagonal affine
    pub fn filled(dims: Dims, value: f64, voxel_mm: f64) -> Self {
        let affine = [
            voxel_mm, 0.0, 0.0, 0.0,
            0.0, voxel_mm, 0.0, 0.0,
            0.0, 0.0, voxel_mm, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Self {
            data: vec![value; dims.0 * dims.1 * dims.2],
            dims,
            voxel_size: (voxel_mm, voxel_mm, voxel_mm),
            affine,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        nifti_io::read_volume(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        nifti_io::write_volume(path, self)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn voxel_size(&self) -> (f64, f64, f64) {
        self.voxel_size
    }

    pub fn affine(&self) -> &[f64; 16] {
        &self.affine
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Same voxels, different affine
    pub fn with_affine(&self, affine: [f64; 16]) -> Self {
        Self {
            data: self.data.clone(),
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine,
        }
    }

    /// New voxel data on this volume's grid and geometry
    pub fn with_data(&self, data: Vec<f64>) -> Result<Self> {
        Self::new(data, self.dims, self.voxel_size, self.affine)
    }

    pub fn ensure_same_shape(&self, other: &Volume) -> Result<()> {
        if self.dims != other.dims {
            return Err(RpopError::ShapeMismatch {
                expected: self.dims,
                found: other.dims,
            });
        }
        Ok(())
    }

    /// Map a (possibly fractional) voxel coordinate to world space
    pub fn voxel_to_world(&self, ijk: [f64; 3]) -> [f64; 3] {
        let a = &self.affine;
        let mut out = [0.0; 3];
        for (row, o) in out.iter_mut().enumerate() {
            *o = a[row * 4] * ijk[0] + a[row * 4 + 1] * ijk[1] + a[row * 4 + 2] * ijk[2] + a[row * 4 + 3];
        }
        out
    }

    /// Voxel spacing implied by the affine (norms of its first three columns)
    pub fn affine_spacing(&self) -> [f64; 3] {
        let a = &self.affine;
        let mut spacing = [0.0; 3];
        for (col, s) in spacing.iter_mut().enumerate() {
            *s = (a[col].powi(2) + a[4 + col].powi(2) + a[8 + col].powi(2)).sqrt();
        }
        spacing
    }
}
