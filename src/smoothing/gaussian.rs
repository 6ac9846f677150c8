//! In-process separable Gaussian smoothing
//!
//! Per-axis widths are given as FWHM in mm and converted to voxel sigmas
//! with the spacing implied by the volume's affine. Each axis is a 1D
//! convolution with a kernel truncated at 4 sigma; samples beyond the
//! volume edge are mirrored (`d c b a | a b c d | d c b a`).

use crate::error::{Result, RpopError};
use crate::gateway::SmoothingApplicator;
use crate::smoothing::filter::{fwhm_to_sigma, FilterTriple};
use crate::volume::{idx3d, Volume};

/// Kernel half-width in units of sigma
pub const TRUNCATE: f64 = 4.0;

#[derive(Clone, Copy, Debug)]
pub struct GaussianSmoother {
    pub truncate: f64,
}

impl Default for GaussianSmoother {
    fn default() -> Self {
        Self { truncate: TRUNCATE }
    }
}

impl GaussianSmoother {
    /// Voxel sigmas for a filter applied on `volume`'s grid
    pub fn voxel_sigmas(volume: &Volume, fwhm: FilterTriple) -> Result<[f64; 3]> {
        let spacing = volume.affine_spacing();
        let header = volume.voxel_size();
        let fallback = [header.0, header.1, header.2];
        let mut sigma = [0.0; 3];
        for (axis, width) in fwhm.as_array().into_iter().enumerate() {
            if width == 0.0 {
                continue;
            }
            if !width.is_finite() || width < 0.0 {
                return Err(RpopError::Config(format!("invalid smoothing FWHM {} on axis {}", width, axis)));
            }
            let step = if spacing[axis] > 0.0 { spacing[axis] } else { fallback[axis] };
            if step.is_nan() || step <= 0.0 {
                return Err(RpopError::Config(format!("zero voxel spacing on axis {}", axis)));
            }
            sigma[axis] = fwhm_to_sigma(width) / step;
        }
        Ok(sigma)
    }

    /// Smooth `volume` with per-axis sigmas given in voxels
    pub fn smooth_voxels(&self, volume: &Volume, sigma: [f64; 3]) -> Result<Volume> {
        let (nx, ny, nz) = volume.dims();
        let mut result = volume.data().to_vec();
        for (axis, &s) in sigma.iter().enumerate() {
            if s > 0.0 {
                let kernel = make_gaussian_kernel(s, self.truncate);
                result = convolve_axis(&result, (nx, ny, nz), axis, &kernel);
            }
        }
        volume.with_data(result)
    }
}

impl SmoothingApplicator for GaussianSmoother {
    fn smooth(&self, volume: &Volume, fwhm: FilterTriple) -> Result<Volume> {
        let sigma = Self::voxel_sigmas(volume, fwhm)?;
        tracing::debug!(?sigma, "gaussian smoothing (voxel sigmas)");
        self.smooth_voxels(volume, sigma)
    }
}

/// Normalised Gaussian kernel with radius `round(truncate * sigma)`
fn make_gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    let radius = (truncate * sigma + 0.5) as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0; size];

    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut sum = 0.0;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f64 - radius as f64;
        *k = (-x * x / two_sigma_sq).exp();
        sum += *k;
    }

    for k in kernel.iter_mut() {
        *k /= sum;
    }

    kernel
}

/// Half-sample symmetric reflection of `i` into `0..n`
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn convolve_axis(data: &[f64], dims: (usize, usize, usize), axis: usize, kernel: &[f64]) -> Vec<f64> {
    let (nx, ny, nz) = dims;
    let half = (kernel.len() / 2) as isize;
    let mut out = vec![0.0; data.len()];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let pos = [i, j, k][axis] as isize;
                let len = [nx, ny, nz][axis];
                let mut sum = 0.0;
                for (ki, &kv) in kernel.iter().enumerate() {
                    let p = reflect(pos + ki as isize - half, len);
                    let nidx = match axis {
                        0 => idx3d(p, j, k, nx, ny),
                        1 => idx3d(i, p, k, nx, ny),
                        _ => idx3d(i, j, p, nx, ny),
                    };
                    sum += data[nidx] * kv;
                }
                out[idx3d(i, j, k, nx, ny)] = sum;
            }
        }
    }
    out
}
