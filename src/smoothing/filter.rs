//! Resolution-equalising filter widths
//!
//! A scan with intrinsic smoothness `f` (FWHM, mm) reaches a target
//! smoothness `T` after convolution with a Gaussian of FWHM `sqrt(T² - f²)`,
//! since Gaussian widths add in quadrature. Axes already at or above the
//! target receive no extra smoothing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Target effective resolution in mm
pub const DEFAULT_TARGET_FWHM: f64 = 10.0;

/// `2 * sqrt(2 * ln 2)`, the FWHM of a unit-sigma Gaussian
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_4;

/// Measured per-axis smoothness (FWHM, mm)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FwhmTriple {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Per-axis Gaussian kernel width to apply, in FWHM units (mm)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterTriple {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl FwhmTriple {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Every axis must be finite and non-negative
    pub fn validate(&self) -> Result<(), String> {
        for (axis, v) in [("x", self.x), ("y", self.y), ("z", self.z)] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("invalid FWHM on {} axis: {}", axis, v));
            }
        }
        Ok(())
    }
}

impl FilterTriple {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Gaussian sigmas (mm) for appliers that take sigma instead of FWHM
    pub fn to_sigma(&self) -> [f64; 3] {
        [fwhm_to_sigma(self.x), fwhm_to_sigma(self.y), fwhm_to_sigma(self.z)]
    }

    pub fn is_identity(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

impl fmt::Display for FwhmTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4})", self.x, self.y, self.z)
    }
}

impl fmt::Display for FilterTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4})", self.x, self.y, self.z)
    }
}

/// Extra FWHM needed on one axis to move from `fwhm` to `target`
pub fn filter_width(fwhm: f64, target: f64) -> f64 {
    if fwhm < target {
        (target * target - fwhm * fwhm).max(0.0).sqrt()
    } else {
        0.0
    }
}

pub fn compute_filter(measured: FwhmTriple, target: f64) -> FilterTriple {
    FilterTriple {
        x: filter_width(measured.x, target),
        y: filter_width(measured.y, target),
        z: filter_width(measured.z, target),
    }
}

#[inline]
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / FWHM_PER_SIGMA
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_fwhm_per_sigma_constant() {
        assert_abs_diff_eq!(FWHM_PER_SIGMA, 2.0 * (2.0 * 2f64.ln()).sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn test_filter_width_reference_points() {
        assert_eq!(filter_width(10.0, 10.0), 0.0);
        assert_eq!(filter_width(0.0, 10.0), 10.0);
        assert_eq!(filter_width(15.0, 10.0), 0.0);
    }

    #[test]
    fn test_compute_filter_mixed_axes() {
        let filter = compute_filter(FwhmTriple::new(8.0, 9.0, 11.0), DEFAULT_TARGET_FWHM);
        assert_abs_diff_eq!(filter.x, 5.9995, epsilon = 1e-3);
        assert_abs_diff_eq!(filter.y, 4.3589, epsilon = 1e-4);
        assert_eq!(filter.z, 0.0);
    }

    #[test]
    fn test_filter_is_never_negative() {
        for i in 0..200 {
            let f = i as f64 * 0.1;
            let w = filter_width(f, DEFAULT_TARGET_FWHM);
            assert!(w >= 0.0 && w.is_finite());
            // Widths add in quadrature back to the target
            if f < DEFAULT_TARGET_FWHM {
                assert_abs_diff_eq!((w * w + f * f).sqrt(), DEFAULT_TARGET_FWHM, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_sigma_conversion() {
        let filter = FilterTriple::new(FWHM_PER_SIGMA, 0.0, 2.355);
        let sigma = filter.to_sigma();
        assert_abs_diff_eq!(sigma[0], 1.0, epsilon = 1e-12);
        assert_eq!(sigma[1], 0.0);
        assert_abs_diff_eq!(sigma[2], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_validate_rejects_negative_and_nan() {
        assert!(FwhmTriple::new(8.0, 9.0, 11.0).validate().is_ok());
        assert!(FwhmTriple::new(-1.0, 9.0, 11.0).validate().is_err());
        assert!(FwhmTriple::new(8.0, f64::NAN, 11.0).validate().is_err());
    }
}
