//! Resolution equalisation
//!
//! - `filter`: per-axis Gaussian widths that bring a scan to a target FWHM
//! - `gaussian`: separable in-process smoothing with those widths

pub mod filter;
pub mod gaussian;

pub use filter::{
    compute_filter, filter_width, fwhm_to_sigma, FilterTriple, FwhmTriple, DEFAULT_TARGET_FWHM, FWHM_PER_SIGMA,
};
pub use gaussian::GaussianSmoother;
