//! Composite template construction
//!
//! - `fit`: sum-to-one least-squares mixing of template volumes
//! - `synth`: weighted voxel-wise sum on the reference template's grid

pub mod fit;
pub mod synth;

pub use fit::{fit_composite, CompositeFit, FitOptions, GramSystem};
pub use synth::synthesize;

/// Mean squared voxel difference between two equally-shaped volumes
pub fn mean_squared_error(a: &crate::volume::Volume, b: &crate::volume::Volume) -> crate::error::Result<f64> {
    a.ensure_same_shape(b)?;
    if a.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = a.data().iter().zip(b.data()).map(|(x, y)| (x - y).powi(2)).sum();
    Ok(sum / a.len() as f64)
}
