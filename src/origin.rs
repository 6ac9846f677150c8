//! Origin normalisation
//!
//! `Reset` rewrites the affine translation so the geometric centre of the
//! grid (`dims / 2` in voxel space) lands on world (0, 0, 0). `Keep` passes
//! the geometry through untouched. Unknown mode strings are rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RpopError;
use crate::volume::Volume;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginMode {
    Reset,
    Keep,
}

impl FromStr for OriginMode {
    type Err = RpopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(OriginMode::Reset),
            "keep" => Ok(OriginMode::Keep),
            _ => Err(RpopError::InvalidOriginMode(s.to_string())),
        }
    }
}

impl fmt::Display for OriginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginMode::Reset => f.write_str("Reset"),
            OriginMode::Keep => f.write_str("Keep"),
        }
    }
}

/// Geometric centre of a grid in voxel coordinates
pub fn grid_center(volume: &Volume) -> [f64; 3] {
    let (nx, ny, nz) = volume.dims();
    [nx as f64 / 2.0, ny as f64 / 2.0, nz as f64 / 2.0]
}

/// Affine whose translation sends `center` (voxel space) to the world origin.
///
/// The 3x3 linear part is kept; only the last column changes: `t = -A * c`.
pub fn recentered_affine(affine: &[f64; 16], center: [f64; 3]) -> [f64; 16] {
    let mut out = *affine;
    for row in 0..3 {
        let linear = &affine[row * 4..row * 4 + 3];
        out[row * 4 + 3] = -(linear[0] * center[0] + linear[1] * center[1] + linear[2] * center[2]);
    }
    out
}

pub fn normalize_origin(volume: &Volume, mode: OriginMode) -> Volume {
    match mode {
        OriginMode::Reset => volume.with_affine(recentered_affine(volume.affine(), grid_center(volume))),
        OriginMode::Keep => volume.clone(),
    }
}
