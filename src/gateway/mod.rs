//! Boundaries to the external collaborators
//!
//! Registration and smoothness estimation are performed by third-party
//! tools (ANTs, AFNI). The pipeline only sees these traits; the default
//! implementations in [`script`] shell out to helper scripts, and tests
//! substitute in-process fakes.

pub mod script;

use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::smoothing::{FilterTriple, FwhmTriple};
use crate::volume::Volume;

pub use script::{parse_fwhm_table, ScriptRegistration, ScriptRunner, ScriptSmoothnessEstimator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationKind {
    /// Coarse alignment to the fixed reference template
    Initial,
    /// Refinement against the composite, seeded by the initial transform
    Final,
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationKind::Initial => write!(f, "initial"),
            RegistrationKind::Final => write!(f, "final"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegistrationRequest {
    pub kind: RegistrationKind,
    pub fixed: PathBuf,
    pub moving: PathBuf,
    /// Required for `Final`, ignored for `Initial`
    pub initial_transform: Option<PathBuf>,
    pub work_dir: PathBuf,
    /// Output name stem inside `work_dir`
    pub prefix: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationOutput {
    /// Moving image resampled into the fixed image's space
    pub registered: PathBuf,
    pub transform: PathBuf,
}

pub trait Registration {
    fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutput>;
}

#[derive(Clone, Debug)]
pub struct SmoothnessRequest {
    pub volume: PathBuf,
    pub work_dir: PathBuf,
    pub prefix: String,
}

pub trait SmoothnessEstimator {
    fn estimate(&self, request: &SmoothnessRequest) -> Result<FwhmTriple>;
}

pub trait SmoothingApplicator {
    fn smooth(&self, volume: &Volume, fwhm: FilterTriple) -> Result<Volume>;
}
