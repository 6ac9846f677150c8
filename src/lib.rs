//! rPOP-core: robust PET-only processing for amyloid PET
//!
//! Spatial normalisation of a PET scan against a data-driven composite of
//! tracer templates, followed by adaptive smoothing to a common effective
//! resolution.
//!
//! # Modules
//! - `volume`, `nifti_io`: 3D volumes and NIfTI-1 reading/writing
//! - `origin`: origin normalisation (Reset / Keep)
//! - `templates`: template families and their ordered file lists
//! - `solvers`: equality-constrained SQP
//! - `composite`: sum-to-one template fit and composite synthesis
//! - `smoothing`: resolution-equalising filter and Gaussian smoothing
//! - `gateway`: registration / smoothness-estimation boundaries and their
//!   helper-script implementations
//! - `run_log`: per-run CSV record
//! - `config`, `pipeline`: run configuration and the staged orchestrator

// Core types
pub mod error;
pub mod volume;

// I/O modules
pub mod nifti_io;
pub mod run_log;

// Algorithm modules
pub mod origin;
pub mod templates;
pub mod solvers;
pub mod composite;
pub mod smoothing;

// External tools and orchestration
pub mod gateway;
pub mod config;
pub mod pipeline;

pub use error::{Result, RpopError};
pub use pipeline::{Pipeline, RunOutcome, Stage};
pub use volume::Volume;
