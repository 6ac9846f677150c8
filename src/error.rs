//! Error taxonomy shared by every stage of the pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RpopError>;

#[derive(Debug, Error)]
pub enum RpopError {
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("voxel data holds {found} values but a {dims:?} grid needs {expected}")]
    VoxelCount {
        dims: (usize, usize, usize),
        expected: usize,
        found: usize,
    },
    #[error("at least one template volume is required")]
    EmptyTemplateSet,
    #[error("coefficient count ({coefficients}) does not match template count ({templates})")]
    CoefficientMismatch { coefficients: usize, templates: usize },
    #[error("invalid template selector {0} (expected 1, 2, 3 or 4)")]
    InvalidSelector(i64),
    #[error("invalid origin mode '{0}' (expected 'Reset' or 'Keep')")]
    InvalidOriginMode(String),
    /// The solver stopped without meeting its tolerance; `best` is the
    /// lowest-objective feasible iterate it visited.
    #[error("composite fit did not converge after {iterations} iterations (objective {objective:.6e})")]
    FitDidNotConverge {
        best: Vec<f64>,
        objective: f64,
        iterations: usize,
    },
    #[error("{tool} failed: {reason}")]
    ExternalToolFailure { tool: String, reason: String },
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("invalid file '{path}': {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<RpopError>,
    },
}

impl RpopError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            RpopError::FileNotFound(path)
        } else {
            RpopError::Io { path, source }
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RpopError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        RpopError::ExternalToolFailure {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Wrap this error with the pipeline stage it escaped from.
    pub fn at(self, stage: Stage) -> Self {
        RpopError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through any stage wrappers.
    pub fn root(&self) -> &RpopError {
        match self {
            RpopError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage the error was raised in, if it has been tagged with one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RpopError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
