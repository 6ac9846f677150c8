//! Run configuration
//!
//! `PipelineConfig` is assembled once by the caller (usually the CLI) and
//! handed to the pipeline by reference. Tunables that rarely change live in
//! `AdvancedSettings`, which can be read from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::composite::FitOptions;
use crate::error::{Result, RpopError};
use crate::origin::OriginMode;
use crate::smoothing::DEFAULT_TARGET_FWHM;
use crate::templates::TemplateFamily;

/// Default file name of the smoothed output inside the output directory
pub const DEFAULT_OUTPUT_NAME: &str = "s_pet.nii.gz";

/// What to do when the composite fit stops short of its tolerance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonConvergencePolicy {
    /// Fail the run at the fit stage
    Abort,
    /// Continue with the best iterate and log a warning
    #[default]
    UseBestIterate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub fit: FitOptions,
    /// Target effective resolution (FWHM, mm)
    pub target_fwhm: f64,
    pub on_nonconvergence: NonConvergencePolicy,
    pub output_name: String,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            fit: FitOptions::default(),
            target_fwhm: DEFAULT_TARGET_FWHM,
            on_nonconvergence: NonConvergencePolicy::default(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
        }
    }
}

impl AdvancedSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.target_fwhm.is_finite() || self.target_fwhm <= 0.0 {
            return Err(RpopError::Config(format!(
                "target_fwhm must be positive, got {}",
                self.target_fwhm
            )));
        }
        if !self.fit.tolerance.is_finite() || self.fit.tolerance <= 0.0 {
            return Err(RpopError::Config(format!(
                "fit.tolerance must be positive, got {}",
                self.fit.tolerance
            )));
        }
        if let Some(guess) = &self.fit.initial_guess {
            if guess.iter().any(|v| !v.is_finite()) {
                return Err(RpopError::Config("fit.initial_guess must be finite".to_string()));
            }
        }
        let name = Path::new(&self.output_name);
        if self.output_name.is_empty() || name.file_name().map(|n| n != name.as_os_str()).unwrap_or(true) {
            return Err(RpopError::Config(format!(
                "output_name must be a bare file name, got '{}'",
                self.output_name
            )));
        }
        Ok(())
    }
}

/// Read advanced settings from JSON; missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<AdvancedSettings> {
    let text = fs::read_to_string(path).map_err(|e| RpopError::io(path, e))?;
    let settings: AdvancedSettings =
        serde_json::from_str(&text).map_err(|e| RpopError::format(path, format!("invalid settings JSON: {}", e)))?;
    settings.validate()?;
    Ok(settings)
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// PET scan to process
    pub input: PathBuf,
    pub work_dir: PathBuf,
    pub template_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Directory holding the registration and smoothness helper scripts
    pub exe_dir: PathBuf,
    pub origin_mode: OriginMode,
    pub family: TemplateFamily,
    pub fit: FitOptions,
    pub target_fwhm: f64,
    pub on_nonconvergence: NonConvergencePolicy,
    pub output_name: String,
}

impl PipelineConfig {
    pub fn new(
        input: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        template_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        exe_dir: impl Into<PathBuf>,
        origin_mode: OriginMode,
        family: TemplateFamily,
    ) -> Self {
        let defaults = AdvancedSettings::default();
        Self {
            input: input.into(),
            work_dir: work_dir.into(),
            template_dir: template_dir.into(),
            output_dir: output_dir.into(),
            exe_dir: exe_dir.into(),
            origin_mode,
            family,
            fit: defaults.fit,
            target_fwhm: defaults.target_fwhm,
            on_nonconvergence: defaults.on_nonconvergence,
            output_name: defaults.output_name,
        }
    }

    pub fn with_settings(mut self, settings: AdvancedSettings) -> Self {
        self.fit = settings.fit;
        self.target_fwhm = settings.target_fwhm;
        self.on_nonconvergence = settings.on_nonconvergence;
        self.output_name = settings.output_name;
        self
    }

    pub fn settings(&self) -> AdvancedSettings {
        AdvancedSettings {
            fit: self.fit.clone(),
            target_fwhm: self.target_fwhm,
            on_nonconvergence: self.on_nonconvergence,
            output_name: self.output_name.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.settings().validate()
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }
}
