//! End-to-end rPOP run
//!
//! Stages execute strictly in order and hand their results forward
//! explicitly. Files needed by the external tools are written to the work
//! directory and their paths passed on; nothing is discovered by naming
//! convention except the tools' own outputs, which the gateways resolve.
//!
//! ```text
//! Load → NormalizeOrigin → SelectTemplates → InitialRegister → FitComposite →
//! SynthesizeComposite → FinalRegister → EstimateSmoothness → ComputeFilter →
//! ApplySmoothing → Record → Done
//! ```
//!
//! A failure anywhere aborts the run with `RpopError::Stage` naming the stage;
//! no run record is written for a failed run.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::composite::{fit_composite, synthesize, CompositeFit};
use crate::config::{NonConvergencePolicy, PipelineConfig};
use crate::error::{Result, RpopError};
use crate::gateway::{
    Registration, RegistrationKind, RegistrationOutput, RegistrationRequest, ScriptRegistration, ScriptRunner,
    ScriptSmoothnessEstimator, SmoothingApplicator, SmoothnessEstimator, SmoothnessRequest,
};
use crate::origin::normalize_origin;
use crate::run_log::{RunLog, RunRecord};
use crate::smoothing::{compute_filter, FilterTriple, FwhmTriple, GaussianSmoother};
use crate::templates::{TemplateSet, REGISTRATION_REFERENCE};
use crate::volume::Volume;

/// Origin-normalised scan, the moving image for both registrations
pub const CENTERED_NAME: &str = "img_centered.nii.gz";
pub const COMPOSITE_NAME: &str = "composite_template.nii.gz";
pub const INITIAL_PREFIX: &str = "init_reg";
pub const FINAL_PREFIX: &str = "w_pet";
pub const SMOOTHNESS_PREFIX: &str = "w_pet_afni";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Load,
    NormalizeOrigin,
    SelectTemplates,
    InitialRegister,
    FitComposite,
    SynthesizeComposite,
    FinalRegister,
    EstimateSmoothness,
    ComputeFilter,
    ApplySmoothing,
    Record,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::Load,
        Stage::NormalizeOrigin,
        Stage::SelectTemplates,
        Stage::InitialRegister,
        Stage::FitComposite,
        Stage::SynthesizeComposite,
        Stage::FinalRegister,
        Stage::EstimateSmoothness,
        Stage::ComputeFilter,
        Stage::ApplySmoothing,
        Stage::Record,
        Stage::Done,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a successful run produced
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub fit: CompositeFit,
    /// False when the fit stopped early and its best iterate was used
    pub fit_converged: bool,
    pub centered: PathBuf,
    pub composite: PathBuf,
    pub registered: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    registration: Box<dyn Registration + 'a>,
    estimator: Box<dyn SmoothnessEstimator + 'a>,
    smoother: Box<dyn SmoothingApplicator + 'a>,
}

/// Run one stage body, tagging any error with the stage.
fn stage<T>(stage: Stage, body: impl FnOnce() -> Result<T>) -> Result<T> {
    tracing::info!(%stage, "stage started");
    body().map_err(|e| e.at(stage))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| RpopError::io(dir, e))
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        registration: Box<dyn Registration + 'a>,
        estimator: Box<dyn SmoothnessEstimator + 'a>,
        smoother: Box<dyn SmoothingApplicator + 'a>,
    ) -> Self {
        Self { config, registration, estimator, smoother }
    }

    /// Helper scripts from `config.exe_dir` and in-process Gaussian smoothing
    pub fn with_scripts(config: &'a PipelineConfig) -> Self {
        let runner = ScriptRunner::new(&config.exe_dir);
        Self::new(
            config,
            Box::new(ScriptRegistration::new(runner.clone())),
            Box::new(ScriptSmoothnessEstimator::new(runner)),
            Box::new(GaussianSmoother::default()),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    pub fn run(&self) -> Result<RunOutcome> {
        let config = self.config;
        config.validate()?;
        let span = tracing::info_span!("rpop", input = %config.input.display());
        let _guard = span.enter();

        let scan = stage(Stage::Load, || Volume::load(&config.input))?;
        tracing::info!(dims = ?scan.dims(), voxel_size = ?scan.voxel_size(), "scan loaded");

        let centered = stage(Stage::NormalizeOrigin, || {
            let normalized = normalize_origin(&scan, config.origin_mode);
            ensure_dir(&config.work_dir)?;
            let path = config.work_dir.join(CENTERED_NAME);
            normalized.save(&path)?;
            tracing::info!(mode = %config.origin_mode, path = %path.display(), "origin normalised");
            Ok(path)
        })?;

        let (reference, templates) = stage(Stage::SelectTemplates, || {
            let reference = config.template_dir.join(REGISTRATION_REFERENCE);
            if !reference.is_file() {
                return Err(RpopError::FileNotFound(reference));
            }
            let set = TemplateSet::resolve(config.family, &config.template_dir);
            let templates = set.load()?;
            tracing::info!(family = %set.family(), count = templates.len(), "templates selected");
            Ok((reference, templates))
        })?;

        let initial = stage(Stage::InitialRegister, || {
            self.registration.register(&RegistrationRequest {
                kind: RegistrationKind::Initial,
                fixed: reference.clone(),
                moving: centered.clone(),
                initial_transform: None,
                work_dir: config.work_dir.clone(),
                prefix: INITIAL_PREFIX.to_string(),
            })
        })?;

        let (fit, fit_converged) = stage(Stage::FitComposite, || {
            let target = Volume::load(&initial.registered)?;
            self.fit(&templates, &target)
        })?;

        let composite = stage(Stage::SynthesizeComposite, || {
            let composite = synthesize(&fit.coefficients, &templates)?;
            let path = config.work_dir.join(COMPOSITE_NAME);
            composite.save(&path)?;
            tracing::info!(path = %path.display(), "composite template written");
            Ok(path)
        })?;
        drop(templates);

        let RegistrationOutput { registered, .. } = stage(Stage::FinalRegister, || {
            self.registration.register(&RegistrationRequest {
                kind: RegistrationKind::Final,
                fixed: composite.clone(),
                moving: centered.clone(),
                initial_transform: Some(initial.transform.clone()),
                work_dir: config.work_dir.clone(),
                prefix: FINAL_PREFIX.to_string(),
            })
        })?;

        let fwhm = stage(Stage::EstimateSmoothness, || {
            let fwhm = self.estimator.estimate(&SmoothnessRequest {
                volume: registered.clone(),
                work_dir: config.work_dir.clone(),
                prefix: SMOOTHNESS_PREFIX.to_string(),
            })?;
            fwhm.validate().map_err(|reason| RpopError::tool("smoothness estimator", reason))?;
            tracing::info!(%fwhm, "estimated smoothness (FWHM, mm)");
            Ok(fwhm)
        })?;

        let filter = stage(Stage::ComputeFilter, || {
            let filter = compute_filter(fwhm, config.target_fwhm);
            tracing::info!(%filter, target = config.target_fwhm, "filter (FWHM, mm)");
            Ok(filter)
        })?;

        let output = stage(Stage::ApplySmoothing, || {
            let warped = Volume::load(&registered)?;
            let smoothed = self.smoother.smooth(&warped, filter)?;
            ensure_dir(&config.output_dir)?;
            let path = config.output_path();
            smoothed.save(&path)?;
            tracing::info!(path = %path.display(), "smoothed scan written");
            Ok(path)
        })?;

        let (record, log) = stage(Stage::Record, || self.record(fwhm, filter))?;

        tracing::info!(stage = %Stage::Done, log = %log.display(), "rPOP complete");
        Ok(RunOutcome {
            record,
            fit,
            fit_converged,
            centered,
            composite,
            registered,
            output,
            log,
        })
    }

    /// Composite fit under the configured non-convergence policy
    fn fit(&self, templates: &[Volume], target: &Volume) -> Result<(CompositeFit, bool)> {
        match fit_composite(templates, target, &self.config.fit) {
            Ok(fit) => {
                tracing::info!(
                    coefficients = ?fit.coefficients,
                    mse = fit.objective,
                    iterations = fit.iterations,
                    "composite fit"
                );
                Ok((fit, true))
            }
            Err(RpopError::FitDidNotConverge { best, objective, iterations })
                if self.config.on_nonconvergence == NonConvergencePolicy::UseBestIterate =>
            {
                tracing::warn!(
                    coefficients = ?best,
                    mse = objective,
                    iterations,
                    "composite fit did not converge; using best iterate"
                );
                Ok((CompositeFit { coefficients: best, objective, iterations }, false))
            }
            Err(e) => Err(e),
        }
    }

    fn record(&self, estimated: FwhmTriple, filter: FilterTriple) -> Result<(RunRecord, PathBuf)> {
        let record = RunRecord {
            filename: self.config.output_name.clone(),
            estimated,
            filter,
            rerun_modified: false,
        };
        let log = RunLog::timestamped(&self.config.output_dir, &Local::now());
        log.append(&record)?;
        Ok((record, log.path().to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_names() {
        let names: Vec<String> = Stage::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names.first().map(String::as_str), Some("Load"));
        assert_eq!(names.last().map(String::as_str), Some("Done"));
        assert!(Stage::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Stage::EstimateSmoothness.to_string(), "EstimateSmoothness");
    }

    #[test]
    fn test_stage_wrapper_tags_errors() {
        let err = stage(Stage::FitComposite, || -> Result<()> { Err(RpopError::EmptyTemplateSet) }).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::FitComposite));
        assert!(matches!(err.root(), RpopError::EmptyTemplateSet));
    }
}
