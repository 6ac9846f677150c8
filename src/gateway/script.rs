//! Helper-script implementations of the gateways
//!
//! Scripts live in one executable directory:
//!
//! - `init_ants_reg.sh <fixed> <moving> <work> <prefix>`
//! - `full_ants_reg.sh <fixed> <moving> <init_transform> <work> <prefix>`
//! - `afni.sh <work> <prefix> <volume>`
//!
//! Registration scripts follow ANTs output naming (`<work>/<prefix>.nii.gz`
//! and `<work>/<prefix>0GenericAffine.mat`); the AFNI script writes its
//! FWHM table to `<work>/<prefix>_automask.txt`.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, RpopError};
use crate::gateway::{
    Registration, RegistrationKind, RegistrationOutput, RegistrationRequest, SmoothnessEstimator, SmoothnessRequest,
};
use crate::smoothing::FwhmTriple;

pub const INITIAL_REGISTRATION_SCRIPT: &str = "init_ants_reg.sh";
pub const FINAL_REGISTRATION_SCRIPT: &str = "full_ants_reg.sh";
pub const SMOOTHNESS_SCRIPT: &str = "afni.sh";

/// Lines of stderr kept in a failure message
const STDERR_TAIL: usize = 20;

/// Runs scripts from an executable directory, optionally through an
/// interpreter (`sh`, `bash`) instead of executing them directly.
#[derive(Clone, Debug)]
pub struct ScriptRunner {
    exe_dir: PathBuf,
    interpreter: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new(exe_dir: impl Into<PathBuf>) -> Self {
        Self { exe_dir: exe_dir.into(), interpreter: None }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn exe_dir(&self) -> &Path {
        &self.exe_dir
    }

    /// Run `script` with `args` and wait; non-zero exit is a tool failure.
    pub fn run(&self, script: &str, args: &[&OsStr]) -> Result<()> {
        let script_path = self.exe_dir.join(script);
        if !script_path.is_file() {
            return Err(RpopError::tool(script, format!("script not found at {}", script_path.display())));
        }

        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&script_path);
                cmd
            }
            None => Command::new(&script_path),
        };
        cmd.args(args);

        tracing::info!("Running {}", script);
        tracing::debug!("Command: {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| RpopError::tool(script, format!("failed to start: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::debug!("{} stdout:\n{}", script, stdout.trim_end());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL)..].join("\n");
            tracing::error!("{} failed ({}):\n{}", script, output.status, tail);
            return Err(RpopError::tool(script, format!("{}: {}", output.status, tail.trim())));
        }
        Ok(())
    }
}

fn require_output(script: &str, path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(RpopError::tool(script, format!("expected output {} was not created", path.display())))
    }
}

/// ANTs registration through `init_ants_reg.sh` / `full_ants_reg.sh`
#[derive(Clone, Debug)]
pub struct ScriptRegistration {
    runner: ScriptRunner,
}

impl ScriptRegistration {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }

    /// Paths an ANTs run with `prefix` leaves in `work_dir`
    pub fn expected_outputs(work_dir: &Path, prefix: &str) -> RegistrationOutput {
        RegistrationOutput {
            registered: work_dir.join(format!("{}.nii.gz", prefix)),
            transform: work_dir.join(format!("{}0GenericAffine.mat", prefix)),
        }
    }
}

impl Registration for ScriptRegistration {
    fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutput> {
        let (script, args): (&str, Vec<&OsStr>) = match request.kind {
            RegistrationKind::Initial => (
                INITIAL_REGISTRATION_SCRIPT,
                vec![
                    request.fixed.as_os_str(),
                    request.moving.as_os_str(),
                    request.work_dir.as_os_str(),
                    OsStr::new(&request.prefix),
                ],
            ),
            RegistrationKind::Final => {
                let init = request.initial_transform.as_ref().ok_or_else(|| {
                    RpopError::Config("final registration requires an initial transform".to_string())
                })?;
                (
                    FINAL_REGISTRATION_SCRIPT,
                    vec![
                        request.fixed.as_os_str(),
                        request.moving.as_os_str(),
                        init.as_os_str(),
                        request.work_dir.as_os_str(),
                        OsStr::new(&request.prefix),
                    ],
                )
            }
        };

        self.runner.run(script, &args)?;

        let expected = Self::expected_outputs(&request.work_dir, &request.prefix);
        Ok(RegistrationOutput {
            registered: require_output(script, expected.registered)?,
            transform: require_output(script, expected.transform)?,
        })
    }
}

/// AFNI smoothness estimation through `afni.sh`
#[derive(Clone, Debug)]
pub struct ScriptSmoothnessEstimator {
    runner: ScriptRunner,
}

impl ScriptSmoothnessEstimator {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }

    pub fn table_path(work_dir: &Path, prefix: &str) -> PathBuf {
        work_dir.join(format!("{}_automask.txt", prefix))
    }
}

impl SmoothnessEstimator for ScriptSmoothnessEstimator {
    fn estimate(&self, request: &SmoothnessRequest) -> Result<FwhmTriple> {
        if !request.volume.is_file() {
            return Err(RpopError::FileNotFound(request.volume.clone()));
        }
        self.runner.run(
            SMOOTHNESS_SCRIPT,
            &[
                request.work_dir.as_os_str(),
                OsStr::new(&request.prefix),
                request.volume.as_os_str(),
            ],
        )?;

        let table = require_output(SMOOTHNESS_SCRIPT, Self::table_path(&request.work_dir, &request.prefix))?;
        let text = fs::read_to_string(&table).map_err(|e| RpopError::io(&table, e))?;
        parse_fwhm_table(&text).map_err(|reason| RpopError::format(&table, reason))
    }
}

/// First all-numeric row with at least three columns, read as (x, y, z) FWHM.
///
/// Blank lines, `#` comments and rows with any non-numeric token (column
/// labels, tool chatter) are skipped; trailing columns are ignored.
pub fn parse_fwhm_table(text: &str) -> std::result::Result<FwhmTriple, String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let numbers: Option<Vec<f64>> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<f64>().ok())
            .collect();
        let Some(numbers) = numbers else {
            continue;
        };
        if numbers.len() >= 3 {
            let fwhm = FwhmTriple::new(numbers[0], numbers[1], numbers[2]);
            fwhm.validate()?;
            return Ok(fwhm);
        }
    }
    Err("no row with three FWHM values".to_string())
}
