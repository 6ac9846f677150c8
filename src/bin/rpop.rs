//! rPOP CLI: composite-template normalisation and resolution equalisation
//! of a single amyloid PET scan.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rpop_core::config::{load_settings, PipelineConfig};
use rpop_core::origin::OriginMode;
use rpop_core::templates::TemplateFamily;
use rpop_core::Pipeline;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "rpop")]
#[command(about = "Robust PET-only processing of amyloid PET scans")]
#[command(version)]
struct Cli {
    /// PET scan to process (.nii or .nii.gz).
    #[arg(long)]
    pet: PathBuf,

    /// Working directory for intermediate files.
    #[arg(long)]
    work: PathBuf,

    /// Directory holding the Template_<TRACER>_<kind>.nii files.
    #[arg(long)]
    templates: PathBuf,

    /// Output directory for the smoothed scan and the run log.
    #[arg(long)]
    out: PathBuf,

    /// Directory holding init_ants_reg.sh, full_ants_reg.sh and afni.sh.
    #[arg(long)]
    exe: PathBuf,

    /// Origin handling: Reset (centre of grid to world origin) or Keep.
    #[arg(long, default_value = "Reset")]
    origin: String,

    /// Template set: 1 = all tracers, 2 = florbetapir, 3 = florbetaben, 4 = flutemetamol.
    #[arg(long, default_value_t = 1)]
    tpopt: i64,

    /// Advanced settings (JSON): fit tolerance, iterations, initial guess,
    /// target FWHM, non-convergence policy, output file name.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rpop: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let origin: OriginMode = cli.origin.parse()?;
    let family = TemplateFamily::try_from(cli.tpopt)?;

    let mut config = PipelineConfig::new(cli.pet, cli.work, cli.templates, cli.out, cli.exe, origin, family);
    if let Some(path) = &cli.config {
        config = config.with_settings(load_settings(path)?);
    }

    fs::create_dir_all(&config.work_dir)?;
    fs::create_dir_all(&config.output_dir)?;

    let outcome = Pipeline::with_scripts(&config).run()?;

    println!("{}", serde_json::to_string_pretty(&outcome.record)?);
    println!("Smoothed scan: {}", outcome.output.display());
    println!("Run log: {}", outcome.log.display());
    println!("Lookup the run log to assess FWHM estimations and filters applied.");
    Ok(())
}
