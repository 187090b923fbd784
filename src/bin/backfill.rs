use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use startup_backfill::Backfill;
use startup_backfill::cli::Args;
use startup_backfill::config::{BackfillSettings, default_config_path};
use startup_backfill::measure::MeasureOutcome;
use startup_backfill::telemetry;
use tracing::{error, info};

fn load_settings(args: &Args) -> Result<BackfillSettings> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut settings = BackfillSettings::load_or_default(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    args.apply_overrides(&mut settings);
    Ok(settings)
}

fn run(args: Args) -> Result<()> {
    // Reject bad argument combinations before touching config, network or device.
    let request = args.to_request_today()?;

    let settings = load_settings(&args)?;
    telemetry::init_tracing("backfill", args.verbose, &settings.traces)?;
    if let Some(path) = telemetry::current_trace_file() {
        info!(path = %path.display(), "writing JSON trace");
    }

    let backfill = Backfill::bootstrap(settings)?;
    let summary = backfill.run(&request)?;

    for (build, outcome) in &summary.outcomes {
        match outcome {
            MeasureOutcome::Analysed { stats, path } => println!(
                "{}: median {:.2}ms mean {:.2}ms over {} runs -> {}",
                build.label(),
                stats.median,
                stats.mean,
                stats.samples,
                path.display()
            ),
            MeasureOutcome::InstallFailed => println!("{}: install failed", build.label()),
            MeasureOutcome::DurationsMissing { .. } => {
                println!("{}: no durations recorded", build.label())
            }
            MeasureOutcome::AnalysisFailed { error } => {
                println!("{}: analysis failed ({error})", build.label())
            }
        }
    }
    println!(
        "{} builds, {} analysed, {} skipped. Journal: {}",
        summary.builds(),
        summary.analysed(),
        summary.skipped(),
        summary.journal.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if tracing::dispatcher::has_been_set() {
                error!(error = %format!("{err:#}"), "backfill aborted");
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
