use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{ArgAction, Parser};
use serde::Serialize;
use startup_backfill::durations::{self, DurationStats};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "durations-report", version, about = "Summarise startup durations files", long_about = None)]
struct ReportCli {
    /// Durations files written by the startup measurement script.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Directory for the statistics files (defaults to each input's directory).
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Print the statistics as JSON instead of text.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Increase logging verbosity.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    output: PathBuf,
    #[serde(flatten)]
    stats: DurationStats,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        "durations_report=debug,startup_backfill=debug"
    } else {
        "durations_report=info,startup_backfill=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// `3_durations_for_nightly_2021_03_01.txt` becomes `3_nightly_2021_03_01_perf_results.txt`.
fn stats_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "durations".into());
    if let Some((index, apk)) = stem.split_once("_durations_for_") {
        if !index.is_empty() && index.chars().all(|ch| ch.is_ascii_digit()) {
            return format!("{index}_{apk}_perf_results.txt");
        }
    }
    format!("{stem}_perf_results.txt")
}

fn stats_path(input: &Path, output: Option<&Path>) -> PathBuf {
    let dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    dir.join(stats_file_name(input))
}

fn summarise(cli: &ReportCli) -> Vec<FileReport> {
    let mut reports = Vec::new();
    for input in &cli.files {
        let output = stats_path(input, cli.output.as_deref());
        match durations::analyze_file(input, &output) {
            Ok(stats) => {
                info!(input = %input.display(), output = %output.display(), samples = stats.samples, "wrote statistics");
                reports.push(FileReport {
                    input: input.clone(),
                    output,
                    stats,
                });
            }
            Err(err) if durations::is_missing_file(&err) => {
                warn!(input = %input.display(), "durations file does not exist");
            }
            Err(err) => {
                warn!(input = %input.display(), error = %format!("{err:#}"), "unable to summarise durations");
            }
        }
    }
    reports
}

fn main() -> Result<()> {
    let cli = ReportCli::parse();
    init_tracing(cli.verbose);

    let reports = summarise(&cli);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("== {}", report.input.display());
            print!("{}", durations::render_stats(&report.stats));
        }
    }

    if reports.is_empty() {
        bail!("no durations file could be summarised");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn stats_name_follows_backfill_convention() {
        assert_eq!(
            stats_file_name(Path::new("out/3_durations_for_nightly_2021_03_01.txt")),
            "3_nightly_2021_03_01_perf_results.txt"
        );
        assert_eq!(stats_file_name(Path::new("cold.txt")), "cold_perf_results.txt");
    }

    #[test]
    fn summarise_skips_missing_files() {
        let dir = tempdir().expect("tempdir");
        let present = dir.path().join("0_durations_for_apk_commit_abc.txt");
        fs::write(&present, "500\n700\n").expect("write");
        let out = dir.path().join("reports");

        let cli = ReportCli::parse_from([
            OsString::from("durations-report"),
            dir.path().join("missing.txt").into_os_string(),
            present.clone().into_os_string(),
            OsString::from("--output"),
            out.clone().into_os_string(),
        ]);
        let reports = summarise(&cli);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stats.samples, 2);
        assert_eq!(reports[0].output, out.join("0_apk_commit_abc_perf_results.txt"));
        assert!(reports[0].output.exists());
    }

    #[test]
    fn requires_at_least_one_file() {
        assert!(ReportCli::try_parse_from(["durations-report"]).is_err());
    }
}
