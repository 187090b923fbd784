use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{ArgAction, Parser};

use crate::config::{Architecture, BackfillSettings, BuildSource, ReleaseChannel};
use crate::dates::parse_cli_date;

const ABOUT: &str = "Get startup performance metrics between two dates or two commits.";

const LONG_ABOUT: &str = "Get startup performance metrics between two dates or two commits.\n\n\
Backfills numbers either for daily nightlies downloaded from the CI artifact index, \
or for every commit between two commits built from a local checkout.";

#[derive(Parser, Debug, Clone)]
#[command(name = "backfill", version, about = ABOUT, long_about = LONG_ABOUT)]
pub struct Args {
    /// The build to run performance analysis on.
    #[arg(value_enum)]
    pub release_channel: ReleaseChannel,

    /// Device ABI of the builds.
    #[arg(value_enum)]
    pub architecture: Architecture,

    /// Where builds come from; commitsRange builds every commit between two commits.
    #[arg(value_enum)]
    pub build_source: BuildSource,

    /// Date to start the backfill (YYYY.MM.DD).
    #[arg(long = "startdate", value_name = "YYYY.MM.DD", value_parser = parse_date_arg)]
    pub start_date: Option<NaiveDate>,

    /// Date to backfill until (YYYY.MM.DD); defaults to today.
    #[arg(long = "enddate", value_name = "YYYY.MM.DD", value_parser = parse_date_arg)]
    pub end_date: Option<NaiveDate>,

    /// Oldest commit to build.
    #[arg(long = "startcommit", value_name = "COMMIT")]
    pub start_commit: Option<String>,

    /// Last commit to run performance analysis on.
    #[arg(long = "endcommit", value_name = "COMMIT")]
    pub end_commit: Option<String>,

    /// Remote to fetch before listing commits (defaults to upstream).
    #[arg(long = "git_remote_name", alias = "git-remote-name", value_name = "REMOTE")]
    pub git_remote_name: Option<String>,

    /// Path to the repository the commits are built from.
    #[arg(
        long = "repository_to_test_path",
        alias = "repository-to-test-path",
        value_name = "PATH"
    )]
    pub repository_to_test_path: Option<PathBuf>,

    /// Remove downloaded and built apks once measured.
    #[arg(short = 'c', long, action = ArgAction::SetTrue)]
    pub cleanup: bool,

    /// Increase logging verbosity.
    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Custom config path.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for durations and statistics files.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory apks are downloaded or moved into.
    #[arg(long, value_name = "DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Startup measurement script to invoke.
    #[arg(long, value_name = "PATH")]
    pub measure_script: Option<PathBuf>,

    /// Startup test the measurement script runs (e.g. cold_main_first_frame).
    #[arg(long, value_name = "NAME")]
    pub test_name: Option<String>,

    /// Serial of the device to use when several are attached.
    #[arg(long, value_name = "SERIAL")]
    pub device_serial: Option<String>,
}

fn parse_date_arg(raw: &str) -> Result<NaiveDate, String> {
    parse_cli_date(raw).map_err(|err| err.to_string())
}

/// Argument combinations rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    MissingRepository,
    MissingCommitBounds,
    MissingStartDate,
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgsError::MissingRepository => write!(
                f,
                "provide --repository_to_test_path to run the backfill with the commitsRange source"
            ),
            ArgsError::MissingCommitBounds => write!(
                f,
                "running the backfill between two commits requires --startcommit and --endcommit"
            ),
            ArgsError::MissingStartDate => {
                write!(f, "running the backfill on nightlies requires --startdate")
            }
            ArgsError::StartAfterEnd { start, end } => {
                write!(f, "start date {start} is after end date {end}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

/// Where the builds of a validated run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    Nightly {
        start: NaiveDate,
        end: NaiveDate,
    },
    Commits {
        start: String,
        end: String,
        repository: PathBuf,
        remote: Option<String>,
    },
}

/// A validated backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub channel: ReleaseChannel,
    pub architecture: Architecture,
    pub source: SourceRequest,
    pub cleanup: bool,
}

impl Args {
    /// Validate the argument combination. `today` stands in for a missing `--enddate`.
    pub fn to_request(&self, today: NaiveDate) -> Result<BackfillRequest, ArgsError> {
        let source = match self.build_source {
            BuildSource::TaskclusterNightly => {
                let start = self.start_date.ok_or(ArgsError::MissingStartDate)?;
                let end = self.end_date.unwrap_or(today);
                if start > end {
                    return Err(ArgsError::StartAfterEnd { start, end });
                }
                SourceRequest::Nightly { start, end }
            }
            BuildSource::CommitsRange => {
                let repository = self
                    .repository_to_test_path
                    .clone()
                    .ok_or(ArgsError::MissingRepository)?;
                let (Some(start), Some(end)) = (non_blank(&self.start_commit), non_blank(&self.end_commit))
                else {
                    return Err(ArgsError::MissingCommitBounds);
                };
                SourceRequest::Commits {
                    start,
                    end,
                    repository,
                    remote: non_blank(&self.git_remote_name),
                }
            }
        };

        Ok(BackfillRequest {
            channel: self.release_channel,
            architecture: self.architecture,
            source,
            cleanup: self.cleanup,
        })
    }

    pub fn to_request_today(&self) -> Result<BackfillRequest, ArgsError> {
        self.to_request(Local::now().date_naive())
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, settings: &mut BackfillSettings) {
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(dir) = &self.artifact_dir {
            settings.artifact_dir = dir.clone();
        }
        if let Some(script) = &self.measure_script {
            settings.measure_script = script.clone();
        }
        if let Some(test) = non_blank(&self.test_name) {
            settings.test_name = test;
        }
        if let Some(serial) = non_blank(&self.device_serial) {
            settings.device_serial = Some(serial);
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
