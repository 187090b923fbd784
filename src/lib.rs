pub mod cleanup;
pub mod cli;
pub mod commits;
pub mod config;
pub mod dates;
pub mod descriptor;
pub mod device;
pub mod durations;
pub mod journal;
pub mod measure;
pub mod nightly;
pub mod process;
pub mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::cli::{Args, BackfillRequest, SourceRequest};
use crate::commits::{CommitBuilder, GIT_ENV_VAR};
use crate::config::BackfillSettings;
use crate::descriptor::BuildDescriptor;
use crate::device::{ADB_ENV_VAR, DeviceBridge};
use crate::journal::Journal;
use crate::measure::{MeasureOutcome, StartupMeasurer};
use crate::nightly::{ArtifactHttp, BlockingArtifactHttp, NightlyFetcher};
use crate::process::{ProcessRunner, SystemRunner, resolve_tool};

/// Drives a whole backfill run: resolve builds, measure each one, clean up.
pub struct Backfill<H: ArtifactHttp, R: ProcessRunner> {
    settings: BackfillSettings,
    http: H,
    runner: R,
    adb: PathBuf,
    git: PathBuf,
}

impl Backfill<BlockingArtifactHttp, SystemRunner> {
    /// Backfill against the real artifact store and host tools.
    pub fn bootstrap(settings: BackfillSettings) -> Result<Self> {
        let http = BlockingArtifactHttp::from_settings(&settings.http)?;
        let adb = locate_tool(settings.tools.adb.as_deref(), ADB_ENV_VAR, "adb");
        let git = locate_tool(settings.tools.git.as_deref(), GIT_ENV_VAR, "git");
        Ok(Self::new(settings, http, SystemRunner).with_tools(adb, git))
    }
}

/// Resolve a tool, falling back to its bare name so each step reports its own failure.
fn locate_tool(configured: Option<&Path>, env_var: &str, name: &str) -> PathBuf {
    match resolve_tool(configured, env_var, name) {
        Ok(path) => path,
        Err(err) => {
            warn!(error = %err, "falling back to bare tool name");
            PathBuf::from(name)
        }
    }
}

impl<H: ArtifactHttp, R: ProcessRunner> Backfill<H, R> {
    pub fn new(settings: BackfillSettings, http: H, runner: R) -> Self {
        Self {
            settings,
            http,
            runner,
            adb: PathBuf::from("adb"),
            git: PathBuf::from("git"),
        }
    }

    pub fn with_tools(mut self, adb: impl Into<PathBuf>, git: impl Into<PathBuf>) -> Self {
        self.adb = adb.into();
        self.git = git.into();
        self
    }

    /// Validate `args` and run. Invalid combinations fail before any download, device or build step.
    pub fn run_args(&self, args: &Args) -> Result<BackfillSummary> {
        let request = args.to_request_today()?;
        self.run(&request)
    }

    pub fn run(&self, request: &BackfillRequest) -> Result<BackfillSummary> {
        let journal = Journal::in_dir(&self.settings.output_dir);
        let span = info_span!(
            "backfill.run",
            run = %journal.run_id(),
            channel = %request.channel,
            architecture = %request.architecture,
            cleanup = request.cleanup
        );
        let _span_guard = span.enter();

        let builds = self.resolve_builds(request, &journal);
        info!(count = builds.len(), "resolved builds to measure");

        let device = DeviceBridge::new(
            &self.runner,
            &self.adb,
            self.settings.device_serial.clone(),
        );
        let measurer = StartupMeasurer::new(
            &self.runner,
            device,
            &self.settings.measure_script,
            self.settings.test_name.as_str(),
            &self.settings.output_dir,
            request.channel,
            self.settings.package_id(request.channel),
        );

        let mut summary = BackfillSummary::new(journal.run_id(), journal.log_path().to_path_buf());
        for (index, build) in builds.iter().enumerate() {
            match measurer.measure(index, build, &journal) {
                Ok(outcome) => summary.record(build.clone(), outcome),
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(build = %build.label(), error = %message, "measurement failed");
                    summary.record(build.clone(), MeasureOutcome::AnalysisFailed { error: message });
                }
            }
        }

        if request.cleanup {
            summary.cleaned = Some(cleanup::remove_artifacts(&builds, &journal));
        }

        info!(
            builds = summary.builds(),
            analysed = summary.analysed(),
            skipped = summary.skipped(),
            journal = %summary.journal.display(),
            "backfill complete"
        );
        Ok(summary)
    }

    /// Produce the build list for the request's source.
    pub fn resolve_builds(&self, request: &BackfillRequest, journal: &Journal) -> Vec<BuildDescriptor> {
        match &request.source {
            SourceRequest::Nightly { start, end } => {
                let dates = dates::date_range(*start, *end);
                info!(start = %start, end = %end, days = dates.len(), "downloading nightlies");
                NightlyFetcher::new(
                    &self.http,
                    self.settings.nightly_url_template.as_str(),
                    &self.settings.artifact_dir,
                    request.architecture,
                )
                .download_range(&dates, journal)
            }
            SourceRequest::Commits {
                start,
                end,
                repository,
                remote,
            } => {
                let remote = self.settings.resolve_remote(remote.as_deref());
                CommitBuilder::new(
                    &self.runner,
                    &self.git,
                    repository,
                    request.channel,
                    request.architecture,
                )
                .with_gradle_wrapper(&self.settings.gradle_wrapper)
                .with_artifact_dir(&self.settings.artifact_dir)
                .build_range(start, end, remote, journal)
            }
        }
    }
}

/// Result of a backfill run.
#[derive(Debug, Clone)]
pub struct BackfillSummary {
    pub run_id: Uuid,
    pub journal: PathBuf,
    pub outcomes: Vec<(BuildDescriptor, MeasureOutcome)>,
    /// Number of artifacts deleted, when cleanup was requested.
    pub cleaned: Option<usize>,
}

impl BackfillSummary {
    fn new(run_id: Uuid, journal: PathBuf) -> Self {
        Self {
            run_id,
            journal,
            outcomes: Vec::new(),
            cleaned: None,
        }
    }

    fn record(&mut self, build: BuildDescriptor, outcome: MeasureOutcome) {
        self.outcomes.push((build, outcome));
    }

    pub fn builds(&self) -> usize {
        self.outcomes.len()
    }

    pub fn analysed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_analysed())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.builds() - self.analysed()
    }
}
