use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{debug, error, info, info_span, warn};

use crate::config::ReleaseChannel;
use crate::descriptor::BuildDescriptor;
use crate::device::DeviceBridge;
use crate::durations::{self, DurationStats};
use crate::journal::{Journal, RunPhase, Subject};
use crate::process::{CommandSpec, ProcessRunner};

/// What happened to a single build during measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasureOutcome {
    InstallFailed,
    DurationsMissing { path: PathBuf },
    AnalysisFailed { error: String },
    Analysed { stats: DurationStats, path: PathBuf },
}

impl MeasureOutcome {
    pub fn is_analysed(&self) -> bool {
        matches!(self, MeasureOutcome::Analysed { .. })
    }
}

/// Output file locations for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub durations: PathBuf,
    pub stats: PathBuf,
}

impl OutputPaths {
    pub fn for_build(output_dir: &Path, index: usize, build: &BuildDescriptor) -> Self {
        let apk_name = build.apk_stem();
        Self {
            durations: output_dir.join(format!("{index}_durations_for_{apk_name}.txt")),
            stats: output_dir.join(format!("{index}_{apk_name}_perf_results.txt")),
        }
    }
}

/// Installs each build, runs the startup measurement script and aggregates its output.
pub struct StartupMeasurer<'a, R: ProcessRunner> {
    runner: &'a R,
    device: DeviceBridge<'a, R>,
    script: PathBuf,
    test_name: String,
    output_dir: PathBuf,
    channel: ReleaseChannel,
    package_id: String,
}

impl<'a, R: ProcessRunner> StartupMeasurer<'a, R> {
    pub fn new(
        runner: &'a R,
        device: DeviceBridge<'a, R>,
        script: impl Into<PathBuf>,
        test_name: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        channel: ReleaseChannel,
        package_id: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            device,
            script: script.into(),
            test_name: test_name.into(),
            output_dir: output_dir.into(),
            channel,
            package_id: package_id.into(),
        }
    }

    /// Invoke `<script> <channel> <test> <durations path>`. A failing script is only logged:
    /// whatever it managed to write is still analysed.
    pub fn run_measure_script(&self, durations_path: &Path) {
        let spec = CommandSpec::new(&self.script)
            .arg(self.channel.as_str())
            .arg(self.test_name.as_str())
            .arg(durations_path.to_string_lossy().into_owned());
        match self.runner.run(&spec) {
            Ok(output) if output.success => {}
            Ok(output) => warn!(
                script = %self.script.display(),
                error = %output.error_message(),
                "measurement script reported a failure"
            ),
            Err(err) => error!(
                script = %self.script.display(),
                error = %format!("{err:#}"),
                "unable to run measurement script"
            ),
        }
    }

    /// Measure build number `index`.
    pub fn measure(&self, index: usize, build: &BuildDescriptor, journal: &Journal) -> Result<MeasureOutcome> {
        let span = info_span!("measure", index, build = %build.label());
        let _guard = span.enter();

        self.device.uninstall(&self.package_id);

        if !self.device.install(build.path()) {
            journal.note(RunPhase::InstallFailed, Subject::Build(build), None);
            return Ok(MeasureOutcome::InstallFailed);
        }
        journal.note(RunPhase::Installed, Subject::Build(build), None);

        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                self.output_dir.display()
            )
        })?;

        let paths = OutputPaths::for_build(&self.output_dir, index, build);
        clear_stale_durations(&paths.durations);
        self.run_measure_script(&paths.durations);
        journal.note(
            RunPhase::Measured,
            Subject::Build(build),
            Some(paths.durations.display().to_string()),
        );

        match durations::analyze_file(&paths.durations, &paths.stats) {
            Ok(stats) => {
                info!(
                    samples = stats.samples,
                    median_ms = stats.median,
                    mean_ms = stats.mean,
                    path = %paths.stats.display(),
                    "wrote startup statistics"
                );
                journal.note(
                    RunPhase::Analysed,
                    Subject::Build(build),
                    Some(paths.stats.display().to_string()),
                );
                Ok(MeasureOutcome::Analysed {
                    stats,
                    path: paths.stats,
                })
            }
            Err(err) if durations::is_missing_file(&err) => {
                error!(
                    path = %paths.durations.display(),
                    "durations file does not exist, the measurement script probably failed for this build"
                );
                journal.note(RunPhase::DurationsMissing, Subject::Build(build), None);
                Ok(MeasureOutcome::DurationsMissing {
                    path: paths.durations,
                })
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "unable to analyse durations");
                journal.note(
                    RunPhase::AnalysisFailed,
                    Subject::Build(build),
                    Some(message.clone()),
                );
                Ok(MeasureOutcome::AnalysisFailed { error: message })
            }
        }
    }
}

/// Remove durations left by an earlier run so only this run's script output is analysed.
fn clear_stale_durations(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale durations file"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(
            path = %path.display(),
            error = %err,
            "unable to remove stale durations file"
        ),
    }
}
