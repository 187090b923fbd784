use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{error, info, info_span, warn};

use crate::config::{Architecture, ReleaseChannel};
use crate::descriptor::BuildDescriptor;
use crate::journal::{Journal, RunPhase, Subject};
use crate::process::{CommandSpec, ProcessRunner};

pub const GIT_ENV_VAR: &str = "BACKFILL_GIT_BINARY";

/// Checks out and compiles commits of a local repository.
pub struct CommitBuilder<'a, R: ProcessRunner> {
    runner: &'a R,
    git: PathBuf,
    repository: PathBuf,
    gradle_wrapper: PathBuf,
    artifact_dir: PathBuf,
    channel: ReleaseChannel,
    architecture: Architecture,
}

impl<'a, R: ProcessRunner> CommitBuilder<'a, R> {
    pub fn new(
        runner: &'a R,
        git: impl Into<PathBuf>,
        repository: impl Into<PathBuf>,
        channel: ReleaseChannel,
        architecture: Architecture,
    ) -> Self {
        Self {
            runner,
            git: git.into(),
            repository: repository.into(),
            gradle_wrapper: PathBuf::from(crate::config::DEFAULT_GRADLE_WRAPPER),
            artifact_dir: PathBuf::from("."),
            channel,
            architecture,
        }
    }

    pub fn with_gradle_wrapper(mut self, wrapper: impl Into<PathBuf>) -> Self {
        self.gradle_wrapper = wrapper.into();
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new(&self.git).current_dir(&self.repository)
    }

    /// `git fetch <remote>`; failures are logged and the run continues.
    pub fn fetch_repository(&self, remote: &str) {
        let spec = self.git().args(["fetch", remote]);
        match self.runner.run(&spec) {
            Ok(output) if output.success => info!(remote, "fetched repository"),
            Ok(output) => error!(
                repository = %self.repository.display(),
                remote,
                error = %output.error_message(),
                "something went wrong while fetching the repository"
            ),
            Err(err) => error!(
                repository = %self.repository.display(),
                remote,
                error = %format!("{err:#}"),
                "something went wrong while fetching the repository"
            ),
        }
    }

    /// Commits on the ancestry path from `start` (inclusive) to `end`, as listed by `git rev-list`.
    pub fn commits_in_range(&self, start: &str, end: &str) -> Vec<String> {
        let range = format!("{start}^..{end}");
        let spec = self.git().args(["rev-list", "--ancestry-path", range.as_str()]);
        let output = match self.runner.run(&spec) {
            Ok(output) => output,
            Err(err) => {
                error!(%range, error = %format!("{err:#}"), "unable to list commit range");
                return Vec::new();
            }
        };
        if !output.success {
            error!(%range, error = %output.error_message(), "something went wrong while listing the commit range");
        }
        output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Where Gradle leaves the assembled artifact for this channel and ABI.
    pub fn built_artifact_path(&self) -> PathBuf {
        let channel = self.channel.as_str();
        self.repository
            .join("app")
            .join("build")
            .join("outputs")
            .join("apk")
            .join(channel)
            .join(format!("app-{}-{channel}.apk", self.architecture))
    }

    pub fn artifact_destination(&self, hash: &str) -> PathBuf {
        self.artifact_dir.join(format!("apk_commit_{hash}.apk"))
    }

    /// Check out `hash` and assemble it.
    pub fn build_for_commit(&self, hash: &str) -> Result<()> {
        let checkout = self.git().args(["checkout", hash]);
        let output = self.runner.run(&checkout)?;
        if !output.success {
            anyhow::bail!("checkout of {hash} failed: {}", output.error_message());
        }

        let task = self.channel.assemble_task();
        let assemble = CommandSpec::new(&self.gradle_wrapper)
            .arg(task.as_str())
            .current_dir(&self.repository);
        let output = self.runner.run(&assemble)?;
        if !output.success {
            anyhow::bail!("{task} failed for {hash}: {}", output.error_message());
        }
        Ok(())
    }

    /// Move the freshly built artifact out of the build tree so the next build cannot overwrite it.
    pub fn collect_artifact(&self, hash: &str) -> Result<PathBuf> {
        let source = self.built_artifact_path();
        let destination = self.artifact_destination(hash);
        if !self.artifact_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.artifact_dir).with_context(|| {
                format!(
                    "Failed to create artifact directory {}",
                    self.artifact_dir.display()
                )
            })?;
        }
        move_file(&source, &destination).with_context(|| {
            format!(
                "Failed to move built apk {} to {}",
                source.display(),
                destination.display()
            )
        })?;
        Ok(destination)
    }

    /// Fetch `remote`, then build every commit in `start..=end`. Commits that fail are skipped.
    pub fn build_range(
        &self,
        start: &str,
        end: &str,
        remote: &str,
        journal: &Journal,
    ) -> Vec<BuildDescriptor> {
        self.fetch_repository(remote);
        let commits = self.commits_in_range(start, end);
        info!(count = commits.len(), start, end, "resolved commit range");

        let mut builds = Vec::with_capacity(commits.len());
        for hash in commits {
            let span = info_span!("commit", %hash);
            let _guard = span.enter();

            let outcome = self
                .build_for_commit(&hash)
                .and_then(|_| self.collect_artifact(&hash));
            match outcome {
                Ok(path) => {
                    let build = BuildDescriptor::from_commit(path, hash, self.architecture);
                    info!(path = %build.name.display(), "built artifact");
                    journal.note(RunPhase::Built, Subject::Build(&build), None);
                    builds.push(build);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(error = %message, "skipping commit");
                    journal.note(RunPhase::BuildFailed, Subject::Commit(&hash), Some(message));
                }
            }
        }
        builds
    }
}

fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err),
        Err(_) => {
            // rename cannot cross filesystems
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{FakeRunner, failed, ok_stdout};
    use tempfile::tempdir;

    fn builder<'a>(runner: &'a FakeRunner, repo: &Path, artifacts: &Path) -> CommitBuilder<'a, FakeRunner> {
        CommitBuilder::new(
            runner,
            "git",
            repo,
            ReleaseChannel::Nightly,
            Architecture::ArmeabiV7a,
        )
        .with_artifact_dir(artifacts)
    }

    fn fake_gradle(runner: &FakeRunner, built: PathBuf) {
        runner.on_run("assembleNightly", move |_| {
            fs::create_dir_all(built.parent().unwrap()).unwrap();
            fs::write(&built, b"apk").unwrap();
        });
    }

    #[test]
    fn built_artifact_path_follows_gradle_layout() {
        let runner = FakeRunner::new();
        let b = builder(&runner, Path::new("/src/fenix"), Path::new("."));
        assert_eq!(
            b.built_artifact_path(),
            PathBuf::from("/src/fenix/app/build/outputs/apk/nightly/app-armeabi-v7a-nightly.apk")
        );
        assert_eq!(
            b.artifact_destination("abc123"),
            PathBuf::from("./apk_commit_abc123.apk")
        );
    }

    #[test]
    fn commit_range_uses_ancestry_path() {
        let runner = FakeRunner::new();
        runner.respond("rev-list", ok_stdout("ccc\nbbb\n\naaa\n"));
        let b = builder(&runner, Path::new("/src/fenix"), Path::new("."));
        let commits = b.commits_in_range("aaa", "ccc");
        assert_eq!(commits, vec!["ccc", "bbb", "aaa"]);
        assert_eq!(runner.described_calls(), vec!["git rev-list --ancestry-path aaa^..ccc"]);
        assert_eq!(
            runner.calls.borrow()[0].cwd(),
            Some(Path::new("/src/fenix"))
        );
    }

    #[test]
    fn failed_rev_list_yields_whatever_was_printed() {
        let runner = FakeRunner::new();
        runner.respond("rev-list", failed("fatal: bad revision"));
        let b = builder(&runner, Path::new("/src/fenix"), Path::new("."));
        assert!(b.commits_in_range("nope", "HEAD").is_empty());
    }

    #[test]
    fn build_range_skips_failed_commits() {
        let repo = tempdir().expect("repo");
        let artifacts = tempdir().expect("artifacts");
        let dir = tempdir().expect("journal");
        let journal = Journal::in_dir(dir.path());

        let runner = FakeRunner::new();
        runner.respond("fetch", failed("fatal: 'upstream' does not appear to be a git repository"));
        runner.respond("rev-list", ok_stdout("ccc\nbbb\naaa\n"));
        runner.respond("checkout bbb", failed("error: pathspec 'bbb' did not match"));
        let b = builder(&runner, repo.path(), artifacts.path());
        fake_gradle(&runner, b.built_artifact_path());

        let builds = b.build_range("aaa", "ccc", "upstream", &journal);

        let commits: Vec<_> = builds.iter().filter_map(|b| b.commit.clone()).collect();
        assert_eq!(commits, vec!["ccc", "aaa"]);
        for build in &builds {
            assert!(build.name.exists(), "{} should exist", build.name.display());
            assert_eq!(build.date, None);
        }
        assert_eq!(runner.count_matching("assembleNightly"), 2);
        assert_eq!(runner.count_matching("git fetch upstream"), 1);

        let phases: Vec<_> = journal
            .read_events(10)
            .expect("journal")
            .into_iter()
            .map(|event| event.phase)
            .collect();
        assert_eq!(
            phases,
            vec![RunPhase::Built, RunPhase::BuildFailed, RunPhase::Built]
        );
    }

    #[test]
    fn missing_build_output_skips_commit() {
        let repo = tempdir().expect("repo");
        let artifacts = tempdir().expect("artifacts");
        let dir = tempdir().expect("journal");
        let journal = Journal::in_dir(dir.path());

        let runner = FakeRunner::new();
        runner.respond("rev-list", ok_stdout("aaa\n"));
        let b = builder(&runner, repo.path(), artifacts.path());

        let builds = b.build_range("aaa", "aaa", "upstream", &journal);
        assert!(builds.is_empty());
        assert_eq!(fs::read_dir(artifacts.path()).unwrap().count(), 0);
    }

    #[test]
    fn gradle_failure_is_reported() {
        let runner = FakeRunner::new();
        runner.respond("assembleNightly", failed("BUILD FAILED"));
        let b = builder(&runner, Path::new("/src/fenix"), Path::new("."));
        let err = b.build_for_commit("abc").unwrap_err();
        assert!(err.to_string().contains("BUILD FAILED"));
        assert_eq!(
            runner.described_calls(),
            vec!["git checkout abc", "./gradlew assembleNightly"]
        );
    }
}
