use std::{
    collections::VecDeque,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::descriptor::BuildDescriptor;

pub const JOURNAL_FILE_NAME: &str = "backfill_journal.jsonl";

/// Append-only JSON-L record of what happened to every build in a run.
#[derive(Debug, Clone)]
pub struct Journal {
    log_path: PathBuf,
    run_id: Uuid,
}

impl Journal {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            run_id: Uuid::new_v4(),
        }
    }

    /// Journal stored alongside the statistics files in `output_dir`.
    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(JOURNAL_FILE_NAME))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn append(&self, event: &RunEvent) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Unable to create journal directory {}", parent.display())
                })?;
            }
        }

        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open journal {}", self.log_path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Record a phase transition; journal write failures never interrupt a run.
    pub fn note(&self, phase: RunPhase, subject: Subject<'_>, detail: Option<String>) {
        let event = RunEvent::new(self.run_id, phase, subject, detail);
        if let Err(err) = self.append(&event) {
            warn!(error = %err, path = %self.log_path.display(), "unable to append journal event");
        }
    }

    /// Read the most recent `limit` events.
    pub fn read_events(&self, limit: usize) -> Result<Vec<RunEvent>> {
        if limit == 0 || !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.log_path)
            .with_context(|| format!("Failed to open journal {}", self.log_path.display()))?;
        let reader = BufReader::new(file);

        let mut buffer: VecDeque<RunEvent> = VecDeque::with_capacity(limit);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RunEvent = serde_json::from_str(&line)?;
            if buffer.len() == limit {
                buffer.pop_front();
            }
            buffer.push_back(event);
        }

        Ok(buffer.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    Fetched,
    NotFound,
    FetchFailed,
    Built,
    BuildFailed,
    Installed,
    InstallFailed,
    Measured,
    DurationsMissing,
    Analysed,
    AnalysisFailed,
    Cleaned,
}

/// What an event is about: a build, or a date/commit that never became one.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Build(&'a BuildDescriptor),
    Date(NaiveDate),
    Commit(&'a str),
}

/// Event persisted into the JSON-L journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub artifact: Option<String>,
    pub date: Option<NaiveDate>,
    pub commit: Option<String>,
    pub detail: Option<String>,
}

impl RunEvent {
    pub fn new(run_id: Uuid, phase: RunPhase, subject: Subject<'_>, detail: Option<String>) -> Self {
        let (artifact, date, commit) = match subject {
            Subject::Build(build) => (
                Some(build.name.to_string_lossy().into_owned()),
                build.date,
                build.commit.clone(),
            ),
            Subject::Date(date) => (None, Some(date), None),
            Subject::Commit(hash) => (None, None, Some(hash.to_string())),
        };
        Self {
            timestamp: Utc::now(),
            run_id,
            phase,
            artifact,
            date,
            commit,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Architecture;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_events() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::in_dir(&dir.path().join("out"));
        let build = BuildDescriptor::from_commit(
            PathBuf::from("apk_commit_abc.apk"),
            "abc".into(),
            Architecture::Arm64V8a,
        );

        journal.note(RunPhase::Built, Subject::Build(&build), None);
        journal.note(
            RunPhase::NotFound,
            Subject::Date(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap()),
            Some("404".into()),
        );

        let events = journal.read_events(10).expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, RunPhase::Built);
        assert_eq!(events[0].commit.as_deref(), Some("abc"));
        assert_eq!(events[0].artifact.as_deref(), Some("apk_commit_abc.apk"));
        assert_eq!(events[1].phase, RunPhase::NotFound);
        assert_eq!(events[1].run_id, journal.run_id());
    }

    #[test]
    fn read_events_keeps_most_recent() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::new(dir.path().join("journal.jsonl"));
        for hash in ["a", "b", "c"] {
            journal.note(RunPhase::BuildFailed, Subject::Commit(hash), None);
        }
        let events = journal.read_events(2).expect("read");
        let commits: Vec<_> = events.iter().filter_map(|e| e.commit.as_deref()).collect();
        assert_eq!(commits, vec!["b", "c"]);
        assert!(journal.read_events(0).expect("read").is_empty());
    }
}
