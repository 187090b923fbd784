use std::cmp::Reverse;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

use crate::config::{TraceSettings, project_dirs};

const TRACE_SUFFIX: &str = ".trace.jsonl";

static TRACE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static ACTIVE_TRACE_FILE: OnceCell<PathBuf> = OnceCell::new();
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

fn install_subscriber<S>(subscriber: S) -> Result<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    if TRACING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    subscriber::set_global_default(subscriber)?;
    let _ = TRACING_INITIALIZED.set(());
    Ok(())
}

/// Default filter directive for `crate_target`, e.g. `startup_backfill=info`.
pub fn default_directive(crate_target: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("{crate_target}={level}")
}

/// Install the stderr subscriber, plus a JSON trace file when enabled.
pub fn init_tracing(service: &str, verbose: bool, traces: &TraceSettings) -> Result<()> {
    let directive = format!(
        "{},{}",
        default_directive("startup_backfill", verbose),
        default_directive(&service.replace('-', "_"), verbose)
    );
    let make_env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    match build_trace_file_layer(service, traces)? {
        Some((writer, guard, path)) => {
            let subscriber = tracing_subscriber::registry()
                .with(make_env_filter())
                .with(fmt::layer().with_target(false).with_writer(io::stderr))
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_writer(writer)
                        .with_filter(LevelFilter::DEBUG),
                );
            let _ = TRACE_GUARD.set(guard);
            let _ = ACTIVE_TRACE_FILE.set(path);
            install_subscriber(subscriber)?;
        }
        None => {
            let subscriber = tracing_subscriber::registry()
                .with(make_env_filter())
                .with(fmt::layer().with_target(false).with_writer(io::stderr));
            install_subscriber(subscriber)?;
        }
    }

    Ok(())
}

/// Trace file written by the current process, if trace export is enabled.
pub fn current_trace_file() -> Option<&'static PathBuf> {
    ACTIVE_TRACE_FILE.get()
}

fn build_trace_file_layer(
    service: &str,
    settings: &TraceSettings,
) -> Result<Option<(NonBlocking, WorkerGuard, PathBuf)>> {
    if !settings.enabled {
        return Ok(None);
    }

    let directory = resolve_trace_directory(settings)?;
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create trace directory {}", directory.display()))?;

    let (file, path) = create_trace_file(service, &directory)?;
    prune_old_traces(&directory, settings.max_files, &path)?;

    let (writer, guard) = tracing_appender::non_blocking(file);
    Ok(Some((writer, guard, path)))
}

fn resolve_trace_directory(settings: &TraceSettings) -> Result<PathBuf> {
    if let Some(dir) = &settings.directory {
        return Ok(dir.clone());
    }
    Ok(project_dirs()?.cache_dir().join("traces"))
}

fn create_trace_file(service: &str, directory: &Path) -> Result<(fs::File, PathBuf)> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut candidate = directory.join(format!("{service}-{timestamp}{TRACE_SUFFIX}"));
    let mut counter = 0;
    while candidate.exists() {
        counter += 1;
        candidate = directory.join(format!("{service}-{timestamp}-{counter}{TRACE_SUFFIX}"));
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&candidate)
        .with_context(|| format!("Failed to open trace file {}", candidate.display()))?;
    Ok((file, candidate))
}

/// Keep at most `max_files` trace files in `directory`, counting `keep`.
fn prune_old_traces(directory: &Path, max_files: usize, keep: &Path) -> Result<()> {
    if max_files == 0 {
        return Ok(());
    }

    let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(directory)
        .with_context(|| format!("Failed to read trace directory {}", directory.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path == keep || !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
            continue;
        };
        if !name.ends_with(TRACE_SUFFIX) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|metadata| metadata.modified()) else {
            continue;
        };
        entries.push((modified, path));
    }

    entries.sort_by_key(|(modified, _)| Reverse(*modified));

    let retain = max_files.saturating_sub(1);
    for (_, path) in entries.into_iter().skip(retain) {
        let _ = fs::remove_file(&path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_directive_tracks_verbosity() {
        assert_eq!(default_directive("startup_backfill", false), "startup_backfill=info");
        assert_eq!(default_directive("startup_backfill", true), "startup_backfill=debug");
    }

    #[test]
    fn disabled_traces_create_nothing() {
        let dir = tempdir().expect("tempdir");
        let settings = TraceSettings {
            enabled: false,
            directory: Some(dir.path().join("traces")),
            max_files: 3,
        };
        assert!(build_trace_file_layer("backfill", &settings).expect("layer").is_none());
        assert!(!dir.path().join("traces").exists());
    }

    #[test]
    fn prune_keeps_newest_files() {
        let dir = tempdir().expect("tempdir");
        for name in ["a", "b", "c", "d"] {
            fs::write(dir.path().join(format!("backfill-{name}{TRACE_SUFFIX}")), b"{}").expect("write");
        }
        fs::write(dir.path().join("unrelated.log"), b"x").expect("write");
        let keep = dir.path().join(format!("backfill-d{TRACE_SUFFIX}"));

        prune_old_traces(dir.path(), 2, &keep).expect("prune");

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(remaining.contains(&"unrelated.log".to_string()));
        assert!(remaining.contains(&format!("backfill-d{TRACE_SUFFIX}")));
        let traces = remaining.iter().filter(|name| name.ends_with(TRACE_SUFFIX)).count();
        assert_eq!(traces, 2);
    }

    #[test]
    fn trace_file_names_are_unique() {
        let dir = tempdir().expect("tempdir");
        let (_, first) = create_trace_file("backfill", dir.path()).expect("first");
        let (_, second) = create_trace_file("backfill", dir.path()).expect("second");
        assert_ne!(first, second);
        assert!(first.to_string_lossy().ends_with(TRACE_SUFFIX));
    }
}
