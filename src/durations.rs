//! Parsing of startup durations files and aggregation into summary statistics.
//!
//! The measurement script writes one file per build. Two layouts are in use:
//! one sample per line, or comma separated samples. Both may carry blank lines
//! and `#` comments.

use std::{fmt::Write as _, fs, path::Path};

use anyhow::{Context, Result, bail};
use serde::Serialize;

/// Layout of a durations file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationsFormat {
    LinePerSample,
    CommaSeparated,
}

impl DurationsFormat {
    /// Guess the layout from the first line that carries data.
    pub fn detect(contents: &str) -> Self {
        let first = contents.lines().map(strip_comment).find(|line| !line.is_empty());
        match first {
            Some(line) if line.contains(',') => DurationsFormat::CommaSeparated,
            _ => DurationsFormat::LinePerSample,
        }
    }

    pub fn parse(&self, contents: &str) -> Result<Vec<f64>> {
        let mut samples = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = match self {
                DurationsFormat::LinePerSample => vec![line],
                DurationsFormat::CommaSeparated => line
                    .split(',')
                    .map(str::trim)
                    .filter(|field| !field.is_empty())
                    .collect(),
            };
            for field in fields {
                let value: f64 = field.parse().with_context(|| {
                    format!("line {}: '{field}' is not a duration", index + 1)
                })?;
                if !value.is_finite() || value < 0.0 {
                    bail!("line {}: '{field}' is not a valid duration", index + 1);
                }
                samples.push(value);
            }
        }
        Ok(samples)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.split_once('#') {
        Some((data, _)) => data.trim(),
        None => line.trim(),
    }
}

/// Read every sample in a durations file.
///
/// A missing file surfaces as an [`std::io::Error`] of kind `NotFound` in the
/// error chain so callers can tell it apart from malformed content.
pub fn read_durations(path: &Path) -> Result<Vec<f64>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Unable to read durations file {}", path.display()))?;
    DurationsFormat::detect(&contents)
        .parse(&contents)
        .with_context(|| format!("Malformed durations file {}", path.display()))
}

/// True when `err` was caused by a file that does not exist.
pub fn is_missing_file(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationStats {
    pub samples: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

pub fn to_stats(values: &[f64]) -> Option<DurationStats> {
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = count / 2;
    let median = if count % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let std_dev = if count > 1 {
        let variance = values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / (count - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Some(DurationStats {
        samples: count,
        mean,
        median,
        std_dev,
        min: sorted[0],
        max: sorted[count - 1],
    })
}

pub fn render_stats(stats: &DurationStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "samples: {}", stats.samples);
    let _ = writeln!(out, "mean: {:.2}", stats.mean);
    let _ = writeln!(out, "median: {:.2}", stats.median);
    let _ = writeln!(out, "std_dev: {:.2}", stats.std_dev);
    let _ = writeln!(out, "min: {:.2}", stats.min);
    let _ = writeln!(out, "max: {:.2}", stats.max);
    out
}

pub fn save_output(stats: &DurationStats, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, render_stats(stats))
        .with_context(|| format!("Failed to write statistics to {}", path.display()))
}

/// Read `durations_path`, aggregate it and write the report to `stats_path`.
pub fn analyze_file(durations_path: &Path, stats_path: &Path) -> Result<DurationStats> {
    let samples = read_durations(durations_path)?;
    let Some(stats) = to_stats(&samples) else {
        bail!("durations file {} has no samples", durations_path.display());
    };
    save_output(&stats, stats_path)?;
    Ok(stats)
}
