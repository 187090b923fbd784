use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::Architecture;

/// One artifact to measure, produced by the nightly download or commit build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    /// Local path of the installable artifact.
    pub name: PathBuf,
    pub date: Option<NaiveDate>,
    pub commit: Option<String>,
    pub architecture: Architecture,
}

impl BuildDescriptor {
    pub fn from_nightly(name: PathBuf, date: NaiveDate, architecture: Architecture) -> Self {
        Self {
            name,
            date: Some(date),
            commit: None,
            architecture,
        }
    }

    pub fn from_commit(name: PathBuf, commit: String, architecture: Architecture) -> Self {
        Self {
            name,
            date: None,
            commit: Some(commit),
            architecture,
        }
    }

    pub fn path(&self) -> &Path {
        &self.name
    }

    /// File name up to its first `.`, used to name per-build output files.
    pub fn apk_stem(&self) -> String {
        let file_name = self
            .name
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match file_name.split_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => file_name,
        }
    }

    pub fn label(&self) -> String {
        match (&self.date, &self.commit) {
            (Some(date), _) => date.to_string(),
            (None, Some(commit)) => commit.clone(),
            (None, None) => self.name.display().to_string(),
        }
    }
}
