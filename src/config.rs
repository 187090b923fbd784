use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NIGHTLY_URL_TEMPLATE: &str = "https://firefox-ci-tc.services.mozilla.com/api/index/v1/task/mobile.v2.fenix.nightly.{date}.latest.{arch}/artifacts/public%2Fbuild%2F{arch}%2Ftarget.apk";
pub const DEFAULT_OUTPUT_DIR: &str = "backfill_output";
pub const DEFAULT_MEASURE_SCRIPT: &str = "./measure_start_up.py";
pub const DEFAULT_TEST_NAME: &str = "cold_view_nav_start";
pub const DEFAULT_GIT_REMOTE: &str = "upstream";
pub const DEFAULT_GRADLE_WRAPPER: &str = "./gradlew";

/// Release channels that can be backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseChannel {
    Nightly,
    Beta,
    Release,
    Debug,
}

impl ReleaseChannel {
    /// Application id installed on the device for this channel.
    pub fn default_package_id(&self) -> &'static str {
        match self {
            ReleaseChannel::Nightly => "org.mozilla.fenix",
            ReleaseChannel::Beta => "org.mozilla.firefox.beta",
            ReleaseChannel::Release => "org.mozilla.firefox",
            ReleaseChannel::Debug => "org.mozilla.fenix.debug",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseChannel::Nightly => "nightly",
            ReleaseChannel::Beta => "beta",
            ReleaseChannel::Release => "release",
            ReleaseChannel::Debug => "debug",
        }
    }

    /// Gradle task assembling this channel's variant, e.g. `assembleNightly`.
    pub fn assemble_task(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => format!("assemble{}{}", first.to_ascii_uppercase(), chars.as_str()),
            None => "assemble".into(),
        }
    }
}

impl std::fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device ABI of the artifact being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Architecture {
    #[serde(rename = "armeabi-v7a")]
    #[value(name = "armeabi-v7a")]
    ArmeabiV7a,
    #[serde(rename = "arm64-v8a")]
    #[value(name = "arm64-v8a")]
    Arm64V8a,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::ArmeabiV7a => "armeabi-v7a",
            Architecture::Arm64V8a => "arm64-v8a",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where build artifacts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum BuildSource {
    /// Dated nightlies published to the CI artifact index.
    #[serde(rename = "taskclusterNightly")]
    #[value(name = "taskclusterNightly")]
    TaskclusterNightly,
    /// Every commit between two commits, built locally.
    #[serde(rename = "commitsRange")]
    #[value(name = "commitsRange")]
    CommitsRange,
}

impl std::fmt::Display for BuildSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildSource::TaskclusterNightly => write!(f, "taskclusterNightly"),
            BuildSource::CommitsRange => write!(f, "commitsRange"),
        }
    }
}

/// User configuration for backfill runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSettings {
    /// Download URL for a dated nightly; `{date}` and `{arch}` are substituted.
    #[serde(default = "default_nightly_url_template")]
    pub nightly_url_template: String,
    /// Directory receiving durations and statistics files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory downloaded and built artifacts are placed in.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_measure_script")]
    pub measure_script: PathBuf,
    #[serde(default = "default_test_name")]
    pub test_name: String,
    #[serde(default = "default_git_remote")]
    pub git_remote: String,
    /// Gradle wrapper, relative to the repository under test.
    #[serde(default = "default_gradle_wrapper")]
    pub gradle_wrapper: PathBuf,
    /// Serial of the target device when several are attached.
    #[serde(default)]
    pub device_serial: Option<String>,
    /// Per-channel application id overrides.
    #[serde(default)]
    pub package_ids: BTreeMap<ReleaseChannel, String>,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub traces: TraceSettings,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            nightly_url_template: default_nightly_url_template(),
            output_dir: default_output_dir(),
            artifact_dir: default_artifact_dir(),
            measure_script: default_measure_script(),
            test_name: default_test_name(),
            git_remote: default_git_remote(),
            gradle_wrapper: default_gradle_wrapper(),
            device_serial: None,
            package_ids: BTreeMap::new(),
            tools: ToolSettings::default(),
            http: HttpSettings::default(),
            traces: TraceSettings::default(),
        }
    }
}

fn default_nightly_url_template() -> String {
    DEFAULT_NIGHTLY_URL_TEMPLATE.into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_measure_script() -> PathBuf {
    PathBuf::from(DEFAULT_MEASURE_SCRIPT)
}

fn default_test_name() -> String {
    DEFAULT_TEST_NAME.into()
}

fn default_git_remote() -> String {
    DEFAULT_GIT_REMOTE.into()
}

fn default_gradle_wrapper() -> PathBuf {
    PathBuf::from(DEFAULT_GRADLE_WRAPPER)
}

impl BackfillSettings {
    /// Load settings from `path`, writing the defaults there if it does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config at {}", path.display()))?;
            let parsed: Self = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed config at {}", path.display()))?;
            Ok(parsed)
        } else {
            let settings = Self::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }
        let serialised = serde_json::to_string_pretty(self)?;
        fs::write(path, serialised)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Application id for `channel`, honouring configured overrides.
    pub fn package_id(&self, channel: ReleaseChannel) -> &str {
        self.package_ids
            .get(&channel)
            .map(String::as_str)
            .unwrap_or_else(|| channel.default_package_id())
    }

    /// Remote to fetch; blank values fall back to the configured default.
    pub fn resolve_remote<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        match requested.map(str::trim) {
            Some(remote) if !remote.is_empty() => remote,
            _ if !self.git_remote.trim().is_empty() => self.git_remote.trim(),
            _ => DEFAULT_GIT_REMOTE,
        }
    }
}

/// Explicit locations for the external programs the backfill drives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub adb: Option<PathBuf>,
    #[serde(default)]
    pub git: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    600
}

fn default_user_agent() -> String {
    format!("startup-backfill/{}", env!("CARGO_PKG_VERSION"))
}

/// JSON trace export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_trace_max_files")]
    pub max_files: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: None,
            max_files: default_trace_max_files(),
        }
    }
}

fn default_trace_max_files() -> usize {
    10
}

pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "mozilla", "startup-backfill")
        .context("Unable to resolve platform directories")
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.json"))
}
