use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use reqwest::{StatusCode, blocking::Client};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{Architecture, HttpSettings};
use crate::dates::{format_nightly_date, nightly_file_name};
use crate::descriptor::BuildDescriptor;
use crate::journal::{Journal, RunPhase, Subject};

/// Result of asking the artifact store for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Saved { bytes: u64 },
    NotFound,
}

/// Transport used to pull nightly artifacts.
pub trait ArtifactHttp {
    /// Stream the body at `url` into `sink`.
    ///
    /// A 404 is `Ok(DownloadStatus::NotFound)`; any other non-success status is an error.
    fn download(&self, url: &Url, sink: &mut dyn Write) -> Result<DownloadStatus>;
}

pub struct BlockingArtifactHttp {
    client: Client,
}

impl BlockingArtifactHttp {
    pub fn from_settings(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("failed to build reqwest client for nightly downloads")?;
        Ok(Self { client })
    }
}

impl ArtifactHttp for BlockingArtifactHttp {
    fn download(&self, url: &Url, sink: &mut dyn Write) -> Result<DownloadStatus> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .with_context(|| format!("Failed to reach artifact store at {url}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(DownloadStatus::NotFound);
        }
        if !status.is_success() {
            bail!("artifact store returned status {status} for {url}");
        }
        let bytes = response
            .copy_to(sink)
            .with_context(|| format!("Failed to stream artifact body from {url}"))?;
        Ok(DownloadStatus::Saved { bytes })
    }
}

/// Downloads dated nightlies into a local artifact directory.
pub struct NightlyFetcher<'a, H: ArtifactHttp> {
    http: &'a H,
    url_template: String,
    artifact_dir: PathBuf,
    architecture: Architecture,
}

impl<'a, H: ArtifactHttp> NightlyFetcher<'a, H> {
    pub fn new(
        http: &'a H,
        url_template: impl Into<String>,
        artifact_dir: impl Into<PathBuf>,
        architecture: Architecture,
    ) -> Self {
        Self {
            http,
            url_template: url_template.into(),
            artifact_dir: artifact_dir.into(),
            architecture,
        }
    }

    pub fn url_for(&self, date: NaiveDate) -> Result<Url> {
        let rendered = self
            .url_template
            .replace("{date}", &format_nightly_date(date))
            .replace("{arch}", self.architecture.as_str());
        Url::parse(&rendered).with_context(|| format!("Invalid nightly URL {rendered}"))
    }

    pub fn destination_for(&self, date: NaiveDate) -> PathBuf {
        self.artifact_dir.join(nightly_file_name(date))
    }

    /// Download the nightly for `date`. `Ok(None)` when the store has no build for that day.
    pub fn fetch_nightly(&self, date: NaiveDate) -> Result<Option<BuildDescriptor>> {
        let url = self.url_for(date)?;
        let destination = self.destination_for(date);
        let partial = partial_path(&destination);

        if !self.artifact_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.artifact_dir).with_context(|| {
                format!(
                    "Failed to create artifact directory {}",
                    self.artifact_dir.display()
                )
            })?;
        }

        debug!(%url, path = %destination.display(), "downloading nightly");
        let mut file = File::create(&partial)
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let status = self
            .http
            .download(&url, &mut file)
            .and_then(|status| file.flush().map(|_| status).map_err(Into::into));
        drop(file);

        match status {
            Ok(DownloadStatus::Saved { bytes }) => {
                fs::rename(&partial, &destination).with_context(|| {
                    format!(
                        "Failed to move {} into place at {}",
                        partial.display(),
                        destination.display()
                    )
                })?;
                info!(%date, bytes, path = %destination.display(), "downloaded nightly");
                Ok(Some(BuildDescriptor::from_nightly(
                    destination,
                    date,
                    self.architecture,
                )))
            }
            Ok(DownloadStatus::NotFound) => {
                let _ = fs::remove_file(&partial);
                warn!(%date, %url, "the apk for this date is not available");
                Ok(None)
            }
            Err(err) => {
                let _ = fs::remove_file(&partial);
                Err(err.context(format!("Failed to download nightly for {date}")))
            }
        }
    }

    /// Fetch every date in order, skipping days without a nightly and reporting failures.
    pub fn download_range(&self, dates: &[NaiveDate], journal: &Journal) -> Vec<BuildDescriptor> {
        let mut builds = Vec::with_capacity(dates.len());
        for &date in dates {
            match self.fetch_nightly(date) {
                Ok(Some(build)) => {
                    journal.note(RunPhase::Fetched, Subject::Build(&build), None);
                    builds.push(build);
                }
                Ok(None) => journal.note(RunPhase::NotFound, Subject::Date(date), None),
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(%date, error = %message, "nightly download failed");
                    journal.note(RunPhase::FetchFailed, Subject::Date(date), Some(message));
                }
            }
        }
        builds
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::nightly::testing::{Canned, FakeHttp};
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
    }

    const TEMPLATE: &str = "https://ci.example/index/nightly.{date}.latest.{arch}/artifacts/public%2Fbuild%2F{arch}%2Ftarget.apk";

    #[test]
    fn url_substitutes_date_and_architecture() {
        let http = FakeHttp::default();
        let fetcher = NightlyFetcher::new(&http, TEMPLATE, "out", Architecture::Arm64V8a);
        let url = fetcher.url_for(day(5)).expect("url");
        assert_eq!(
            url.as_str(),
            "https://ci.example/index/nightly.2021.03.05.latest.arm64-v8a/artifacts/public%2Fbuild%2Farm64-v8a%2Ftarget.apk"
        );
    }

    #[test]
    fn saved_download_produces_descriptor() {
        let dir = tempdir().expect("tempdir");
        let http = FakeHttp::default().with("2021.03.01", Canned::Body(b"apk-bytes"));
        let fetcher = NightlyFetcher::new(&http, TEMPLATE, dir.path(), Architecture::ArmeabiV7a);

        let build = fetcher.fetch_nightly(day(1)).expect("fetch").expect("found");
        assert_eq!(build.name, dir.path().join("nightly_2021_03_01.apk"));
        assert_eq!(build.date, Some(day(1)));
        assert_eq!(build.commit, None);
        assert_eq!(fs::read(&build.name).expect("read"), b"apk-bytes");
        assert!(!dir.path().join("nightly_2021_03_01.apk.part").exists());
    }

    #[test]
    fn not_found_yields_no_descriptor_and_no_file() {
        let dir = tempdir().expect("tempdir");
        let http = FakeHttp::default().with("2021.03.02", Canned::NotFound);
        let fetcher = NightlyFetcher::new(&http, TEMPLATE, dir.path(), Architecture::ArmeabiV7a);

        assert!(fetcher.fetch_nightly(day(2)).expect("fetch").is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn other_failures_propagate_and_clean_partial_file() {
        let dir = tempdir().expect("tempdir");
        let http = FakeHttp::default().with("2021.03.03", Canned::Fail("status 500"));
        let fetcher = NightlyFetcher::new(&http, TEMPLATE, dir.path(), Architecture::ArmeabiV7a);

        let err = fetcher.fetch_nightly(day(3)).unwrap_err();
        assert!(format!("{err:#}").contains("status 500"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn range_skips_missing_days_and_keeps_going() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::in_dir(&dir.path().join("out"));
        let http = FakeHttp::default()
            .with("2021.03.01", Canned::Body(b"one"))
            .with("2021.03.02", Canned::NotFound)
            .with("2021.03.03", Canned::Fail("connection reset"))
            .with("2021.03.04", Canned::Body(b"four"));
        let fetcher = NightlyFetcher::new(
            &http,
            TEMPLATE,
            dir.path().join("apks"),
            Architecture::ArmeabiV7a,
        );

        let dates = crate::dates::date_range(day(1), day(4));
        let builds = fetcher.download_range(&dates, &journal);

        assert_eq!(http.requested.borrow().len(), 4);
        let found: Vec<_> = builds.iter().filter_map(|b| b.date).collect();
        assert_eq!(found, vec![day(1), day(4)]);

        let phases: Vec<_> = journal
            .read_events(10)
            .expect("journal")
            .into_iter()
            .map(|event| event.phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                RunPhase::Fetched,
                RunPhase::NotFound,
                RunPhase::FetchFailed,
                RunPhase::Fetched
            ]
        );
    }
}
