use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::process::{CommandSpec, ProcessRunner};

pub const ADB_ENV_VAR: &str = "BACKFILL_ADB_BINARY";

/// Installs and removes packages on the attached device through `adb`.
pub struct DeviceBridge<'a, R: ProcessRunner> {
    runner: &'a R,
    adb: PathBuf,
    serial: Option<String>,
}

impl<'a, R: ProcessRunner> DeviceBridge<'a, R> {
    pub fn new(runner: &'a R, adb: impl Into<PathBuf>, serial: Option<String>) -> Self {
        Self {
            runner,
            adb: adb.into(),
            serial: serial.filter(|value| !value.trim().is_empty()),
        }
    }

    fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.adb);
        match &self.serial {
            Some(serial) => spec.args(["-s", serial.as_str()]),
            None => spec,
        }
    }

    /// Remove `package_id` from the device. Failures are logged and otherwise ignored.
    pub fn uninstall(&self, package_id: &str) {
        let spec = self.command().args(["uninstall", package_id]);
        match self.runner.run(&spec) {
            Ok(output) if output.success => debug!(package = package_id, "uninstalled package"),
            Ok(output) => warn!(
                package = package_id,
                error = %output.error_message(),
                "unable to uninstall package"
            ),
            Err(err) => warn!(package = package_id, error = %format!("{err:#}"), "unable to uninstall package"),
        }
    }

    /// Install the artifact at `apk`. Returns `false` (after logging) when the bridge rejects it.
    pub fn install(&self, apk: &Path) -> bool {
        let spec = self
            .command()
            .arg("install")
            .arg(apk.to_string_lossy().into_owned());
        match self.runner.run(&spec) {
            Ok(output) if output.success => {
                debug!(apk = %apk.display(), "installed artifact");
                true
            }
            Ok(output) => {
                error!(apk = %apk.display(), error = %output.error_message(), "unable to install artifact");
                false
            }
            Err(err) => {
                error!(apk = %apk.display(), error = %format!("{err:#}"), "unable to install artifact");
                false
            }
        }
    }
}
