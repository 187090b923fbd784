use std::{fs, io::ErrorKind};

use tracing::{debug, warn};

use crate::descriptor::BuildDescriptor;
use crate::journal::{Journal, RunPhase, Subject};

/// Delete the local artifact of every build. Returns how many files were removed.
pub fn remove_artifacts(builds: &[BuildDescriptor], journal: &Journal) -> usize {
    let mut removed = 0;
    for build in builds {
        match fs::remove_file(&build.name) {
            Ok(()) => {
                debug!(path = %build.name.display(), "removed artifact");
                journal.note(RunPhase::Cleaned, Subject::Build(build), None);
                removed += 1;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %build.name.display(), "artifact already gone");
            }
            Err(err) => {
                warn!(path = %build.name.display(), error = %err, "unable to remove artifact");
            }
        }
    }
    removed
}
