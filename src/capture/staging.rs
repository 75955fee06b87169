use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::ResultExt;

/// Attempts at a unique staged name before giving up
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Fallback when a download reports no usable filename
const FALLBACK_FILENAME: &str = "download";

/// The private directory captured downloads are written into
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve `<dir>/<timestamp_nanos>_<filename>` for a new download.
    ///
    /// The file is created empty with `create_new`, so two sessions can never
    /// share a path. On a collision a `-N` suffix is added to the timestamp.
    pub fn stage(&self, filename: &str) -> io::Result<StagedFile> {
        fs::create_dir_all(&self.dir)?;

        let name = sanitize_filename(filename);
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                format!("{}_{}", stamp, name)
            } else {
                format!("{}-{}_{}", stamp, attempt, name)
            };
            let path = self.dir.join(candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), "Staged download");
                    return Ok(StagedFile {
                        path,
                        removed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free staging name for {}", name),
        ))
    }
}

/// Final path component only, so a hostile filename cannot escape the
/// staging directory
fn sanitize_filename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

/// A staged download file owned by exactly one capture session.
///
/// Removed by [`StagedFile::remove`] or, failing that, on drop. Removal
/// failures are logged and never propagated.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    removed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Delete the staged file. Runs at most once; later calls do nothing.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Staged file already gone");
            }
            result => {
                if result.warn_on_err().is_some() {
                    debug!(path = %self.path.display(), "Removed staged file");
                }
            }
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.removed {
            info!(path = %self.path.display(), "Removing staged file of abandoned session");
            self.remove();
        }
    }
}
