//! Filesystem resources owned by a single run. Both guards should be released with `close`, which
//! removes what they own without blocking the runtime. If a guard is dropped without being closed
//! (early return, panic, cancelled future) `Drop` removes it synchronously instead.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn log_removal(what: &str, path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(_) => debug!(path = %path.display(), "Removed {what}"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove {what}"),
    }
}

/// The downloaded archive of a run.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    closed: bool,
}

impl ScratchFile {
    /// Takes ownership of `path`. Nothing is created; whoever writes the file must do so only
    /// after the guard exists so that partial writes are cleaned up too.
    pub fn claim(path: PathBuf) -> Self {
        Self {
            path,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(mut self) {
        let result = tokio::fs::remove_file(&self.path).await;
        log_removal("scratch file", &self.path, result);
        self.closed = true;
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.closed {
            log_removal("scratch file", &self.path, std::fs::remove_file(&self.path));
        }
    }
}

/// The directory a run's archive is extracted into.
#[derive(Debug)]
pub struct WorkingArea {
    path: PathBuf,
    closed: bool,
}

impl WorkingArea {
    /// Creates the directory. Leftovers from an earlier delivery of the same event are removed
    /// first so the build never sees stale files.
    pub async fn create(path: PathBuf) -> std::io::Result<Self> {
        // Guard first: if creation fails halfway the partial directory is still removed.
        let area = Self {
            path,
            closed: false,
        };

        match tokio::fs::remove_dir_all(&area.path).await {
            Ok(_) => debug!(path = %area.path.display(), "Removed stale working area"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        tokio::fs::create_dir_all(&area.path).await?;

        Ok(area)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory on a blocking thread; extracted trees can be large.
    pub async fn close(mut self) {
        let result = tokio::fs::remove_dir_all(&self.path).await;
        log_removal("working area", &self.path, result);
        self.closed = true;
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if !self.closed {
            log_removal("working area", &self.path, std::fs::remove_dir_all(&self.path));
        }
    }
}
