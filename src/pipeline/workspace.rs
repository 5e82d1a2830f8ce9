//! Per-request scratch directories.
//!
//! Every backend needs real paths: FreeCAD opens the input by name and the
//! container sees the host directory through a bind mount. A [`Workspace`]
//! wraps a [`tempfile::TempDir`] created with a random suffix, so concurrent
//! requests never share a directory, and the tree is deleted when the handle
//! is released or dropped. Dropping covers early `?` returns, panics, and a
//! cancelled `convert` future alike.

use crate::error::ConvertError;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// An exclusively owned temporary directory for one conversion request.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root` (or the system
    /// temp dir when `None`).
    ///
    /// Failure is fatal for the request and is not retried.
    pub fn acquire(root: Option<&Path>, prefix: &str) -> Result<Self, ConvertError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| ConvertError::Workspace {
            context: "failed to create temporary directory".to_string(),
            source: e,
        })?;

        let path = dir.path().to_path_buf();
        debug!("Acquired workspace {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `filename` inside the workspace.
    pub fn join(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Write the uploaded bytes into the workspace.
    pub async fn stage(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ConvertError> {
        self.write_file(filename, bytes)
            .await
            .map_err(|e| ConvertError::Workspace {
                context: format!("failed to stage input '{filename}'"),
                source: e,
            })
    }

    /// Write an arbitrary file into the workspace and return its path.
    pub async fn write_file(&self, filename: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.join(filename);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Delete one file, ignoring a file that is already gone.
    pub async fn remove_file(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }

    /// Recursively delete the workspace.
    ///
    /// The tree can hold a large upload and its mesh, so the removal runs on
    /// the blocking pool. Never fails: a directory that has already vanished
    /// is fine, and any other error is logged.
    pub async fn release(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(closed) => log_removal(&path, closed),
            // The TempDir was dropped with the task, which still removes it.
            Err(e) => warn!("Workspace removal task for {} failed: {}", path.display(), e),
        }
    }

    /// Synchronous fallback for paths that never reach `release`.
    fn cleanup(&mut self) {
        if let Some(dir) = self.dir.take() {
            log_removal(&self.path, dir.close());
        }
    }
}

fn log_removal(path: &Path, closed: io::Result<()>) {
    match closed {
        Ok(()) => debug!("Released workspace {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Workspace {} was already gone", path.display())
        }
        Err(e) => warn!("Failed to remove workspace {}: {}", path.display(), e),
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}
