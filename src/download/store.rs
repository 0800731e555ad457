//! Directory-backed destination store with staged, atomically published writes.
//!
//! Bodies are streamed into `<root>/.partial/<nonce>.part` and only renamed
//! into `<root>/<name>` once complete and fingerprinted, so a crash or a
//! cancelled attempt never leaves a truncated artifact under its final name.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::FetchError;
use super::constants::STAGING_DIR_NAME;
use super::filename::{resolve_unique_path, sanitize_filename};

/// Destination store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    staging: PathBuf,
    reserved: Vec<String>,
}

impl ArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// Staging files left behind by an earlier, interrupted run are removed
    /// here, once per store. Batches sharing the store never touch each
    /// other's staging files.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the root or staging directory cannot be
    /// created or listed.
    #[instrument(level = "debug", skip(root), fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, FetchError> {
        let root = root.as_ref().to_path_buf();
        let staging = root.join(STAGING_DIR_NAME);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| FetchError::io(staging.clone(), e))?;
        let store = Self {
            root,
            staging,
            reserved: Vec::new(),
        };
        store.clear_staging().await?;
        Ok(store)
    }

    /// Keeps artifacts off `name`; a body suggesting it is published as `name_2`, ...
    #[must_use]
    pub fn reserve_name(mut self, name: &str) -> Self {
        self.reserved.push(sanitize_filename(name));
        self
    }

    /// Checks that the staging area still exists.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the staging directory is gone or not a directory.
    pub async fn check_ready(&self) -> Result<(), FetchError> {
        let metadata = tokio::fs::metadata(&self.staging)
            .await
            .map_err(|e| FetchError::io(self.staging.clone(), e))?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(FetchError::io(
                self.staging.clone(),
                std::io::Error::other("staging path is not a directory"),
            ))
        }
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding in-progress bodies.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Creates a fresh staging file.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the file cannot be created.
    pub async fn stage(&self) -> Result<StagedFile, FetchError> {
        loop {
            let nonce: u64 = rand::random();
            let path = self.staging.join(format!("{nonce:016x}.part"));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    return Ok(StagedFile {
                        path,
                        writer: Some(BufWriter::new(file)),
                        bytes: 0,
                        armed: true,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(FetchError::io(path, e)),
            }
        }
    }

    /// Moves a complete staged body to a collision-free path derived from `name`.
    ///
    /// Callers serialize publishes (the dedup index holds its lock around this
    /// call), so the chosen name cannot be claimed between resolve and rename.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] when flushing or renaming fails; the staged
    /// file is removed in that case.
    pub async fn publish(&self, mut staged: StagedFile, name: &str) -> Result<PathBuf, FetchError> {
        if let Err(e) = staged.finish().await {
            self.discard(staged).await;
            return Err(e);
        }
        let destination = resolve_unique_path(&self.root, name, &self.reserved).await;
        if let Err(e) = tokio::fs::rename(&staged.path, &destination).await {
            self.discard(staged).await;
            return Err(FetchError::io(destination, e));
        }
        staged.armed = false;
        debug!(
            destination = %destination.display(),
            bytes = staged.bytes,
            "published artifact"
        );
        Ok(destination)
    }

    /// Drops a staged body.
    pub async fn discard(&self, mut staged: StagedFile) {
        staged.writer.take();
        if let Err(e) = tokio::fs::remove_file(&staged.path).await {
            debug!(path = %staged.path.display(), error = %e, "failed to remove staged file");
        }
        staged.armed = false;
    }

    async fn clear_staging(&self) -> Result<usize, FetchError> {
        let mut entries = tokio::fs::read_dir(&self.staging)
            .await
            .map_err(|e| FetchError::io(self.staging.clone(), e))?;
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::io(self.staging.clone(), e))?
        {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "stale staging file not removed"),
            }
        }
        if removed > 0 {
            debug!(removed, "cleared stale staging files");
        }
        Ok(removed)
    }
}

/// A body being written to the staging area.
///
/// Dropping an unpublished staged file deletes it.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes: u64,
    armed: bool,
}

impl StagedFile {
    /// Staging path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Appends one chunk.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] on write failure or after [`finish`](Self::finish).
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(FetchError::io(
                self.path.clone(),
                std::io::Error::other("staged file already finished"),
            ));
        };
        writer
            .write_all(chunk)
            .await
            .map_err(|e| FetchError::io(self.path.clone(), e))?;
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and closes the file. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if flushing fails.
    pub async fn finish(&mut self) -> Result<(), FetchError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .await
                .map_err(|e| FetchError::io(self.path.clone(), e))?;
            writer
                .get_mut()
                .sync_all()
                .await
                .map_err(|e| FetchError::io(self.path.clone(), e))?;
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    // Only reached when an attempt future is dropped mid-flight; every other
    // path goes through `ArtifactStore::discard`.
    fn drop(&mut self) {
        if self.armed {
            self.writer.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
