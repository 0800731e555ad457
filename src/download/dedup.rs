//! Content fingerprints and the per-batch deduplication index.
//!
//! The index maps a SHA-256 fingerprint to the destination where that content
//! was first published. Check-and-publish happens under one async mutex so two
//! workers holding identical bodies can never both publish.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::FetchError;
use super::store::{ArtifactStore, StagedFile};

/// SHA-256 of a complete body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprints an in-memory body.
    #[must_use]
    pub fn of(body: &[u8]) -> Self {
        Self(Sha256::digest(body).into())
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Incremental fingerprinting for streamed bodies.
#[derive(Debug, Clone, Default)]
pub struct FingerprintHasher {
    inner: Sha256,
}

impl FingerprintHasher {
    /// Starts an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one body chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Completes the digest.
    #[must_use]
    pub fn finalize(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}

/// Result of offering a staged body to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Content was new and is now published at this path.
    Published(PathBuf),
    /// Content was already published at this path; the staged body was dropped.
    Duplicate(PathBuf),
}

/// Fingerprint to first-seen destination map shared by all workers of a batch.
#[derive(Debug, Default)]
pub struct DedupIndex {
    entries: Mutex<HashMap<Fingerprint, PathBuf>>,
}

impl DedupIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `staged` if `fingerprint` is unseen, otherwise discards it.
    ///
    /// The membership check, the rename into the store and the insert are one
    /// critical section. A failed publish leaves the index unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] when publishing into the store fails.
    pub async fn admit(
        &self,
        fingerprint: Fingerprint,
        staged: StagedFile,
        store: &ArtifactStore,
        suggested_name: &str,
    ) -> Result<Admission, FetchError> {
        let mut entries = self.entries.lock().await;

        if let Some(first) = entries.get(&fingerprint).cloned() {
            drop(entries);
            debug!(%fingerprint, first = %first.display(), "duplicate content");
            store.discard(staged).await;
            return Ok(Admission::Duplicate(first));
        }

        let destination = store.publish(staged, suggested_name).await?;
        entries.insert(fingerprint, destination.clone());
        Ok(Admission::Published(destination))
    }

    /// Where content with this fingerprint was first published, if anywhere.
    pub async fn first_seen(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        self.entries.lock().await.get(fingerprint).cloned()
    }

    /// Number of distinct fingerprints recorded.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns true when nothing has been published yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
