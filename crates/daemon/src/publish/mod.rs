use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};

use common::store::{DriveError, ListOptions, StoreKey};

use crate::lifecycle::{LifecycleError, Orchestrator};

mod directory;
mod locks;

pub use directory::{collect_files, SourceFile};
pub use locks::{KeyGuard, KeyLocks};

/// Glob used when publishing a directory without one
pub const DEFAULT_GLOB: &str = "**/*";
/// Files read and written at once by [`Publisher::put_directory`]
const PUT_CONCURRENCY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("source directory {0:?} does not exist")]
    SourceMissing(PathBuf),
    #[error("invalid glob: {0}")]
    Glob(#[from] ignore::Error),
    #[error("failed to walk source directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("publish task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What [`Publisher::put_blob`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// The stored bytes were already identical
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEntry {
    pub key: StoreKey,
    pub outcome: PutOutcome,
}

/// Diff-aware writes into the lifecycle's drive
///
/// Every operation waits for the lifecycle to become ready and fails if
/// it never does. Writes to the same key are serialized, so the compare
/// and the write of one `put_blob` never interleave with another's.
#[derive(Debug, Clone)]
pub struct Publisher {
    orchestrator: Orchestrator,
    locks: KeyLocks,
}

impl Publisher {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            locks: KeyLocks::new(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Write `blob` under `key` unless the stored bytes are identical
    pub async fn put_blob(
        &self,
        key: impl Into<StoreKey>,
        blob: impl Into<Bytes>,
    ) -> Result<PutOutcome, PublishError> {
        let key = key.into();
        let blob = blob.into();
        let drive = self.orchestrator.drive().await?;

        let _guard = self.locks.lock(&key).await;
        if drive.get(&key).await?.as_ref() == Some(&blob) {
            tracing::debug!(key = %key, "unchanged, skipping write");
            return Ok(PutOutcome::Unchanged);
        }
        let seq = drive.put(&key, blob).await?;
        tracing::debug!(key = %key, seq, "wrote blob");
        Ok(PutOutcome::Written)
    }

    /// Publish every file under `source` matching `glob` below `prefix`.
    ///  Puts run concurrently; the first failure is returned once all have
    ///  settled, and nothing already written is rolled back.
    pub async fn put_directory(
        &self,
        prefix: &StoreKey,
        source: impl AsRef<Path>,
        glob: &str,
    ) -> Result<Vec<PublishedEntry>, PublishError> {
        let source = source.as_ref().to_path_buf();
        let files = {
            let source = source.clone();
            let glob = glob.to_string();
            tokio::task::spawn_blocking(move || collect_files(&source, &glob)).await??
        };
        tracing::info!(source = ?source, prefix = %prefix, files = files.len(), "publishing directory");

        let results: Vec<Result<PublishedEntry, PublishError>> = stream::iter(files)
            .map(|file| async move {
                let blob = tokio::fs::read(&file.path)
                    .await
                    .map_err(|source| PublishError::Read {
                        path: file.path.clone(),
                        source,
                    })?;
                let key = prefix.join(&file.relative);
                let outcome = self.put_blob(key.clone(), blob).await?;
                Ok(PublishedEntry { key, outcome })
            })
            .buffer_unordered(PUT_CONCURRENCY)
            .collect()
            .await;

        let mut published = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(entry) => published.push(entry),
                Err(e) => {
                    tracing::warn!("failed to publish file: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        published.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(published)
    }

    /// Delete every key below `prefix`, returning them in listing order
    pub async fn delete(
        &self,
        prefix: &StoreKey,
        recursive: bool,
    ) -> Result<Vec<StoreKey>, PublishError> {
        let drive = self.orchestrator.drive().await?;
        let keys: Vec<StoreKey> = drive
            .list(prefix, ListOptions { recursive })
            .map_ok(|entry| entry.key)
            .try_collect()
            .await?;

        for key in &keys {
            let _guard = self.locks.lock(key).await;
            drive.del(key).await?;
        }
        tracing::info!(prefix = %prefix, deleted = keys.len(), "deleted keys");
        Ok(keys)
    }
}
