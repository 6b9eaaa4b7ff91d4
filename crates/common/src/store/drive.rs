use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::key::StoreKey;
use super::log::{LogEntry, LogError, LogOp, LogStorage, MAX_ENTRY_SIZE};
use crate::crypto::{DriveIdentity, SecretKey};

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("drive log error: {0}")]
    Log(#[from] LogError),
    /// We hold no secret for this drive, so cannot sign new entries
    #[error("drive {0} is not writable")]
    ReadOnly(DriveIdentity),
    #[error("invalid key for a blob: {0}")]
    InvalidKey(StoreKey),
    /// The blob would not fit in a single log entry
    #[error("write of {size} bytes exceeds the {limit} byte entry limit")]
    TooLarge { size: u64, limit: usize },
    #[error("drive log entry {seq} failed verification: {source}")]
    Corrupt { seq: u64, source: LogError },
    #[error("drive is closed")]
    Closed,
}

/// Options for [`Drive::list`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// Include keys in nested folders, not only direct children
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }

    pub fn shallow() -> Self {
        Self { recursive: false }
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self::recursive()
    }
}

/// A listed blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: StoreKey,
    /// Sequence number of the log entry that last wrote the blob
    pub seq: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
struct IndexedBlob {
    seq: u64,
    blob: Bytes,
}

#[derive(Debug, Default)]
struct DriveIndex {
    blobs: BTreeMap<StoreKey, IndexedBlob>,
    length: u64,
}

impl DriveIndex {
    fn apply(&mut self, entry: &LogEntry) {
        match &entry.op {
            LogOp::Put { key, blob } => {
                self.blobs.insert(
                    key.clone(),
                    IndexedBlob {
                        seq: entry.seq,
                        blob: blob.clone(),
                    },
                );
            }
            LogOp::Del { key } => {
                self.blobs.remove(key);
            }
        }
        self.length = entry.seq + 1;
    }
}

/// Key/value view over one append-only log
///
/// Cheap to clone; every clone is the same drive. Reads are served from an
/// in-memory index rebuilt from the log on open. Writes are signed with
/// the drive's secret, appended to the log one at a time, and only then
/// made visible to readers.
#[derive(Clone)]
pub struct Drive {
    inner: Arc<DriveInner>,
}

struct DriveInner {
    key: DriveIdentity,
    secret: Option<SecretKey>,
    log: Arc<dyn LogStorage>,
    index: RwLock<DriveIndex>,
    append_lock: Mutex<()>,
    closed: AtomicBool,
}

impl fmt::Debug for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drive")
            .field("key", &self.inner.key.to_hex())
            .field("writable", &self.writable())
            .field("version", &self.version())
            .finish()
    }
}

impl Drive {
    /// Open a drive over `log`, replaying and verifying every entry.
    ///  Pass the drive's secret to make it writable.
    pub async fn open(
        key: DriveIdentity,
        secret: Option<SecretKey>,
        log: Arc<dyn LogStorage>,
    ) -> Result<Self, DriveError> {
        let secret = secret.filter(|secret| secret.public() == key);
        let mut index = DriveIndex::default();
        for entry in log.read_from(0).await? {
            entry.verify(&key).map_err(|source| DriveError::Corrupt {
                seq: entry.seq,
                source,
            })?;
            index.apply(&entry);
        }
        tracing::debug!(
            drive = %key,
            entries = index.length,
            blobs = index.blobs.len(),
            writable = secret.is_some(),
            "drive opened"
        );

        Ok(Self {
            inner: Arc::new(DriveInner {
                key,
                secret,
                log,
                index: RwLock::new(index),
                append_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn key(&self) -> &DriveIdentity {
        &self.inner.key
    }

    pub fn writable(&self) -> bool {
        self.inner.secret.is_some()
    }

    /// Number of entries in the drive's log, i.e. writes ever made
    pub fn version(&self) -> u64 {
        self.inner.index.read().length
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), DriveError> {
        if self.is_closed() {
            return Err(DriveError::Closed);
        }
        Ok(())
    }

    pub async fn get(&self, key: &StoreKey) -> Result<Option<Bytes>, DriveError> {
        self.check_open()?;
        Ok(self
            .inner
            .index
            .read()
            .blobs
            .get(key)
            .map(|indexed| indexed.blob.clone()))
    }

    /// Write `blob` under `key`, returning the sequence number of the entry
    pub async fn put(&self, key: &StoreKey, blob: Bytes) -> Result<u64, DriveError> {
        if key.is_root() {
            return Err(DriveError::InvalidKey(key.clone()));
        }
        if blob.len() > MAX_ENTRY_SIZE {
            return Err(DriveError::TooLarge {
                size: blob.len() as u64,
                limit: MAX_ENTRY_SIZE,
            });
        }
        self.append(LogOp::Put {
            key: key.clone(),
            blob,
        })
        .await
    }

    /// Remove `key`. Returns false, without writing, if it was absent.
    pub async fn del(&self, key: &StoreKey) -> Result<bool, DriveError> {
        self.check_open()?;
        if !self.inner.index.read().blobs.contains_key(key) {
            return Ok(false);
        }
        self.append(LogOp::Del { key: key.clone() }).await?;
        Ok(true)
    }

    async fn append(&self, op: LogOp) -> Result<u64, DriveError> {
        self.check_open()?;
        let secret = self
            .inner
            .secret
            .as_ref()
            .ok_or(DriveError::ReadOnly(self.inner.key))?;

        let _guard = self.inner.append_lock.lock().await;
        self.check_open()?;
        let seq = self.inner.index.read().length;
        let entry = LogEntry::signed(&self.inner.key, secret, seq, op)?;
        entry.check_size().map_err(|e| match e {
            LogError::TooLarge { size, limit } => DriveError::TooLarge { size, limit },
            e => DriveError::Log(e),
        })?;
        self.inner.log.append(&entry).await?;
        self.inner.index.write().apply(&entry);
        tracing::trace!(drive = %self.inner.key, seq, key = %entry.op.key(), "appended");
        Ok(seq)
    }

    /// Append entries signed elsewhere, typically fetched from a peer.
    ///  Each must verify against the drive's key and extend the log by
    ///  one. Returns the new version.
    pub async fn import(&self, entries: Vec<LogEntry>) -> Result<u64, DriveError> {
        self.check_open()?;
        let _guard = self.inner.append_lock.lock().await;
        self.check_open()?;
        for entry in entries {
            entry
                .verify(&self.inner.key)
                .map_err(|source| DriveError::Corrupt {
                    seq: entry.seq,
                    source,
                })?;
            self.inner.log.append(&entry).await?;
            self.inner.index.write().apply(&entry);
        }
        let version = self.version();
        tracing::debug!(drive = %self.inner.key, version, "imported entries");
        Ok(version)
    }

    /// Lazily list blobs below `prefix`, in key order
    pub fn list(
        &self,
        prefix: &StoreKey,
        options: ListOptions,
    ) -> BoxStream<'static, Result<Entry, DriveError>> {
        if let Err(e) = self.check_open() {
            return stream::once(async move { Err(e) }).boxed();
        }
        let entries: Vec<Entry> = self
            .inner
            .index
            .read()
            .blobs
            .range(prefix.clone()..)
            .skip_while(|(key, _)| *key == prefix)
            .take_while(|(key, _)| prefix.is_root() || key.as_str().starts_with(prefix.as_str()))
            .filter(|(key, _)| key.is_under(prefix, options.recursive))
            .map(|(key, indexed)| Entry {
                key: key.clone(),
                seq: indexed.seq,
                size: indexed.blob.len() as u64,
            })
            .collect();
        stream::iter(entries.into_iter().map(Ok)).boxed()
    }

    /// Raw log entries from `from` onwards, for replication
    pub async fn entries(&self, from: u64) -> Result<Vec<LogEntry>, DriveError> {
        self.check_open()?;
        Ok(self.inner.log.read_from(from).await?)
    }

    /// Close the drive and its log. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), DriveError> {
        let _guard = self.inner.append_lock.lock().await;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.log.close().await?;
        tracing::debug!(drive = %self.inner.key, "drive closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::store::log::MemoryLog;

    async fn writable_drive() -> Drive {
        let secret = SecretKey::generate();
        Drive::open(secret.public(), Some(secret), Arc::new(MemoryLog::new()))
            .await
            .unwrap()
    }

    async fn keys(drive: &Drive, prefix: &str, options: ListOptions) -> Vec<String> {
        drive
            .list(&StoreKey::new(prefix), options)
            .map_ok(|entry| entry.key.to_string())
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_del() {
        let drive = writable_drive().await;
        let key = StoreKey::new("/a.txt");

        assert_eq!(drive.get(&key).await.unwrap(), None);
        assert_eq!(drive.put(&key, Bytes::from("hi")).await.unwrap(), 0);
        assert_eq!(drive.get(&key).await.unwrap(), Some(Bytes::from("hi")));
        assert_eq!(drive.version(), 1);

        assert!(drive.del(&key).await.unwrap());
        assert_eq!(drive.get(&key).await.unwrap(), None);
        assert!(!drive.del(&key).await.unwrap());
        assert_eq!(drive.version(), 2);
    }

    #[tokio::test]
    async fn test_root_is_not_a_blob_key() {
        let drive = writable_drive().await;
        let result = drive.put(&StoreKey::root(), Bytes::from("x")).await;
        assert!(matches!(result, Err(DriveError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_list_prefixes() {
        let drive = writable_drive().await;
        for key in ["/a.txt", "/docs/b.txt", "/docs/deep/c.txt", "/docsets/d.txt", "/docs"] {
            drive.put(&StoreKey::new(key), Bytes::from(key)).await.unwrap();
        }

        assert_eq!(
            keys(&drive, "/", ListOptions::recursive()).await,
            vec!["/a.txt", "/docs", "/docs/b.txt", "/docs/deep/c.txt", "/docsets/d.txt"]
        );
        assert_eq!(
            keys(&drive, "/docs/", ListOptions::recursive()).await,
            vec!["/docs/b.txt", "/docs/deep/c.txt"]
        );
        assert_eq!(
            keys(&drive, "/docs", ListOptions::shallow()).await,
            vec!["/docs/b.txt"]
        );
        assert!(keys(&drive, "/missing", ListOptions::recursive())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_read_only_drive_rejects_writes() {
        let writer = writable_drive().await;
        writer
            .put(&StoreKey::new("/a"), Bytes::from("1"))
            .await
            .unwrap();
        let entries = writer.entries(0).await.unwrap();

        let log = Arc::new(MemoryLog::new());
        for entry in &entries {
            log.append(entry).await.unwrap();
        }
        let reader = Drive::open(*writer.key(), None, log).await.unwrap();

        assert!(!reader.writable());
        assert_eq!(
            reader.get(&StoreKey::new("/a")).await.unwrap(),
            Some(Bytes::from("1"))
        );
        let result = reader.put(&StoreKey::new("/b"), Bytes::from("2")).await;
        assert!(matches!(result, Err(DriveError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn test_import_rejects_gaps_and_forgeries() {
        let writer = writable_drive().await;
        for key in ["/a", "/b"] {
            writer.put(&StoreKey::new(key), Bytes::from(key)).await.unwrap();
        }
        let reader = Drive::open(*writer.key(), None, Arc::new(MemoryLog::new()))
            .await
            .unwrap();

        let tail = writer.entries(1).await.unwrap();
        assert!(matches!(
            reader.import(tail).await,
            Err(DriveError::Log(LogError::OutOfOrder {
                expected: 0,
                got: 1
            }))
        ));

        let other = writable_drive().await;
        other.put(&StoreKey::new("/x"), Bytes::from("x")).await.unwrap();
        assert!(matches!(
            reader.import(other.entries(0).await.unwrap()).await,
            Err(DriveError::Corrupt { seq: 0, .. })
        ));
        assert_eq!(reader.version(), 0);

        assert_eq!(reader.import(writer.entries(0).await.unwrap()).await.unwrap(), 2);
        assert_eq!(
            reader.get(&StoreKey::new("/b")).await.unwrap(),
            Some(Bytes::from("/b"))
        );
    }

    #[tokio::test]
    async fn test_foreign_entries_fail_verification() {
        let writer = writable_drive().await;
        writer
            .put(&StoreKey::new("/a"), Bytes::from("1"))
            .await
            .unwrap();

        let log = Arc::new(MemoryLog::new());
        for entry in writer.entries(0).await.unwrap() {
            log.append(&entry).await.unwrap();
        }
        let impostor = SecretKey::generate().public();
        let result = Drive::open(impostor, None, log).await;
        assert!(matches!(result, Err(DriveError::Corrupt { seq: 0, .. })));
    }

    #[tokio::test]
    async fn test_closed_drive_refuses_operations() {
        let drive = writable_drive().await;
        drive.close().await.unwrap();
        drive.close().await.unwrap();

        let key = StoreKey::new("/a");
        assert!(matches!(drive.get(&key).await, Err(DriveError::Closed)));
        assert!(matches!(
            drive.put(&key, Bytes::from("1")).await,
            Err(DriveError::Closed)
        ));
        let listed: Vec<_> = drive.list(&StoreKey::root(), ListOptions::default()).collect().await;
        assert!(matches!(listed.as_slice(), [Err(DriveError::Closed)]));
    }

    #[tokio::test]
    async fn test_blobs_beyond_entry_limit_are_rejected() {
        let drive = writable_drive().await;
        let key = StoreKey::new("/big.bin");

        let result = drive
            .put(&key, Bytes::from(vec![0u8; MAX_ENTRY_SIZE + 1]))
            .await;
        assert!(matches!(result, Err(DriveError::TooLarge { .. })));

        // fits as a blob, but not once wrapped in a signed entry
        let result = drive.put(&key, Bytes::from(vec![0u8; MAX_ENTRY_SIZE])).await;
        assert!(matches!(
            result,
            Err(DriveError::TooLarge {
                limit: MAX_ENTRY_SIZE,
                ..
            })
        ));
        assert_eq!(drive.version(), 0);

        drive
            .put(&key, Bytes::from(vec![0u8; MAX_ENTRY_SIZE - 1024]))
            .await
            .unwrap();
        assert_eq!(drive.version(), 1);
    }
}
