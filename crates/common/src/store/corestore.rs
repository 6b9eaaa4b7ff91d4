use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::drive::{Drive, DriveError};
use super::file_log::FileLog;
use super::log::{LogError, LogStorage, MemoryLog};
use crate::crypto::{DriveIdentity, KeyError, SecretKey};
use crate::peer::protocol::{self, ReplicationError};
use crate::peer::PeerConnection;

/// File holding the corestore's primary secret, relative to the storage root
const PRIMARY_KEY_FILE: &str = "primary.pem";
/// Directory holding one log per drive, relative to the storage root
const DRIVES_DIR: &str = "drives";

/// Where a corestore keeps its drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Nothing survives the process
    Memory,
    /// A directory holding the primary key and the drive logs
    Disk(PathBuf),
}

impl Storage {
    pub fn from_dir(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => Storage::Disk(dir),
            None => Storage::Memory,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CorestoreError {
    #[error("corestore i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corestore primary key error: {0}")]
    Key(#[from] KeyError),
    #[error("corestore log error: {0}")]
    Log(#[from] LogError),
    #[error("corestore drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("corestore is closed")]
    Closed,
}

/// The storage root that owns every drive of this process
///
/// A corestore holds a primary secret key. The drive named by its public
/// half is the default drive, so reopening the same storage directory
/// without naming a key reopens the same drive. Drives named by any other
/// key are opened read-only.
#[derive(Clone)]
pub struct Corestore {
    inner: Arc<CorestoreInner>,
}

struct CorestoreInner {
    storage: Storage,
    primary: SecretKey,
    drives: Mutex<HashMap<DriveIdentity, Drive>>,
    closed: AtomicBool,
}

impl fmt::Debug for Corestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Corestore")
            .field("storage", &self.inner.storage)
            .field("primary", &self.inner.primary.public().to_hex())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Corestore {
    pub async fn open(storage: &Storage) -> Result<Self, CorestoreError> {
        let primary = match storage {
            Storage::Memory => SecretKey::generate(),
            Storage::Disk(dir) => {
                tokio::fs::create_dir_all(dir.join(DRIVES_DIR)).await?;
                load_or_create_primary(&dir.join(PRIMARY_KEY_FILE)).await?
            }
        };
        tracing::debug!(storage = ?storage, primary = %primary.public(), "corestore opened");

        Ok(Self {
            inner: Arc::new(CorestoreInner {
                storage: storage.clone(),
                primary,
                drives: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Identity of the drive opened when no key is given
    pub fn default_identity(&self) -> DriveIdentity {
        self.inner.primary.public()
    }

    pub(crate) fn primary(&self) -> &SecretKey {
        &self.inner.primary
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Open the drive named by `key`, or the default drive.
    ///  Opening an already open drive returns the same handle.
    pub async fn drive(&self, key: Option<DriveIdentity>) -> Result<Drive, CorestoreError> {
        if self.is_closed() {
            return Err(CorestoreError::Closed);
        }
        let key = key.unwrap_or_else(|| self.default_identity());

        let mut drives = self.inner.drives.lock().await;
        if let Some(drive) = drives.get(&key) {
            if !drive.is_closed() {
                return Ok(drive.clone());
            }
        }

        let log: Arc<dyn LogStorage> = match &self.inner.storage {
            Storage::Memory => Arc::new(MemoryLog::new()),
            Storage::Disk(dir) => Arc::new(
                FileLog::open(
                    dir.join(DRIVES_DIR)
                        .join(format!("{}.log", key.to_hex())),
                )
                .await?,
            ),
        };
        let secret = (key == self.default_identity()).then(|| self.inner.primary.clone());
        let drive = Drive::open(key, secret, log).await?;
        drives.insert(key, drive.clone());
        Ok(drive)
    }

    /// An open drive, if any, without opening anything
    pub async fn get_drive(&self, key: &DriveIdentity) -> Option<Drive> {
        let drives = self.inner.drives.lock().await;
        drives.get(key).filter(|drive| !drive.is_closed()).cloned()
    }

    /// Serve replication to a peer over `connection` until it hangs up
    pub async fn replicate(&self, connection: PeerConnection) -> Result<(), ReplicationError> {
        if self.is_closed() {
            return Err(ReplicationError::Closed);
        }
        protocol::serve(self, connection).await
    }

    /// Close every drive. Every drive is attempted; the first failure is
    ///  returned.
    pub async fn close(&self) -> Result<(), CorestoreError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let drives: Vec<Drive> = self.inner.drives.lock().await.drain().map(|(_, d)| d).collect();

        let mut first_error = None;
        for drive in drives {
            if let Err(e) = drive.close().await {
                tracing::warn!(drive = %drive.key(), "failed to close drive: {}", e);
                first_error.get_or_insert(CorestoreError::from(e));
            }
        }
        tracing::debug!("corestore closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn load_or_create_primary(path: &Path) -> Result<SecretKey, CorestoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(pem) => Ok(SecretKey::from_pem(&pem)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let secret = SecretKey::generate();
            tokio::fs::write(path, secret.to_pem()).await?;
            tracing::info!(path = ?path, "generated corestore primary key");
            Ok(secret)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;
    use crate::store::StoreKey;

    #[tokio::test]
    async fn test_disk_corestore_reopens_default_drive() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::Disk(temp.path().to_path_buf());

        let store = Corestore::open(&storage).await.unwrap();
        let drive = store.drive(None).await.unwrap();
        drive
            .put(&StoreKey::new("/a.txt"), Bytes::from("hi"))
            .await
            .unwrap();
        let identity = *drive.key();
        store.close().await.unwrap();
        assert!(drive.is_closed());

        let reopened = Corestore::open(&storage).await.unwrap();
        assert_eq!(reopened.default_identity(), identity);
        let drive = reopened.drive(None).await.unwrap();
        assert!(drive.writable());
        assert_eq!(
            drive.get(&StoreKey::new("/a.txt")).await.unwrap(),
            Some(Bytes::from("hi"))
        );
    }

    #[tokio::test]
    async fn test_explicit_default_key_is_writable() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        let identity = store.default_identity();
        let drive = store.drive(Some(identity)).await.unwrap();
        assert!(drive.writable());

        let same = store.drive(None).await.unwrap();
        same.put(&StoreKey::new("/x"), Bytes::from("1"))
            .await
            .unwrap();
        assert_eq!(drive.version(), 1);
    }

    #[tokio::test]
    async fn test_foreign_key_opens_read_only() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        let foreign = SecretKey::generate().public();
        let drive = store.drive(Some(foreign)).await.unwrap();
        assert!(!drive.writable());
        assert_eq!(drive.key(), &foreign);
    }

    #[tokio::test]
    async fn test_closed_corestore_refuses_drives() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(
            store.drive(None).await,
            Err(CorestoreError::Closed)
        ));
    }
}
