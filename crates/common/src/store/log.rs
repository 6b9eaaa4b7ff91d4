use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::key::StoreKey;
use crate::crypto::{PublicKey, SecretKey, Signature};

/// Largest encoded [`LogEntry`] a log accepts. Replication frames carry a
///  single entry, so this also bounds what a peer must be willing to read.
pub const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("log entry signature does not verify: {0}")]
    Signature(#[from] ed25519_dalek::SignatureError),
    /// An append whose sequence number does not extend the log
    #[error("out of order append, expected seq {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("log entry of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: usize },
    /// Undecodable data followed by more frames, as opposed to a torn tail
    #[error("log is corrupt at byte offset {offset}")]
    Corrupt { offset: u64 },
    #[error("log is closed")]
    Closed,
}

/// A single mutation recorded in a drive's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    Put { key: StoreKey, blob: Bytes },
    Del { key: StoreKey },
}

impl LogOp {
    pub fn key(&self) -> &StoreKey {
        match self {
            LogOp::Put { key, .. } => key,
            LogOp::Del { key } => key,
        }
    }
}

/// A signed, sequenced log record
///
/// The signature covers the drive identity, the sequence number and the
/// operation, so an entry cannot be replayed into another drive or at
/// another position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub op: LogOp,
    pub signature: Signature,
}

impl LogEntry {
    pub fn signed(
        drive: &PublicKey,
        secret: &SecretKey,
        seq: u64,
        op: LogOp,
    ) -> Result<Self, LogError> {
        let message = signing_bytes(drive, seq, &op)?;
        let signature = secret.sign(&message);
        Ok(Self { seq, op, signature })
    }

    /// Size of this entry once encoded, checked against [`MAX_ENTRY_SIZE`]
    pub fn check_size(&self) -> Result<u64, LogError> {
        let size = bincode::serialized_size(self)?;
        if size > MAX_ENTRY_SIZE as u64 {
            return Err(LogError::TooLarge {
                size,
                limit: MAX_ENTRY_SIZE,
            });
        }
        Ok(size)
    }

    pub fn verify(&self, drive: &PublicKey) -> Result<(), LogError> {
        let message = signing_bytes(drive, self.seq, &self.op)?;
        drive.verify(&message, &self.signature)?;
        Ok(())
    }
}

fn signing_bytes(drive: &PublicKey, seq: u64, op: &LogOp) -> Result<Vec<u8>, LogError> {
    Ok(bincode::serialize(&(drive.to_bytes(), seq, op))?)
}

/// Durable, append-only backing for one drive
///
/// Implementations must reject appends that do not extend the log by
/// exactly one sequence number, and must refuse all operations after
/// `close`.
#[async_trait]
pub trait LogStorage: Send + Sync + Debug + 'static {
    /// Append an entry whose `seq` equals the current length
    async fn append(&self, entry: &LogEntry) -> Result<(), LogError>;

    /// All entries with `seq >= from`, in order
    async fn read_from(&self, from: u64) -> Result<Vec<LogEntry>, LogError>;

    /// The number of entries in the log
    async fn len(&self) -> Result<u64, LogError>;

    async fn close(&self) -> Result<(), LogError>;
}

/// In-memory log, used for RAM backed corestores and tests
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: RwLock<Vec<LogEntry>>,
    closed: AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl LogStorage for MemoryLog {
    async fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        self.check_open()?;
        let mut entries = self.entries.write();
        let expected = entries.len() as u64;
        if entry.seq != expected {
            return Err(LogError::OutOfOrder {
                expected,
                got: entry.seq,
            });
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn read_from(&self, from: u64) -> Result<Vec<LogEntry>, LogError> {
        self.check_open()?;
        let entries = self.entries.read();
        Ok(entries.iter().skip(from as usize).cloned().collect())
    }

    async fn len(&self) -> Result<u64, LogError> {
        self.check_open()?;
        Ok(self.entries.read().len() as u64)
    }

    async fn close(&self) -> Result<(), LogError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
