use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::log::{LogEntry, LogError, LogStorage, MAX_ENTRY_SIZE};

/// Length prefix of every frame, big endian
const FRAME_HEADER_SIZE: usize = 4;

/// On-disk append-only log
///
/// The file is a sequence of frames, each a `u32` big-endian length
/// followed by a bincode encoded [`LogEntry`]. Every append is synced to
/// disk before it is acknowledged. A torn frame at the tail (from a crash
/// mid-append) is cut off when the log is reopened; damage anywhere else
/// fails the open and leaves the file untouched.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    inner: Mutex<FileLogInner>,
}

#[derive(Debug)]
struct FileLogInner {
    file: Option<File>,
    entries: Vec<LogEntry>,
}

impl FileLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (entries, valid_len) = decode_frames(&data).inspect_err(|e| {
            tracing::error!(path = ?path, "refusing to open drive log: {}", e);
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if valid_len < data.len() {
            tracing::warn!(
                path = ?path,
                kept = valid_len,
                dropped = data.len() - valid_len,
                "truncating torn tail of drive log"
            );
            file.set_len(valid_len as u64).await?;
        }

        tracing::debug!(path = ?path, entries = entries.len(), "opened drive log");
        Ok(Self {
            path,
            inner: Mutex::new(FileLogInner {
                file: Some(file),
                entries,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode the frames in `data`, returning the entries and the byte
///  length they occupy.
///
/// Only the last frame may be damaged: a header or payload cut short, or
///  a zero-filled tail, is a torn append and is left for the caller to
///  truncate. A bad frame with more data behind it is corruption.
fn decode_frames(data: &[u8]) -> Result<(Vec<LogEntry>, usize), LogError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < FRAME_HEADER_SIZE || rest.iter().all(|b| *b == 0) {
            break;
        }
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&rest[..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_ENTRY_SIZE {
            return Err(LogError::Corrupt {
                offset: offset as u64,
            });
        }
        let Some(payload) = rest.get(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len) else {
            break;
        };
        let entry = bincode::deserialize::<LogEntry>(payload)
            .ok()
            .filter(|entry| entry.seq == entries.len() as u64)
            .ok_or(LogError::Corrupt {
                offset: offset as u64,
            })?;
        entries.push(entry);
        offset += FRAME_HEADER_SIZE + len;
    }
    Ok((entries, offset))
}

fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>, LogError> {
    let size = entry.check_size()?;
    let payload = bincode::serialize(entry)?;
    let len = u32::try_from(payload.len()).map_err(|_| LogError::TooLarge {
        size,
        limit: MAX_ENTRY_SIZE,
    })?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[async_trait]
impl LogStorage for FileLog {
    async fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        let mut inner = self.inner.lock().await;
        let expected = inner.entries.len() as u64;
        if entry.seq != expected {
            return Err(LogError::OutOfOrder {
                expected,
                got: entry.seq,
            });
        }
        let frame = encode_frame(entry)?;
        let file = inner.file.as_mut().ok_or(LogError::Closed)?;
        file.write_all(&frame).await?;
        file.sync_data().await?;
        inner.entries.push(entry.clone());
        Ok(())
    }

    async fn read_from(&self, from: u64) -> Result<Vec<LogEntry>, LogError> {
        let inner = self.inner.lock().await;
        if inner.file.is_none() {
            return Err(LogError::Closed);
        }
        Ok(inner.entries.iter().skip(from as usize).cloned().collect())
    }

    async fn len(&self) -> Result<u64, LogError> {
        let inner = self.inner.lock().await;
        if inner.file.is_none() {
            return Err(LogError::Closed);
        }
        Ok(inner.entries.len() as u64)
    }

    async fn close(&self) -> Result<(), LogError> {
        let mut inner = self.inner.lock().await;
        if let Some(file) = inner.file.take() {
            file.sync_all().await?;
        }
        Ok(())
    }
}
