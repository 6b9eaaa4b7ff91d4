//! Drive replication over a [`PeerSocket`]
//!
//! Frames are a `u32` big-endian length followed by a bincode payload.
//! The dialing side sends [`Request::Fetch`] naming a drive and the first
//! sequence number it lacks; the serving side answers with one
//! [`Response::Entry`] per log entry and a closing [`Response::End`], or
//! [`Response::UnknownDrive`] if it does not have that drive open. Any
//! number of requests may be made over one socket.
//!
//! Nodes only ever serve. [`fetch_entries`] is the dialing half, for
//! readers that hold a socket to a serving node; the verified entries it
//! returns are applied with [`Drive::import`](crate::store::Drive::import).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{PeerConnection, PeerSocket};
use crate::crypto::DriveIdentity;
use crate::store::{Corestore, DriveError, LogEntry, LogError, MAX_ENTRY_SIZE};

// NOTE: requests are tiny, anything near this limit is garbage
/// Largest request frame we will read
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024;
/// Largest response frame we will read: one full log entry plus the
///  response envelope
pub const MAX_RESPONSE_SIZE: usize = MAX_ENTRY_SIZE + 64;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("replication i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("replication encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("drive error while replicating: {0}")]
    Drive(#[from] DriveError),
    #[error("peer does not have drive {0}")]
    UnknownDrive(DriveIdentity),
    #[error("entry {seq} from peer failed verification: {source}")]
    Verify { seq: u64, source: LogError },
    #[error("peer sent entry {got}, expected {expected}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("peer hung up mid-response")]
    UnexpectedEof,
    #[error("corestore is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Every entry of `drive` with `seq >= from`
    Fetch { drive: DriveIdentity, from: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Entry(LogEntry),
    /// All requested entries were sent; `length` is the drive's log length
    End { length: u64 },
    UnknownDrive,
}

/// Read one frame, or `None` if the peer closed the stream between frames
pub async fn read_frame<R, T>(reader: &mut R, limit: usize) -> Result<Option<T>, ReplicationError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let size = u32::from_be_bytes(header) as usize;
    if size > limit {
        return Err(ReplicationError::FrameTooLarge { size, limit });
    }
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ReplicationError::UnexpectedEof
        } else {
            e.into()
        }
    })?;
    Ok(Some(bincode::deserialize(&payload)?))
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ReplicationError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)?;
    let size = u32::try_from(payload.len()).map_err(|_| ReplicationError::FrameTooLarge {
        size: payload.len(),
        limit: u32::MAX as usize,
    })?;
    writer.write_all(&size.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    Ok(())
}

/// Answer requests on `connection` until the peer hangs up
pub async fn serve(corestore: &Corestore, connection: PeerConnection) -> Result<(), ReplicationError> {
    let PeerConnection { remote, mut socket } = connection;
    tracing::debug!(peer = %remote, "serving replication");

    while let Some(request) = read_frame::<_, Request>(&mut socket, MAX_REQUEST_SIZE).await? {
        match request {
            Request::Fetch { drive, from } => {
                let Some(open) = corestore.get_drive(&drive).await else {
                    tracing::debug!(peer = %remote, drive = %drive, "fetch for unknown drive");
                    write_frame(&mut socket, &Response::UnknownDrive).await?;
                    socket.flush().await?;
                    continue;
                };
                let entries = open.entries(from).await?;
                let length = open.version();
                tracing::debug!(
                    peer = %remote,
                    drive = %drive,
                    from,
                    count = entries.len(),
                    "sending entries"
                );
                for entry in entries {
                    write_frame(&mut socket, &Response::Entry(entry)).await?;
                }
                write_frame(&mut socket, &Response::End { length }).await?;
                socket.flush().await?;
            }
        }
    }

    tracing::debug!(peer = %remote, "peer closed replication stream");
    Ok(())
}

/// Fetch entries of `drive` from `from` onwards, verifying each one
pub async fn fetch_entries(
    socket: &mut PeerSocket,
    drive: DriveIdentity,
    from: u64,
) -> Result<Vec<LogEntry>, ReplicationError> {
    write_frame(socket, &Request::Fetch { drive, from }).await?;
    socket.flush().await?;

    let mut entries = Vec::new();
    loop {
        let response = read_frame::<_, Response>(socket, MAX_RESPONSE_SIZE)
            .await?
            .ok_or(ReplicationError::UnexpectedEof)?;
        match response {
            Response::Entry(entry) => {
                let expected = from + entries.len() as u64;
                if entry.seq != expected {
                    return Err(ReplicationError::OutOfOrder {
                        expected,
                        got: entry.seq,
                    });
                }
                entry
                    .verify(&drive)
                    .map_err(|source| ReplicationError::Verify {
                        seq: entry.seq,
                        source,
                    })?;
                entries.push(entry);
            }
            Response::End { .. } => return Ok(entries),
            Response::UnknownDrive => return Err(ReplicationError::UnknownDrive(drive)),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::store::{LogOp, Storage, StoreKey};

    fn pipe(remote: &SecretKey) -> (PeerConnection, PeerSocket) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let connection = PeerConnection {
            remote: remote.public(),
            socket: PeerSocket::from_stream(server),
        };
        (connection, PeerSocket::from_stream(client))
    }

    #[tokio::test]
    async fn test_fetch_from_serving_corestore() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        let drive = store.drive(None).await.unwrap();
        for (key, blob) in [("/a", "1"), ("/b", "2"), ("/c", "3")] {
            drive.put(&StoreKey::new(key), Bytes::from(blob)).await.unwrap();
        }

        let (connection, mut client) = pipe(&SecretKey::generate());
        let server = {
            let store = store.clone();
            tokio::spawn(async move { store.replicate(connection).await })
        };

        let all = fetch_entries(&mut client, *drive.key(), 0).await.unwrap();
        assert_eq!(all.len(), 3);
        let tail = fetch_entries(&mut client, *drive.key(), 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].op.key().as_str(), "/c");

        let unknown = SecretKey::generate().public();
        assert!(matches!(
            fetch_entries(&mut client, unknown, 0).await,
            Err(ReplicationError::UnknownDrive(_))
        ));

        drop(client);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        let (connection, mut client) = pipe(&SecretKey::generate());
        let server = tokio::spawn(async move { serve(&store, connection).await });

        client
            .write_all(&((MAX_REQUEST_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        client.flush().await.unwrap();
        assert!(matches!(
            server.await.unwrap(),
            Err(ReplicationError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_corestore_refuses_replication() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        store.close().await.unwrap();
        let (connection, _client) = pipe(&SecretKey::generate());
        assert!(matches!(
            store.replicate(connection).await,
            Err(ReplicationError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_largest_entry_replicates() {
        let store = Corestore::open(&Storage::Memory).await.unwrap();
        let drive = store.drive(None).await.unwrap();
        let blob = Bytes::from(vec![7u8; MAX_ENTRY_SIZE - 256]);
        drive.put(&StoreKey::new("/big.bin"), blob.clone()).await.unwrap();

        let (connection, mut client) = pipe(&SecretKey::generate());
        let server = {
            let store = store.clone();
            tokio::spawn(async move { store.replicate(connection).await })
        };

        let entries = fetch_entries(&mut client, *drive.key(), 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0].op, LogOp::Put { blob: got, .. } if *got == blob));

        drop(client);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fetched_entries_import_into_reader() {
        let writer = Corestore::open(&Storage::Memory).await.unwrap();
        let drive = writer.drive(None).await.unwrap();
        drive.put(&StoreKey::new("/a"), Bytes::from("1")).await.unwrap();
        drive.put(&StoreKey::new("/b"), Bytes::from("2")).await.unwrap();

        let (connection, mut client) = pipe(&SecretKey::generate());
        let server = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.replicate(connection).await })
        };

        let reader = Corestore::open(&Storage::Memory).await.unwrap();
        let copy = reader.drive(Some(*drive.key())).await.unwrap();
        let entries = fetch_entries(&mut client, *drive.key(), copy.version())
            .await
            .unwrap();
        assert_eq!(copy.import(entries).await.unwrap(), 2);
        assert_eq!(
            copy.get(&StoreKey::new("/b")).await.unwrap(),
            Some(Bytes::from("2"))
        );

        drive.del(&StoreKey::new("/a")).await.unwrap();
        let entries = fetch_entries(&mut client, *drive.key(), copy.version())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(copy.import(entries).await.unwrap(), 3);
        assert_eq!(copy.get(&StoreKey::new("/a")).await.unwrap(), None);

        drop(client);
        server.await.unwrap().unwrap();
    }
}
