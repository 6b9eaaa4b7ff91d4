use std::any::Any;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

mod iroh_swarm;
pub mod protocol;

pub use iroh_swarm::{IrohSwarm, SwarmConfig, REPLICATION_ALPN};

use crate::crypto::{DriveIdentity, PublicKey};
use crate::store::Corestore;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("failed to bind swarm endpoint: {0}")]
    Bind(String),
    #[error("failed to set up peer discovery: {0}")]
    Discovery(String),
    #[error("failed to join topic {topic}: {reason}")]
    Join { topic: DriveIdentity, reason: String },
    #[error("swarm transport error: {0}")]
    Transport(String),
    #[error("swarm is destroyed")]
    Destroyed,
}

/// A byte pipe to a remote peer
///
/// Wraps a read half and a write half, plus whatever must stay alive for
/// the halves to keep working (for iroh, the connection itself).
pub struct PeerSocket {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    _guard: Option<Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for PeerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSocket")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

impl PeerSocket {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            _guard: None,
        }
    }

    /// Keep `guard` alive for as long as the socket is
    pub fn with_guard<G: Any + Send + Sync>(mut self, guard: G) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// Split a single duplex stream into a socket
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

impl AsyncRead for PeerSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for PeerSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// An inbound peer, handed to the corestore for replication
#[derive(Debug)]
pub struct PeerConnection {
    pub remote: PublicKey,
    pub socket: PeerSocket,
}

/// Peer discovery and transport
///
/// A swarm finds peers interested in a topic (a drive identity) and
/// yields their inbound connections. It knows nothing about what is
/// spoken over those connections.
#[async_trait]
pub trait Swarm: Send + Sync + fmt::Debug + 'static {
    /// Announce and look up peers for `topic`
    async fn join(&self, topic: DriveIdentity) -> Result<(), SwarmError>;

    /// Resolve once the best-effort peer lookup for joined topics completes
    async fn flush(&self) -> Result<(), SwarmError>;

    /// Inbound connections. The channel disconnects once the swarm is
    ///  destroyed.
    fn connections(&self) -> flume::Receiver<PeerConnection>;

    /// Leave every topic and release the transport. Destroying twice is a
    ///  no-op.
    async fn destroy(&self) -> Result<(), SwarmError>;
}

/// How the lifecycle obtains its swarm
#[derive(Debug, Clone)]
pub enum SwarmProvider {
    Iroh(SwarmConfig),
    /// No networking at all
    Offline,
    /// A swarm constructed by the caller
    Custom(Arc<dyn Swarm>),
}

impl Default for SwarmProvider {
    fn default() -> Self {
        SwarmProvider::Iroh(SwarmConfig::default())
    }
}

impl SwarmProvider {
    /// Bind iroh with the corestore's primary secret unless a node key was
    ///  configured, so the node id is the default drive's identity and
    ///  peers find the node by resolving that key on the DHT
    pub fn for_corestore(&self, corestore: &Corestore) -> SwarmProvider {
        match self {
            SwarmProvider::Iroh(config) if config.secret_key.is_none() => {
                SwarmProvider::Iroh(SwarmConfig {
                    secret_key: Some(corestore.primary().clone()),
                    ..config.clone()
                })
            }
            other => other.clone(),
        }
    }

    pub async fn build(&self) -> Result<Arc<dyn Swarm>, SwarmError> {
        match self {
            SwarmProvider::Iroh(config) => Ok(Arc::new(IrohSwarm::bind(config.clone()).await?)),
            SwarmProvider::Offline => Ok(Arc::new(OfflineSwarm::new())),
            SwarmProvider::Custom(swarm) => Ok(swarm.clone()),
        }
    }
}

/// A swarm that joins nothing and never yields a connection
#[derive(Debug)]
pub struct OfflineSwarm {
    sender: Mutex<Option<flume::Sender<PeerConnection>>>,
    receiver: flume::Receiver<PeerConnection>,
}

impl OfflineSwarm {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }
}

impl Default for OfflineSwarm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Swarm for OfflineSwarm {
    async fn join(&self, topic: DriveIdentity) -> Result<(), SwarmError> {
        tracing::debug!(topic = %topic, "offline swarm, not announcing");
        Ok(())
    }

    async fn flush(&self) -> Result<(), SwarmError> {
        Ok(())
    }

    fn connections(&self) -> flume::Receiver<PeerConnection> {
        self.receiver.clone()
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.sender.lock().take();
        Ok(())
    }
}
