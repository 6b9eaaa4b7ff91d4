use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::BoxFuture;
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::Endpoint;

use super::{PeerConnection, PeerSocket, Swarm, SwarmError};
use crate::crypto::{DriveIdentity, PublicKey, SecretKey};

/// ALPN identifier for the drive replication protocol
pub const REPLICATION_ALPN: &[u8] = b"/drivecast/replicate/1";

#[derive(Debug, Clone, Default)]
pub struct SwarmConfig {
    /// Node identity. A fresh one is generated if unset, which leaves the
    ///  node unreachable by drive key; see [`SwarmProvider::for_corestore`](super::SwarmProvider::for_corestore).
    pub secret_key: Option<SecretKey>,
    /// Address to bind the endpoint to. Any interface, random port if
    ///  unset.
    pub bind_addr: Option<SocketAddr>,
}

/// Swarm over an iroh endpoint, discoverable through the mainline DHT
#[derive(Debug)]
pub struct IrohSwarm {
    node_id: PublicKey,
    router: tokio::sync::Mutex<Option<Router>>,
    topics: parking_lot::Mutex<BTreeSet<DriveIdentity>>,
    receiver: flume::Receiver<PeerConnection>,
}

impl IrohSwarm {
    pub async fn bind(config: SwarmConfig) -> Result<Self, SwarmError> {
        let secret_key = config.secret_key.unwrap_or_else(SecretKey::generate);
        let socket_addr = config
            .bind_addr
            .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
        let addr = match socket_addr {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => {
                return Err(SwarmError::Bind(format!(
                    "ipv6 bind address {} is not supported",
                    addr
                )))
            }
        };

        let mainline_discovery = DhtDiscovery::builder()
            .secret_key(secret_key.0.clone())
            .build()
            .map_err(|e| SwarmError::Discovery(e.to_string()))?;

        let endpoint = Endpoint::builder()
            .secret_key(secret_key.0.clone())
            .discovery(mainline_discovery)
            .bind_addr_v4(addr)
            .bind()
            .await
            .map_err(|e| SwarmError::Bind(e.to_string()))?;

        let (sender, receiver) = flume::unbounded();
        let router = Router::builder(endpoint.clone())
            .accept(REPLICATION_ALPN, ConnectionForwarder { sender })
            .spawn();

        let node_id = PublicKey::from(endpoint.node_id());
        tracing::info!(node_id = %node_id, addr = %addr, "swarm endpoint bound");

        Ok(Self {
            node_id,
            router: tokio::sync::Mutex::new(Some(router)),
            topics: parking_lot::Mutex::new(BTreeSet::new()),
            receiver,
        })
    }

    /// The id peers dial to reach this node
    pub fn node_id(&self) -> PublicKey {
        self.node_id
    }

    pub fn topics(&self) -> Vec<DriveIdentity> {
        self.topics.lock().iter().copied().collect()
    }
}

#[async_trait]
impl Swarm for IrohSwarm {
    async fn join(&self, topic: DriveIdentity) -> Result<(), SwarmError> {
        if self.router.lock().await.is_none() {
            return Err(SwarmError::Destroyed);
        }
        self.topics.lock().insert(topic);
        if topic != self.node_id {
            tracing::warn!(
                topic = %topic,
                node_id = %self.node_id,
                "node id differs from the drive key, peers resolving the drive will not find this node"
            );
        }
        tracing::info!(
            topic = %topic,
            node_id = %self.node_id,
            "joined swarm, peers replicate from this node id"
        );
        Ok(())
    }

    async fn flush(&self) -> Result<(), SwarmError> {
        match self.router.lock().await.as_ref() {
            Some(router) if !router.is_shutdown() => Ok(()),
            _ => Err(SwarmError::Destroyed),
        }
    }

    fn connections(&self) -> flume::Receiver<PeerConnection> {
        self.receiver.clone()
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        let Some(router) = self.router.lock().await.take() else {
            return Ok(());
        };
        self.topics.lock().clear();
        router
            .shutdown()
            .await
            .map_err(|e| SwarmError::Transport(e.to_string()))?;
        tracing::debug!(node_id = %self.node_id, "swarm destroyed");
        Ok(())
    }
}

/// Hands the first bidirectional stream of every replication connection
///  to whoever is draining the swarm's connections
#[derive(Debug, Clone)]
struct ConnectionForwarder {
    sender: flume::Sender<PeerConnection>,
}

impl ProtocolHandler for ConnectionForwarder {
    #[allow(refining_impl_trait)]
    fn accept(&self, conn: Connection) -> BoxFuture<'static, Result<(), AcceptError>> {
        let sender = self.sender.clone();
        Box::pin(async move {
            let remote = conn.remote_node_id().map_err(|e| {
                tracing::error!("failed to read remote node id: {}", e);
                let err: Box<dyn std::error::Error + Send + Sync> =
                    anyhow!("failed to read remote node id: {}", e).into();
                AcceptError::from(err)
            })?;
            tracing::debug!("new replication connection from {}", remote);

            let (send, recv) = conn.accept_bi().await.map_err(|e| {
                tracing::error!("failed to accept bidirectional stream: {}", e);
                AcceptError::from(e)
            })?;

            let connection = PeerConnection {
                remote: PublicKey::from(remote),
                socket: PeerSocket::new(recv, send).with_guard(conn.clone()),
            };
            if sender.send_async(connection).await.is_err() {
                tracing::debug!("swarm is shutting down, dropping connection from {}", remote);
                conn.close(0u32.into(), b"shutting down");
            }
            Ok(())
        })
    }
}
