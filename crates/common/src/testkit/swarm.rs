use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crypto::{DriveIdentity, PublicKey};
use crate::peer::{PeerConnection, PeerSocket, Swarm, SwarmError};

/// Size of the in-memory pipe between the two ends of a connection
const PIPE_CAPACITY: usize = 64 * 1024;

/// A swarm whose peers live in the same process
///
/// Cheap to clone; clones share state, so a test can keep one handle
/// while the lifecycle owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySwarm {
    inner: Arc<MemorySwarmInner>,
}

#[derive(Debug)]
struct MemorySwarmInner {
    sender: Mutex<Option<flume::Sender<PeerConnection>>>,
    receiver: flume::Receiver<PeerConnection>,
    topics: Mutex<Vec<DriveIdentity>>,
    flushes: AtomicUsize,
    destroys: AtomicUsize,
    fail_join: AtomicBool,
}

impl Default for MemorySwarmInner {
    fn default() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            topics: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            fail_join: AtomicBool::new(false),
        }
    }
}

impl MemorySwarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A swarm whose `join` always fails
    pub fn failing_join() -> Self {
        let swarm = Self::new();
        swarm.inner.fail_join.store(true, Ordering::Release);
        swarm
    }

    /// Dial this swarm as `remote`. The other end is delivered as an
    ///  inbound connection; this end is returned.
    pub fn connect(&self, remote: PublicKey) -> Result<PeerSocket, SwarmError> {
        let sender = self
            .inner
            .sender
            .lock()
            .clone()
            .ok_or(SwarmError::Destroyed)?;
        let (server, client) = tokio::io::duplex(PIPE_CAPACITY);
        sender
            .send(PeerConnection {
                remote,
                socket: PeerSocket::from_stream(server),
            })
            .map_err(|_| SwarmError::Destroyed)?;
        Ok(PeerSocket::from_stream(client))
    }

    pub fn topics(&self) -> Vec<DriveIdentity> {
        self.inner.topics.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.inner.flushes.load(Ordering::Acquire)
    }

    pub fn destroy_count(&self) -> usize {
        self.inner.destroys.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Swarm for MemorySwarm {
    async fn join(&self, topic: DriveIdentity) -> Result<(), SwarmError> {
        if self.inner.fail_join.load(Ordering::Acquire) {
            return Err(SwarmError::Join {
                topic,
                reason: "join refused by test swarm".into(),
            });
        }
        self.inner.topics.lock().push(topic);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SwarmError> {
        self.inner.flushes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn connections(&self) -> flume::Receiver<PeerConnection> {
        self.inner.receiver.clone()
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.inner.destroys.fetch_add(1, Ordering::AcqRel);
        self.inner.sender.lock().take();
        Ok(())
    }
}
