use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use common::prelude::*;

use super::state::{LifecycleError, LifecycleState, Milestone, OpenError, Progress};

/// Capacity of the live event channel; slow subscribers miss events,
///  never milestones (see [`Orchestrator::milestone`])
const EVENT_CAPACITY: usize = 16;
/// How long close waits for connections still queued on the destroyed
///  swarm to be handed off and refused
const REPLICATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What to open
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub storage: Storage,
    /// Drive to open. The corestore's default drive if unset.
    pub key: Option<KeyInput>,
    pub swarm: SwarmProvider,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            storage: Storage::Memory,
            key: None,
            swarm: SwarmProvider::default(),
        }
    }
}

/// Owns the corestore, the drive and the swarm, and the order in which
///  they come up and go down
///
/// Opening runs `store -> drive -> swarm` once, on a background task.
/// Closing waits for opening to settle, then tears down whatever came up.
/// Both are memoized: every caller of [`ready`](Self::ready) sees the
/// same outcome, and every caller of [`close`](Self::close) waits on the
/// same teardown.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("identity", &self.identity())
            .finish()
    }
}

struct OrchestratorInner {
    config: LifecycleConfig,
    progress: watch::Sender<Progress>,
    events: broadcast::Sender<Milestone>,
    handles: RwLock<Handles>,
    open_started: AtomicBool,
    close_requested: AtomicBool,
    closing: OnceLock<Shared<BoxFuture<'static, ()>>>,
}

#[derive(Default)]
struct Handles {
    corestore: Option<Corestore>,
    drive: Option<Drive>,
    swarm: Option<Arc<dyn Swarm>>,
    replication: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// A closed lifecycle. Nothing is touched until [`open`](Self::open).
    pub fn new(config: LifecycleConfig) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                progress,
                events,
                handles: RwLock::new(Handles::default()),
                open_started: AtomicBool::new(false),
                close_requested: AtomicBool::new(false),
                closing: OnceLock::new(),
            }),
        }
    }

    /// Construct and immediately begin opening
    pub fn start(config: LifecycleConfig) -> Self {
        let orchestrator = Self::new(config);
        // the readiness future is memoized; callers pick it up via ready()
        drop(orchestrator.open());
        orchestrator
    }

    /// Begin the open sequence if it has not begun, and return the
    ///  readiness future. Must be called within a tokio runtime.
    pub fn open(&self) -> impl Future<Output = Result<DriveIdentity, LifecycleError>> + Send + 'static {
        if !self.inner.open_started.swap(true, Ordering::AcqRel) {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run_open().await });
        }
        self.ready()
    }

    /// Resolves once the open sequence settles, with the drive identity
    ///  or the reason it never became ready
    pub fn ready(&self) -> impl Future<Output = Result<DriveIdentity, LifecycleError>> + Send + 'static {
        let inner = self.inner.clone();
        async move {
            let mut progress = inner.progress.subscribe();
            let outcome = progress
                .wait_for(|p| p.opened.is_some())
                .await
                .map_err(|_| LifecycleError::Closed)?
                .opened
                .clone();
            outcome.unwrap_or(Err(LifecycleError::NotReady))
        }
    }

    /// Resolves once `milestone` is reached, even if it was reached long
    ///  ago. Fails if the open sequence failed before reaching it.
    pub fn milestone(
        &self,
        milestone: Milestone,
    ) -> impl Future<Output = Result<(), LifecycleError>> + Send + 'static {
        let inner = self.inner.clone();
        async move {
            let mut progress = inner.progress.subscribe();
            let progress = progress
                .wait_for(|p| p.settles(milestone))
                .await
                .map_err(|_| LifecycleError::Closed)?;
            if progress.has_reached(milestone) {
                return Ok(());
            }
            match &progress.opened {
                Some(Err(e)) => Err(e.clone()),
                _ => Err(LifecycleError::NotReady),
            }
        }
    }

    /// Live lifecycle events, from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Milestone> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.progress.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// The drive identity, once the drive is open
    pub fn identity(&self) -> Option<DriveIdentity> {
        self.inner
            .handles
            .read()
            .drive
            .as_ref()
            .map(|drive| *drive.key())
    }

    /// The open drive. Waits for readiness if opening is under way.
    pub async fn drive(&self) -> Result<Drive, LifecycleError> {
        if self.inner.close_requested.load(Ordering::Acquire) {
            return Err(LifecycleError::Closed);
        }
        if !self.inner.open_started.load(Ordering::Acquire) {
            return Err(LifecycleError::NotReady);
        }
        self.ready().await?;
        if self.inner.close_requested.load(Ordering::Acquire) {
            return Err(LifecycleError::Closed);
        }
        self.inner
            .handles
            .read()
            .drive
            .clone()
            .ok_or(LifecycleError::Closed)
    }

    /// Tear everything down. Every call returns the same future; teardown
    ///  failures are logged, never returned.
    pub fn close(&self) -> Shared<BoxFuture<'static, ()>> {
        self.inner
            .closing
            .get_or_init(|| {
                self.inner.close_requested.store(true, Ordering::Release);
                let inner = self.inner.clone();
                let task = tokio::spawn(async move { inner.run_close().await });
                async move {
                    if let Err(e) = task.await {
                        tracing::error!("close task failed: {}", e);
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}

impl OrchestratorInner {
    fn transition(&self, state: LifecycleState) {
        tracing::debug!(state = %state, "lifecycle transition");
        self.progress.send_modify(|p| p.state = state);
    }

    fn reach(&self, milestone: Milestone) {
        self.progress.send_modify(|p| p.reached.push(milestone));
        tracing::info!(event = milestone.name(), "lifecycle event");
        // no live subscribers is fine
        let _ = self.events.send(milestone);
    }

    async fn run_open(self: Arc<Self>) {
        // a panicking step must still settle readiness
        let opening = tokio::spawn({
            let inner = self.clone();
            async move { inner.open_sequence().await }
        });
        let outcome = match opening.await {
            Ok(outcome) => outcome,
            Err(e) => Err(OpenError::Aborted(e.to_string())),
        };

        match outcome {
            Ok(identity) => {
                self.progress.send_modify(|p| {
                    p.state = LifecycleState::Ready;
                    p.opened = Some(Ok(identity));
                });
                self.reach(Milestone::Ready);
            }
            Err(e) => {
                tracing::error!("failed to open: {}", e);
                self.progress.send_modify(|p| {
                    p.state = LifecycleState::Closed;
                    p.opened = Some(Err(LifecycleError::OpenFailed(Arc::new(e))));
                });
            }
        }
    }

    async fn open_sequence(&self) -> Result<DriveIdentity, OpenError> {
        self.transition(LifecycleState::OpeningStore);
        let key = self
            .config
            .key
            .clone()
            .map(PublicKey::try_from)
            .transpose()?;
        let corestore = Corestore::open(&self.config.storage).await?;
        self.handles.write().corestore = Some(corestore.clone());
        self.reach(Milestone::StoreReady);

        self.transition(LifecycleState::OpeningDrive);
        let drive = corestore.drive(key).await?;
        let identity = *drive.key();
        if key.is_none() {
            tracing::info!(drive = %identity, writable = drive.writable(), "opened default drive");
        }
        self.handles.write().drive = Some(drive);
        self.reach(Milestone::DriveReady);

        self.transition(LifecycleState::OpeningSwarm);
        let swarm = self.config.swarm.for_corestore(&corestore).build().await?;
        self.handles.write().swarm = Some(swarm.clone());
        // drain connections before joining so none are missed
        let replication = spawn_replication(corestore, swarm.connections());
        self.handles.write().replication = Some(replication);
        swarm.join(identity).await?;
        swarm.flush().await?;
        tracing::info!(drive = %identity, "joined swarm");
        self.reach(Milestone::SwarmReady);

        Ok(identity)
    }

    async fn run_close(self: Arc<Self>) {
        if !self.open_started.swap(true, Ordering::AcqRel) {
            tracing::debug!("close requested before open, skipping to teardown");
            self.progress.send_modify(|p| {
                if p.opened.is_none() {
                    p.opened = Some(Err(LifecycleError::Closed));
                }
            });
        } else {
            let mut progress = self.progress.subscribe();
            let _ = progress.wait_for(|p| p.opened.is_some()).await;
        }

        tracing::info!("closing");
        self.transition(LifecycleState::Closing);
        let handles = std::mem::take(&mut *self.handles.write());

        if let Some(drive) = handles.drive {
            if let Err(e) = drive.close().await {
                tracing::error!("error closing drive: {}", e);
            }
        }
        if let Some(corestore) = handles.corestore {
            if let Err(e) = corestore.close().await {
                tracing::error!("error closing corestore: {}", e);
            }
        }
        if let Some(swarm) = handles.swarm {
            if let Err(e) = swarm.destroy().await {
                tracing::error!("error destroying swarm: {}", e);
            }
        }
        if let Some(mut replication) = handles.replication {
            // the connection stream ends with the swarm; queued connections
            // meet the closed corestore and are dropped
            if tokio::time::timeout(REPLICATION_DRAIN_TIMEOUT, &mut replication)
                .await
                .is_err()
            {
                tracing::warn!("connection stream still open after swarm destroy, aborting");
                replication.abort();
            }
        }

        self.transition(LifecycleState::Closed);
        self.reach(Milestone::Closed);
    }
}

/// Hand every inbound connection to the corestore, each on its own task
fn spawn_replication(
    corestore: Corestore,
    connections: flume::Receiver<PeerConnection>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(connection) = connections.recv_async().await {
            let remote = connection.remote;
            tracing::info!(peer = %remote, "peer connected");
            let corestore = corestore.clone();
            tokio::spawn(async move {
                if let Err(e) = corestore.replicate(connection).await {
                    tracing::warn!(peer = %remote, "replication failed: {}", e);
                }
            });
        }
        tracing::debug!("swarm connection stream ended");
    })
}

#[cfg(test)]
mod tests {
    use common::testkit::MemorySwarm;

    use super::*;

    fn config(swarm: &MemorySwarm) -> LifecycleConfig {
        LifecycleConfig {
            storage: Storage::Memory,
            key: None,
            swarm: SwarmProvider::Custom(Arc::new(swarm.clone())),
        }
    }

    #[tokio::test]
    async fn test_open_reaches_every_milestone_in_order() {
        let swarm = MemorySwarm::new();
        let orchestrator = Orchestrator::new(config(&swarm));
        assert_eq!(orchestrator.state(), LifecycleState::Closed);
        let mut events = orchestrator.subscribe();

        let identity = orchestrator.open().await.unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Ready);
        assert_eq!(orchestrator.identity(), Some(identity));
        assert_eq!(swarm.topics(), vec![identity]);
        assert_eq!(swarm.flush_count(), 1);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.name());
        }
        assert_eq!(
            seen,
            vec!["corestore_ready", "drive_ready", "swarm_ready", "ready"]
        );

        // late subscribers still observe passed milestones
        orchestrator.milestone(Milestone::StoreReady).await.unwrap();
        orchestrator.milestone(Milestone::Ready).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_twice_runs_once() {
        let swarm = MemorySwarm::new();
        let orchestrator = Orchestrator::new(config(&swarm));
        let (a, b) = tokio::join!(orchestrator.open(), orchestrator.open());
        let identity = a.unwrap();
        assert_eq!(identity, b.unwrap());
        assert_eq!(orchestrator.ready().await.unwrap(), identity);
        assert_eq!(swarm.topics().len(), 1);
        assert_eq!(swarm.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_drive_before_open_is_not_ready() {
        let orchestrator = Orchestrator::new(config(&MemorySwarm::new()));
        assert!(matches!(
            orchestrator.drive().await,
            Err(LifecycleError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_through_ready() {
        let swarm = MemorySwarm::failing_join();
        let orchestrator = Orchestrator::start(config(&swarm));

        let result = orchestrator.ready().await;
        assert!(matches!(result, Err(LifecycleError::OpenFailed(_))));
        assert_eq!(orchestrator.state(), LifecycleState::Closed);
        assert!(orchestrator.drive().await.is_err());

        // reached before the failure
        orchestrator.milestone(Milestone::DriveReady).await.unwrap();
        assert!(orchestrator.milestone(Milestone::SwarmReady).await.is_err());

        orchestrator.close().await;
        assert_eq!(swarm.destroy_count(), 1);
        orchestrator.milestone(Milestone::Closed).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_key_fails_open() {
        let mut config = config(&MemorySwarm::new());
        config.key = Some(KeyInput::from("not hex"));
        let orchestrator = Orchestrator::start(config);
        match orchestrator.ready().await {
            Err(LifecycleError::OpenFailed(e)) => assert!(matches!(*e, OpenError::Key(_))),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_before_open_skips_to_teardown() {
        let swarm = MemorySwarm::new();
        let orchestrator = Orchestrator::new(config(&swarm));
        orchestrator.close().await;

        assert_eq!(orchestrator.state(), LifecycleState::Closed);
        assert!(matches!(
            orchestrator.ready().await,
            Err(LifecycleError::Closed)
        ));
        // open after close is inert
        assert!(orchestrator.open().await.is_err());
        assert!(swarm.topics().is_empty());
        assert_eq!(swarm.destroy_count(), 0);
    }

    #[tokio::test]
    async fn test_close_tears_down_in_order() {
        let swarm = MemorySwarm::new();
        let orchestrator = Orchestrator::start(config(&swarm));
        let drive = orchestrator.drive().await.unwrap();

        orchestrator.close().await;
        assert!(drive.is_closed());
        assert_eq!(swarm.destroy_count(), 1);
        assert_eq!(orchestrator.state(), LifecycleState::Closed);
        assert!(matches!(
            orchestrator.drive().await,
            Err(LifecycleError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connections_are_replicated() {
        let swarm = MemorySwarm::new();
        let orchestrator = Orchestrator::start(config(&swarm));
        let drive = orchestrator.drive().await.unwrap();
        drive
            .put(&StoreKey::new("/a.txt"), bytes::Bytes::from("hi"))
            .await
            .unwrap();

        let mut socket = swarm.connect(SecretKey::generate().public()).unwrap();
        let entries = common::peer::protocol::fetch_entries(&mut socket, *drive.key(), 0)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);

        orchestrator.close().await;
    }
}
