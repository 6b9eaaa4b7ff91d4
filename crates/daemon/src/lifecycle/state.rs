use std::fmt;
use std::sync::Arc;

use common::crypto::{DriveIdentity, KeyError};
use common::peer::SwarmError;
use common::store::CorestoreError;

/// Where an [`Orchestrator`](super::Orchestrator) is in its open/close
///  sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Closed,
    OpeningStore,
    OpeningDrive,
    OpeningSwarm,
    Ready,
    Closing,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Closed => "closed",
            LifecycleState::OpeningStore => "opening_store",
            LifecycleState::OpeningDrive => "opening_drive",
            LifecycleState::OpeningSwarm => "opening_swarm",
            LifecycleState::Ready => "ready",
            LifecycleState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// A lifecycle notification. Each is reached at most once per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Milestone {
    StoreReady,
    DriveReady,
    SwarmReady,
    Ready,
    Closed,
}

impl Milestone {
    pub fn name(&self) -> &'static str {
        match self {
            Milestone::StoreReady => "corestore_ready",
            Milestone::DriveReady => "drive_ready",
            Milestone::SwarmReady => "swarm_ready",
            Milestone::Ready => "ready",
            Milestone::Closed => "close",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of one step of the open sequence
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("invalid drive key: {0}")]
    Key(#[from] KeyError),
    #[error("failed to open corestore: {0}")]
    Corestore(#[from] CorestoreError),
    #[error("failed to start swarm: {0}")]
    Swarm(#[from] SwarmError),
    #[error("open task aborted: {0}")]
    Aborted(String),
}

/// Why the lifecycle cannot hand out a drive
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    OpenFailed(Arc<OpenError>),
    #[error("lifecycle has not been opened")]
    NotReady,
    #[error("lifecycle is closed")]
    Closed,
}

/// Everything observers can learn about the lifecycle, published through
///  a watch so late subscribers see what already happened
#[derive(Debug, Clone, Default)]
pub(crate) struct Progress {
    pub state: LifecycleState,
    pub reached: Vec<Milestone>,
    /// Set once the open sequence settles, or when close preempts it
    pub opened: Option<Result<DriveIdentity, LifecycleError>>,
}

impl Progress {
    pub fn has_reached(&self, milestone: Milestone) -> bool {
        self.reached.contains(&milestone)
    }

    /// Whether `milestone` is reached or can no longer be
    pub fn settles(&self, milestone: Milestone) -> bool {
        if self.has_reached(milestone) {
            return true;
        }
        match milestone {
            Milestone::Closed => false,
            _ => matches!(self.opened, Some(Err(_))),
        }
    }
}
