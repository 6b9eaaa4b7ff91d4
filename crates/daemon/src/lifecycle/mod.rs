mod orchestrator;
mod state;

pub use orchestrator::{LifecycleConfig, Orchestrator};
pub use state::{LifecycleError, LifecycleState, Milestone, OpenError};
