// Core: lifecycle, publishing and ingestion
pub mod ingest;
pub mod lifecycle;
pub mod publish;

// Service modules
pub mod http_server;
pub mod process;
pub mod service_config;

pub use ingest::{IngestRecord, IngestSummary, Ingestor};
pub use lifecycle::{LifecycleConfig, LifecycleError, LifecycleState, Milestone, Orchestrator};
pub use publish::{PublishError, PublishedEntry, Publisher, PutOutcome};
pub use service_config::Config as ServiceConfig;
