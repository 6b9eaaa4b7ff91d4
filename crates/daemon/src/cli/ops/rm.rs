use std::path::PathBuf;

use clap::Args;

use common::peer::SwarmProvider;
use common::store::StoreKey;
use drivecast::lifecycle::{LifecycleError, Orchestrator};
use drivecast::publish::{PublishError, Publisher};
use drivecast::service_config::ConfigLayer;

/// Delete keys from a drive on disk, without joining the swarm
#[derive(Args, Debug, Clone)]
pub struct Rm {
    /// Directory the drive is kept in
    pub storage_dir: PathBuf,

    /// Key prefix to delete below
    pub prefix: String,

    /// Hex key of the drive
    #[arg(long)]
    pub key: Option<String>,

    /// Also delete keys in nested prefixes
    #[arg(long, short)]
    pub recursive: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RmError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rm {
    type Error = RmError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = ctx.resolve(ConfigLayer {
            storage_dir: Some(self.storage_dir.clone()),
            key: self.key.clone(),
            ..ConfigLayer::default()
        });

        let orchestrator = Orchestrator::start(config.lifecycle(SwarmProvider::Offline));
        if let Err(e) = orchestrator.ready().await {
            orchestrator.close().await;
            return Err(e.into());
        }

        let publisher = Publisher::new(orchestrator.clone());
        let result = publisher
            .delete(&StoreKey::new(&self.prefix), self.recursive)
            .await;
        orchestrator.close().await;

        let deleted = result?;
        Ok(deleted
            .iter()
            .map(StoreKey::as_str)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
