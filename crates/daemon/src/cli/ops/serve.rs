use std::path::PathBuf;

use clap::Args;

use drivecast::http_server;
use drivecast::lifecycle::{LifecycleError, Orchestrator};
use drivecast::process::{self, utils};
use drivecast::service_config::ConfigLayer;

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Directory the drive is kept in (in memory if not set)
    pub storage_dir: Option<PathBuf>,

    /// Hex key of the drive to serve
    #[arg(long)]
    pub key: Option<String>,

    /// Gateway port (default 8080)
    #[arg(long)]
    pub port: Option<u16>,

    /// Port peers connect on (ephemeral if not set)
    #[arg(long)]
    pub peer_port: Option<u16>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = ctx.resolve(ConfigLayer {
            storage_dir: self.storage_dir.clone(),
            key: self.key.clone(),
            port: self.port,
            peer_port: self.peer_port,
            ..ConfigLayer::default()
        });

        let (_signal_task, _shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
        let orchestrator = Orchestrator::start(config.lifecycle(config.swarm()));
        super::announce_ready(&orchestrator).await?;

        let gateway = process::spawn_gateway(
            http_server::Config::on_port(config.port),
            orchestrator.clone(),
            shutdown_rx.clone(),
        );
        process::close_on_shutdown(&orchestrator, shutdown_rx, vec![gateway]).await;
        Ok(String::new())
    }
}
