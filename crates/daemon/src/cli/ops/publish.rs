use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Args;

use drivecast::http_server;
use drivecast::ingest::{spawn_decoder, Ingestor, RECORD_BUFFER};
use drivecast::lifecycle::{LifecycleError, Orchestrator};
use drivecast::process::{self, utils};
use drivecast::publish::{PublishError, Publisher, DEFAULT_GLOB};
use drivecast::service_config::ConfigLayer;

#[derive(Args, Debug, Clone)]
pub struct Publish {
    /// Directory to keep the drive in (in memory if not set)
    pub storage_dir: Option<PathBuf>,

    /// Directory whose files are published under --url
    pub content_dir: Option<PathBuf>,

    /// Prefix content is published under (default /)
    #[arg(long)]
    pub url: Option<String>,

    /// Prefix assets from the input stream are published under (default /)
    #[arg(long)]
    pub assets: Option<String>,

    /// Hex key of an existing drive to open
    #[arg(long)]
    pub key: Option<String>,

    /// Also serve the drive over HTTP
    #[arg(long)]
    pub serve: bool,

    /// Gateway port (default 8080)
    #[arg(long)]
    pub port: Option<u16>,

    /// Port peers connect on (ephemeral if not set)
    #[arg(long)]
    pub peer_port: Option<u16>,

    /// Which files under CONTENT_DIR to publish
    #[arg(long, default_value = DEFAULT_GLOB)]
    pub glob: String,
}

impl Publish {
    fn flags(&self) -> ConfigLayer {
        ConfigLayer {
            storage_dir: self.storage_dir.clone(),
            key: self.key.clone(),
            url: self.url.clone(),
            assets: self.assets.clone(),
            port: self.port,
            peer_port: self.peer_port,
            log_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishOpError {
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Publish {
    type Error = PublishOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = ctx.resolve(self.flags());
        tracing::debug!(?config, "publish");

        let (_signal_task, _shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
        let orchestrator = Orchestrator::start(config.lifecycle(config.swarm()));
        super::announce_ready(&orchestrator).await?;

        let publisher = Publisher::new(orchestrator.clone());
        if let Some(content_dir) = &self.content_dir {
            match publisher
                .put_directory(&config.url, content_dir, &self.glob)
                .await
            {
                Ok(published) => {
                    tracing::info!(files = published.len(), "published content directory")
                }
                Err(e) => {
                    orchestrator.close().await;
                    return Err(e.into());
                }
            }
        }

        let ingest_task = (!std::io::stdin().is_terminal()).then(|| {
            let ingestor = Ingestor::new(publisher.clone(), config.url.clone(), config.assets.clone());
            let records = spawn_decoder(std::io::stdin(), RECORD_BUFFER);
            tokio::spawn(async move {
                ingestor.run(records.into_stream()).await;
            })
        });

        let mut tasks = Vec::new();
        if self.serve {
            tasks.push(process::spawn_gateway(
                http_server::Config::on_port(config.port),
                orchestrator.clone(),
                shutdown_rx.clone(),
            ));
        }

        process::close_on_shutdown(&orchestrator, shutdown_rx, tasks).await;
        if let Some(task) = ingest_task {
            task.abort();
        }
        Ok(String::new())
    }
}
