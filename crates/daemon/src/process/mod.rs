pub mod utils;

use std::path::Path;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::http_server;
use crate::lifecycle::Orchestrator;

/// Setting this (to anything) turns on debug logging
pub const DEBUG_ENV_VAR: &str = "DRIVECAST_DEBUG";
const LOG_FILE_NAME: &str = "drivecast.log";

/// The default log level: warnings only, unless debugging is requested
pub fn default_log_level() -> LevelFilter {
    if std::env::var_os(DEBUG_ENV_VAR).is_some() {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(log_dir: Option<&Path>) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let level = default_log_level();
    let mut guards = Vec::new();

    // Stderr layer; stdout is reserved for command output
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let stderr_env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stderr_writer)
        .with_filter(stderr_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stderr_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Spawn the gateway, logging rather than returning its failure
pub fn spawn_gateway(
    config: http_server::Config,
    orchestrator: Orchestrator,
    shutdown_rx: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = http_server::run_gateway(config, orchestrator, shutdown_rx).await {
            tracing::error!("gateway server error: {}", e);
        }
    })
}

/// Block until the first shutdown signal, then close the lifecycle and
///  wait for the given tasks (the gateway) to wind down
pub async fn close_on_shutdown(
    orchestrator: &Orchestrator,
    mut shutdown_rx: watch::Receiver<()>,
    tasks: Vec<JoinHandle<()>>,
) {
    if shutdown_rx.changed().await.is_err() {
        tracing::warn!("shutdown signal listener went away, closing");
    }
    orchestrator.close().await;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("task failed during shutdown: {}", e);
        }
    }
}
