use axum::http::header::{ACCEPT, ORIGIN};
use axum::http::Method;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

mod config;
pub mod gateway;

pub use config::Config;

use crate::lifecycle::Orchestrator;

/// The gateway: every path goes to one fallback handler
pub fn router(orchestrator: Orchestrator, log_level: tracing::Level) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    // Gateway CORS (GET only)
    let gateway_cors = CorsLayer::new()
        .allow_methods(vec![Method::GET])
        .allow_headers(vec![ACCEPT, ORIGIN])
        .allow_origin(Any)
        .allow_credentials(false);

    Router::new()
        .fallback(gateway::handler)
        .with_state(orchestrator)
        .layer(gateway_cors)
        .layer(trace_layer)
}

/// Run the gateway HTTP server until `shutdown_rx` fires
pub async fn run_gateway(
    config: Config,
    orchestrator: Orchestrator,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listen_addr = config.listen_addr;
    let router = router(orchestrator, config.log_level);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = ?listen_addr, "gateway server listening");
    eprintln!("Server running at http://localhost:{}", listen_addr.port());

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
