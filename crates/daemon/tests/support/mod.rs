#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use common::prelude::*;
use common::testkit::MemorySwarm;
use drivecast::http_server;
use drivecast::lifecycle::{LifecycleConfig, Orchestrator};

pub fn lifecycle(storage: Storage, swarm: &MemorySwarm) -> LifecycleConfig {
    LifecycleConfig {
        storage,
        key: None,
        swarm: SwarmProvider::Custom(Arc::new(swarm.clone())),
    }
}

/// An in-memory lifecycle on an in-process swarm, already opening
pub fn start_in_memory(swarm: &MemorySwarm) -> Orchestrator {
    Orchestrator::start(lifecycle(Storage::Memory, swarm))
}

/// Send one request through the gateway router, returning status,
///  content type and body
pub async fn gateway_request(
    orchestrator: &Orchestrator,
    method: Method,
    path: &str,
) -> (StatusCode, Option<String>, String) {
    let router = http_server::router(orchestrator.clone(), tracing::Level::DEBUG);
    let request = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

pub async fn get(orchestrator: &Orchestrator, path: &str) -> String {
    let (status, _, body) = gateway_request(orchestrator, Method::GET, path).await;
    assert_eq!(status, StatusCode::OK);
    body
}

pub fn anchor(key: &str) -> String {
    format!("<a href=\"{key}\">{key}</a></br>")
}
