use std::borrow::Cow;

use askama::Template;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use mime::Mime;

use common::store::{ListOptions, StoreKey};

use crate::lifecycle::Orchestrator;

#[derive(Template)]
#[template(path = "listing.html")]
pub struct ListingTemplate<'a> {
    pub keys: &'a [String],
}

/// Content type served for a blob, by the key's extension
pub fn content_type(key: &StoreKey) -> Mime {
    let key = key.as_str();
    if key.ends_with(".html") {
        mime::TEXT_HTML
    } else if key.ends_with(".css") {
        mime::TEXT_CSS
    } else if key.ends_with(".js") {
        mime::APPLICATION_JAVASCRIPT
    } else {
        mime::TEXT_HTML
    }
}

/// The key a request path names
pub fn request_key(uri: &Uri) -> StoreKey {
    let path = uri.path();
    let decoded = urlencoding::decode(path).unwrap_or(Cow::Borrowed(path));
    StoreKey::new(&decoded)
}

/// Serve the blob at the request path, or a listing of the keys below it
pub async fn handler(State(orchestrator): State<Orchestrator>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return StatusCode::OK.into_response();
    }
    let key = request_key(&uri);

    let drive = match orchestrator.drive().await {
        Ok(drive) => drive,
        Err(e) => {
            tracing::warn!(key = %key, "drive unavailable: {}", e);
            return StatusCode::OK.into_response();
        }
    };

    match drive.get(&key).await {
        Ok(Some(blob)) => {
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type(&key).to_string())],
                blob,
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(key = %key, "failed to read blob: {}", e);
            return StatusCode::OK.into_response();
        }
    }

    let keys: Vec<String> = match drive
        .list(&key, ListOptions::recursive())
        .map_ok(|entry| entry.key.to_string())
        .try_collect()
        .await
    {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(key = %key, "failed to list keys: {}", e);
            return StatusCode::OK.into_response();
        }
    };

    let template = ListingTemplate { keys: &keys };
    match template.render() {
        Ok(html) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime::TEXT_HTML.to_string())],
            html,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to render listing template: {}", e);
            StatusCode::OK.into_response()
        }
    }
}
