mod support;

use axum::http::{Method, StatusCode};

use common::testkit::MemorySwarm;
use drivecast::publish::Publisher;

use support::{anchor, gateway_request, get, start_in_memory};

#[tokio::test]
async fn test_missing_key_lists_descendants_only() -> anyhow::Result<()> {
    let orchestrator = start_in_memory(&MemorySwarm::new());
    let publisher = Publisher::new(orchestrator.clone());
    for key in ["/blog/one.html", "/blog/2024/two.html", "/blogroll.html", "/about.html"] {
        publisher.put_blob(key, "x").await?;
    }

    let listing = get(&orchestrator, "/blog/").await;
    assert_eq!(
        listing,
        format!("{}{}", anchor("/blog/2024/two.html"), anchor("/blog/one.html"))
    );

    assert_eq!(get(&orchestrator, "/nothing/here").await, "");
    orchestrator.close().await;
    Ok(())
}

#[tokio::test]
async fn test_non_get_methods_return_empty_ok() -> anyhow::Result<()> {
    let orchestrator = start_in_memory(&MemorySwarm::new());
    Publisher::new(orchestrator.clone())
        .put_blob("/index.html", "<h1>home</h1>")
        .await?;

    for method in [Method::POST, Method::PUT, Method::DELETE] {
        let (status, _, body) = gateway_request(&orchestrator, method.clone(), "/index.html").await;
        assert_eq!(status, StatusCode::OK, "{}", method);
        assert!(body.is_empty(), "{}", method);
    }

    // the blob is untouched
    assert_eq!(get(&orchestrator, "/index.html").await, "<h1>home</h1>");
    orchestrator.close().await;
    Ok(())
}

#[tokio::test]
async fn test_encoded_paths_and_escaped_listing() -> anyhow::Result<()> {
    let orchestrator = start_in_memory(&MemorySwarm::new());
    let publisher = Publisher::new(orchestrator.clone());
    publisher.put_blob("/docs/my file.js", "let a = 1;").await?;
    publisher.put_blob("/docs/\"quoted\".html", "q").await?;

    let (_, content_type, body) =
        gateway_request(&orchestrator, Method::GET, "/docs/my%20file.js").await;
    assert_eq!(content_type.as_deref(), Some("application/javascript"));
    assert_eq!(body, "let a = 1;");

    let listing = get(&orchestrator, "/docs").await;
    assert!(listing.contains("<a href=\"/docs/&quot;quoted&quot;.html\">"));
    assert!(listing.contains(&anchor("/docs/my file.js")));

    orchestrator.close().await;
    Ok(())
}
