//! Browser-facing directory listings.

mod common;

use common::TestServer;
use reqwest::StatusCode;

#[tokio::test]
async fn test_get_collection_serves_html_index() {
    let server = TestServer::start().await;
    server.put_ok("/beta.txt", "b").await;
    server.mkcol_ok("/alpha").await;

    let resp = server.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/html"));

    let html = resp.text().await.unwrap();
    assert!(html.contains("<a href=\"alpha/\">alpha/</a>"));
    assert!(html.contains("<a href=\"beta.txt\">beta.txt</a>"));
    // Collections sort like everything else; alpha comes first.
    assert!(html.find("alpha/").unwrap() < html.find("beta.txt").unwrap());
}

#[tokio::test]
async fn test_subdirectory_listing_has_parent_link() {
    let server = TestServer::start().await;
    server.mkcol_ok("/sub").await;
    server.put_ok("/sub/inner.txt", "x").await;

    let resp = server.get("/sub/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    assert!(html.contains("<a href=\"..\">..</a>"));
    assert!(html.contains("inner.txt"));

    // Root has no parent link.
    let html = server.get("/").await.text().await.unwrap();
    assert!(!html.contains("href=\"..\""));
}

#[tokio::test]
async fn test_get_file_bypasses_listing() {
    let server = TestServer::start().await;
    server.put_ok("/plain.txt", "payload").await;

    let resp = server.get("/plain.txt").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "payload");
}

#[tokio::test]
async fn test_get_missing_path_is_404() {
    let server = TestServer::start().await;
    assert_eq!(server.get("/nope").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listing_available_in_read_only_mode() {
    let server = TestServer::read_only().await;
    let resp = server.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("<pre>"));
}
