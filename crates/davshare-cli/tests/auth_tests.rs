//! Basic-auth gating over a live server.

mod common;

use common::TestServer;
use reqwest::StatusCode;

#[tokio::test]
async fn test_missing_credentials_get_challenge() {
    let server = TestServer::with_auth("alice", "s3cret").await;

    let resp = server.get("/").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.starts_with("Basic"), "unexpected challenge {challenge}");
}

#[tokio::test]
async fn test_wrong_credentials_rejected() {
    let server = TestServer::with_auth("alice", "s3cret").await;

    let resp = server
        .client
        .get(server.url("/"))
        .basic_auth("alice", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_credentials_accepted() {
    let server = TestServer::with_auth("alice", "s3cret").await;

    let resp = server
        .client
        .put(server.url("/f"))
        .basic_auth("alice", Some("s3cret"))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = server
        .client
        .get(server.url("/f"))
        .basic_auth("alice", Some("s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "data");
}

#[tokio::test]
async fn test_dav_methods_also_guarded() {
    let server = TestServer::with_auth("alice", "s3cret").await;
    // Discovery must not leak without credentials.
    let resp = server.propfind("/", "1").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server
        .client
        .request(TestServer::method("PROPFIND"), server.url("/"))
        .header("Depth", "0")
        .basic_auth("alice", Some("s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 207);
}

#[tokio::test]
async fn test_no_auth_configured_serves_openly() {
    let server = TestServer::start().await;
    let resp = server.propfind("/", "0").await;
    assert_eq!(resp.status().as_u16(), 207);
}
