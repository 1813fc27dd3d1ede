//! Shared fixture for engine integration tests.
//!
//! Drives the dispatcher directly with `http` requests over a temp
//! directory, no sockets involved.

#![allow(dead_code)]

use bytes::Bytes;
use davshare_dav::{DavConfig, DavHandler, LocalFs};
use http::{HeaderMap, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Fixture {
    handler: DavHandler,
    _tmp: TempDir,
}

/// A fully-read response.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(DavConfig::default())
    }

    pub fn with_config(config: DavConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let handler = DavHandler::new(config, Arc::new(LocalFs::new(tmp.path())));
        Fixture { handler, _tmp: tmp }
    }

    pub async fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder.body(Full::new(body.into())).unwrap();
        let resp = self.handler.handle(req).await;
        let (parts, body) = resp.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        Reply {
            status: parts.status,
            headers: parts.headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn put_ok(&self, path: &str, content: &str) {
        let reply = self.send("PUT", path, &[], content.to_string()).await;
        assert!(reply.status.is_success(), "PUT {path} failed: {}", reply.status);
    }

    pub async fn mkcol_ok(&self, path: &str) {
        let reply = self.send("MKCOL", path, &[], "").await;
        assert_eq!(reply.status, StatusCode::CREATED, "MKCOL {path} failed");
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.send("GET", path, &[], "").await
    }

    pub async fn propfind(&self, path: &str, depth: &str, body: &str) -> Reply {
        self.send("PROPFIND", path, &[("Depth", depth)], body.to_string()).await
    }

    /// Take an exclusive depth-0 lock; returns the reply for inspection.
    pub async fn lock(&self, path: &str) -> Reply {
        let body = r#"<D:lockinfo xmlns:D="DAV:">
            <D:lockscope><D:exclusive/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
            <D:owner>tests</D:owner>
        </D:lockinfo>"#;
        self.send("LOCK", path, &[("Depth", "0")], body.to_string()).await
    }
}

/// Pull the token out of a LOCK reply's Lock-Token header.
pub fn lock_token(reply: &Reply) -> String {
    reply
        .headers
        .get("lock-token")
        .expect("LOCK reply has no Lock-Token header")
        .to_str()
        .unwrap()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

/// Format a token for an If header: `(<token>)`.
pub fn if_token(token: &str) -> String {
    format!("(<{token}>)")
}
