//! Shared fixture: a real server on an ephemeral port, driven over HTTP.

#![allow(dead_code)]

use davshare_cli::{BasicAuth, Server, ServerConfig};
use davshare_dav::DavConfig;
use reqwest::{Method, Response};
use tempfile::TempDir;

pub struct TestServer {
    server: Option<Server>,
    base: String,
    pub client: reqwest::Client,
    _tmp: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(None, DavConfig::default()).await
    }

    pub async fn with_auth(user: &str, password: &str) -> Self {
        Self::start_with(Some(BasicAuth::new(user, password)), DavConfig::default()).await
    }

    pub async fn read_only() -> Self {
        Self::start_with(None, DavConfig { read_only: true, ..DavConfig::default() }).await
    }

    pub async fn start_with(auth: Option<BasicAuth>, dav: DavConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            root: tmp.path().to_path_buf(),
            addr: "127.0.0.1:0".parse().unwrap(),
            auth,
            dav,
        };
        let server = Server::start(config).await.unwrap();
        let base = server.url();
        TestServer {
            server: Some(server),
            base,
            client: reqwest::Client::new(),
            _tmp: tmp,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn method(name: &str) -> Method {
        Method::from_bytes(name.as_bytes()).unwrap()
    }

    pub async fn put_ok(&self, path: &str, content: &str) {
        let resp = self
            .client
            .put(self.url(path))
            .body(content.to_string())
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "PUT {path}: {}", resp.status());
    }

    pub async fn mkcol_ok(&self, path: &str) {
        let resp = self
            .client
            .request(Self::method("MKCOL"), self.url(path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 201, "MKCOL {path}");
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn propfind(&self, path: &str, depth: &str) -> Response {
        self.client
            .request(Self::method("PROPFIND"), self.url(path))
            .header("Depth", depth)
            .send()
            .await
            .unwrap()
    }

    pub async fn stop(mut self) {
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
    }
}
