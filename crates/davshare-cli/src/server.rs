//! HTTP server lifecycle.
//!
//! Owns the listener and the per-connection tasks, and layers the
//! daemon's concerns (Basic auth, browser directory listings) in front
//! of the protocol engine.

use crate::auth::{self, BasicAuth};
use crate::listing;
use davshare_dav::{DavBody, DavConfig, DavError, DavHandler, DavPath, DavFileSystem, LocalFs};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Everything the daemon needs to run.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory served as the DAV root.
    pub root: PathBuf,
    /// Bind address (port 0 = auto-assign).
    pub addr: SocketAddr,
    /// Optional Basic auth credentials; `None` serves unauthenticated.
    pub auth: Option<BasicAuth>,
    /// Protocol engine knobs.
    pub dav: DavConfig,
}

struct AppState {
    handler: DavHandler,
    fs: Arc<LocalFs>,
    auth: Option<BasicAuth>,
}

/// A running server instance.
pub struct Server {
    /// The actual bound address.
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    /// Bind and start serving in a background task.
    pub async fn start(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.addr).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, root = %config.root.display(), read_only = config.dav.read_only, "starting WebDAV server");

        let fs = Arc::new(LocalFs::new(config.root));
        let state = Arc::new(AppState {
            handler: DavHandler::new(config.dav, fs.clone()),
            fs,
            auth: config.auth,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_handle = tokio::spawn(async move {
            tokio::select! {
                () = accept_loop(listener, state) => {
                    debug!("accept loop ended");
                }
                _ = shutdown_rx => {
                    info!("received shutdown signal");
                }
            }
        });

        Ok(Server { addr, shutdown_tx: Some(shutdown_tx), server_handle: Some(server_handle) })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signal shutdown and wait for the accept loop to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        info!("server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(serve_request(&state, req).await) }
                    });
                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        debug!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn serve_request(state: &AppState, req: Request<Incoming>) -> Response<DavBody> {
    if let Some(auth) = &state.auth {
        if !auth.check(req.headers()) {
            debug!(method = %req.method(), path = %req.uri().path(), "unauthorized");
            return auth::unauthorized();
        }
    }

    // Browsers GET collections; serve an index page for those instead of
    // the engine's 405.
    if req.method() == Method::GET || req.method() == Method::HEAD {
        if let Some(resp) = try_dir_listing(state, &req).await {
            return resp;
        }
    }

    state.handler.handle(req).await
}

/// Render a directory listing when the request targets a collection.
/// Any miss (bad path, not found, not a collection) falls through to the
/// engine, which produces the proper DAV answer.
async fn try_dir_listing(state: &AppState, req: &Request<Incoming>) -> Option<Response<DavBody>> {
    let path = DavPath::parse(req.uri().path()).ok()?;
    let meta = state.fs.stat(&path).await.ok()?;
    if !meta.is_collection {
        return None;
    }

    let entries = match state.fs.read_dir(&path).await {
        Ok(entries) => entries,
        Err(DavError::NotFound) => return None,
        Err(e) => {
            warn!(path = %path, error = %e, "listing failed");
            let mut resp = Response::new(DavBody::full("directory listing failed\n"));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return Some(resp);
        }
    };

    let html = listing::render(&path.href(true), &entries);
    let body = if req.method() == Method::HEAD { DavBody::empty() } else { DavBody::full(html) };
    let mut resp = Response::new(body);
    resp.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Some(resp)
}
