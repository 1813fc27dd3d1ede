//! WebDAV method dispatcher.
//!
//! One handler invocation per inbound request: parse path and protocol
//! headers, gate read-only mode, evaluate `If`/lock preconditions, run
//! the method action against the filesystem, lock manager, and property
//! store, then encode the response. The handler is transport-agnostic:
//! it consumes any `http_body::Body` and produces a [`DavBody`].

use crate::body::DavBody;
use crate::error::{DavError, DavResult};
use crate::fs::{ByteStream, DavFileSystem, ResourceMeta};
use crate::headers::{self, Depth, IfCondition, IfHeader};
use crate::lock::{Lock, LockDepth, LockManager, LockScope};
use crate::multistatus::{MsKind, MsResponse, MultiStatus, PropStat, PropValue};
use crate::path::DavPath;
use crate::props::{self, DeadProp, PatchOp, PropName, PropertyStore};
use crate::xml::{self, escape_text, Element, DAV_NS};
use bytes::{Buf, Bytes};
use futures::StreamExt;
use http::header::{HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyStream;
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Upper bound for buffered XML request bodies.
const MAX_XML_BODY: usize = 1 << 20;

/// Methods rejected before dispatch in read-only mode.
const MUTATING_METHODS: &[&str] = &["PUT", "DELETE", "PROPPATCH", "MKCOL", "COPY", "MOVE"];

/// `DAV:supportedlock` value advertised for every resource.
const SUPPORTEDLOCK_XML: &str = "<D:lockentry><D:lockscope><D:exclusive/></D:lockscope>\
     <D:locktype><D:write/></D:locktype></D:lockentry>\
     <D:lockentry><D:lockscope><D:shared/></D:lockscope>\
     <D:locktype><D:write/></D:locktype></D:lockentry>";

/// Immutable engine configuration, passed in explicitly so the handler
/// stays testable without process-level fixtures.
#[derive(Debug, Clone)]
pub struct DavConfig {
    /// Reject mutating methods with 403 before dispatch.
    pub read_only: bool,
    /// Whether a PROPFIND without a Depth header means `infinity`
    /// (RFC default) or `0`. Protocol-ambiguous, so configurable.
    pub propfind_default_infinity: bool,
    /// Whether depth-infinity PROPFIND is served at all.
    pub allow_propfind_infinity: bool,
    /// Lock timeout granted when the client requests none.
    pub lock_default_timeout: Duration,
    /// Hard cap on client-requested lock timeouts.
    pub lock_max_timeout: Duration,
}

impl Default for DavConfig {
    fn default() -> Self {
        DavConfig {
            read_only: false,
            propfind_default_infinity: true,
            allow_propfind_infinity: true,
            lock_default_timeout: Duration::from_secs(3600),
            lock_max_timeout: Duration::from_secs(3600),
        }
    }
}

/// The protocol engine: dispatches parsed requests against a filesystem.
pub struct DavHandler {
    config: DavConfig,
    fs: Arc<dyn DavFileSystem>,
    locks: LockManager,
    props: PropertyStore,
}

enum PropfindMode {
    AllProp,
    PropName,
    Props(Vec<PropName>),
}

impl DavHandler {
    pub fn new(config: DavConfig, fs: Arc<dyn DavFileSystem>) -> Self {
        let locks = LockManager::new(config.lock_default_timeout, config.lock_max_timeout);
        DavHandler { config, fs, locks, props: PropertyStore::new() }
    }

    pub fn config(&self) -> &DavConfig {
        &self.config
    }

    /// Handle one request. Never fails: protocol errors become their
    /// mapped status responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<DavBody>
    where
        B: http_body::Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    {
        let method = req.method().clone();
        let uri_path = req.uri().path().to_string();
        let (parts, body) = req.into_parts();

        let result = self.dispatch(&method, &uri_path, &parts.headers, body).await;
        match result {
            Ok(resp) => {
                trace!(method = %method, path = %uri_path, status = %resp.status(), "request done");
                resp
            }
            Err(e) => {
                debug!(method = %method, path = %uri_path, error = %e, "request failed");
                error_response(&e)
            }
        }
    }

    async fn dispatch<B>(
        &self,
        method: &Method,
        uri_path: &str,
        headers: &HeaderMap,
        body: B,
    ) -> DavResult<Response<DavBody>>
    where
        B: http_body::Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    {
        let path = DavPath::parse(uri_path)?;

        if self.config.read_only && MUTATING_METHODS.contains(&method.as_str()) {
            return Err(DavError::Forbidden("read-only mode"));
        }

        match method.as_str() {
            "OPTIONS" => Ok(self.options()),
            "GET" => self.get(headers, &path, true).await,
            "HEAD" => self.get(headers, &path, false).await,
            "PUT" => self.put(headers, &path, into_stream(body)).await,
            "DELETE" => self.delete(headers, &path).await,
            "MKCOL" => self.mkcol(headers, &path, into_stream(body)).await,
            "COPY" => self.copy_or_move(headers, &path, false).await,
            "MOVE" => self.copy_or_move(headers, &path, true).await,
            "PROPFIND" => self.propfind(headers, &path, into_stream(body)).await,
            "PROPPATCH" => self.proppatch(headers, &path, into_stream(body)).await,
            "LOCK" => self.lock(headers, &path, into_stream(body)).await,
            "UNLOCK" => self.unlock(headers, &path).await,
            _ => Ok(method_not_allowed()),
        }
    }

    fn options(&self) -> Response<DavBody> {
        let mut resp = empty_response(StatusCode::OK);
        let h = resp.headers_mut();
        h.insert("dav", HeaderValue::from_static("1, 2"));
        h.insert("ms-author-via", HeaderValue::from_static("DAV"));
        h.insert(
            "allow",
            HeaderValue::from_static(
                "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE, PROPFIND, PROPPATCH, LOCK, UNLOCK",
            ),
        );
        resp
    }

    async fn get(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        include_body: bool,
    ) -> DavResult<Response<DavBody>> {
        let meta = self.fs.stat(path).await?;
        if meta.is_collection {
            // Collections have no content here; the front end may serve
            // a directory-listing page before dispatch.
            return Ok(method_not_allowed());
        }

        let range = parse_range(headers, meta.len);
        let (status, offset, len) = match range {
            Some(RangeSpec::Satisfiable { offset, len }) => {
                (StatusCode::PARTIAL_CONTENT, offset, len)
            }
            Some(RangeSpec::Unsatisfiable) => {
                let mut resp = empty_response(StatusCode::RANGE_NOT_SATISFIABLE);
                set_header(&mut resp, "content-range", &format!("bytes */{}", meta.len));
                return Ok(resp);
            }
            None => (StatusCode::OK, 0, meta.len),
        };

        let body = if include_body {
            DavBody::stream(self.fs.open_read(path, offset, Some(len)).await?)
        } else {
            DavBody::empty()
        };

        let mut resp = Response::new(body);
        *resp.status_mut() = status;
        let h = resp.headers_mut();
        h.insert("content-type", HeaderValue::from_static("application/octet-stream"));
        h.insert("accept-ranges", HeaderValue::from_static("bytes"));
        set_header(&mut resp, "content-length", &len.to_string());
        set_header(&mut resp, "etag", &meta.etag);
        if let Some(modified) = meta.modified {
            set_header(&mut resp, "last-modified", &props::httpdate(modified));
        }
        if status == StatusCode::PARTIAL_CONTENT {
            set_header(
                &mut resp,
                "content-range",
                &format!("bytes {}-{}/{}", offset, offset + len - 1, meta.len),
            );
        }
        Ok(resp)
    }

    async fn put(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        data: ByteStream,
    ) -> DavResult<Response<DavBody>> {
        self.check_preconditions(headers, path, false).await?;

        let existed = match self.fs.stat(path).await {
            Ok(meta) if meta.is_collection => {
                return Err(DavError::Conflict("target is a collection"));
            }
            Ok(_) => true,
            Err(DavError::NotFound) => false,
            Err(e) => return Err(e),
        };

        let meta = self.fs.write_atomic(path, data).await?;
        debug!(path = %path, len = meta.len, "put committed");

        let mut resp = empty_response(if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED });
        set_header(&mut resp, "etag", &meta.etag);
        Ok(resp)
    }

    async fn delete(&self, headers: &HeaderMap, path: &DavPath) -> DavResult<Response<DavBody>> {
        if path.is_root() {
            return Err(DavError::Forbidden("cannot delete the root collection"));
        }
        let meta = self.fs.stat(path).await?;
        self.check_preconditions(headers, path, meta.is_collection).await?;

        if meta.is_collection {
            // DELETE on a collection always acts as depth infinity.
            if headers::depth(headers, Depth::Infinity)? != Depth::Infinity {
                return Err(DavError::BadRequest("DELETE on a collection requires depth infinity".into()));
            }
            self.fs.remove_dir_all(path).await?;
        } else {
            self.fs.remove_file(path).await?;
        }
        self.locks.remove_tree(path);
        self.props.remove_tree(path);
        debug!(path = %path, collection = meta.is_collection, "deleted");
        Ok(empty_response(StatusCode::NO_CONTENT))
    }

    async fn mkcol(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        data: ByteStream,
    ) -> DavResult<Response<DavBody>> {
        // Request bodies for MKCOL are not understood.
        if !collect_body(data).await?.is_empty() {
            return Err(DavError::UnsupportedMediaType);
        }
        self.check_preconditions(headers, path, false).await?;
        self.fs.create_dir(path).await?;
        debug!(path = %path, "collection created");
        Ok(empty_response(StatusCode::CREATED))
    }

    async fn copy_or_move(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        is_move: bool,
    ) -> DavResult<Response<DavBody>> {
        let dest = headers::destination(headers)?
            .ok_or_else(|| DavError::BadRequest("missing Destination header".into()))?;
        let overwrite = headers::overwrite(headers)?;
        let depth = headers::depth(headers, Depth::Infinity)?;
        if depth == Depth::One || (is_move && depth != Depth::Infinity) {
            return Err(DavError::BadRequest("invalid Depth for COPY/MOVE".into()));
        }

        let src_meta = self.fs.stat(path).await?;
        if dest == *path {
            return Err(DavError::Forbidden("source and destination are the same resource"));
        }
        if path.is_ancestor_of(&dest) {
            return Err(DavError::Conflict("cannot copy a collection into itself"));
        }
        // The other direction is just as fatal: clearing the destination
        // would take the source down with it.
        if dest.is_ancestor_of(path) {
            return Err(DavError::Conflict("destination contains the source"));
        }

        let dest_parent = dest.parent().ok_or(DavError::Forbidden("invalid destination"))?;
        match self.fs.stat(&dest_parent).await {
            Ok(m) if m.is_collection => {}
            Ok(_) | Err(DavError::NotFound) => {
                return Err(DavError::Conflict("destination parent does not exist"));
            }
            Err(e) => return Err(e),
        }

        let dest_meta = match self.fs.stat(&dest).await {
            Ok(m) => Some(m),
            Err(DavError::NotFound) => None,
            Err(e) => return Err(e),
        };
        if dest_meta.is_some() && !overwrite {
            return Err(DavError::PreconditionFailed);
        }

        // MOVE consumes the source subtree; both verbs touch the
        // destination. One evaluation of the If header covers both
        // checks, with the source as the default resource.
        let submitted = self.check_preconditions(headers, path, is_move && src_meta.is_collection).await?;
        self.locks
            .check(&dest, &submitted, true)
            .map_err(|_| DavError::Locked)?;

        if let Some(m) = &dest_meta {
            if m.is_collection {
                self.fs.remove_dir_all(&dest).await?;
            } else {
                self.fs.remove_file(&dest).await?;
            }
            self.locks.remove_tree(&dest);
            self.props.remove_tree(&dest);
        }

        if is_move {
            self.fs.rename(path, &dest).await?;
            self.props.move_tree(path, &dest);
            // Locks do not travel with a moved resource.
            self.locks.remove_tree(path);
        } else if !src_meta.is_collection {
            self.fs.copy_file(path, &dest).await?;
            self.props.copy_tree(path, &dest);
        } else if depth == Depth::Zero {
            self.fs.create_dir(&dest).await?;
            // Only the collection itself is duplicated, so only its own
            // dead properties come along.
            for prop in self.props.get(path) {
                let _ = self.props.patch(&dest, &[PatchOp::Set(prop)]);
            }
        } else {
            self.copy_tree(path, &dest).await?;
            self.props.copy_tree(path, &dest);
        }

        debug!(
            from = %path,
            to = %dest,
            method = if is_move { "MOVE" } else { "COPY" },
            overwrote = dest_meta.is_some(),
            "subtree relocated"
        );
        Ok(empty_response(if dest_meta.is_some() {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        }))
    }

    /// Depth-infinity collection copy with an explicit work stack.
    async fn copy_tree(&self, from: &DavPath, to: &DavPath) -> DavResult<()> {
        self.fs.create_dir(to).await?;
        let mut stack = vec![(from.clone(), to.clone())];
        while let Some((src, dst)) = stack.pop() {
            for entry in self.fs.read_dir(&src).await? {
                let child_src = src.join(&entry.name)?;
                let child_dst = dst.join(&entry.name)?;
                if entry.meta.is_collection {
                    self.fs.create_dir(&child_dst).await?;
                    stack.push((child_src, child_dst));
                } else {
                    self.fs.copy_file(&child_src, &child_dst).await?;
                }
            }
        }
        Ok(())
    }

    async fn propfind(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        data: ByteStream,
    ) -> DavResult<Response<DavBody>> {
        let meta = self.fs.stat(path).await?;

        let default = if self.config.propfind_default_infinity { Depth::Infinity } else { Depth::Zero };
        let depth = headers::depth(headers, default)?;
        if depth == Depth::Infinity && !self.config.allow_propfind_infinity {
            return Err(DavError::Forbidden("depth-infinity PROPFIND is disabled"));
        }

        let body = collect_body(data).await?;
        let mode = parse_propfind(&body)?;

        let mut resources: Vec<(DavPath, ResourceMeta)> = vec![(path.clone(), meta.clone())];
        if meta.is_collection && depth != Depth::Zero {
            let mut queue = vec![path.clone()];
            while let Some(dir) = queue.pop() {
                for entry in self.fs.read_dir(&dir).await? {
                    let child = dir.join(&entry.name)?;
                    if entry.meta.is_collection && depth == Depth::Infinity {
                        queue.push(child.clone());
                    }
                    resources.push((child, entry.meta));
                }
            }
        }

        let mut ms = MultiStatus::new();
        for (p, m) in &resources {
            ms.push(self.propfind_entry(p, m, &mode));
        }
        Ok(xml_response(StatusCode::MULTI_STATUS, ms.to_xml()))
    }

    fn propfind_entry(&self, path: &DavPath, meta: &ResourceMeta, mode: &PropfindMode) -> MsResponse {
        let href = path.href(meta.is_collection);
        let live = props::live_props(path, meta);
        let dead = self.props.get(path);
        let covering = self.locks.covering(path);

        let kind = match mode {
            PropfindMode::PropName => {
                let mut names: Vec<PropValue> = live
                    .iter()
                    .map(|(n, _)| PropValue { name: n.clone(), xml: None })
                    .collect();
                names.push(PropValue { name: PropName::dav("lockdiscovery"), xml: None });
                names.push(PropValue { name: PropName::dav("supportedlock"), xml: None });
                names.extend(dead.iter().map(|d| PropValue { name: d.name.clone(), xml: None }));
                MsKind::PropStats(vec![PropStat { status: StatusCode::OK, props: names }])
            }
            PropfindMode::AllProp => {
                let mut values: Vec<PropValue> = live
                    .into_iter()
                    .map(|(n, v)| PropValue { name: n, xml: Some(v) })
                    .collect();
                values.push(PropValue {
                    name: PropName::dav("lockdiscovery"),
                    xml: Some(lockdiscovery_xml(&covering)),
                });
                values.push(PropValue {
                    name: PropName::dav("supportedlock"),
                    xml: Some(SUPPORTEDLOCK_XML.to_string()),
                });
                values.extend(dead.into_iter().map(|d| PropValue { name: d.name, xml: Some(d.xml) }));
                MsKind::PropStats(vec![PropStat { status: StatusCode::OK, props: values }])
            }
            PropfindMode::Props(requested) => {
                let mut found = Vec::new();
                let mut missing = Vec::new();
                for name in requested {
                    if name.ns == DAV_NS && name.local == "lockdiscovery" {
                        found.push(PropValue {
                            name: name.clone(),
                            xml: Some(lockdiscovery_xml(&covering)),
                        });
                    } else if name.ns == DAV_NS && name.local == "supportedlock" {
                        found.push(PropValue {
                            name: name.clone(),
                            xml: Some(SUPPORTEDLOCK_XML.to_string()),
                        });
                    } else if let Some((_, v)) = live.iter().find(|(n, _)| n == name) {
                        found.push(PropValue { name: name.clone(), xml: Some(v.clone()) });
                    } else if let Some(d) = dead.iter().find(|d| d.name == *name) {
                        found.push(PropValue { name: name.clone(), xml: Some(d.xml.clone()) });
                    } else {
                        missing.push(PropValue { name: name.clone(), xml: None });
                    }
                }
                let mut propstats = Vec::new();
                if !found.is_empty() {
                    propstats.push(PropStat { status: StatusCode::OK, props: found });
                }
                if !missing.is_empty() {
                    propstats.push(PropStat { status: StatusCode::NOT_FOUND, props: missing });
                }
                if propstats.is_empty() {
                    propstats.push(PropStat { status: StatusCode::OK, props: Vec::new() });
                }
                MsKind::PropStats(propstats)
            }
        };
        MsResponse { href, kind }
    }

    async fn proppatch(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        data: ByteStream,
    ) -> DavResult<Response<DavBody>> {
        let meta = self.fs.stat(path).await?;
        self.check_preconditions(headers, path, false).await?;

        let body = collect_body(data).await?;
        let ops = parse_propertyupdate(&body)?;
        let (applied, statuses) = self.props.patch(path, &ops);
        if !applied {
            debug!(path = %path, "proppatch rejected, nothing applied");
        }

        // Group per-property results by status, preserving first-seen
        // group order and property order inside each group.
        let mut propstats: Vec<PropStat> = Vec::new();
        for (name, status) in statuses {
            let value = PropValue { name, xml: None };
            match propstats.iter_mut().find(|ps| ps.status == status) {
                Some(ps) => ps.props.push(value),
                None => propstats.push(PropStat { status, props: vec![value] }),
            }
        }

        let mut ms = MultiStatus::new();
        ms.push(MsResponse {
            href: path.href(meta.is_collection),
            kind: MsKind::PropStats(propstats),
        });
        Ok(xml_response(StatusCode::MULTI_STATUS, ms.to_xml()))
    }

    async fn lock(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        data: ByteStream,
    ) -> DavResult<Response<DavBody>> {
        let depth = match headers::depth(headers, Depth::Infinity)? {
            Depth::Zero => LockDepth::Zero,
            Depth::Infinity => LockDepth::Infinity,
            Depth::One => return Err(DavError::BadRequest("LOCK depth must be 0 or infinity".into())),
        };
        let timeout = headers::timeout(headers);
        let body = collect_body(data).await?;

        if body.is_empty() {
            // Refresh: the token arrives via the If header.
            let ifh = headers::if_header(headers)?
                .ok_or_else(|| DavError::BadRequest("LOCK refresh requires an If header".into()))?;
            let covering = self.locks.covering(path);
            let token = ifh
                .submitted_tokens()
                .into_iter()
                .find(|t| covering.iter().any(|l| l.token == *t))
                .ok_or(DavError::PreconditionFailed)?;
            let lock = self
                .locks
                .refresh(&token, timeout)
                .map_err(|_| DavError::PreconditionFailed)?;
            return Ok(lock_response(&lock, StatusCode::OK));
        }

        let (scope, owner) = parse_lockinfo(&body)?;
        if let Some(ifh) = headers::if_header(headers)? {
            if !self.if_matches(&ifh, path).await? {
                return Err(DavError::PreconditionFailed);
            }
        }

        let lock = self
            .locks
            .acquire(path, scope, depth, owner, timeout)
            .map_err(|_| DavError::Locked)?;

        // Lock-null compatibility: LOCK on an unmapped path creates an
        // empty resource so clients can lock-then-PUT.
        let created = match self.fs.stat(path).await {
            Ok(_) => false,
            Err(DavError::NotFound) => match self.fs.create_empty(path).await {
                Ok(_) => true,
                Err(e) => {
                    let _ = self.locks.release(&lock.token);
                    return Err(e);
                }
            },
            Err(e) => {
                let _ = self.locks.release(&lock.token);
                return Err(e);
            }
        };

        debug!(path = %path, token = %lock.token, created, "lock granted");
        Ok(lock_response(&lock, if created { StatusCode::CREATED } else { StatusCode::OK }))
    }

    async fn unlock(&self, headers: &HeaderMap, path: &DavPath) -> DavResult<Response<DavBody>> {
        let token = headers::lock_token(headers)
            .ok_or_else(|| DavError::BadRequest("missing Lock-Token header".into()))?;
        let lock = self.locks.find(&token).ok_or(DavError::NotFound)?;
        // RFC 4918 §9.11.1: the request URI must fall within the scope of
        // the lock the token names.
        if !lock.covers(path) {
            return Err(DavError::Conflict("lock token does not cover this resource"));
        }
        self.locks.release(&token).map_err(|_| DavError::NotFound)?;
        debug!(path = %path, token = %token, "unlocked");
        Ok(empty_response(StatusCode::NO_CONTENT))
    }

    /// Evaluate the If header (when present) and enforce lock coverage.
    /// Returns the submitted lock tokens for reuse in secondary checks.
    async fn check_preconditions(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        affects_descendants: bool,
    ) -> DavResult<Vec<String>> {
        let submitted = match headers::if_header(headers)? {
            Some(ifh) => {
                if !self.if_matches(&ifh, path).await? {
                    return Err(DavError::PreconditionFailed);
                }
                ifh.submitted_tokens()
            }
            None => Vec::new(),
        };
        self.locks
            .check(path, &submitted, affects_descendants)
            .map_err(|_| DavError::Locked)?;
        Ok(submitted)
    }

    /// RFC 4918 §10.4: the request may proceed if any one list holds in
    /// full against its (tagged or default) resource.
    async fn if_matches(&self, ifh: &IfHeader, default_path: &DavPath) -> DavResult<bool> {
        for list in &ifh.lists {
            let target = list.resource.as_ref().unwrap_or(default_path);
            let etag = match self.fs.stat(target).await {
                Ok(m) => Some(m.etag),
                Err(DavError::NotFound) => None,
                Err(e) => return Err(e),
            };
            let covering = self.locks.covering(target);

            let mut all_hold = true;
            for (negate, cond) in &list.conditions {
                let holds = match cond {
                    IfCondition::StateToken(token) => covering.iter().any(|l| l.token == *token),
                    IfCondition::ETag(tag) => etag.as_deref() == Some(tag.as_str()),
                };
                if holds == *negate {
                    all_hold = false;
                    break;
                }
            }
            if all_hold {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Request body plumbing
// ---------------------------------------------------------------------------

/// Adapt any transport body into the engine's chunk stream.
fn into_stream<B>(body: B) -> ByteStream
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    // `Send` is load-bearing: the boxed stream crosses task boundaries,
    // and the conversion alone does not imply it.
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    BodyStream::new(body)
        .filter_map(|res| async move {
            match res {
                Ok(frame) => frame
                    .into_data()
                    .ok()
                    .map(|mut data| Ok(data.copy_to_bytes(data.remaining()))),
                Err(e) => Some(Err(io::Error::other(e.into()))),
            }
        })
        .boxed()
}

/// Buffer a bounded XML request body.
async fn collect_body(mut data: ByteStream) -> DavResult<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(DavError::Io)?;
        if buf.len() + chunk.len() > MAX_XML_BODY {
            return Err(DavError::BadRequest("request body too large".into()));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

// ---------------------------------------------------------------------------
// Request body parsing
// ---------------------------------------------------------------------------

fn body_str(body: &Bytes) -> DavResult<&str> {
    std::str::from_utf8(body).map_err(|_| DavError::BadRequest("request body is not UTF-8".into()))
}

fn parse_propfind(body: &Bytes) -> DavResult<PropfindMode> {
    if body.is_empty() {
        return Ok(PropfindMode::AllProp);
    }
    let root = xml::parse(body_str(body)?)?;
    if !root.is(DAV_NS, "propfind") {
        return Err(DavError::BadRequest("expected DAV: propfind".into()));
    }
    if root.find(DAV_NS, "propname").is_some() {
        return Ok(PropfindMode::PropName);
    }
    if root.find(DAV_NS, "allprop").is_some() {
        return Ok(PropfindMode::AllProp);
    }
    if let Some(prop) = root.find(DAV_NS, "prop") {
        let names = prop
            .elements()
            .map(|e| PropName::new(e.ns.clone(), e.local.clone()))
            .collect();
        return Ok(PropfindMode::Props(names));
    }
    Err(DavError::BadRequest("propfind has no propname/allprop/prop".into()))
}

fn parse_propertyupdate(body: &Bytes) -> DavResult<Vec<PatchOp>> {
    let root = xml::parse(body_str(body)?)?;
    if !root.is(DAV_NS, "propertyupdate") {
        return Err(DavError::BadRequest("expected DAV: propertyupdate".into()));
    }
    let mut ops = Vec::new();
    for instruction in root.elements() {
        let is_set = instruction.is(DAV_NS, "set");
        let is_remove = instruction.is(DAV_NS, "remove");
        if !is_set && !is_remove {
            continue;
        }
        let prop = instruction
            .find(DAV_NS, "prop")
            .ok_or_else(|| DavError::BadRequest("set/remove without prop".into()))?;
        for element in prop.elements() {
            let name = PropName::new(element.ns.clone(), element.local.clone());
            if is_set {
                ops.push(PatchOp::Set(DeadProp { name, xml: element.inner_xml() }));
            } else {
                ops.push(PatchOp::Remove(name));
            }
        }
    }
    if ops.is_empty() {
        return Err(DavError::BadRequest("propertyupdate with no instructions".into()));
    }
    Ok(ops)
}

fn parse_lockinfo(body: &Bytes) -> DavResult<(LockScope, Option<String>)> {
    let root = xml::parse(body_str(body)?)?;
    if !root.is(DAV_NS, "lockinfo") {
        return Err(DavError::BadRequest("expected DAV: lockinfo".into()));
    }
    let scope_elem = root
        .find(DAV_NS, "lockscope")
        .ok_or_else(|| DavError::BadRequest("lockinfo without lockscope".into()))?;
    let scope = if scope_elem.find(DAV_NS, "exclusive").is_some() {
        LockScope::Exclusive
    } else if scope_elem.find(DAV_NS, "shared").is_some() {
        LockScope::Shared
    } else {
        return Err(DavError::BadRequest("unknown lock scope".into()));
    };
    // Only write locks exist in this protocol version.
    if let Some(lock_type) = root.find(DAV_NS, "locktype") {
        if lock_type.find(DAV_NS, "write").is_none() {
            return Err(DavError::BadRequest("only write locks are supported".into()));
        }
    }
    let owner = root.find(DAV_NS, "owner").map(Element::inner_xml);
    Ok((scope, owner))
}

// ---------------------------------------------------------------------------
// Response encoding helpers
// ---------------------------------------------------------------------------

fn empty_response(status: StatusCode) -> Response<DavBody> {
    let mut resp = Response::new(DavBody::empty());
    *resp.status_mut() = status;
    resp
}

fn method_not_allowed() -> Response<DavBody> {
    empty_response(StatusCode::METHOD_NOT_ALLOWED)
}

fn error_response(e: &DavError) -> Response<DavBody> {
    let mut resp = Response::new(DavBody::full(format!("{e}\n")));
    *resp.status_mut() = e.status();
    resp.headers_mut()
        .insert("content-type", HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}

fn xml_response(status: StatusCode, xml: String) -> Response<DavBody> {
    let mut resp = Response::new(DavBody::full(xml));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert("content-type", HeaderValue::from_static("application/xml; charset=utf-8"));
    resp
}

/// Set a dynamically-valued header, skipping it if the value is somehow
/// not header-safe rather than failing the whole response.
fn set_header(resp: &mut Response<DavBody>, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            resp.headers_mut().insert(name, v);
        }
        Err(_) => warn!(header = name, "dropping invalid header value"),
    }
}

fn lock_response(lock: &Lock, status: StatusCode) -> Response<DavBody> {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n");
    let _ = write!(
        body,
        "<D:prop xmlns:D=\"DAV:\"><D:lockdiscovery>{}</D:lockdiscovery></D:prop>",
        lockdiscovery_xml(std::slice::from_ref(lock))
    );
    let mut resp = xml_response(status, body);
    set_header(&mut resp, "lock-token", &format!("<{}>", lock.token));
    resp
}

/// Serialize active locks as `DAV:lockdiscovery` content.
fn lockdiscovery_xml(locks: &[Lock]) -> String {
    let mut out = String::new();
    for lock in locks {
        out.push_str("<D:activelock><D:locktype><D:write/></D:locktype><D:lockscope>");
        out.push_str(match lock.scope {
            LockScope::Exclusive => "<D:exclusive/>",
            LockScope::Shared => "<D:shared/>",
        });
        out.push_str("</D:lockscope><D:depth>");
        out.push_str(match lock.depth {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        });
        out.push_str("</D:depth>");
        if let Some(owner) = &lock.owner {
            let _ = write!(out, "<D:owner>{owner}</D:owner>");
        }
        let _ = write!(out, "<D:timeout>Second-{}</D:timeout>", lock.timeout.as_secs());
        let _ = write!(out, "<D:locktoken><D:href>{}</D:href></D:locktoken>", escape_text(&lock.token));
        let lock_root = DavPath::parse(&lock.path)
            .map(|p| p.href(false))
            .unwrap_or_else(|_| lock.path.clone());
        let _ = write!(out, "<D:lockroot><D:href>{}</D:href></D:lockroot>", escape_text(&lock_root));
        out.push_str("</D:activelock>");
    }
    out
}

// ---------------------------------------------------------------------------
// Range header
// ---------------------------------------------------------------------------

enum RangeSpec {
    Satisfiable { offset: u64, len: u64 },
    Unsatisfiable,
}

/// Parse a single `bytes=` range. Multi-range requests are served whole,
/// which RFC 9110 permits.
fn parse_range(headers: &HeaderMap, total: u64) -> Option<RangeSpec> {
    let value = headers.get("Range")?.to_str().ok()?;
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix range: last N bytes.
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 {
            return Some(RangeSpec::Unsatisfiable);
        }
        let len = suffix.min(total);
        if len == 0 {
            return Some(RangeSpec::Unsatisfiable);
        }
        return Some(RangeSpec::Satisfiable { offset: total - len, len });
    }

    let offset: u64 = start.parse().ok()?;
    if offset >= total {
        return Some(RangeSpec::Unsatisfiable);
    }
    let len = if end.is_empty() {
        total - offset
    } else {
        let last: u64 = end.parse().ok()?;
        if last < offset {
            return Some(RangeSpec::Unsatisfiable);
        }
        (last - offset + 1).min(total - offset)
    };
    Some(RangeSpec::Satisfiable { offset, len })
}
