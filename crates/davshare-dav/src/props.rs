//! Dead-property storage and live-property computation.
//!
//! Dead properties are opaque XML fragments stored verbatim per resource,
//! in insertion order. Live properties are computed from resource
//! metadata on demand and refuse PROPPATCH with 403. A patch is atomic
//! per resource: if any instruction fails, nothing is applied and the
//! untouched siblings report 424.

use crate::fs::ResourceMeta;
use crate::path::DavPath;
use crate::xml::{escape_text, DAV_NS};
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use http::StatusCode;
use std::time::SystemTime;

/// Namespace-qualified property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub ns: String,
    pub local: String,
}

impl PropName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        PropName { ns: ns.into(), local: local.into() }
    }

    pub fn dav(local: impl Into<String>) -> Self {
        Self::new(DAV_NS, local)
    }
}

/// A stored dead property: name plus opaque inner-XML value.
#[derive(Debug, Clone)]
pub struct DeadProp {
    pub name: PropName,
    pub xml: String,
}

/// One PROPPATCH instruction, in document order.
#[derive(Debug, Clone)]
pub enum PatchOp {
    Set(DeadProp),
    Remove(PropName),
}

impl PatchOp {
    pub fn name(&self) -> &PropName {
        match self {
            PatchOp::Set(p) => &p.name,
            PatchOp::Remove(n) => n,
        }
    }
}

/// Live properties computed from filesystem state. Protected: PROPPATCH
/// against any of these fails the whole patch.
const LIVE_PROPS: &[&str] = &[
    "displayname",
    "resourcetype",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "creationdate",
    "lockdiscovery",
    "supportedlock",
];

pub fn is_live(name: &PropName) -> bool {
    name.ns == DAV_NS && LIVE_PROPS.contains(&name.local.as_str())
}

/// Compute the live property set for a resource.
///
/// `lockdiscovery` and `supportedlock` are appended by the dispatcher,
/// which owns the lock manager.
pub fn live_props(path: &DavPath, meta: &ResourceMeta) -> Vec<(PropName, String)> {
    let display = path.name().unwrap_or("").to_string();
    let mut out = vec![
        (PropName::dav("displayname"), escape_text(&display).into_owned()),
        (
            PropName::dav("resourcetype"),
            if meta.is_collection { "<D:collection/>".to_string() } else { String::new() },
        ),
    ];
    if !meta.is_collection {
        out.push((PropName::dav("getcontentlength"), meta.len.to_string()));
    }
    out.push((
        PropName::dav("getcontenttype"),
        if meta.is_collection {
            "httpd/unix-directory".to_string()
        } else {
            "application/octet-stream".to_string()
        },
    ));
    out.push((PropName::dav("getetag"), escape_text(&meta.etag).into_owned()));
    if let Some(modified) = meta.modified {
        out.push((PropName::dav("getlastmodified"), httpdate(modified)));
        out.push((PropName::dav("creationdate"), rfc3339(modified)));
    }
    out
}

/// RFC 1123 date used by `getlastmodified`.
pub fn httpdate(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn rfc3339(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// In-memory dead-property store keyed by normalized path.
#[derive(Default)]
pub struct PropertyStore {
    dead: DashMap<String, Vec<DeadProp>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead properties of one resource, insertion order.
    pub fn get(&self, path: &DavPath) -> Vec<DeadProp> {
        self.dead
            .get(path.as_str())
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Apply a PROPPATCH atomically.
    ///
    /// Returns `(applied, statuses)` where `statuses` is in instruction
    /// order: all 200 when applied, otherwise 403 for each offending
    /// instruction and 424 for the rest.
    pub fn patch(&self, path: &DavPath, ops: &[PatchOp]) -> (bool, Vec<(PropName, StatusCode)>) {
        let forbidden: Vec<bool> = ops.iter().map(|op| is_live(op.name())).collect();
        if forbidden.iter().any(|f| *f) {
            let statuses = ops
                .iter()
                .zip(&forbidden)
                .map(|(op, f)| {
                    let status = if *f {
                        StatusCode::FORBIDDEN
                    } else {
                        StatusCode::FAILED_DEPENDENCY
                    };
                    (op.name().clone(), status)
                })
                .collect();
            return (false, statuses);
        }

        let mut entry = self.dead.entry(path.as_str().to_string()).or_default();
        for op in ops {
            match op {
                PatchOp::Set(prop) => {
                    if let Some(existing) = entry.iter_mut().find(|p| p.name == prop.name) {
                        existing.xml = prop.xml.clone();
                    } else {
                        entry.push(prop.clone());
                    }
                }
                // Removing a property that is not there still succeeds.
                PatchOp::Remove(name) => entry.retain(|p| p.name != *name),
            }
        }
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.dead.remove_if(path.as_str(), |_, v| v.is_empty());
        }

        let statuses = ops.iter().map(|op| (op.name().clone(), StatusCode::OK)).collect();
        (true, statuses)
    }

    fn tree_keys(&self, path: &DavPath) -> Vec<String> {
        self.dead
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| {
                k == path.as_str() || DavPath::parse(k).is_ok_and(|p| path.is_ancestor_of(&p))
            })
            .collect()
    }

    /// Drop properties for a resource and everything below it.
    pub fn remove_tree(&self, path: &DavPath) {
        for key in self.tree_keys(path) {
            self.dead.remove(&key);
        }
    }

    /// Rehome properties after MOVE.
    pub fn move_tree(&self, from: &DavPath, to: &DavPath) {
        self.remove_tree(to);
        for key in self.tree_keys(from) {
            if let Some((_, props)) = self.dead.remove(&key) {
                let Ok(old) = DavPath::parse(&key) else { continue };
                let Ok(new) = old.rebase(from, to) else { continue };
                self.dead.insert(new.as_str().to_string(), props);
            }
        }
    }

    /// Duplicate properties after COPY.
    pub fn copy_tree(&self, from: &DavPath, to: &DavPath) {
        self.remove_tree(to);
        for key in self.tree_keys(from) {
            let props = match self.dead.get(&key) {
                Some(e) => e.clone(),
                None => continue,
            };
            let Ok(old) = DavPath::parse(&key) else { continue };
            let Ok(new) = old.rebase(from, to) else { continue };
            self.dead.insert(new.as_str().to_string(), props);
        }
    }
}
