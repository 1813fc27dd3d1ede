//! WebDAV request header parsing.
//!
//! Covers the protocol headers the dispatcher consumes: `Depth`,
//! `Overwrite`, `Timeout`, `Destination`, `Lock-Token`, and the RFC 4918
//! `If` header with tagged lists, `Not`, state tokens, and etags.

use crate::error::{DavError, DavResult};
use crate::path::DavPath;
use http::header::HeaderMap;
use std::time::Duration;

/// Recursion scope for PROPFIND/COPY/DELETE/LOCK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

/// Parse the `Depth` header; absence yields `default`. Only the three
/// protocol values are accepted.
pub fn depth(headers: &HeaderMap, default: Depth) -> DavResult<Depth> {
    let Some(value) = headers.get("Depth") else {
        return Ok(default);
    };
    let value = value.to_str().map_err(|_| bad_header("Depth"))?;
    match value.trim() {
        "0" => Ok(Depth::Zero),
        "1" => Ok(Depth::One),
        v if v.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
        _ => Err(bad_header("Depth")),
    }
}

/// Parse the `Overwrite` header (`T`/`F`), defaulting to true.
pub fn overwrite(headers: &HeaderMap) -> DavResult<bool> {
    let Some(value) = headers.get("Overwrite") else {
        return Ok(true);
    };
    match value.to_str().map(str::trim) {
        Ok("T") | Ok("t") => Ok(true),
        Ok("F") | Ok("f") => Ok(false),
        _ => Err(bad_header("Overwrite")),
    }
}

/// Parse the `Timeout` header. Returns the first understood request;
/// `Infinite` (and absence) map to `None`, which the lock manager
/// resolves to its default.
pub fn timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("Timeout")?.to_str().ok()?;
    for part in value.split(',') {
        let part = part.trim();
        if let Some(secs) = part.strip_prefix("Second-") {
            if let Ok(secs) = secs.parse::<u64>() {
                return Some(Duration::from_secs(secs));
            }
        }
        // "Infinite" falls through to the server default.
    }
    None
}

/// Parse the `Destination` header into a virtual path. Accepts either an
/// absolute URI or an absolute path. An absolute URI whose authority
/// differs from the request `Host` is rejected with 502; this server
/// never proxies cross-host copies.
pub fn destination(headers: &HeaderMap) -> DavResult<Option<DavPath>> {
    let Some(value) = headers.get("Destination") else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| bad_header("Destination"))?.trim();
    let path_part = match split_authority(value) {
        Some((authority, path)) => {
            if let Some(host) = headers.get("Host").and_then(|h| h.to_str().ok()) {
                if !authority.eq_ignore_ascii_case(host.trim()) {
                    return Err(DavError::DestinationMismatch);
                }
            }
            path
        }
        None => value,
    };
    // Ignore any query or fragment a client tacked on.
    let path_part = path_part
        .split_once(['?', '#'])
        .map_or(path_part, |(p, _)| p);
    Ok(Some(DavPath::parse(path_part)?))
}

/// Split an absolute URI into `(host[:port], path)`.
fn split_authority(value: &str) -> Option<(&str, &str)> {
    let idx = value.find("://")?;
    let rest = &value[idx + 3..];
    match rest.find('/') {
        Some(slash) => Some((&rest[..slash], &rest[slash..])),
        None => Some((rest, "/")),
    }
}

/// Drop `scheme://host[:port]` from an absolute URI, if present.
fn strip_authority(value: &str) -> &str {
    split_authority(value).map_or(value, |(_, path)| path)
}

/// Parse the `Lock-Token` header, stripping the angle brackets.
pub fn lock_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("Lock-Token")?.to_str().ok()?.trim();
    Some(value.trim_start_matches('<').trim_end_matches('>').to_string())
}

/// One condition inside an `If` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfCondition {
    StateToken(String),
    ETag(String),
}

/// A parenthesized conjunction, optionally scoped to a tagged resource.
#[derive(Debug, Clone)]
pub struct IfList {
    pub resource: Option<DavPath>,
    /// `(negate, condition)` pairs; all must hold for the list to match.
    pub conditions: Vec<(bool, IfCondition)>,
}

/// Parsed `If` header: a disjunction of lists.
#[derive(Debug, Clone, Default)]
pub struct IfHeader {
    pub lists: Vec<IfList>,
}

impl IfHeader {
    /// Every state token mentioned anywhere in the header. These count
    /// as submitted for lock-checking purposes regardless of which list
    /// matched.
    pub fn submitted_tokens(&self) -> Vec<String> {
        let mut out = Vec::new();
        for list in &self.lists {
            for (_, cond) in &list.conditions {
                if let IfCondition::StateToken(t) = cond {
                    if !out.contains(t) {
                        out.push(t.clone());
                    }
                }
            }
        }
        out
    }
}

/// Parse the `If` header, if present.
pub fn if_header(headers: &HeaderMap) -> DavResult<Option<IfHeader>> {
    let Some(value) = headers.get("If") else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| bad_header("If"))?;
    parse_if(value).map(Some)
}

fn parse_if(input: &str) -> DavResult<IfHeader> {
    let mut lists = Vec::new();
    let mut rest = input.trim();
    let mut current_resource: Option<DavPath> = None;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('<') {
            // Resource tag: applies to all lists until the next tag.
            let end = after.find('>').ok_or_else(|| bad_header("If"))?;
            let uri = &after[..end];
            let path_part = strip_authority(uri);
            current_resource = Some(DavPath::parse(path_part)?);
            rest = after[end + 1..].trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            let end = after.find(')').ok_or_else(|| bad_header("If"))?;
            let conditions = parse_conditions(&after[..end])?;
            lists.push(IfList { resource: current_resource.clone(), conditions });
            rest = after[end + 1..].trim_start();
        } else {
            return Err(bad_header("If"));
        }
    }

    if lists.is_empty() {
        return Err(bad_header("If"));
    }
    Ok(IfHeader { lists })
}

fn parse_conditions(input: &str) -> DavResult<Vec<(bool, IfCondition)>> {
    let mut out = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let mut negate = false;
        if let Some(after) = rest.strip_prefix("Not") {
            negate = true;
            rest = after.trim_start();
        }
        if let Some(after) = rest.strip_prefix('<') {
            let end = after.find('>').ok_or_else(|| bad_header("If"))?;
            out.push((negate, IfCondition::StateToken(after[..end].to_string())));
            rest = after[end + 1..].trim_start();
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(|| bad_header("If"))?;
            out.push((negate, IfCondition::ETag(after[..end].trim().to_string())));
            rest = after[end + 1..].trim_start();
        } else {
            return Err(bad_header("If"));
        }
    }
    if out.is_empty() {
        return Err(bad_header("If"));
    }
    Ok(out)
}

fn bad_header(name: &str) -> DavError {
    DavError::BadRequest(format!("invalid {name} header"))
}
