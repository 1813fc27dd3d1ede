//! Normalized virtual paths for WebDAV resources.
//!
//! A [`DavPath`] is always absolute, slash-separated, percent-decoded, and
//! free of `.`/`..` segments, so a path can never escape the configured
//! root by construction. The host filesystem layout never leaks into it.

use crate::error::{DavError, DavResult};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

/// Set of bytes escaped when a path is re-encoded into an href.
const HREF_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'%');

/// A normalized request path inside the virtual tree.
///
/// The root is `/`; every other path is `/seg/seg` with no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    inner: String,
}

impl DavPath {
    /// The root collection.
    pub fn root() -> Self {
        DavPath { inner: "/".to_string() }
    }

    /// Parse and normalize a raw request path (no query string).
    ///
    /// Segments are percent-decoded individually so an encoded slash can
    /// never smuggle in a separator. `.` and empty segments collapse;
    /// `..` is rejected outright rather than resolved.
    pub fn parse(raw: &str) -> DavResult<Self> {
        if !raw.starts_with('/') {
            return Err(DavError::BadRequest(format!("path is not absolute: {raw}")));
        }

        let mut segments: Vec<String> = Vec::new();
        for raw_seg in raw.split('/') {
            if raw_seg.is_empty() || raw_seg == "." {
                continue;
            }
            let decoded = percent_decode_str(raw_seg)
                .decode_utf8()
                .map_err(|_| DavError::BadRequest(format!("invalid percent-encoding: {raw_seg}")))?;
            if decoded == ".." {
                return Err(DavError::Forbidden("path traversal"));
            }
            if decoded.contains('/') || decoded.contains('\0') {
                return Err(DavError::BadRequest(format!("invalid path segment: {raw_seg}")));
            }
            segments.push(decoded.into_owned());
        }

        Ok(Self::from_segments(&segments))
    }

    fn from_segments(segments: &[String]) -> Self {
        if segments.is_empty() {
            return Self::root();
        }
        let mut inner = String::new();
        for seg in segments {
            inner.push('/');
            inner.push_str(seg);
        }
        DavPath { inner }
    }

    /// The normalized slash-separated form, e.g. `/docs/report.txt`.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_root(&self) -> bool {
        self.inner == "/"
    }

    /// Final segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.inner.rsplit('/').next()
    }

    /// Parent collection, or `None` for the root.
    pub fn parent(&self) -> Option<DavPath> {
        if self.is_root() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(DavPath { inner: self.inner[..idx].to_string() }),
            None => None,
        }
    }

    /// Append a single validated segment.
    pub fn join(&self, name: &str) -> DavResult<DavPath> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(DavError::BadRequest(format!("invalid resource name: {name}")));
        }
        let mut inner = if self.is_root() { String::new() } else { self.inner.clone() };
        inner.push('/');
        inner.push_str(name);
        Ok(DavPath { inner })
    }

    /// Path segments, root first. Empty for the root itself.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    /// Strict ancestor test on whole segments: `/a` covers `/a/b` but not
    /// `/ab`. A path is not its own ancestor.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.inner.starts_with(&self.inner)
            && other.inner.as_bytes().get(self.inner.len()) == Some(&b'/')
    }

    /// Re-encoded href form for response bodies. Collections get a
    /// trailing slash, matching what DAV clients expect in `<D:href>`.
    pub fn href(&self, is_collection: bool) -> String {
        if self.is_root() {
            return "/".to_string();
        }
        let mut out = String::new();
        for seg in self.segments() {
            out.push('/');
            out.push_str(&utf8_percent_encode(seg, HREF_ESCAPE).to_string());
        }
        if is_collection {
            out.push('/');
        }
        out
    }

    /// Re-root a descendant of `from` under `to`. Used for COPY/MOVE
    /// destination mapping during subtree walks.
    pub fn rebase(&self, from: &DavPath, to: &DavPath) -> DavResult<DavPath> {
        if self == from {
            return Ok(to.clone());
        }
        if !from.is_ancestor_of(self) {
            return Err(DavError::BadRequest(format!(
                "{} is not under {}",
                self.inner, from.inner
            )));
        }
        let suffix = if from.is_root() { &self.inner } else { &self.inner[from.inner.len()..] };
        let mut out = to.clone();
        for seg in suffix.split('/').filter(|s| !s.is_empty()) {
            out = out.join(seg)?;
        }
        Ok(out)
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}
