//! Multi-status (207) response model and encoder.
//!
//! Entries serialize in insertion order, and property order within an
//! entry is preserved, so a PROPFIND response lists properties exactly as
//! they were gathered.

use crate::props::PropName;
use crate::xml::{escape_attr, escape_text, DAV_NS};
use http::StatusCode;
use std::fmt::Write;

/// A property with an optional serialized value.
///
/// `None` means the element is emitted empty, which is what `propname`
/// responses and 404 propstats require.
#[derive(Debug, Clone)]
pub struct PropValue {
    pub name: PropName,
    pub xml: Option<String>,
}

/// One `<D:propstat>` group: properties sharing a status.
#[derive(Debug, Clone)]
pub struct PropStat {
    pub status: StatusCode,
    pub props: Vec<PropValue>,
}

/// One `<D:response>` entry.
#[derive(Debug, Clone)]
pub struct MsResponse {
    pub href: String,
    pub kind: MsKind,
}

#[derive(Debug, Clone)]
pub enum MsKind {
    /// Whole-resource status (DELETE/COPY/MOVE partial failures).
    Status(StatusCode),
    /// Per-property outcomes (PROPFIND/PROPPATCH).
    PropStats(Vec<PropStat>),
}

/// An ordered multi-status body.
#[derive(Debug, Default)]
pub struct MultiStatus {
    responses: Vec<MsResponse>,
}

impl MultiStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, response: MsResponse) {
        self.responses.push(response);
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Serialize to the `DAV:` multistatus document.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(256 + self.responses.len() * 256);
        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n");
        out.push_str("<D:multistatus xmlns:D=\"DAV:\">");
        for resp in &self.responses {
            out.push_str("<D:response>");
            let _ = write!(out, "<D:href>{}</D:href>", escape_text(&resp.href));
            match &resp.kind {
                MsKind::Status(status) => write_status(&mut out, *status),
                MsKind::PropStats(propstats) => {
                    for ps in propstats {
                        out.push_str("<D:propstat><D:prop>");
                        for pv in &ps.props {
                            write_prop(&mut out, pv);
                        }
                        out.push_str("</D:prop>");
                        write_status(&mut out, ps.status);
                        out.push_str("</D:propstat>");
                    }
                }
            }
            out.push_str("</D:response>");
        }
        out.push_str("</D:multistatus>");
        out
    }
}

fn write_status(out: &mut String, status: StatusCode) {
    let _ = write!(
        out,
        "<D:status>HTTP/1.1 {} {}</D:status>",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
}

fn write_prop(out: &mut String, pv: &PropValue) {
    if pv.name.ns == DAV_NS {
        match &pv.xml {
            Some(xml) if !xml.is_empty() => {
                let _ = write!(out, "<D:{0}>{1}</D:{0}>", pv.name.local, xml);
            }
            _ => {
                let _ = write!(out, "<D:{}/>", pv.name.local);
            }
        }
    } else {
        // Foreign namespaces are emitted with a default xmlns so the
        // stored opaque fragment needs no prefix bookkeeping.
        match &pv.xml {
            Some(xml) if !xml.is_empty() => {
                let _ = write!(
                    out,
                    "<{0} xmlns=\"{1}\">{2}</{0}>",
                    pv.name.local,
                    escape_attr(&pv.name.ns),
                    xml
                );
            }
            _ => {
                let _ = write!(out, "<{} xmlns=\"{}\"/>", pv.name.local, escape_attr(&pv.name.ns));
            }
        }
    }
}
