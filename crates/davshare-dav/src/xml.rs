//! Minimal XML support for WebDAV request and response bodies.
//!
//! The protocol only needs a small slice of XML: escaping for the
//! multi-status encoder, and a namespace-resolving parser for the three
//! request body shapes (`propfind`, `propertyupdate`, `lockinfo`).
//! DOCTYPE declarations are rejected outright, which closes the door on
//! entity-expansion tricks.

use crate::error::{DavError, DavResult};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write;

/// The WebDAV namespace URI.
pub const DAV_NS: &str = "DAV:";

/// Escape text content (`&`, `<`, `>`).
pub fn escape_text(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escape attribute values (text escapes plus quotes).
pub fn escape_attr(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// A parsed element with its namespace resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Resolved namespace URI (empty string when unqualified).
    pub ns: String,
    /// Local name without prefix.
    pub local: String,
    /// Non-namespace attributes, `(local-name, value)` in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    /// True if this element has the given namespace and local name.
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    /// Child elements only, skipping text nodes.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element matching namespace + local name.
    pub fn find(&self, ns: &str, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(ns, local))
    }

    /// Concatenated direct text content, trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for n in &self.children {
            if let Node::Text(t) = n {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// Serialize the element's children as a self-contained fragment.
    ///
    /// Every element re-declares its namespace with a default `xmlns`, so
    /// the fragment survives storage and later re-emission into a
    /// document with unrelated prefixes. Used for opaque dead-property
    /// values and lock owners.
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for n in &self.children {
            write_node(&mut out, n);
        }
        out
    }
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Text(t) => out.push_str(&escape_text(t)),
        Node::Element(e) => {
            let _ = write!(out, "<{} xmlns=\"{}\"", e.local, escape_attr(&e.ns));
            for (name, value) in &e.attrs {
                let _ = write!(out, " {}=\"{}\"", name, escape_attr(value));
            }
            if e.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for c in &e.children {
                    write_node(out, c);
                }
                let _ = write!(out, "</{}>", e.local);
            }
        }
    }
}

/// Parse a complete XML document into its root element.
pub fn parse(input: &str) -> DavResult<Element> {
    let mut p = Parser {
        bytes: input.as_bytes(),
        pos: 0,
        input,
    };
    p.skip_bom();
    p.skip_misc()?;
    let root = p.parse_element(&NsScope::default())?;
    p.skip_misc()?;
    if p.pos != p.bytes.len() {
        return Err(bad("trailing content after document element"));
    }
    Ok(root)
}

fn bad(msg: &str) -> DavError {
    DavError::BadRequest(format!("malformed XML: {msg}"))
}

/// Namespace bindings in scope, prefix -> URI.
#[derive(Debug, Clone, Default)]
struct NsScope {
    default_ns: String,
    prefixes: HashMap<String, String>,
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn skip_bom(&mut self) {
        if self.bytes[self.pos..].starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.pos += 3;
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skip whitespace, the XML declaration, PIs, and comments between
    /// markup. DOCTYPE is rejected.
    fn skip_misc(&mut self) -> DavResult<()> {
        loop {
            self.skip_ws();
            if self.starts_with("<?") {
                self.skip_until("?>")?;
            } else if self.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if self.starts_with("<!DOCTYPE") || self.starts_with("<!doctype") {
                return Err(bad("DOCTYPE is not allowed"));
            } else {
                return Ok(());
            }
        }
    }

    fn skip_until(&mut self, end: &str) -> DavResult<()> {
        match self.input[self.pos..].find(end) {
            Some(idx) => {
                self.pos += idx + end.len();
                Ok(())
            }
            None => Err(bad("unterminated markup")),
        }
    }

    fn read_name(&mut self) -> DavResult<&'a str> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.' | b':') || c >= 0x80 {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(bad("expected a name"));
        }
        Ok(&self.input[start..self.pos])
    }

    fn expect(&mut self, c: u8) -> DavResult<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(bad("unexpected character"))
        }
    }

    fn parse_element(&mut self, parent_scope: &NsScope) -> DavResult<Element> {
        self.expect(b'<')?;
        let name = self.read_name()?.to_string();

        // First pass over attributes: collect raw pairs and namespace
        // declarations, which apply to the element's own name too.
        let mut scope = parent_scope.clone();
        let mut raw_attrs: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(b'/') => {
                    self.pos += 1;
                    self.expect(b'>')?;
                    self_closing = true;
                    break;
                }
                Some(_) => {
                    let attr_name = self.read_name()?.to_string();
                    self.skip_ws();
                    self.expect(b'=')?;
                    self.skip_ws();
                    let quote = self.peek().ok_or_else(|| bad("unterminated attribute"))?;
                    if quote != b'"' && quote != b'\'' {
                        return Err(bad("attribute value must be quoted"));
                    }
                    self.pos += 1;
                    let start = self.pos;
                    while let Some(c) = self.peek() {
                        if c == quote {
                            break;
                        }
                        self.pos += 1;
                    }
                    let raw_value = &self.input[start..self.pos];
                    self.expect(quote)?;
                    let value = decode_entities(raw_value)?;

                    if attr_name == "xmlns" {
                        scope.default_ns = value;
                    } else if let Some(prefix) = attr_name.strip_prefix("xmlns:") {
                        scope.prefixes.insert(prefix.to_string(), value);
                    } else {
                        raw_attrs.push((attr_name, value));
                    }
                }
                None => return Err(bad("unterminated start tag")),
            }
        }

        let (ns, local) = resolve_name(&name, &scope)?;
        let attrs = raw_attrs
            .into_iter()
            .map(|(n, v)| {
                // Attribute prefixes are dropped; WebDAV bodies do not
                // use namespaced attributes we care about.
                let local = n.rsplit(':').next().unwrap_or(&n).to_string();
                (local, v)
            })
            .collect();

        let mut element = Element { ns, local, attrs, children: Vec::new() };
        if self_closing {
            return Ok(element);
        }

        // Content until the matching end tag.
        loop {
            if self.starts_with("</") {
                self.pos += 2;
                let end_name = self.read_name()?;
                if end_name != name {
                    return Err(bad("mismatched end tag"));
                }
                self.skip_ws();
                self.expect(b'>')?;
                return Ok(element);
            } else if self.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let start = self.pos;
                self.skip_until("]]>")?;
                let text = &self.input[start..self.pos - 3];
                push_text(&mut element, text.to_string());
            } else if self.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if self.starts_with("<?") {
                self.skip_until("?>")?;
            } else if self.starts_with("<!") {
                return Err(bad("DOCTYPE is not allowed"));
            } else if self.peek() == Some(b'<') {
                let child = self.parse_element(&scope)?;
                element.children.push(Node::Element(child));
            } else {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == b'<' {
                        break;
                    }
                    self.pos += 1;
                }
                if self.pos == self.bytes.len() {
                    return Err(bad("unterminated element content"));
                }
                let text = decode_entities(&self.input[start..self.pos])?;
                push_text(&mut element, text);
            }
        }
    }
}

fn push_text(element: &mut Element, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(prev)) = element.children.last_mut() {
        prev.push_str(&text);
    } else {
        element.children.push(Node::Text(text));
    }
}

fn resolve_name(name: &str, scope: &NsScope) -> DavResult<(String, String)> {
    match name.split_once(':') {
        Some((prefix, local)) => {
            let ns = scope
                .prefixes
                .get(prefix)
                .ok_or_else(|| bad("undeclared namespace prefix"))?;
            Ok((ns.clone(), local.to_string()))
        }
        None => Ok((scope.default_ns.clone(), name.to_string())),
    }
}

fn decode_entities(s: &str) -> DavResult<String> {
    if !s.contains('&') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let end = rest.find(';').ok_or_else(|| bad("unterminated entity"))?;
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let c = code
                    .and_then(char::from_u32)
                    .ok_or_else(|| bad("unknown entity"))?;
                out.push(c);
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
