//! HTML directory listing for browser GETs on collections.
//!
//! WebDAV itself answers 405 for GET on a collection; the daemon
//! intercepts those and serves a minimal index page instead, so the
//! share stays explorable from a plain browser.

use davshare_dav::DirEntry;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt::Write;

/// Characters escaped in relative hrefs.
const HREF_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'#')
    .add(b'?')
    .add(b'%')
    .add(b'&')
    .add(b'\'');

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the index page for one collection.
///
/// Hrefs are relative to the (slash-terminated) collection URL, with a
/// trailing slash marking child collections.
pub fn render(path: &str, entries: &[DirEntry]) -> String {
    let mut sorted: Vec<&DirEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let title = escape_html(path);
    let mut out = String::with_capacity(256 + sorted.len() * 64);
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Index of {title}</title></head><body>\n<h1>Index of {title}</h1>\n<pre>\n"
    );
    if path != "/" {
        out.push_str("<a href=\"..\">..</a>\n");
    }
    for entry in sorted {
        let mut name = entry.name.clone();
        if entry.meta.is_collection {
            name.push('/');
        }
        let href = utf8_percent_encode(&name, HREF_ESCAPE).to_string();
        let _ = writeln!(out, "<a href=\"{href}\">{}</a>", escape_html(&name));
    }
    out.push_str("</pre>\n</body></html>\n");
    out
}
