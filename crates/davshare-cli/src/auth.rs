//! HTTP Basic authentication.
//!
//! A single username/password pair guards the whole share. Credentials
//! are checked before any DAV dispatch, so an unauthenticated client
//! learns nothing about the tree.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use davshare_dav::DavBody;
use http::header::HeaderMap;
use http::{Response, StatusCode};

/// The configured credential pair.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    user: String,
    password: String,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        BasicAuth { user: user.into(), password: password.into() }
    }

    /// Whether the request carries matching credentials.
    pub fn check(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get("Authorization") else {
            return false;
        };
        let Ok(value) = value.to_str() else {
            return false;
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, password)) = decoded.split_once(':') else {
            return false;
        };
        // Compare both fields unconditionally so a username mismatch
        // costs the same as a password mismatch.
        let user_ok = constant_time_eq(user.as_bytes(), self.user.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        user_ok && pass_ok
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// The 401 challenge sent when credentials are missing or wrong.
pub fn unauthorized() -> Response<DavBody> {
    let mut resp = Response::new(DavBody::full("unauthorized\n"));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        "www-authenticate",
        http::HeaderValue::from_static("Basic realm=\"davshare\""),
    );
    resp
}
