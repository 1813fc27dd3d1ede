//! Error taxonomy for WebDAV operations.
//!
//! Every protocol-level failure maps to exactly one HTTP status code.
//! IO errors from the backing store are surfaced as 500 unless the error
//! kind carries a more precise protocol meaning (missing file, permission).

use http::StatusCode;
use std::io;
use thiserror::Error;

/// Errors produced by the protocol engine.
#[derive(Debug, Error)]
pub enum DavError {
    /// Resource does not exist.
    #[error("resource not found")]
    NotFound,

    /// Structural conflict, e.g. MKCOL without an existing parent.
    #[error("conflict: {0}")]
    Conflict(&'static str),

    /// Resource is covered by a lock the request did not submit.
    #[error("resource is locked")]
    Locked,

    /// `If` header (or Overwrite policy) did not match resource state.
    #[error("precondition failed")]
    PreconditionFailed,

    /// Read-only mode, path escape attempt, or immutable live property.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Target already exists where the method requires absence (MKCOL).
    #[error("resource already exists")]
    Exists,

    /// Malformed request: bad path encoding, header, or XML body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// `Destination` names a different host than the request.
    #[error("destination host mismatch")]
    DestinationMismatch,

    /// Request body for MKCOL is not understood.
    #[error("unsupported media type")]
    UnsupportedMediaType,

    /// Backing-store failure, surfaced as 500. Never retried.
    #[error("io error: {0}")]
    Io(#[source] io::Error),
}

impl DavError {
    /// The exact HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::Locked => StatusCode::LOCKED,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::Forbidden(_) => StatusCode::FORBIDDEN,
            DavError::Exists => StatusCode::METHOD_NOT_ALLOWED,
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::DestinationMismatch => StatusCode::BAD_GATEWAY,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => DavError::NotFound,
            // A path whose ancestor is a plain file maps nothing.
            io::ErrorKind::NotADirectory => DavError::NotFound,
            io::ErrorKind::PermissionDenied => DavError::Forbidden("permission denied"),
            io::ErrorKind::AlreadyExists => DavError::Exists,
            _ => DavError::Io(e),
        }
    }
}

/// Result type for engine operations.
pub type DavResult<T> = Result<T, DavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_exact() {
        assert_eq!(DavError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(DavError::Conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(DavError::Locked.status().as_u16(), 423);
        assert_eq!(DavError::PreconditionFailed.status().as_u16(), 412);
        assert_eq!(DavError::Forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(DavError::DestinationMismatch.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_io_error_kinds_refine() {
        let e: DavError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(e, DavError::NotFound));

        let e: DavError = io::Error::new(io::ErrorKind::NotADirectory, "file in the way").into();
        assert!(matches!(e, DavError::NotFound));

        let e: DavError = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(e, DavError::Forbidden(_)));

        let e: DavError = io::Error::other("disk on fire").into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
