//! WebDAV class-2 protocol engine.
//!
//! This crate implements the WebDAV server side (RFC 4918) against a
//! pluggable hierarchical byte store, without depending on an external
//! protocol library. It is transport-agnostic: the daemon in front of it
//! owns the listener, authentication, and any non-DAV niceties, and feeds
//! plain `http` requests into [`DavHandler::handle`].
//!
//! # Architecture
//!
//! - [`DavPath`]: percent-decoded, normalized virtual paths; the only
//!   path type the engine passes around. Escape attempts (`..`, encoded
//!   slashes) are rejected at the boundary.
//! - [`DavFileSystem`]: the storage seam. [`LocalFs`] maps the virtual
//!   tree onto a directory with atomic whole-file writes; tests can
//!   substitute their own implementation.
//! - [`LockManager`]: exclusive/shared write locks with timeouts and
//!   depth-infinity coverage, held in memory.
//! - [`PropertyStore`]: dead properties as opaque XML fragments, also in
//!   memory. Live properties are computed per request.
//! - [`DavHandler`]: parses protocol headers and XML bodies, evaluates
//!   `If` preconditions, dispatches the eleven DAV methods, and encodes
//!   multi-status responses.
//!
//! # Example
//!
//! ```ignore
//! use davshare_dav::{DavConfig, DavHandler, LocalFs};
//! use std::sync::Arc;
//!
//! let fs = Arc::new(LocalFs::new("/srv/share"));
//! let handler = DavHandler::new(DavConfig::default(), fs);
//! // for each inbound request:
//! // let response = handler.handle(request).await;
//! ```

mod body;
mod error;
mod fs;
mod handler;
mod headers;
mod localfs;
mod lock;
mod multistatus;
mod path;
mod props;
mod xml;

pub use body::DavBody;
pub use error::{DavError, DavResult};
pub use fs::{ByteStream, DavFileSystem, DirEntry, ResourceMeta};
pub use handler::{DavConfig, DavHandler};
pub use headers::Depth;
pub use localfs::LocalFs;
pub use lock::{Lock, LockDepth, LockManager, LockScope};
pub use path::DavPath;
pub use props::{DeadProp, PropName, PropertyStore};
