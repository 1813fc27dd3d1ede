//! Storage collaborator abstraction.
//!
//! The dispatcher talks to a byte-addressable hierarchical store through
//! this trait, keyed by normalized [`DavPath`]s. The production
//! implementation is [`LocalFs`](crate::localfs::LocalFs); tests can swap
//! in anything else.

use crate::error::DavResult;
use crate::path::DavPath;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::time::SystemTime;

/// A stream of content chunks.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Metadata for one resource, materialized lazily per request.
#[derive(Debug, Clone)]
pub struct ResourceMeta {
    pub is_collection: bool,
    /// Content length; zero for collections.
    pub len: u64,
    pub modified: Option<SystemTime>,
    /// Strong etag derived from content state; changes on every write.
    pub etag: String,
}

/// One child of a collection.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub meta: ResourceMeta,
}

/// Hierarchical byte store, the engine's only view of persistent state.
#[async_trait]
pub trait DavFileSystem: Send + Sync + 'static {
    /// Resolve a path to its metadata, or `NotFound`.
    async fn stat(&self, path: &DavPath) -> DavResult<ResourceMeta>;

    /// Children of a collection, one level, non-recursive.
    async fn read_dir(&self, path: &DavPath) -> DavResult<Vec<DirEntry>>;

    /// Stream content starting at `offset`, at most `len` bytes when
    /// given. A reader observes fully-old or fully-new content, never a
    /// torn write.
    async fn open_read(&self, path: &DavPath, offset: u64, len: Option<u64>) -> DavResult<ByteStream>;

    /// Replace content atomically from a stream (temp-then-rename).
    /// Returns the metadata of the committed file. If the stream fails
    /// mid-way nothing is committed.
    async fn write_atomic(&self, path: &DavPath, data: ByteStream) -> DavResult<ResourceMeta>;

    /// Create an empty file without clobbering an existing one. Used for
    /// LOCK on an unmapped path.
    async fn create_empty(&self, path: &DavPath) -> DavResult<ResourceMeta>;

    /// Create a collection. Fails with `Conflict` when the parent is
    /// missing and `Exists` when the target is already there.
    async fn create_dir(&self, path: &DavPath) -> DavResult<()>;

    async fn remove_file(&self, path: &DavPath) -> DavResult<()>;

    /// Remove a collection and everything under it.
    async fn remove_dir_all(&self, path: &DavPath) -> DavResult<()>;

    /// Rename a file or whole subtree. The destination must not exist.
    async fn rename(&self, from: &DavPath, to: &DavPath) -> DavResult<()>;

    /// Copy a single file's content.
    async fn copy_file(&self, from: &DavPath, to: &DavPath) -> DavResult<()>;
}
