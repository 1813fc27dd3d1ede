//! Local-directory storage backend.
//!
//! Maps the virtual tree onto a root directory via `tokio::fs`. Because a
//! [`DavPath`] can never contain `..`, a request path cannot escape the
//! root by construction. Symlinks are treated as opaque leaf resources:
//! `stat` does not follow them and symlinked directories are never
//! traversed.

use crate::error::{DavError, DavResult};
use crate::fs::{ByteStream, DavFileSystem, DirEntry, ResourceMeta};
use crate::path::DavPath;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Read chunk size for streamed GET responses.
const READ_CHUNK: usize = 64 * 1024;

/// Filesystem backend rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFs { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a virtual path. Safe to join blindly: segments are
    /// already validated to contain no separators or dot-dots.
    fn full_path(&self, path: &DavPath) -> PathBuf {
        let mut out = self.root.clone();
        for seg in path.segments() {
            out.push(seg);
        }
        out
    }

    fn meta_from(md: &std::fs::Metadata) -> ResourceMeta {
        let is_collection = md.is_dir();
        let len = if is_collection { 0 } else { md.len() };
        let modified = md.modified().ok();
        ResourceMeta {
            is_collection,
            len,
            modified,
            etag: etag_for(len, modified),
        }
    }
}

/// Strong etag from length and mtime. A committed write always updates
/// the mtime, so the etag changes whenever content does.
fn etag_for(len: u64, modified: Option<SystemTime>) -> String {
    let nanos = modified
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    format!("\"{len:x}-{nanos:x}\"")
}

#[async_trait]
impl DavFileSystem for LocalFs {
    async fn stat(&self, path: &DavPath) -> DavResult<ResourceMeta> {
        let md = fs::symlink_metadata(self.full_path(path)).await?;
        if md.file_type().is_symlink() {
            // Opaque leaf: report it as a plain file, never follow.
            let len = md.len();
            let modified = md.modified().ok();
            return Ok(ResourceMeta {
                is_collection: false,
                len,
                modified,
                etag: etag_for(len, modified),
            });
        }
        Ok(Self::meta_from(&md))
    }

    async fn read_dir(&self, path: &DavPath) -> DavResult<Vec<DirEntry>> {
        let meta = self.stat(path).await?;
        if !meta.is_collection {
            return Err(DavError::Conflict("not a collection"));
        }
        let mut entries = Vec::new();
        let mut rd = fs::read_dir(self.full_path(path)).await?;
        while let Some(entry) = rd.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(parent = %path, "skipping entry with non-UTF-8 name");
                continue;
            };
            let Ok(child) = path.join(&name) else {
                continue;
            };
            match self.stat(&child).await {
                Ok(meta) => entries.push(DirEntry { name, meta }),
                // Raced with a concurrent delete; skip.
                Err(DavError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    async fn open_read(&self, path: &DavPath, offset: u64, len: Option<u64>) -> DavResult<ByteStream> {
        let md = fs::symlink_metadata(self.full_path(path)).await?;
        if md.is_dir() {
            return Err(DavError::Conflict("cannot read a collection"));
        }
        let mut file = fs::File::open(self.full_path(path)).await?;
        if offset > 0 {
            file.seek(io::SeekFrom::Start(offset)).await?;
        }
        let stream = stream::unfold(Some((file, len)), |state| async move {
            let (mut file, mut remaining) = state?;
            let want = match remaining {
                Some(0) => return None,
                Some(n) => usize::try_from(n).unwrap_or(READ_CHUNK).min(READ_CHUNK),
                None => READ_CHUNK,
            };
            let mut buf = vec![0u8; want];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    if let Some(rem) = remaining.as_mut() {
                        *rem -= n as u64;
                    }
                    Some((Ok(Bytes::from(buf)), Some((file, remaining))))
                }
                Err(e) => Some((Err(e), None)),
            }
        });
        Ok(stream.boxed())
    }

    async fn write_atomic(&self, path: &DavPath, mut data: ByteStream) -> DavResult<ResourceMeta> {
        let target = self.full_path(path);
        let parent = path.parent().ok_or(DavError::Forbidden("cannot PUT the root"))?;

        match self.stat(&parent).await {
            Ok(meta) if meta.is_collection => {}
            Ok(_) | Err(DavError::NotFound) => {
                return Err(DavError::Conflict("parent collection does not exist"));
            }
            Err(e) => return Err(e),
        }
        if let Ok(meta) = self.stat(path).await {
            if meta.is_collection {
                return Err(DavError::Conflict("target is a collection"));
            }
        }

        // Stage into a sibling temp file so a concurrent reader sees
        // either the old or the new content, never a partial write.
        let tmp_name = format!(
            ".{}.{}.tmp",
            path.name().unwrap_or("put"),
            uuid::Uuid::new_v4().simple()
        );
        let tmp_path = self.full_path(&parent).join(tmp_name);

        let result: DavResult<()> = async {
            let mut tmp = fs::File::create(&tmp_path).await?;
            while let Some(chunk) = data.next().await {
                let chunk = chunk.map_err(DavError::Io)?;
                tmp.write_all(&chunk).await?;
            }
            tmp.flush().await?;
            tmp.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            // Aborted upload (client disconnect or disk error): drop the
            // staging file, the old content stays committed.
            let _ = fs::remove_file(&tmp_path).await;
            debug!(path = %path, error = %e, "aborted atomic write");
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &target).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        self.stat(path).await
    }

    async fn create_empty(&self, path: &DavPath) -> DavResult<ResourceMeta> {
        let full = self.full_path(path);
        match fs::OpenOptions::new().write(true).create_new(true).open(&full).await {
            Ok(_) => self.stat(path).await,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => self.stat(path).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DavError::Conflict("parent collection does not exist"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir(&self, path: &DavPath) -> DavResult<()> {
        match fs::create_dir(self.full_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DavError::Conflict("parent collection does not exist"))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(DavError::Exists),
            // Parent exists but is a plain file.
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                Err(DavError::Conflict("parent is not a collection"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, path: &DavPath) -> DavResult<()> {
        fs::remove_file(self.full_path(path)).await?;
        Ok(())
    }

    async fn remove_dir_all(&self, path: &DavPath) -> DavResult<()> {
        fs::remove_dir_all(self.full_path(path)).await?;
        Ok(())
    }

    async fn rename(&self, from: &DavPath, to: &DavPath) -> DavResult<()> {
        fs::rename(self.full_path(from), self.full_path(to)).await?;
        Ok(())
    }

    async fn copy_file(&self, from: &DavPath, to: &DavPath) -> DavResult<()> {
        fs::copy(self.full_path(from), self.full_path(to)).await?;
        Ok(())
    }
}
