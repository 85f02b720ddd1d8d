//! Pluggable Remote/Local backend traits (§6).
//!
//! The Overlay Tree, Download Coordinator, Sync Processor and Chunked
//! Uploader are all generic over these two object-safe async traits. A real
//! deployment wires in an HTTP-backed [`RemoteBackend`] and an on-disk
//! [`LocalBackend`]; tests use the in-memory doubles in [`crate::testing`].

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::queue::Method;

/// Boxed, pinned future returned by every backend method.
///
/// Mirrors the boxed-async-trait convention used elsewhere in this
/// codebase's trait surface, without the wasm cfg split: this crate only
/// targets native executors, so the `Send` bound is unconditional.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metadata for one entry as reported by a backend's `list`/`stat`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMeta {
    /// Logical path of the entry.
    pub path: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last-modified timestamp as reported by the backend.
    pub last_modified: DateTime<Utc>,
}

/// One chunk of a file being uploaded, as consumed by [`RemoteBackend::upload_chunk`].
pub struct UploadChunk<'a> {
    /// Byte offset of this chunk within the full file.
    pub offset: u64,
    /// Total size of the file being uploaded.
    pub total_size: u64,
    /// Whether this is the first chunk of the upload (carries the initial-chunk headers).
    pub is_first: bool,
    /// Whether this is the final chunk of the upload.
    pub is_last: bool,
    /// The chunk's bytes.
    pub data: &'a [u8],
}

/// The remote asset API: listings, metadata, fetch, create/delete/rename,
/// and chunked multipart upload.
pub trait RemoteBackend: Send + Sync {
    /// Lists the direct children of `parent`.
    fn list(&self, parent: &str) -> BoxFuture<'_, Result<Vec<EntryMeta>>>;

    /// Fetches metadata for `path` without downloading content, or `None`
    /// if it does not exist remotely.
    fn stat(&self, path: &str) -> BoxFuture<'_, Result<Option<EntryMeta>>>;

    /// Downloads the full content of `path`, along with its metadata.
    fn fetch(&self, path: &str) -> BoxFuture<'_, Result<(EntryMeta, Vec<u8>)>>;

    /// Creates a remote directory. Directories are never queued (§4.4):
    /// this is invoked synchronously from `create_directory`.
    fn create_directory(&self, path: &str) -> BoxFuture<'_, Result<()>>;

    /// Deletes `path` remotely (file or empty directory).
    fn delete(&self, path: &str) -> BoxFuture<'_, Result<()>>;

    /// Moves `from` to `to` remotely.
    fn rename(&self, from: &str, to: &str) -> BoxFuture<'_, Result<()>>;

    /// Uploads one chunk of `path` as `method` (`Put` to replace, `Post` to create).
    fn upload_chunk<'a>(
        &'a self,
        path: &'a str,
        method: Method,
        chunk: UploadChunk<'a>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// The local cache: a plain content store keyed by logical path.
pub trait LocalBackend: Send + Sync {
    /// Whether `path` has cached content locally.
    fn exists(&self, path: &str) -> BoxFuture<'_, Result<bool>>;

    /// Reads the cached content of `path`.
    fn read(&self, path: &str) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Writes `data` as the cached content of `path`, creating it if absent.
    /// Also used as the sink for a completed remote download (§6: "a method
    /// that copies bytes through" — there is no separate code path, since
    /// persisting fetched bytes and persisting locally-authored bytes are
    /// the same operation from the local backend's point of view).
    fn write(&self, path: &str, data: &[u8]) -> BoxFuture<'_, Result<()>>;

    /// Metadata for `path`, or `None` if not cached locally.
    fn metadata(&self, path: &str) -> BoxFuture<'_, Result<Option<EntryMeta>>>;

    /// Removes cached content (and any directory entry) for `path`.
    fn remove(&self, path: &str) -> BoxFuture<'_, Result<()>>;

    /// Moves cached content from `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> BoxFuture<'_, Result<()>>;

    /// Lists the direct children cached under `parent`.
    fn list(&self, parent: &str) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Creates an empty local directory entry.
    fn create_directory(&self, path: &str) -> BoxFuture<'_, Result<()>>;
}
