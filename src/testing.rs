//! In-memory [`RemoteBackend`]/[`LocalBackend`] doubles used by this crate's
//! own tests and available to integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::backend::{BoxFuture, EntryMeta, LocalBackend, RemoteBackend, UploadChunk};
use crate::error::{Result, RqError};
use crate::path::{join, parent_of};
use crate::queue::Method;

#[derive(Clone)]
struct StoredFile {
    data: Vec<u8>,
    meta: EntryMeta,
}

/// An in-memory [`RemoteBackend`]: a flat map of path to bytes plus metadata.
#[derive(Default)]
pub struct MemoryRemote {
    files: Mutex<HashMap<String, StoredFile>>,
    /// Every chunk handed to `upload_chunk`, in call order, for assertions.
    pub uploaded_chunks: Mutex<Vec<(String, Method, Vec<u8>)>>,
    /// When set, `upload_chunk` fails this many times before succeeding.
    pub fail_uploads_before_success: Mutex<u32>,
    /// When true, `upload_chunk` reports the asset as locked (ACCESS_DENIED, no retry).
    pub locked: Mutex<bool>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: seeds `path` with `data`, builder-style.
    pub fn with_file(self, path: &str, data: Vec<u8>) -> Self {
        let now = Utc::now();
        let meta = EntryMeta {
            path: path.to_string(),
            is_directory: false,
            size: data.len() as u64,
            last_modified: now,
        };
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), StoredFile { data, meta });
        self
    }

    /// Directly sets the stored bytes and last-modified for `path`, for
    /// tests that simulate the remote changing out from under the cache.
    pub fn set(&self, path: &str, data: Vec<u8>, last_modified: chrono::DateTime<Utc>) {
        let meta = EntryMeta {
            path: path.to_string(),
            is_directory: false,
            size: data.len() as u64,
            last_modified,
        };
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), StoredFile { data, meta });
    }

    /// Removes `path` from the remote, as if deleted out of band.
    pub fn remove_out_of_band(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }
}

impl RemoteBackend for MemoryRemote {
    fn list(&self, parent: &str) -> BoxFuture<'_, Result<Vec<EntryMeta>>> {
        let parent = parent.to_string();
        Box::pin(async move {
            let files = self.files.lock().unwrap();
            Ok(files
                .values()
                .filter(|f| parent_of(&f.meta.path) == parent)
                .map(|f| f.meta.clone())
                .collect())
        })
    }

    fn stat(&self, path: &str) -> BoxFuture<'_, Result<Option<EntryMeta>>> {
        let path = path.to_string();
        Box::pin(async move { Ok(self.files.lock().unwrap().get(&path).map(|f| f.meta.clone())) })
    }

    fn fetch(&self, path: &str) -> BoxFuture<'_, Result<(EntryMeta, Vec<u8>)>> {
        let path = path.to_string();
        Box::pin(async move {
            self.files
                .lock()
                .unwrap()
                .get(&path)
                .map(|f| (f.meta.clone(), f.data.clone()))
                .ok_or_else(|| RqError::NotFound(path.clone()))
        })
    }

    fn create_directory(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        Box::pin(async move {
            let meta = EntryMeta {
                path: path.clone(),
                is_directory: true,
                size: 0,
                last_modified: Utc::now(),
            };
            self.files
                .lock()
                .unwrap()
                .insert(path.clone(), StoredFile { data: Vec::new(), meta });
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        Box::pin(async move {
            self.files.lock().unwrap().remove(&path);
            Ok(())
        })
    }

    fn rename(&self, from: &str, to: &str) -> BoxFuture<'_, Result<()>> {
        let (from, to) = (from.to_string(), to.to_string());
        Box::pin(async move {
            let mut files = self.files.lock().unwrap();
            if let Some(mut stored) = files.remove(&from) {
                stored.meta.path = to.clone();
                files.insert(to, stored);
            }
            Ok(())
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        path: &'a str,
        method: Method,
        chunk: UploadChunk<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if *self.locked.lock().unwrap() {
                return Err(RqError::AccessDenied(path.to_string()));
            }

            let mut remaining = self.fail_uploads_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RqError::NetworkError(format!(
                    "simulated transport failure for {path}"
                )));
            }
            drop(remaining);

            self.uploaded_chunks
                .lock()
                .unwrap()
                .push((path.to_string(), method, chunk.data.to_vec()));

            if chunk.is_last {
                let mut files = self.files.lock().unwrap();
                let entry = files.entry(path.to_string()).or_insert_with(|| StoredFile {
                    data: Vec::new(),
                    meta: EntryMeta {
                        path: path.to_string(),
                        is_directory: false,
                        size: 0,
                        last_modified: Utc::now(),
                    },
                });
                if chunk.offset == 0 {
                    entry.data.clear();
                }
                entry.data.extend_from_slice(chunk.data);
                entry.meta.size = entry.data.len() as u64;
                entry.meta.last_modified = Utc::now();
            }
            Ok(())
        })
    }
}

/// Wraps a [`MemoryRemote`] (or any [`RemoteBackend`]) to count `fetch` calls
/// and simulate fetch latency, for single-flight dedup tests.
pub struct CountingRemote<R: RemoteBackend> {
    inner: R,
    delay: Duration,
    /// Number of times `fetch` has actually run (not counting dedup waiters).
    pub call_count: AtomicU64,
}

impl<R: RemoteBackend> CountingRemote<R> {
    /// Wraps `inner`, sleeping `delay` inside every `fetch` call before
    /// delegating, to widen the race window in concurrency tests.
    pub fn new(inner: R, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            call_count: AtomicU64::new(0),
        }
    }
}

impl<R: RemoteBackend> RemoteBackend for CountingRemote<R> {
    fn list(&self, parent: &str) -> BoxFuture<'_, Result<Vec<EntryMeta>>> {
        self.inner.list(parent)
    }

    fn stat(&self, path: &str) -> BoxFuture<'_, Result<Option<EntryMeta>>> {
        self.inner.stat(path)
    }

    fn fetch(&self, path: &str) -> BoxFuture<'_, Result<(EntryMeta, Vec<u8>)>> {
        let path = path.to_string();
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(&path).await
        })
    }

    fn create_directory(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        self.inner.create_directory(path)
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        self.inner.delete(path)
    }

    fn rename(&self, from: &str, to: &str) -> BoxFuture<'_, Result<()>> {
        self.inner.rename(from, to)
    }

    fn upload_chunk<'a>(
        &'a self,
        path: &'a str,
        method: Method,
        chunk: UploadChunk<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        self.inner.upload_chunk(path, method, chunk)
    }
}

/// An in-memory [`LocalBackend`].
#[derive(Default)]
pub struct MemoryLocal {
    files: Mutex<HashMap<String, (Vec<u8>, EntryMeta)>>,
}

impl MemoryLocal {
    /// Creates an empty local cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `path` with `data`, builder-style.
    pub fn with_file(self, path: &str, data: Vec<u8>) -> Self {
        let meta = EntryMeta {
            path: path.to_string(),
            is_directory: false,
            size: data.len() as u64,
            last_modified: Utc::now(),
        };
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (data, meta));
        self
    }

    /// Sets `path`'s local modification time directly, for conflict tests.
    pub fn touch(&self, path: &str, last_modified: chrono::DateTime<Utc>) {
        if let Some((_, meta)) = self.files.lock().unwrap().get_mut(path) {
            meta.last_modified = last_modified;
        }
    }
}

impl LocalBackend for MemoryLocal {
    fn exists(&self, path: &str) -> BoxFuture<'_, Result<bool>> {
        let path = path.to_string();
        Box::pin(async move { Ok(self.files.lock().unwrap().contains_key(&path)) })
    }

    fn read(&self, path: &str) -> BoxFuture<'_, Result<Vec<u8>>> {
        let path = path.to_string();
        Box::pin(async move {
            self.files
                .lock()
                .unwrap()
                .get(&path)
                .map(|(data, _)| data.clone())
                .ok_or_else(|| RqError::NotFound(path.clone()))
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            let meta = EntryMeta {
                path: path.clone(),
                is_directory: false,
                size: data.len() as u64,
                last_modified: Utc::now(),
            };
            self.files.lock().unwrap().insert(path, (data, meta));
            Ok(())
        })
    }

    fn metadata(&self, path: &str) -> BoxFuture<'_, Result<Option<EntryMeta>>> {
        let path = path.to_string();
        Box::pin(async move {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&path)
                .map(|(_, meta)| meta.clone()))
        })
    }

    fn remove(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        Box::pin(async move {
            self.files.lock().unwrap().remove(&path);
            Ok(())
        })
    }

    fn rename(&self, from: &str, to: &str) -> BoxFuture<'_, Result<()>> {
        let (from, to) = (from.to_string(), to.to_string());
        Box::pin(async move {
            let mut files = self.files.lock().unwrap();
            if let Some(mut entry) = files.remove(&from) {
                entry.1.path = to.clone();
                files.insert(to, entry);
            }
            Ok(())
        })
    }

    fn list(&self, parent: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let parent = parent.to_string();
        Box::pin(async move {
            let files = self.files.lock().unwrap();
            Ok(files
                .keys()
                .filter(|p| parent_of(p) == parent)
                .map(|p| crate::path::name_of(p).to_string())
                .collect())
        })
    }

    fn create_directory(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        Box::pin(async move {
            let meta = EntryMeta {
                path: path.clone(),
                is_directory: true,
                size: 0,
                last_modified: Utc::now(),
            };
            self.files.lock().unwrap().insert(path, (Vec::new(), meta));
            Ok(())
        })
    }
}

/// Convenience for building a path string in tests without repeating `join`.
pub fn path(parent: &str, name: &str) -> String {
    join(parent, name)
}
