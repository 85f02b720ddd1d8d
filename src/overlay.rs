//! Overlay Tree (§4.4): the component callers actually talk to.
//!
//! Merges the remote listing with the local cache and the request queue's
//! pending deletes/creates into one consistent view, and drives every
//! caller-facing operation (`exists`, `open`, `list`, `create*`, `delete*`,
//! `rename`, ...).

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use glob::Pattern;

use crate::backend::{EntryMeta, LocalBackend, RemoteBackend};
use crate::config::ShareConfig;
use crate::download::{self, DownloadCoordinator};
use crate::error::{Result, RqError};
use crate::events::{CallbackRegistry, ShareEvent};
use crate::list_cache::ListCache;
use crate::path::{is_temp_name, join, name_of, parent_of};
use crate::path_lock::PathLocks;
use crate::queue::{Method, QueueOp, RequestQueue};
use crate::work_file::WorkFileStore;

/// How a [`FileEntry`] is currently backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Known only to the remote; never fetched locally.
    RemoteOnly,
    /// Known only locally (created, not yet synced, or temp).
    LocalOnly,
    /// Present in both; local is the materialized cache of the remote copy.
    Both,
}

/// The overlay-level view of a file, materialized fresh on every `open`/`list`.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Logical path.
    pub path: String,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Size in bytes.
    pub size: u64,
    /// Creation timestamp (aliases `last_modified`: backends in this crate's
    /// contract report a single modification timestamp, not separate
    /// created/changed/accessed times; see `DESIGN.md`).
    pub created: DateTime<Utc>,
    /// Last-modified timestamp.
    pub last_modified: DateTime<Utc>,
    /// Last-changed timestamp (see `created`).
    pub last_changed: DateTime<Utc>,
    /// Last-accessed timestamp (see `created`).
    pub last_accessed: DateTime<Utc>,
    /// Where this entry's data currently lives.
    pub origin: Origin,
}

impl FileEntry {
    fn from_meta(meta: EntryMeta, origin: Origin) -> Self {
        Self {
            path: meta.path,
            is_directory: meta.is_directory,
            size: meta.size,
            created: meta.last_modified,
            last_modified: meta.last_modified,
            last_changed: meta.last_modified,
            last_accessed: meta.last_modified,
            origin,
        }
    }
}

/// Tolerance applied when comparing a local modification time against the
/// work-file's `lastSyncDate` in `can_delete` (§4.4), absorbing clock/backend
/// timestamp jitter around the moment of a sync.
fn can_delete_tolerance() -> ChronoDuration {
    ChronoDuration::milliseconds(50)
}

/// Share-wide state shared by every `OverlayTree` handle on the same share,
/// replacing the source system's per-share singletons with an explicit
/// context object (§9 design notes).
pub struct ShareContext<R: RemoteBackend, L: LocalBackend> {
    /// Remote asset API backend.
    pub remote: Arc<R>,
    /// Local cache backend.
    pub local: Arc<L>,
    /// Pending-mutation queue.
    pub queue: Arc<RequestQueue>,
    /// Work-file sidecar store.
    pub work_files: WorkFileStore<L>,
    /// Remote folder listing cache.
    pub list_cache: Arc<ListCache>,
    /// Single-flight download coordinator.
    pub downloads: Arc<DownloadCoordinator<R>>,
    /// Typed event subscriber registry.
    pub events: Arc<CallbackRegistry>,
    /// Per-path lock table (work-file/content mutation ordering).
    pub locks: PathLocks,
    /// Share configuration.
    pub config: ShareConfig,
}

impl<R: RemoteBackend, L: LocalBackend> ShareContext<R, L> {
    /// Builds share-wide state around the given backends and configuration.
    pub fn new(remote: Arc<R>, local: Arc<L>, config: ShareConfig) -> Result<Self> {
        let work_path = if config.noprocessor {
            None
        } else {
            Some(config.work_path.clone())
        };
        Ok(Self {
            remote: Arc::clone(&remote),
            local: Arc::clone(&local),
            queue: Arc::new(RequestQueue::new(work_path, config.no_unicode_normalize)?),
            work_files: WorkFileStore::new(Arc::clone(&local)),
            list_cache: Arc::new(ListCache::new(config.content_cache_ttl())),
            downloads: Arc::new(DownloadCoordinator::new(remote)),
            events: Arc::new(CallbackRegistry::new()),
            locks: PathLocks::new(),
            config,
        })
    }
}

/// One handle onto a share's overlay tree. Cheap to clone (an `Arc` around
/// shared state); multiple handles may be open concurrently on the same share.
#[derive(Clone)]
pub struct OverlayTree<R: RemoteBackend, L: LocalBackend> {
    ctx: Arc<ShareContext<R, L>>,
}

impl<R: RemoteBackend, L: LocalBackend> OverlayTree<R, L> {
    /// Opens a new handle onto `ctx`.
    pub fn new(ctx: Arc<ShareContext<R, L>>) -> Self {
        Self { ctx }
    }

    /// Visibility check (§4.4). Never errors: a remote failure is treated as
    /// "not visible" rather than surfaced (§7 propagation policy).
    pub async fn exists(&self, path: &str) -> bool {
        if is_temp_name(path) {
            return self.ctx.local.exists(path).await.unwrap_or(false);
        }
        if matches!(self.ctx.local.exists(path).await, Ok(true)) {
            return true;
        }
        if let Some(entry) = self.ctx.queue.get(path) {
            if entry.method == Method::Delete {
                return false;
            }
        }
        matches!(self.ctx.remote.stat(path).await, Ok(Some(_)))
    }

    /// Materializes the current [`FileEntry`] for `path`, downloading
    /// through the [`DownloadCoordinator`] if the cached copy is stale.
    pub async fn open(&self, path: &str) -> Result<FileEntry> {
        if self.ctx.downloads.is_downloading(path) && !is_temp_name(path) {
            // A concurrent open may still proceed: it joins the in-flight
            // fetch and observes the remote size, per §4.5.
        }

        if is_temp_name(path) {
            let meta = self
                .ctx
                .local
                .metadata(path)
                .await?
                .ok_or_else(|| RqError::NotFound(path.to_string()))?;
            return Ok(FileEntry::from_meta(meta, Origin::LocalOnly));
        }

        if let Some(entry) = self.ctx.queue.get(path) {
            match entry.method {
                Method::Delete => return Err(RqError::NotFound(path.to_string())),
                Method::Put => {
                    let meta = self
                        .ctx
                        .local
                        .metadata(path)
                        .await?
                        .ok_or_else(|| RqError::NotFound(path.to_string()))?;
                    return Ok(FileEntry::from_meta(meta, Origin::LocalOnly));
                }
                Method::Post => {}
            }
        }

        let work = self.ctx.work_files.read_work(path).await?;
        let remote_meta = self.ctx.remote.stat(path).await?;

        let Some(remote_meta) = remote_meta else {
            return match self.ctx.local.metadata(path).await? {
                Some(meta) => Ok(FileEntry::from_meta(meta, Origin::LocalOnly)),
                None => Err(RqError::NotFound(path.to_string())),
            };
        };

        if download::needs_download(work.as_ref(), remote_meta.last_modified) {
            self.ctx.events.emit(ShareEvent::DownloadStart {
                path: path.to_string(),
            });
            let result = self.ctx.downloads.fetch(path).await;
            match &result {
                Ok((meta, bytes)) => {
                    self.ctx.local.write(path, bytes).await?;
                    self.ctx
                        .work_files
                        .refresh_work(path, meta.last_modified)
                        .await?;
                    self.ctx.events.emit(ShareEvent::DownloadEnd {
                        path: path.to_string(),
                        error: None,
                    });
                }
                Err(err) => {
                    self.ctx.events.emit(ShareEvent::DownloadEnd {
                        path: path.to_string(),
                        error: Some(err.to_string()),
                    });
                }
            }
            let (meta, _bytes) = result?;
            Ok(FileEntry::from_meta(meta, Origin::Both))
        } else {
            match self.ctx.local.metadata(path).await? {
                Some(meta) => Ok(FileEntry::from_meta(meta, Origin::Both)),
                None => Ok(FileEntry::from_meta(remote_meta, Origin::RemoteOnly)),
            }
        }
    }

    /// Lists entries matching `pattern` (§4.4). A pattern whose final
    /// segment has no glob metacharacters is treated as a literal directory
    /// path; list failures on the remote side never fail the call (§7): the
    /// local + queued view is returned instead.
    pub async fn list(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        if is_temp_name(pattern) && name_of(pattern).chars().all(|c| c != '*' && c != '?') {
            let mut out = Vec::new();
            if let Some(meta) = self.ctx.local.metadata(pattern).await? {
                out.push(FileEntry::from_meta(meta, Origin::LocalOnly));
            }
            return Ok(out);
        }

        let has_glob = name_of(pattern).contains(['*', '?']);
        let parent = if has_glob {
            parent_of(pattern)
        } else {
            pattern.to_string()
        };
        let glob_pattern = has_glob
            .then(|| Pattern::new(name_of(pattern)).ok())
            .flatten();

        let remote_names = self.remote_listing(&parent).await;
        let mut seen_names = std::collections::HashSet::new();
        let mut out = Vec::new();

        for name in &remote_names {
            let child = join(&parent, name);
            if let Some(pat) = &glob_pattern {
                if !pat.matches(name) {
                    continue;
                }
            }
            seen_names.insert(name.clone());

            if let Some(entry) = self.ctx.queue.get(&child) {
                if entry.method == Method::Delete {
                    continue;
                }
            }

            let local_exists = self.ctx.local.exists(&child).await.unwrap_or(false);
            if local_exists && !self.ctx.work_files.has_work(&child).await.unwrap_or(false) {
                if let Some(meta) = self.ctx.local.metadata(&child).await? {
                    out.push(FileEntry::from_meta(meta, Origin::Both));
                    continue;
                }
            }

            if let Ok(Some(meta)) = self.ctx.remote.stat(&child).await {
                out.push(FileEntry::from_meta(
                    meta,
                    if local_exists { Origin::Both } else { Origin::RemoteOnly },
                ));
            }
        }

        for name in self.ctx.local.list(&parent).await.unwrap_or_default() {
            if seen_names.contains(&name) {
                continue;
            }
            let child = join(&parent, name.as_str());
            if is_temp_name(&child) {
                continue;
            }
            if let Some(pat) = &glob_pattern {
                if !pat.matches(&name) {
                    continue;
                }
            }

            let has_work = self.ctx.work_files.has_work(&child).await.unwrap_or(false);
            // A cached file whose work-file says it came from the remote, but
            // the remote no longer lists it, means the remote deleted it:
            // drop it locally if nothing changed since the last sync (§4.4
            // step 5). Otherwise — including the no-work-file case of step 4
            // — keep it and surface the conflict.
            if has_work && self.can_delete(&child).await? {
                self.ctx.local.remove(&child).await?;
                self.ctx.work_files.remove_work(&child).await?;
                continue;
            }
            self.ctx.events.emit(ShareEvent::SyncConflict { path: child.clone() });
            if let Some(meta) = self.ctx.local.metadata(&child).await? {
                out.push(FileEntry::from_meta(meta, Origin::LocalOnly));
            }
        }

        Ok(out)
    }

    async fn remote_listing(&self, parent: &str) -> Vec<String> {
        if let Some(cached) = self.ctx.list_cache.get(parent) {
            return cached;
        }
        match self.ctx.remote.list(parent).await {
            Ok(entries) => {
                let names: Vec<String> = entries.iter().map(|e| name_of(&e.path).to_string()).collect();
                self.ctx.list_cache.put(parent, names.clone());
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// `canDelete(P)` (§4.4): true iff not locally created, not modified
    /// since the last sync (within tolerance), and a work-file exists.
    pub async fn can_delete(&self, path: &str) -> Result<bool> {
        if matches!(self.ctx.queue.get(path).map(|e| e.method), Some(Method::Put)) {
            return Ok(false);
        }
        let Some(work) = self.ctx.work_files.read_work(path).await? else {
            return Ok(false);
        };
        let Some(meta) = self.ctx.local.metadata(path).await? else {
            return Ok(false);
        };
        Ok(meta.last_modified <= work.last_sync_date + can_delete_tolerance())
    }

    /// Creates `path` locally and, unless it's a temp path, enqueues a PUT.
    pub async fn create_file(&self, path: &str, data: &[u8]) -> Result<()> {
        if is_temp_name(path) {
            self.ctx.local.write(path, data).await?;
            return Ok(());
        }
        if self.exists(path).await {
            return Err(RqError::AlreadyExists(path.to_string()));
        }
        self.ctx.local.write(path, data).await?;
        self.ctx.queue.enqueue(path, Method::Put)?;
        Ok(())
    }

    /// Creates `path` locally and issues an immediate (non-queued) remote
    /// directory create, unless it's a temp path.
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        self.ctx.local.create_directory(path).await?;
        if !is_temp_name(path) {
            self.ctx.remote.create_directory(path).await?;
        }
        Ok(())
    }

    /// Deletes `path` (§4.4).
    pub async fn delete(&self, path: &str) -> Result<()> {
        if is_temp_name(path) {
            if !self.ctx.local.exists(path).await? {
                return Err(RqError::NotFound(path.to_string()));
            }
            self.ctx.local.remove(path).await?;
            return Ok(());
        }

        if let Some(entry) = self.ctx.queue.get(path) {
            if entry.method == Method::Put {
                self.ctx.local.remove(path).await?;
                self.ctx.queue.enqueue(path, Method::Delete)?;
                return Ok(());
            }
        }

        if self.ctx.local.exists(path).await? {
            self.ctx.local.remove(path).await?;
            self.ctx.work_files.remove_work(path).await?;
        }
        self.ctx.queue.enqueue(path, Method::Delete)?;
        Ok(())
    }

    /// Deletes a directory immediately on the remote (directories are never
    /// queued, mirroring `create_directory`).
    pub async fn delete_directory(&self, path: &str) -> Result<()> {
        if self.ctx.local.exists(path).await? {
            self.ctx.local.remove(path).await?;
        }
        if !is_temp_name(path) {
            self.ctx.remote.delete(path).await?;
        }
        Ok(())
    }

    /// Renames `old` to `new` (§4.4): queues the MOVE per Table 2, then
    /// moves local content and the work-file best-effort.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let _guard = self.ctx.locks.lock_two(old, new).await;

        let old_is_temp = is_temp_name(old);
        let new_is_temp = is_temp_name(new);

        if !new_is_temp {
            if let Ok(Some(_)) = self.ctx.remote.stat(new).await {
                self.ctx.events.emit(ShareEvent::SyncConflict { path: new.to_string() });
            }
        }

        self.ctx.queue.queue_move(old, new, old_is_temp, new_is_temp)?;

        if self.ctx.local.exists(old).await.unwrap_or(false) {
            match self.ctx.local.rename(old, new).await {
                Ok(()) => {
                    let _ = self.ctx.work_files.rename_work(old, new).await;
                }
                Err(err) => {
                    self.ctx.events.emit(ShareEvent::SyncConflict { path: new.to_string() });
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Depth-first local delete of everything under `dir`. Any entry that
    /// fails `can_delete` (including locally-created, never-synced files) is
    /// retained and reported via `syncconflict`.
    pub fn delete_local_directory_recursive<'a>(
        &'a self,
        dir: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let children = self.ctx.local.list(dir).await.unwrap_or_default();
            for name in children {
                let child = join(dir, &name);
                let is_dir = self
                    .ctx
                    .local
                    .metadata(&child)
                    .await?
                    .map(|m| m.is_directory)
                    .unwrap_or(false);

                if is_dir {
                    self.delete_local_directory_recursive(&child).await?;
                    continue;
                }

                if self.can_delete(&child).await? {
                    self.ctx.local.remove(&child).await?;
                    self.ctx.work_files.remove_work(&child).await?;
                } else {
                    self.ctx.events.emit(ShareEvent::SyncConflict { path: child });
                }
            }
            Ok(())
        })
    }

    /// Rewrites the work-file baseline for every locally cached descendant
    /// of `path`. Non-recursive unless `deep`. Silently succeeds for paths
    /// with no cached content.
    pub fn refresh_work_files<'a>(
        &'a self,
        path: &'a str,
        deep: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for name in self.ctx.local.list(path).await.unwrap_or_default() {
                let child = join(path, &name);
                let Some(meta) = self.ctx.local.metadata(&child).await? else {
                    continue;
                };
                if meta.is_directory {
                    if deep {
                        self.refresh_work_files(&child, deep).await?;
                    }
                    continue;
                }
                self.ctx.work_files.refresh_work(&child, meta.last_modified).await?;
            }
            Ok(())
        })
    }

    /// Exposes direct queue access (§4.4 `queueData`) for callers that need
    /// to enqueue a mutation without going through the file-mutating helpers
    /// above (e.g. the sync processor re-enqueuing after a partial failure).
    pub fn queue_data(&self, path: &str, op: QueueOp, destination: Option<&str>) -> Result<()> {
        match op {
            QueueOp::Put => self.ctx.queue.enqueue(path, Method::Put),
            QueueOp::Post => self.ctx.queue.enqueue(path, Method::Post),
            QueueOp::Delete => self.ctx.queue.enqueue(path, Method::Delete),
            QueueOp::Move => {
                let dest = destination.ok_or_else(|| RqError::NotImplemented("move requires a destination".into()))?;
                self.ctx
                    .queue
                    .queue_move(path, dest, is_temp_name(path), is_temp_name(dest))
            }
            QueueOp::Copy => {
                let dest = destination.ok_or_else(|| RqError::NotImplemented("copy requires a destination".into()))?;
                self.ctx.queue.queue_copy(dest)
            }
        }
    }

    /// Clears the remote folder listing cache.
    pub fn clear_cache(&self) {
        self.ctx.list_cache.clear();
    }

    /// Forces the local cache to adopt the remote's current content and
    /// `lastModified` as the new baseline, even if that timestamp is
    /// *older* than the one already recorded — the explicit escape hatch
    /// from `needs_download`'s normal "never go backward" rule (§4.5).
    pub async fn force_resync(&self, path: &str) -> Result<FileEntry> {
        let (meta, bytes) = self.ctx.remote.fetch(path).await?;
        self.ctx.local.write(path, &bytes).await?;
        let work = download::adopt_backward(name_of(path), meta.last_modified);
        self.ctx.work_files.write_work(path, &work).await?;
        Ok(FileEntry::from_meta(meta, Origin::Both))
    }

    /// Walks the local cache, summing bytes of files with a pending queue
    /// entry and emitting `syncconflict` for any file currently failing
    /// `can_delete`. A single sweep; callers that want the periodic
    /// behavior described in §4.4 invoke this on their own timer (the same
    /// pattern the Sync Processor uses for queue draining).
    pub async fn check_cache_size_and_conflicts(&self) -> Result<u64> {
        let mut total_bytes = 0u64;
        self.walk_for_cache_check("/", &mut total_bytes).await?;
        self.ctx.events.emit(ShareEvent::CacheSize { bytes: total_bytes });
        Ok(total_bytes)
    }

    fn walk_for_cache_check<'a>(
        &'a self,
        dir: &'a str,
        total_bytes: &'a mut u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for name in self.ctx.local.list(dir).await.unwrap_or_default() {
                let child = join(dir, &name);
                let Some(meta) = self.ctx.local.metadata(&child).await? else {
                    continue;
                };
                if meta.is_directory {
                    self.walk_for_cache_check(&child, total_bytes).await?;
                    continue;
                }
                if self.ctx.queue.contains(&child) {
                    *total_bytes += meta.size;
                }
                if !self.can_delete(&child).await? {
                    self.ctx.events.emit(ShareEvent::SyncConflict { path: child });
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryLocal;
    use crate::testing::MemoryRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Arc<ShareContext<MemoryRemote, MemoryLocal>> {
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        Arc::new(
            ShareContext::new(Arc::new(MemoryRemote::new()), Arc::new(MemoryLocal::new()), config).unwrap(),
        )
    }

    #[tokio::test]
    async fn create_file_enqueues_put_and_is_visible() {
        let tree = OverlayTree::new(ctx());
        tree.create_file("/a.txt", b"hi").await.unwrap();

        assert!(tree.exists("/a.txt").await);
        assert_eq!(tree.ctx.queue.get("/a.txt").unwrap().method, Method::Put);

        let entry = tree.open("/a.txt").await.unwrap();
        assert_eq!(entry.origin, Origin::LocalOnly);
        assert_eq!(entry.size, 2);
    }

    #[tokio::test]
    async fn create_file_over_existing_path_fails() {
        let tree = OverlayTree::new(ctx());
        tree.create_file("/a.txt", b"hi").await.unwrap();
        let err = tree.create_file("/a.txt", b"bye").await.unwrap_err();
        assert!(matches!(err, RqError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn temp_file_create_never_touches_the_queue() {
        let tree = OverlayTree::new(ctx());
        tree.create_file("/.tmp", b"scratch").await.unwrap();
        assert!(tree.exists("/.tmp").await);
        assert!(!tree.ctx.queue.contains("/.tmp"));
    }

    #[tokio::test]
    async fn delete_of_queued_put_coalesces_to_nothing() {
        let tree = OverlayTree::new(ctx());
        tree.create_file("/a.txt", b"hi").await.unwrap();
        tree.delete("/a.txt").await.unwrap();

        assert!(!tree.exists("/a.txt").await);
        assert!(!tree.ctx.queue.contains("/a.txt"));
    }

    #[tokio::test]
    async fn open_downloads_through_the_coordinator_on_first_access() {
        let remote = Arc::new(MemoryRemote::new().with_file("/r.txt", b"remote-bytes".to_vec()));
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        let ctx = Arc::new(ShareContext::new(remote, Arc::new(MemoryLocal::new()), config).unwrap());
        let tree = OverlayTree::new(ctx);

        let entry = tree.open("/r.txt").await.unwrap();
        assert_eq!(entry.origin, Origin::Both);
        assert_eq!(entry.size, 12);

        let cached = tree.ctx.local.read("/r.txt").await.unwrap();
        assert_eq!(cached, b"remote-bytes");
    }

    #[tokio::test]
    async fn remote_deletion_with_clean_cache_is_propagated_on_list() {
        let remote = Arc::new(MemoryRemote::new().with_file("/dir/f.txt", b"x".to_vec()));
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        let ctx = Arc::new(ShareContext::new(Arc::clone(&remote), Arc::new(MemoryLocal::new()), config).unwrap());
        let tree = OverlayTree::new(ctx);

        tree.open("/dir/f.txt").await.unwrap();
        remote.remove_out_of_band("/dir/f.txt");

        let entries = tree.list("/dir").await.unwrap();
        assert!(entries.iter().all(|e| e.path != "/dir/f.txt"));
        assert!(!tree.ctx.local.exists("/dir/f.txt").await.unwrap());
    }

    #[tokio::test]
    async fn remote_deletion_with_local_edits_keeps_file_and_emits_conflict() {
        let remote = Arc::new(MemoryRemote::new().with_file("/dir/f.txt", b"x".to_vec()));
        let local = Arc::new(MemoryLocal::new());
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        let ctx = Arc::new(ShareContext::new(Arc::clone(&remote), Arc::clone(&local), config).unwrap());
        let tree = OverlayTree::new(ctx);

        tree.open("/dir/f.txt").await.unwrap();
        // Simulate a local edit after the sync baseline was recorded.
        local.touch("/dir/f.txt", Utc::now() + ChronoDuration::seconds(60));
        remote.remove_out_of_band("/dir/f.txt");

        let conflicts = Arc::new(AtomicUsize::new(0));
        let conflicts_clone = Arc::clone(&conflicts);
        tree.ctx.events.subscribe(Arc::new(move |event| {
            if matches!(event, ShareEvent::SyncConflict { path } if path == "/dir/f.txt") {
                conflicts_clone.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let entries = tree.list("/dir").await.unwrap();
        assert!(entries.iter().any(|e| e.path == "/dir/f.txt"));
        assert!(conflicts.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn rename_moves_local_content_and_queues_delete_put() {
        let tree = OverlayTree::new(ctx());
        tree.create_file("/a.txt", b"hi").await.unwrap();
        tree.ctx.queue.remove("/a.txt").unwrap(); // simulate already synced (no prior Put queued)
        tree.ctx
            .work_files
            .refresh_work("/a.txt", Utc::now())
            .await
            .unwrap();

        tree.rename("/a.txt", "/b.txt").await.unwrap();

        assert!(!tree.ctx.local.exists("/a.txt").await.unwrap());
        assert!(tree.ctx.local.exists("/b.txt").await.unwrap());
        assert_eq!(tree.ctx.queue.get("/a.txt").unwrap().method, Method::Delete);
        assert_eq!(tree.ctx.queue.get("/b.txt").unwrap().method, Method::Put);
    }

    #[tokio::test]
    async fn can_delete_is_false_for_queued_creates() {
        let tree = OverlayTree::new(ctx());
        tree.create_file("/a.txt", b"hi").await.unwrap();
        assert!(!tree.can_delete("/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn can_delete_is_true_for_a_freshly_synced_file() {
        let tree = OverlayTree::new(ctx());
        tree.ctx.local.write("/a.txt", b"hi").await.unwrap();
        tree.ctx.work_files.refresh_work("/a.txt", Utc::now()).await.unwrap();
        assert!(tree.can_delete("/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn force_resync_adopts_a_backward_remote_timestamp() {
        let remote = Arc::new(MemoryRemote::new());
        let earlier = Utc::now() - ChronoDuration::seconds(120);
        remote.set("/r.txt", b"older-but-forced".to_vec(), earlier);

        let mut config = ShareConfig::default();
        config.noprocessor = true;
        let ctx = Arc::new(ShareContext::new(Arc::clone(&remote), Arc::new(MemoryLocal::new()), config).unwrap());
        let tree = OverlayTree::new(Arc::clone(&ctx));

        // Seed a baseline newer than `earlier`, as if an earlier sync already ran.
        ctx.work_files.refresh_work("/r.txt", Utc::now()).await.unwrap();

        let entry = tree.force_resync("/r.txt").await.unwrap();
        assert_eq!(entry.origin, Origin::Both);
        let cached = ctx.local.read("/r.txt").await.unwrap();
        assert_eq!(cached, b"older-but-forced");

        let work = ctx.work_files.read_work("/r.txt").await.unwrap().unwrap();
        assert_eq!(work.remote_last_modified, earlier);
    }
}
