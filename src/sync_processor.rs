//! Sync Processor (§4.7): drains the Request Queue against the remote on a
//! timer, retrying failed entries with backoff and purging ones that have
//! failed too many times in a row.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::backend::{LocalBackend, RemoteBackend};
use crate::config::ShareConfig;
use crate::error::Result;
use crate::events::{CallbackRegistry, ShareEvent};
use crate::overlay::ShareContext;
use crate::path::is_temp_name;
use crate::queue::{Method, QueueEntry, RequestQueue};
use crate::uploader::{UploadSettings, Uploader};
use crate::work_file::WorkFileStore;

/// Drains a share's [`RequestQueue`], one entry at a time, against the
/// remote. Runs on its own timer; `start`/`stop` control a background task.
pub struct SyncProcessor<R: RemoteBackend, L: LocalBackend> {
    remote: Arc<R>,
    local: Arc<L>,
    queue: Arc<RequestQueue>,
    work_files: Arc<WorkFileStore<L>>,
    events: Arc<CallbackRegistry>,
    uploader: Uploader<R>,
    config: ShareConfig,
    running: AtomicBool,
}

impl<R: RemoteBackend, L: LocalBackend> SyncProcessor<R, L> {
    /// Builds a processor sharing every piece of `ctx`'s state.
    pub fn from_context(ctx: &ShareContext<R, L>) -> Self {
        let settings = UploadSettings {
            chunk_size: ctx.config.chunk_upload_size_bytes(),
            max_retries: ctx.config.max_retries,
            retry_delay: ctx.config.retry_delay(),
        };
        Self {
            remote: Arc::clone(&ctx.remote),
            local: Arc::clone(&ctx.local),
            queue: Arc::clone(&ctx.queue),
            work_files: Arc::new(WorkFileStore::new(Arc::clone(&ctx.local))),
            events: Arc::clone(&ctx.events),
            uploader: Uploader::new(Arc::clone(&ctx.remote), Arc::clone(&ctx.events), settings),
            config: ctx.config.clone(),
            running: AtomicBool::new(false),
        }
    }

    /// Spawns the timer-driven drain loop. Dropping the returned handle does
    /// not stop the loop; call [`Self::stop`] first and then `.await` it for
    /// a graceful shutdown (the in-flight drain, if any, finishes first).
    pub fn start(self: Arc<Self>) -> JoinHandle<()>
    where
        R: 'static,
        L: 'static,
    {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sync_interval());
            interval.tick().await; // first tick fires immediately; skip it
            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                self.drain_once().await;
            }
        })
    }

    /// Signals the background loop (if running) to stop after its current
    /// drain pass.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Drains every currently-queued entry once. Public so callers (and
    /// tests) can trigger a synchronous drain without waiting on the timer.
    pub async fn drain_once(&self) {
        if self.queue.is_empty() {
            return;
        }
        // Bounded to the entries present when this pass started: a failed
        // entry gets requeued at the back (queue/mod.rs's `requeue`), and
        // must wait for the *next* drain rather than being immediately
        // re-popped within this same pass (§4.7/§7 retry-on-next-cycle).
        let pass_size = self.queue.len();
        log::debug!("[SyncProcessor] draining {pass_size} queued entries");
        self.events.emit(ShareEvent::SyncStart);
        for _ in 0..pass_size {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            let path = entry.path();
            if is_temp_name(&path) {
                // Defensive: the Overlay never enqueues temp paths, but a
                // corrupted or hand-edited queue file could contain one.
                continue;
            }
            if let Err(err) = self.process_entry(&entry).await {
                log::warn!("[SyncProcessor] sync failed for {path}: {err}");
                self.events.emit(ShareEvent::SyncErr {
                    path: path.clone(),
                    error: err.to_string(),
                });
                self.requeue_after_failure(entry);
            }
        }
        log::info!("[SyncProcessor] drain complete");
        self.events.emit(ShareEvent::SyncEnd);
    }

    async fn process_entry(&self, entry: &QueueEntry) -> Result<()> {
        let path = entry.path();
        match entry.method {
            Method::Delete => self.remote.delete(&path).await,
            Method::Put | Method::Post => {
                let data = self.local.read(&path).await?;
                self.uploader.upload(&path, entry.method, &data, 0, None).await?;
                self.work_files.refresh_work(&path, Utc::now()).await?;
                Ok(())
            }
        }
    }

    fn requeue_after_failure(&self, entry: QueueEntry) {
        let path = entry.path();
        let Ok(retries) = self.queue.requeue(entry) else {
            return;
        };
        if retries >= self.config.purge_after_failures {
            if let Ok(Some(removed)) = self.queue.mark_purged(&path) {
                log::error!(
                    "[SyncProcessor] purging {path} after {retries} failed sync attempts"
                );
                self.events.emit(ShareEvent::SyncPurged {
                    path,
                    method: removed.method,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::ShareContext;
    use crate::testing::{MemoryLocal, MemoryRemote};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn context(config: ShareConfig) -> Arc<ShareContext<MemoryRemote, MemoryLocal>> {
        Arc::new(
            ShareContext::new(Arc::new(MemoryRemote::new()), Arc::new(MemoryLocal::new()), config).unwrap(),
        )
    }

    #[tokio::test]
    async fn drains_a_put_by_uploading_and_clearing_the_queue() {
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        let ctx = context(config);
        ctx.local.write("/a.txt", b"hello").await.unwrap();
        ctx.queue.enqueue("/a.txt", Method::Put).unwrap();

        let processor = SyncProcessor::from_context(&ctx);
        processor.drain_once().await;

        assert!(!ctx.queue.contains("/a.txt"));
        let (_, data) = ctx.remote.fetch("/a.txt").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn drains_a_delete_against_the_remote() {
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        let ctx = context(config);
        ctx.remote.set("/a.txt", b"bye".to_vec(), Utc::now());
        ctx.queue.enqueue("/a.txt", Method::Delete).unwrap();

        let processor = SyncProcessor::from_context(&ctx);
        processor.drain_once().await;

        assert!(ctx.remote.stat("/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_entries_are_requeued_with_incremented_retries() {
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        config.purge_after_failures = 100;
        let ctx = context(config);
        // No local content for a queued Put: read() fails with NotFound.
        ctx.queue.enqueue("/missing.txt", Method::Put).unwrap();

        let processor = SyncProcessor::from_context(&ctx);
        processor.drain_once().await;

        let entry = ctx.queue.get("/missing.txt").unwrap();
        assert_eq!(entry.retries, 1);
    }

    #[tokio::test]
    async fn an_entry_is_purged_after_exceeding_the_failure_threshold() {
        let mut config = ShareConfig::default();
        config.noprocessor = true;
        config.purge_after_failures = 2;
        let ctx = context(config);
        ctx.queue.enqueue("/missing.txt", Method::Put).unwrap();

        let purged = Arc::new(AtomicUsize::new(0));
        let purged_clone = Arc::clone(&purged);
        ctx.events.subscribe(Arc::new(move |event| {
            if matches!(event, ShareEvent::SyncPurged { .. }) {
                purged_clone.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }));

        let processor = SyncProcessor::from_context(&ctx);
        processor.drain_once().await;
        processor.drain_once().await;

        assert!(!ctx.queue.contains("/missing.txt"));
        assert_eq!(purged.load(AtomicOrdering::SeqCst), 1);
    }
}
