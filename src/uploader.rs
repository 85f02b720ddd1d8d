//! Chunked Uploader (§4.6): pushes locally cached content to the remote in
//! fixed-size chunks, with retry, resume, and cooperative cancellation.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{RemoteBackend, UploadChunk};
use crate::error::{Result, RqError};
use crate::events::{CallbackRegistry, ShareEvent};
use crate::queue::Method;

/// Called before each chunk is sent; returning `true` aborts the upload.
/// Mirrors the source system's `onChunk` cancellation hook.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Tunables governing chunk size and retry behavior, pulled from
/// [`crate::config::ShareConfig`] by callers.
#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    /// Size of each chunk, in bytes.
    pub chunk_size: u64,
    /// Maximum retry attempts per chunk before the whole upload fails.
    pub max_retries: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
}

/// Drives one chunked upload end to end against a [`RemoteBackend`].
pub struct Uploader<R: RemoteBackend> {
    remote: Arc<R>,
    events: Arc<CallbackRegistry>,
    settings: UploadSettings,
}

impl<R: RemoteBackend> Uploader<R> {
    /// Builds an uploader around `remote`, reporting progress through `events`.
    pub fn new(remote: Arc<R>, events: Arc<CallbackRegistry>, settings: UploadSettings) -> Self {
        Self {
            remote,
            events,
            settings,
        }
    }

    /// Uploads `data` for `path` as `method`, starting at `from_offset`
    /// (nonzero to resume a previously interrupted upload). `cancel`, if
    /// given, is polled before every chunk; when it returns `true` the
    /// upload stops early, treated as success-so-far (`syncfileend`, not
    /// `syncfileerr`). `syncfileabort` is reserved for the distinct §5
    /// abort-signal mechanism, not this cooperative-cancel hook.
    pub async fn upload(
        &self,
        path: &str,
        method: Method,
        data: &[u8],
        from_offset: u64,
        cancel: Option<CancelCheck>,
    ) -> Result<()> {
        let total = data.len() as u64;
        self.events.emit(ShareEvent::SyncFileStart { path: path.to_string() });

        let mut offset = from_offset.min(total);
        loop {
            if let Some(cancel) = &cancel {
                if cancel() {
                    self.events.emit(ShareEvent::SyncFileEnd { path: path.to_string() });
                    return Ok(());
                }
            }

            let end = (offset + self.settings.chunk_size).min(total);
            let is_first = offset == 0;
            let is_last = end >= total;
            let slice = &data[offset as usize..end as usize];

            if let Err(err) = self.send_with_retry(path, method, offset, total, is_first, is_last, slice).await {
                self.events.emit(ShareEvent::SyncFileErr {
                    path: path.to_string(),
                    error: err.to_string(),
                });
                return Err(err);
            }

            self.events.emit(ShareEvent::SyncFileProgress {
                path: path.to_string(),
                read: end,
                total,
            });

            if is_last {
                break;
            }
            offset = end;
        }

        self.events.emit(ShareEvent::SyncFileEnd { path: path.to_string() });
        Ok(())
    }

    async fn send_with_retry(
        &self,
        path: &str,
        method: Method,
        offset: u64,
        total: u64,
        is_first: bool,
        is_last: bool,
        data: &[u8],
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let chunk = UploadChunk {
                offset,
                total_size: total,
                is_first,
                is_last,
                data,
            };
            match self.remote.upload_chunk(path, method, chunk).await {
                Ok(()) => return Ok(()),
                // Locked/checked-out assets fail the whole upload immediately; retrying
                // will not help since the lock is held by another client (§4.6).
                Err(err @ RqError::AccessDenied(_)) => return Err(err),
                Err(err) if err.is_retriable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> UploadSettings {
        UploadSettings {
            chunk_size: 4,
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn uploads_in_chunks_and_assembles_on_the_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let uploader = Uploader::new(Arc::clone(&remote), Arc::new(CallbackRegistry::new()), settings());

        uploader
            .upload("/big.txt", Method::Put, b"0123456789", 0, None)
            .await
            .unwrap();

        let chunks = remote.uploaded_chunks.lock().unwrap();
        assert_eq!(chunks.len(), 3); // 4 + 4 + 2 bytes
        drop(chunks);

        let (_, assembled) = remote.fetch("/big.txt").await.unwrap();
        assert_eq!(assembled, b"0123456789");
    }

    #[tokio::test]
    async fn resumes_from_a_nonzero_offset() {
        let remote = Arc::new(MemoryRemote::new());
        let uploader = Uploader::new(Arc::clone(&remote), Arc::new(CallbackRegistry::new()), settings());

        uploader
            .upload("/r.txt", Method::Put, b"0123456789", 4, None)
            .await
            .unwrap();

        let chunks = remote.uploaded_chunks.lock().unwrap();
        assert_eq!(chunks[0].2, b"4567");
    }

    #[tokio::test]
    async fn retries_transient_failures_and_then_succeeds() {
        let remote = Arc::new(MemoryRemote::new());
        *remote.fail_uploads_before_success.lock().unwrap() = 2;
        let uploader = Uploader::new(Arc::clone(&remote), Arc::new(CallbackRegistry::new()), settings());

        uploader.upload("/f.txt", Method::Post, b"abcd", 0, None).await.unwrap();
        let chunks = remote.uploaded_chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn locked_asset_fails_immediately_with_no_retry() {
        let remote = Arc::new(MemoryRemote::new());
        *remote.locked.lock().unwrap() = true;
        let uploader = Uploader::new(Arc::clone(&remote), Arc::new(CallbackRegistry::new()), settings());

        let err = uploader
            .upload("/locked.txt", Method::Put, b"abcd", 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RqError::AccessDenied(_)));
        assert!(remote.uploaded_chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_check_aborts_before_the_next_chunk() {
        let remote = Arc::new(MemoryRemote::new());
        let uploader = Uploader::new(Arc::clone(&remote), Arc::new(CallbackRegistry::new()), settings());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let cancel: CancelCheck = Arc::new(move || calls_clone.fetch_add(1, Ordering::SeqCst) >= 1);

        uploader
            .upload("/c.txt", Method::Put, b"0123456789", 0, Some(cancel))
            .await
            .unwrap();

        // First poll (false) lets chunk 1 through; second poll (true) aborts
        // before chunk 2 is sent.
        assert_eq!(remote.uploaded_chunks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_file_still_sends_one_chunk() {
        let remote = Arc::new(MemoryRemote::new());
        let uploader = Uploader::new(Arc::clone(&remote), Arc::new(CallbackRegistry::new()), settings());

        uploader.upload("/empty.txt", Method::Put, b"", 0, None).await.unwrap();
        let chunks = remote.uploaded_chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].2.is_empty());
    }
}
