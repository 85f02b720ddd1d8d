//! Download Coordinator (§4.5): single-flight remote fetch deduplication.
//!
//! Guarantees at most one concurrent fetch per path across every open tree
//! handle sharing this coordinator, and that all concurrent waiters observe
//! the bytes (or the error) from that single fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::backend::{EntryMeta, RemoteBackend};
use crate::error::{Result, RqError};
use crate::work_file::WorkFile;

type FetchResult = std::result::Result<(EntryMeta, Arc<Vec<u8>>), String>;

struct InFlight {
    notify: Notify,
    result: Mutex<Option<FetchResult>>,
}

/// Deduplicates concurrent fetches of the same remote path.
pub struct DownloadCoordinator<R: RemoteBackend> {
    remote: Arc<R>,
    in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
}

impl<R: RemoteBackend> DownloadCoordinator<R> {
    /// Wraps `remote` as the backend that actually performs fetches.
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// True if a fetch for `path` is currently in progress. The Overlay uses
    /// this to fail mutating operations on `path` with [`RqError::NotReady`].
    pub fn is_downloading(&self, path: &str) -> bool {
        self.in_flight.lock().unwrap().contains_key(path)
    }

    /// Fetches `path`, collapsing concurrent callers into a single remote
    /// request. Every caller observes the same `(EntryMeta, bytes)` pair, or
    /// the same error, once the in-flight fetch completes.
    pub async fn fetch(&self, path: &str) -> Result<(EntryMeta, Arc<Vec<u8>>)> {
        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(existing) = in_flight.get(path) {
                Some(Arc::clone(existing))
            } else {
                let slot = Arc::new(InFlight {
                    notify: Notify::new(),
                    result: Mutex::new(None),
                });
                in_flight.insert(path.to_string(), Arc::clone(&slot));
                None
            }
        };

        match slot {
            Some(waiter) => self.wait_for(waiter).await,
            None => self.drive_fetch(path).await,
        }
    }

    async fn wait_for(&self, slot: Arc<InFlight>) -> Result<(EntryMeta, Arc<Vec<u8>>)> {
        loop {
            if let Some(result) = slot.result.lock().unwrap().clone() {
                return result.map_err(RqError::NetworkError);
            }
            slot.notify.notified().await;
        }
    }

    async fn drive_fetch(&self, path: &str) -> Result<(EntryMeta, Arc<Vec<u8>>)> {
        log::debug!("[DownloadCoordinator] fetching {path}");
        let outcome = self.remote.fetch(path).await;
        if let Err(err) = &outcome {
            log::debug!("[DownloadCoordinator] fetch failed for {path}: {err}");
        }
        let stored: FetchResult = match &outcome {
            Ok((meta, bytes)) => Ok((meta.clone(), Arc::new(bytes.clone()))),
            Err(err) => Err(err.to_string()),
        };

        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.remove(path).expect("our own in-flight slot")
        };
        *slot.result.lock().unwrap() = Some(stored);
        slot.notify.notify_waiters();

        outcome.map(|(meta, bytes)| (meta, Arc::new(bytes)))
    }
}

/// True if the cached copy must be refreshed: the remote's `lastModified` is
/// strictly newer than the work-file's baseline, or no work-file exists yet.
///
/// A remote timestamp that has gone *backward* relative to the baseline is
/// deliberately not a reason to re-download (§4.5): the cached copy's
/// metadata is preferred until an explicit [`adopt_backward`] call.
pub fn needs_download(work_file: Option<&WorkFile>, remote_last_modified: DateTime<Utc>) -> bool {
    match work_file {
        None => true,
        Some(work) => remote_last_modified > work.remote_last_modified,
    }
}

/// Builds the work-file baseline to persist after an explicit `cacheFile`
/// call, which adopts even a backward remote timestamp.
pub fn adopt_backward(name: &str, remote_last_modified: DateTime<Utc>) -> WorkFile {
    WorkFile::new(name, remote_last_modified)
}
