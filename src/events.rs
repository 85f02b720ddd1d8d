//! Typed share events and the subscriber registry that dispatches them.
//!
//! Replaces the ad-hoc string-keyed event emitter of the source system with a
//! strongly-typed enum and a panic-isolated subscriber set, shared per
//! [`crate::ShareContext`](crate::ShareContext).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::queue::Method;

/// One observable side effect produced by the tree, the uploader, or the
/// sync processor. See §6 of the component design for the full event list.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ShareEvent {
    /// Chunked upload of `path` has begun.
    SyncFileStart {
        /// Path being uploaded.
        path: String,
    },
    /// Chunked upload of `path` completed successfully (or was cancelled
    /// via `onChunk` with no error).
    SyncFileEnd {
        /// Path that finished uploading.
        path: String,
    },
    /// Chunked upload of `path` failed after exhausting retries.
    SyncFileErr {
        /// Path that failed to upload.
        path: String,
        /// Human-readable failure reason.
        error: String,
    },
    /// An in-flight upload of `path` was aborted via the cancellation signal.
    SyncFileAbort {
        /// Path whose upload was aborted.
        path: String,
    },
    /// Progress update for an in-flight upload.
    SyncFileProgress {
        /// Path being uploaded.
        path: String,
        /// Bytes transferred so far, including prior chunks.
        read: u64,
        /// Total byte size of the local file.
        total: u64,
    },
    /// Local and remote state diverged in a way that cannot be reconciled
    /// silently. Does not fail the operation that discovered it.
    SyncConflict {
        /// Path in conflict.
        path: String,
    },
    /// Result of a local-cache sweep: total bytes currently queued.
    CacheSize {
        /// Total bytes of files with a pending queue entry.
        bytes: u64,
    },
    /// A remote fetch for `path` has begun.
    DownloadStart {
        /// Path being fetched.
        path: String,
    },
    /// A remote fetch for `path` has ended (success or failure).
    DownloadEnd {
        /// Path that finished fetching.
        path: String,
        /// Failure reason, if the fetch did not succeed.
        error: Option<String>,
    },
    /// A queue entry for `path` was purged after exceeding the global
    /// failure threshold.
    SyncPurged {
        /// Path whose queue entry was purged.
        path: String,
        /// Method of the purged entry.
        method: Method,
    },
    /// The sync processor began draining the queue.
    SyncStart,
    /// The sync processor finished draining the queue (queue empty, or stopped).
    SyncEnd,
    /// The sync processor encountered a non-fatal error processing one entry.
    SyncErr {
        /// Path the failing entry concerned.
        path: String,
        /// Human-readable failure reason.
        error: String,
    },
}

/// Unique identifier for a subscription, returned by [`CallbackRegistry::subscribe`].
pub type SubscriptionId = u64;

/// Subscriber callback type. Must not block for extended periods: it runs
/// synchronously on the thread that emits the event.
pub type EventCallback = Arc<dyn Fn(&ShareEvent) + Send + Sync>;

/// Thread-safe, panic-isolated registry of event subscribers for one share.
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<SubscriptionId, EventCallback>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback`, returning an id that can later be passed to
    /// [`Self::unsubscribe`].
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().unwrap().insert(id, callback);
        id
    }

    /// Removes a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.write().unwrap().remove(&id).is_some()
    }

    /// Dispatches `event` to every registered callback, in unspecified order.
    /// A panicking callback does not prevent the rest from running.
    pub fn emit(&self, event: ShareEvent) {
        let callbacks = self.callbacks.read().unwrap();
        for callback in callbacks.values() {
            let callback = Arc::clone(callback);
            let event_ref = &event;
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event_ref);
            }));
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap().len()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribers_receive_emitted_events() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        registry.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        registry.emit(ShareEvent::SyncStart);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let id = registry.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.unsubscribe(id));
        registry.emit(ShareEvent::SyncStart);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_panicking_subscriber_does_not_block_others() {
        let registry = CallbackRegistry::new();
        registry.subscribe(Arc::new(|_| panic!("boom")));

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        registry.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        registry.emit(ShareEvent::SyncStart);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
