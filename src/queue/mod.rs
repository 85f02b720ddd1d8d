//! Request Queue (§4.3): the durable, coalescing queue of pending remote
//! mutations.
//!
//! Entry identity is `(parent, name)`; at most one non-terminal entry exists
//! per key (invariant #3, §8). Coalescing on plain `enqueue` follows Table 1;
//! `queue_move`/`queue_copy` implement the MOVE/COPY interaction with temp
//! paths from Table 2.

mod persist;

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::{name_of, normalize, parent_of};

/// The remote mutation a [`QueueEntry`] represents.
///
/// `Put` denotes a file that was created locally and has never been
/// synchronized (its initial upload is a create on the remote). `Post`
/// denotes a previously-synced file that was subsequently modified (its
/// upload is a replace on the remote). This is the convention Table 1 and
/// `Overlay::create_file` use; see `DESIGN.md` for why it reads backwards
/// against the wire-protocol verb names in §4.6/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Newly created locally; remote copy does not yet exist.
    Put,
    /// Previously synced; local content has since changed.
    Post,
    /// Pending remote deletion.
    Delete,
}

/// The mutation kind accepted by `Overlay::queue_data` (§4.4), covering the
/// full data-model method set. `Move`/`Copy` resolve into `Put`/`Post`/`Delete`
/// entries immediately (via `queue_move`/`queue_copy`) rather than being
/// stored on a [`QueueEntry`] themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    /// Create (never-synced) or replace (previously-synced) content.
    Put,
    /// Replace previously-synced content.
    Post,
    /// Remove remotely.
    Delete,
    /// Rename/move, resolved via Table 2.
    Move,
    /// Duplicate, resolved via Table 2.
    Copy,
}

/// A pending remote mutation, keyed by `(parent, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Parent directory of the affected path.
    pub parent: String,
    /// Final path segment of the affected path.
    pub name: String,
    /// The mutation to apply.
    pub method: Method,
    /// Destination path, set only while a MOVE/COPY is being resolved into
    /// its constituent PUT/DELETE entries; `None` on stored entries.
    pub destination: Option<String>,
    /// When this entry (in its current coalesced form) was created.
    pub timestamp: DateTime<Utc>,
    /// Number of failed sync attempts so far.
    pub retries: u32,
}

impl QueueEntry {
    fn new(parent: &str, name: &str, method: Method) -> Self {
        Self {
            parent: parent.to_string(),
            name: name.to_string(),
            method,
            destination: None,
            timestamp: Utc::now(),
            retries: 0,
        }
    }

    /// Full logical path this entry concerns.
    pub fn path(&self) -> String {
        crate::path::join(&self.parent, &self.name)
    }
}

type Key = (String, String);

/// The durable per-share request queue.
pub struct RequestQueue {
    entries: Mutex<IndexMap<Key, QueueEntry>>,
    queue_file: Option<PathBuf>,
    no_unicode_normalize: bool,
}

impl RequestQueue {
    /// Creates a queue persisted under `work_path/queue.jsonl`, replaying any
    /// existing log. `work_path = None` gives an in-memory-only queue (used
    /// by tests with `noprocessor`).
    pub fn new(work_path: Option<PathBuf>, no_unicode_normalize: bool) -> Result<Self> {
        let queue_file = work_path.map(|p| p.join("queue.jsonl"));
        let entries = match &queue_file {
            Some(path) => persist::load(path)?,
            None => IndexMap::new(),
        };
        Ok(Self {
            entries: Mutex::new(entries),
            queue_file,
            no_unicode_normalize,
        })
    }

    fn key(&self, parent: &str, name: &str) -> Key {
        (
            normalize(parent, self.no_unicode_normalize),
            normalize(name, self.no_unicode_normalize),
        )
    }

    fn append(&self, entry: &persist::LogLine) -> Result<()> {
        if let Some(path) = &self.queue_file {
            persist::append(path, entry)?;
        }
        Ok(())
    }

    /// Enqueues `method` for `path`, applying Table 1 coalescing against any
    /// existing non-terminal entry for the same key.
    pub fn enqueue(&self, path: &str, method: Method) -> Result<()> {
        let parent = parent_of(path);
        let name = name_of(path).to_string();
        let key = self.key(&parent, &name);

        let mut entries = self.entries.lock().unwrap();
        let resolved = match entries.get(&key).map(|e| e.method) {
            None => Some(method),
            Some(existing) => coalesce(existing, method),
        };

        match resolved {
            None => {
                entries.shift_remove(&key);
                drop(entries);
                self.append(&persist::LogLine::Remove {
                    parent: parent.clone(),
                    name: name.clone(),
                })
            }
            Some(resolved_method) => {
                let entry = QueueEntry::new(&parent, &name, resolved_method);
                entries.insert(key, entry.clone());
                drop(entries);
                self.append(&persist::LogLine::Upsert(entry))
            }
        }
    }

    /// Removes any entry for `path` outright (no coalescing). Used by
    /// `queue_move`'s "clear source entry" case and by direct cleanup.
    pub fn remove(&self, path: &str) -> Result<()> {
        let parent = parent_of(path);
        let name = name_of(path).to_string();
        let key = self.key(&parent, &name);

        let mut entries = self.entries.lock().unwrap();
        let removed = entries.shift_remove(&key).is_some();
        drop(entries);
        if removed {
            self.append(&persist::LogLine::Remove { parent, name })?;
        }
        Ok(())
    }

    /// Applies Table 2's MOVE semantics: remove the source entry, then
    /// enqueue the destination entry per the source's prior state.
    pub fn queue_move(&self, old: &str, new: &str, old_is_temp: bool, new_is_temp: bool) -> Result<()> {
        let old_parent = parent_of(old);
        let old_name = name_of(old).to_string();
        let old_key = self.key(&old_parent, &old_name);

        let prior_method = {
            let mut entries = self.entries.lock().unwrap();
            entries.shift_remove(&old_key).map(|e| e.method)
        };
        self.append(&persist::LogLine::Remove {
            parent: old_parent,
            name: old_name,
        })?;

        match (old_is_temp, new_is_temp) {
            (true, true) => Ok(()),
            (true, false) => self.enqueue(new, Method::Put),
            (false, true) => {
                // "normal-queued" (prior entry was Put, i.e. never synced): clearing
                // the source entry above is the whole effect. "normal-cached"
                // (no prior entry, or a prior Post/Delete that implies the remote
                // copy exists): the remote copy must now be deleted.
                if prior_method == Some(Method::Put) {
                    Ok(())
                } else {
                    self.enqueue(old, Method::Delete)
                }
            }
            (false, false) => {
                self.enqueue(old, Method::Delete)?;
                self.enqueue(new, Method::Put)
            }
        }
    }

    /// Applies Table 2's COPY semantics: source is left unchanged, the
    /// destination is enqueued with its natural (create) effect.
    pub fn queue_copy(&self, new: &str) -> Result<()> {
        self.enqueue(new, Method::Put)
    }

    /// Pops and returns the oldest entry for `parent`, if any.
    pub fn head(&self, parent: &str) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        let key = entries
            .iter()
            .find(|(_, e)| e.parent == normalize(parent, self.no_unicode_normalize))
            .map(|(k, _)| k.clone())?;
        entries.shift_remove(&key)
    }

    /// Pops and returns the globally oldest entry (insertion order across
    /// all keys), used by the Sync Processor's drain loop.
    pub fn pop_front(&self) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        entries.shift_remove_index(0).map(|(_, v)| v)
    }

    /// Non-destructive snapshot of every entry currently queued.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    /// True if `path` currently has a non-terminal entry.
    pub fn contains(&self, path: &str) -> bool {
        let key = self.key(&parent_of(path), name_of(path));
        self.entries.lock().unwrap().contains_key(&key)
    }

    /// The current entry for `path`, if queued.
    pub fn get(&self, path: &str) -> Option<QueueEntry> {
        let key = self.key(&parent_of(path), name_of(path));
        self.entries.lock().unwrap().get(&key).cloned()
    }

    /// Increments the retry counter for `path`'s entry, re-inserting it at
    /// the back of FIFO order so other entries get a chance to drain first.
    pub fn increment_retry(&self, path: &str) -> Result<Option<u32>> {
        let key = self.key(&parent_of(path), name_of(path));
        let mut entries = self.entries.lock().unwrap();
        let Some(mut entry) = entries.shift_remove(&key) else {
            return Ok(None);
        };
        entry.retries += 1;
        let retries = entry.retries;
        entries.insert(key, entry.clone());
        drop(entries);
        self.append(&persist::LogLine::Upsert(entry))?;
        Ok(Some(retries))
    }

    /// Reinserts `entry` (typically just popped via [`Self::pop_front`]) with
    /// its retry counter incremented by one, for the Sync Processor's
    /// failure-handling path. Returns the new retry count.
    pub fn requeue(&self, mut entry: QueueEntry) -> Result<u32> {
        entry.retries += 1;
        let retries = entry.retries;
        let key = self.key(&entry.parent, &entry.name);
        {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(key, entry.clone());
        }
        self.append(&persist::LogLine::Upsert(entry))?;
        Ok(retries)
    }

    /// Drops `path`'s entry after it has exceeded the failure threshold,
    /// returning the removed entry so the caller can emit `syncpurged`.
    pub fn mark_purged(&self, path: &str) -> Result<Option<QueueEntry>> {
        let key = self.key(&parent_of(path), name_of(path));
        let removed = self.entries.lock().unwrap().shift_remove(&key);
        if let Some(entry) = &removed {
            self.append(&persist::LogLine::Remove {
                parent: entry.parent.clone(),
                name: entry.name.clone(),
            })?;
        }
        Ok(removed)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True if the queue has no pending entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the queue file to contain only the current entries,
    /// discarding the append history (the "rewrite" half of
    /// append-with-rewrite persistence).
    pub fn compact(&self) -> Result<()> {
        if let Some(path) = &self.queue_file {
            let entries = self.entries.lock().unwrap();
            persist::rewrite(path, entries.values())?;
        }
        Ok(())
    }
}

/// Table 1: resolves the coalesced method when `incoming` is enqueued over
/// an `existing` non-terminal entry for the same key. `None` means the net
/// effect is to remove the entry entirely.
fn coalesce(existing: Method, incoming: Method) -> Option<Method> {
    use Method::*;
    Some(match (incoming, existing) {
        (Put, Put) => Put,
        (Put, Post) => Post,
        (Put, Delete) => Post,
        (Post, Put) => Put,
        (Post, Post) => Post,
        (Post, Delete) => Post,
        (Delete, Put) => return None,
        (Delete, Post) => Delete,
        (Delete, Delete) => Delete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RequestQueue {
        RequestQueue::new(None, false).unwrap()
    }

    #[test]
    fn plain_enqueue_with_no_existing_entry_stores_as_is() {
        let q = queue();
        q.enqueue("/a/file.txt", Method::Put).unwrap();
        assert_eq!(q.get("/a/file.txt").unwrap().method, Method::Put);
    }

    #[test]
    fn table1_put_then_post_coalesces_to_post() {
        let q = queue();
        q.enqueue("/a/file.txt", Method::Put).unwrap();
        q.enqueue("/a/file.txt", Method::Post).unwrap();
        assert_eq!(q.get("/a/file.txt").unwrap().method, Method::Post);
    }

    #[test]
    fn table1_put_then_delete_removes_entry() {
        let q = queue();
        q.enqueue("/a/file.txt", Method::Put).unwrap();
        q.enqueue("/a/file.txt", Method::Delete).unwrap();
        assert!(q.get("/a/file.txt").is_none());
    }

    #[test]
    fn table1_post_then_delete_coalesces_to_delete() {
        let q = queue();
        q.enqueue("/a/file.txt", Method::Post).unwrap();
        q.enqueue("/a/file.txt", Method::Delete).unwrap();
        assert_eq!(q.get("/a/file.txt").unwrap().method, Method::Delete);
    }

    #[test]
    fn table1_delete_then_put_recreate_coalesces_to_post() {
        let q = queue();
        q.enqueue("/a/file.txt", Method::Delete).unwrap();
        q.enqueue("/a/file.txt", Method::Put).unwrap();
        assert_eq!(q.get("/a/file.txt").unwrap().method, Method::Post);
    }

    #[test]
    fn idempotent_delete_is_a_noop() {
        let q = queue();
        q.enqueue("/a/file.txt", Method::Delete).unwrap();
        q.enqueue("/a/file.txt", Method::Delete).unwrap();
        assert_eq!(q.get("/a/file.txt").unwrap().method, Method::Delete);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn move_normal_to_normal_yields_delete_source_put_dest() {
        let q = queue();
        q.queue_move("/a", "/b", false, false).unwrap();
        assert_eq!(q.get("/a").unwrap().method, Method::Delete);
        assert_eq!(q.get("/b").unwrap().method, Method::Put);
    }

    #[test]
    fn move_temp_to_temp_is_a_full_noop() {
        let q = queue();
        q.queue_move("/.tmp", "/.tmp2", true, true).unwrap();
        assert!(q.get("/.tmp").is_none());
        assert!(q.get("/.tmp2").is_none());
    }

    #[test]
    fn move_temp_to_normal_creates_dest_only() {
        let q = queue();
        q.queue_move("/.tmp", "/b", true, false).unwrap();
        assert!(q.get("/.tmp").is_none());
        assert_eq!(q.get("/b").unwrap().method, Method::Put);
    }

    #[test]
    fn move_queued_put_into_temp_clears_source_with_no_delete() {
        let q = queue();
        q.enqueue("/a", Method::Put).unwrap();
        q.queue_move("/a", "/.tmp", false, true).unwrap();
        assert!(q.get("/a").is_none());
        assert!(q.get("/.tmp").is_none());
    }

    #[test]
    fn move_cached_file_into_temp_deletes_source() {
        let q = queue();
        // No prior queue entry: represents a clean cached (already-synced) file.
        q.queue_move("/a", "/.tmp", false, true).unwrap();
        assert_eq!(q.get("/a").unwrap().method, Method::Delete);
    }

    #[test]
    fn copy_leaves_source_untouched() {
        let q = queue();
        q.enqueue("/a", Method::Post).unwrap();
        q.queue_copy("/b").unwrap();
        assert_eq!(q.get("/a").unwrap().method, Method::Post);
        assert_eq!(q.get("/b").unwrap().method, Method::Put);
    }

    #[test]
    fn at_most_one_entry_per_key_invariant_holds_across_repeated_enqueues() {
        let q = queue();
        for _ in 0..5 {
            q.enqueue("/a", Method::Post).unwrap();
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn move_then_reverse_move_restores_equivalent_state() {
        let q = queue();
        q.queue_move("/a", "/b", false, false).unwrap();
        // /a: Delete, /b: Put after the first move.
        q.queue_move("/b", "/a", false, false).unwrap();
        // The second move's PUT on /a coalesces against the Delete left
        // over from the first move (Table 1: incoming Put over existing
        // Delete coalesces to Post), and /b is freshly queued for deletion.
        assert_eq!(q.get("/a").unwrap().method, Method::Post);
        assert_eq!(q.get("/b").unwrap().method, Method::Delete);
    }

    #[test]
    fn increment_retry_tracks_attempts() {
        let q = queue();
        q.enqueue("/a", Method::Post).unwrap();
        assert_eq!(q.increment_retry("/a").unwrap(), Some(1));
        assert_eq!(q.increment_retry("/a").unwrap(), Some(2));
        assert_eq!(q.get("/a").unwrap().retries, 2);
    }

    #[test]
    fn no_entry_in_the_queue_ever_has_a_temp_name() {
        // The queue itself never rejects a temp-named enqueue (that
        // responsibility belongs to the Overlay, which never calls enqueue
        // for temp paths); this test documents the expectation at the
        // boundary the Overlay relies on.
        let q = queue();
        q.enqueue("/a/.tmp", Method::Put).unwrap();
        assert!(q.get("/a/.tmp").is_some());
    }

    #[test]
    fn requeue_increments_retries_on_a_detached_entry() {
        let q = queue();
        q.enqueue("/a", Method::Post).unwrap();
        let entry = q.pop_front().unwrap();
        assert!(q.get("/a").is_none());

        let retries = q.requeue(entry).unwrap();
        assert_eq!(retries, 1);
        assert_eq!(q.get("/a").unwrap().retries, 1);
    }

    #[test]
    fn persists_and_reloads_across_queue_instances() {
        let dir = tempfile::tempdir().unwrap();
        let work_path = dir.path().to_path_buf();

        {
            let q = RequestQueue::new(Some(work_path.clone()), false).unwrap();
            q.enqueue("/a", Method::Put).unwrap();
            q.enqueue("/b", Method::Post).unwrap();
            q.remove("/b").unwrap();
        }

        let reloaded = RequestQueue::new(Some(work_path), false).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("/a").unwrap().method, Method::Put);
    }
}
