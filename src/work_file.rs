//! Work-File Store (§4.2): per-cached-file sync metadata.
//!
//! Each locally cached content file has a sidecar work-file recording when it
//! was last reconciled with the remote and what the remote's `lastModified`
//! was at that point. A cached file with no paired work-file is a conflict
//! (handled by the Overlay during `list`, §4.4).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::LocalBackend;
use crate::error::Result;
use crate::path::{join, name_of, parent_of};

/// Sidecar metadata persisted alongside a cached content file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkFile {
    /// When the local copy was last reconciled with the remote.
    pub last_sync_date: DateTime<Utc>,
    /// The remote's `lastModified` at the time the cache was populated (or
    /// last refreshed).
    pub remote_last_modified: DateTime<Utc>,
    /// Original name, tracked across renames.
    pub original_name: String,
}

impl WorkFile {
    /// Builds a fresh work-file for content just cached from the remote.
    pub fn new(name: &str, remote_last_modified: DateTime<Utc>) -> Self {
        Self {
            last_sync_date: Utc::now(),
            remote_last_modified,
            original_name: name.to_string(),
        }
    }
}

/// Computes the sidecar storage path for `path`'s work-file: a hidden
/// sibling directory `<parent>/.aem/<name>` co-located with the content.
pub fn sidecar_path(path: &str) -> String {
    let parent = parent_of(path);
    let name = name_of(path);
    join(&join(&parent, ".aem"), name)
}

/// Persists and retrieves [`WorkFile`]s via a [`LocalBackend`], storing each
/// as a small JSON blob at its sidecar path.
pub struct WorkFileStore<L: LocalBackend> {
    local: Arc<L>,
}

impl<L: LocalBackend> WorkFileStore<L> {
    /// Wraps `local` as the storage backend for work-files.
    pub fn new(local: Arc<L>) -> Self {
        Self { local }
    }

    /// Reads the work-file for `path`, or `None` if it has never been written.
    pub async fn read_work(&self, path: &str) -> Result<Option<WorkFile>> {
        let sidecar = sidecar_path(path);
        if !self.local.exists(&sidecar).await? {
            return Ok(None);
        }
        let bytes = self.local.read(&sidecar).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Writes (overwriting) the work-file for `path`.
    pub async fn write_work(&self, path: &str, work_file: &WorkFile) -> Result<()> {
        let sidecar = sidecar_path(path);
        let bytes = serde_json::to_vec(work_file)?;
        self.local.write(&sidecar, &bytes).await
    }

    /// True iff a work-file exists for `path`.
    pub async fn has_work(&self, path: &str) -> Result<bool> {
        Ok(self.read_work(path).await?.is_some())
    }

    /// Sets `last_sync_date = now` and `remote_last_modified = local_last_modified`
    /// (the current local content's modification time becomes the new baseline).
    /// Creates the work-file if absent.
    pub async fn refresh_work(&self, path: &str, local_last_modified: DateTime<Utc>) -> Result<()> {
        let mut work_file = self
            .read_work(path)
            .await?
            .unwrap_or_else(|| WorkFile::new(name_of(path), local_last_modified));
        work_file.last_sync_date = Utc::now();
        work_file.remote_last_modified = local_last_modified;
        self.write_work(path, &work_file).await
    }

    /// Removes the work-file for `path`, if any.
    pub async fn remove_work(&self, path: &str) -> Result<()> {
        let sidecar = sidecar_path(path);
        if self.local.exists(&sidecar).await? {
            self.local.remove(&sidecar).await?;
        }
        Ok(())
    }

    /// Moves the work-file for `from` to `to`, best-effort: if `from` has no
    /// work-file this is a no-op (the caller treats that as a conflict, not
    /// a hard error, per §4.4 `rename`).
    pub async fn rename_work(&self, from: &str, to: &str) -> Result<bool> {
        match self.read_work(from).await? {
            Some(mut work_file) => {
                work_file.original_name = name_of(to).to_string();
                self.write_work(to, &work_file).await?;
                self.remove_work(from).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
