//! Per-path async locks used to order content/work-file mutations.
//!
//! `rename` must hold both the source and destination locks for the
//! duration of its move; acquiring them in a fixed order (lexicographic on
//! the path string) avoids the classic two-lock deadlock between a rename
//! `A -> B` racing a rename `B -> A`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A table of per-path mutexes, created lazily on first use and never removed
/// (paths are cheap strings; a share's working set is expected to stay
/// bounded by its actual file count).
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, path: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Locks `path`, blocking until any other holder releases it.
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        self.handle(path).lock_owned().await
    }

    /// Locks both `a` and `b`, always acquiring the lexicographically
    /// smaller path first so that two callers locking the same pair in
    /// opposite order can never deadlock. If `a == b`, only one guard is
    /// actually taken and it is returned twice... except a mutex can't be
    /// locked twice by the same owner, so same-path renames lock once and
    /// the second guard slot is left empty.
    pub async fn lock_two(&self, a: &str, b: &str) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        if a < b {
            let first = self.lock(a).await;
            let second = self.lock(b).await;
            (first, Some(second))
        } else {
            let second = self.lock(b).await;
            let first = self.lock(a).await;
            (first, Some(second))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_two_returns_two_distinct_guards_for_distinct_paths() {
        let locks = PathLocks::new();
        let (_a, b) = locks.lock_two("/a", "/b").await;
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn lock_two_collapses_to_one_guard_for_identical_paths() {
        let locks = PathLocks::new();
        let (_a, b) = locks.lock_two("/a", "/a").await;
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn opposite_acquisition_orders_do_not_deadlock() {
        let locks = Arc::new(PathLocks::new());
        let l1 = Arc::clone(&locks);
        let l2 = Arc::clone(&locks);

        let t1 = tokio::spawn(async move {
            for _ in 0..50 {
                let _guards = l1.lock_two("/a", "/b").await;
            }
        });
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                let _guards = l2.lock_two("/b", "/a").await;
            }
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            t1.await.unwrap();
            t2.await.unwrap();
        })
        .await
        .expect("lock_two must not deadlock under reversed acquisition order");
    }
}
