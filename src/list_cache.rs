//! List Cache (§4.8): a short-TTL cache of remote folder listings.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct ListCacheEntry {
    inserted_at: Instant,
    names: Vec<String>,
}

/// TTL-based cache mapping a parent path to the names of its remote children.
pub struct ListCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, ListCacheEntry>>,
}

impl ListCache {
    /// Creates a cache with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached names for `parent` if present and not expired.
    pub fn get(&self, parent: &str) -> Option<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(parent)?;
        if entry.inserted_at.elapsed() <= self.ttl {
            Some(entry.names.clone())
        } else {
            None
        }
    }

    /// Stores `names` for `parent`, overwriting any existing entry.
    pub fn put(&self, parent: &str, names: Vec<String>) {
        self.entries.lock().unwrap().insert(
            parent.to_string(),
            ListCacheEntry {
                inserted_at: Instant::now(),
                names,
            },
        );
    }

    /// Invalidates the entry for `path`. If `deep`, also invalidates every
    /// entry whose key is a descendant of `path`.
    pub fn invalidate(&self, path: &str, deep: bool) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(path);
        if deep {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            entries.retain(|key, _| !key.starts_with(&prefix));
        }
    }

    /// Removes every cached entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_returns_cached_names() {
        let cache = ListCache::new(Duration::from_secs(30));
        cache.put("/a", vec!["x".to_string(), "y".to_string()]);
        assert_eq!(cache.get("/a"), Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn miss_after_ttl_expires() {
        let cache = ListCache::new(Duration::from_millis(1));
        cache.put("/a", vec!["x".to_string()]);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("/a"), None);
    }

    #[test]
    fn invalidate_deep_clears_descendants() {
        let cache = ListCache::new(Duration::from_secs(30));
        cache.put("/a", vec!["x".to_string()]);
        cache.put("/a/b", vec!["y".to_string()]);
        cache.put("/other", vec!["z".to_string()]);

        cache.invalidate("/a", true);

        assert!(cache.get("/a").is_none());
        assert!(cache.get("/a/b").is_none());
        assert!(cache.get("/other").is_some());
    }

    #[test]
    fn invalidate_shallow_leaves_descendants() {
        let cache = ListCache::new(Duration::from_secs(30));
        cache.put("/a", vec!["x".to_string()]);
        cache.put("/a/b", vec!["y".to_string()]);

        cache.invalidate("/a", false);

        assert!(cache.get("/a").is_none());
        assert!(cache.get("/a/b").is_some());
    }
}
