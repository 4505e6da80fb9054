//! Shared key-value state for the guards.
//!
//! Rate-limit windows, CSRF secrets and cached identities all live behind
//! [`KeyValueStore`]. The in-process [`MemoryStore`] is the default backend;
//! multi-instance deployments plug in a shared cache implementing the same
//! trait so every replica sees the same counters.
//!
//! ## Guarantees
//!
//! - `incr` is a single increment-and-read: concurrent callers for one key
//!   observe strictly increasing counts
//! - Every entry carries a TTL; expired entries are invisible to readers
//! - Locks are held for O(1) map operations only

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default sweep interval for expired entries (5 minutes)
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Entry count that forces a sweep regardless of interval
const MAX_ENTRIES_BEFORE_CLEANUP: usize = 50_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Key '{0}' holds a value of another type")]
    WrongType(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result of a counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Count after this increment (first hit in a window is 1)
    pub count: u64,
    /// Time until the window expires and the counter resets
    pub resets_in: Duration,
}

/// Key-value store with TTL support.
pub trait KeyValueStore: Send + Sync {
    /// Read a live value.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment a windowed counter.
    ///
    /// A missing or expired counter starts over at 1 with expiry
    /// `now + window`; a live counter keeps its original expiry.
    fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Remove a key. Returns whether a live value was removed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Counter(u64),
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: StoredValue,
    expires_at: Instant,
}

impl StoreEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Thread-safe in-process store.
///
/// # Example
///
/// ```
/// use session_guard::store::{KeyValueStore, MemoryStore};
/// use std::time::Duration;
///
/// let store = MemoryStore::new();
/// let window = Duration::from_secs(60);
///
/// assert_eq!(store.incr("hits:10.0.0.1", window).unwrap().count, 1);
/// assert_eq!(store.incr("hits:10.0.0.1", window).unwrap().count, 2);
/// ```
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoreEntry>>,
    last_cleanup: RwLock<Instant>,
    cleanup_interval: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_cleanup_interval(DEFAULT_CLEANUP_INTERVAL)
    }

    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_cleanup: RwLock::new(Instant::now()),
            cleanup_interval,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn cleanup(&self) -> Result<(), StoreError> {
        let now = Instant::now();
        {
            let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
            entries.retain(|_, entry| entry.is_live(now));
        }
        let mut last = self.last_cleanup.write().map_err(|_| StoreError::Poisoned)?;
        *last = now;
        Ok(())
    }

    fn maybe_cleanup(&self) -> Result<(), StoreError> {
        let now = Instant::now();
        let should_cleanup = {
            let last = self.last_cleanup.read().map_err(|_| StoreError::Poisoned)?;
            let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
            now.duration_since(*last) > self.cleanup_interval
                || entries.len() > MAX_ENTRIES_BEFORE_CLEANUP
        };

        if should_cleanup {
            self.cleanup()?;
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;

        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| match &entry.value {
                StoredValue::Text(text) => text.clone(),
                StoredValue::Counter(count) => count.to_string(),
            }))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.maybe_cleanup()?;

        let entry = StoreEntry {
            value: StoredValue::Text(value.to_string()),
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        self.maybe_cleanup()?;

        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry {
                value: StoredValue::Counter(0),
                expires_at: now + window,
            });

        if !entry.is_live(now) {
            entry.value = StoredValue::Counter(0);
            entry.expires_at = now + window;
        }

        match &mut entry.value {
            StoredValue::Counter(count) => {
                *count += 1;
                Ok(WindowCount {
                    count: *count,
                    resets_in: entry.expires_at.saturating_duration_since(now),
                })
            }
            StoredValue::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .remove(key)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_set_overwrites() {
        let store = MemoryStore::new();
        store.set("k", "first", Duration::from_secs(60)).unwrap();
        store.set("k", "second", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_expired_value_is_invisible() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_delete_reports_live_removal() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(60)).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_incr_counts_within_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        let first = store.incr("c", window).unwrap();
        let second = store.incr("c", window).unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.resets_in <= window);
        assert_eq!(store.get("c").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_incr_resets_after_window() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(10);

        store.incr("c", window).unwrap();
        store.incr("c", window).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.incr("c", window).unwrap().count, 1);
    }

    #[test]
    fn test_incr_on_text_is_wrong_type() {
        let store = MemoryStore::new();
        store.set("k", "text", Duration::from_secs(60)).unwrap();
        assert!(matches!(
            store.incr("k", Duration::from_secs(60)),
            Err(StoreError::WrongType(_))
        ));
    }

    #[test]
    fn test_concurrent_incr_is_atomic() {
        let store = Arc::new(MemoryStore::new());
        let window = Duration::from_secs(60);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.incr("shared", window).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("shared").unwrap().as_deref(), Some("2000"));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let store = MemoryStore::with_cleanup_interval(Duration::from_millis(1));
        store.set("short", "v", Duration::from_millis(1)).unwrap();
        store.set("long", "v", Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        store.cleanup().unwrap();

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
