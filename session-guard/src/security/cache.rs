//! TTL-bounded identity cache.
//!
//! Holds a copy of each authenticated identity keyed by user id so that
//! authenticated requests can skip a directory round trip. Entries are
//! best-effort: a miss (or a store failure, which is treated as a miss)
//! means "ask the directory", never "not authenticated".

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::directory::Identity;
use crate::store::KeyValueStore;

/// Cached directory data for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedIdentity {
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
}

impl CachedIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            role_id: identity.role_id.clone(),
            identity,
        }
    }
}

pub struct SessionCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a cached identity. Corrupt or unreadable entries count as misses.
    pub fn get(&self, user_id: &str) -> Option<CachedIdentity> {
        let raw = match self.store.get(&cache_key(user_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Identity cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Discarding corrupt cache entry");
                self.invalidate(user_id);
                None
            }
        }
    }

    /// Store or overwrite the entry for `identity.id`.
    pub fn put(&self, identity: &Identity) {
        let entry = CachedIdentity::new(identity.clone());
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(user_id = %identity.id, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set(&cache_key(&identity.id), &raw, self.ttl) {
            tracing::warn!(user_id = %identity.id, error = %e, "Identity cache write failed");
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        if let Err(e) = self.store.delete(&cache_key(user_id)) {
            tracing::warn!(user_id = %user_id, error = %e, "Identity cache invalidation failed");
        }
    }
}

fn cache_key(user_id: &str) -> String {
    format!("identity:{}", user_id)
}
