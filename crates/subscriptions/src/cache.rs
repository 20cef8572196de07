//! Per-process TTL cache for derived subscription maps.
//!
//! Owned by whoever drives computation, constructed with an explicit TTL.
//! Callers pass the current instant so tests control time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::resolver::SubscriptionMap;

pub struct SubscriptionCache {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (Instant, Arc<SubscriptionMap>)>>,
}

impl SubscriptionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached map for the workspace, computing and storing it
    /// via `compute` when absent or expired at `now`.
    pub fn get_or_compute<F>(&self, workspace_id: Uuid, now: Instant, compute: F) -> Arc<SubscriptionMap>
    where
        F: FnOnce() -> SubscriptionMap,
    {
        let mut entries = self.entries.lock();
        if let Some((computed_at, map)) = entries.get(&workspace_id) {
            if now.duration_since(*computed_at) < self.ttl {
                return Arc::clone(map);
            }
        }
        debug!(workspace_id = %workspace_id, "recomputing subscription map");
        let map = Arc::new(compute());
        entries.insert(workspace_id, (now, Arc::clone(&map)));
        map
    }

    /// Drops the cached entry, forcing recomputation on next access.
    pub fn invalidate(&self, workspace_id: Uuid) {
        self.entries.lock().remove(&workspace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = SubscriptionCache::new(Duration::from_secs(60));
        let workspace_id = Uuid::new_v4();
        let start = Instant::now();

        let mut computations = 0;
        cache.get_or_compute(workspace_id, start, || {
            computations += 1;
            SubscriptionMap::default()
        });
        cache.get_or_compute(workspace_id, start + Duration::from_secs(30), || {
            computations += 1;
            SubscriptionMap::default()
        });
        assert_eq!(computations, 1);
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let cache = SubscriptionCache::new(Duration::from_secs(60));
        let workspace_id = Uuid::new_v4();
        let start = Instant::now();

        let mut computations = 0;
        for offset in [0, 61] {
            cache.get_or_compute(workspace_id, start + Duration::from_secs(offset), || {
                computations += 1;
                SubscriptionMap::default()
            });
        }
        assert_eq!(computations, 2);
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let cache = SubscriptionCache::new(Duration::from_secs(60));
        let workspace_id = Uuid::new_v4();
        let start = Instant::now();

        let mut computations = 0;
        cache.get_or_compute(workspace_id, start, || {
            computations += 1;
            SubscriptionMap::default()
        });
        cache.invalidate(workspace_id);
        cache.get_or_compute(workspace_id, start, || {
            computations += 1;
            SubscriptionMap::default()
        });
        assert_eq!(computations, 2);
    }
}
