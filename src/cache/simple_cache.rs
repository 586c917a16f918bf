use super::lru_set::ConcurrentLruSet;
use super::pressure::MemoryPressureProbe;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sets between memory pressure checks.
const PRESSURE_CHECK_EVERY_SETS: u64 = 25;
/// Cache hits between memory pressure checks.
const PRESSURE_CHECK_EVERY_GETS: u64 = 1000;

/// A cached GET response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRequest {
    pub data: serde_json::Value,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub database: String,
    /// Set when the entry may be stale and must be revalidated with the server.
    #[serde(default)]
    pub force_server_check: bool,
}

impl CachedRequest {
    pub fn new(data: serde_json::Value, database: impl Into<String>) -> Self {
        CachedRequest {
            data,
            time: Utc::now(),
            headers: HashMap::new(),
            database: database.into(),
            force_server_check: false,
        }
    }
}

/// Response cache keyed by request URL, with recency tracked by a
/// [`ConcurrentLruSet`] that drops evicted keys from the map.
pub struct SimpleCache {
    lru_keys: ConcurrentLruSet<String>,
    actual_cache: Arc<DashMap<String, CachedRequest>>,
    last_write_per_db: DashMap<String, DateTime<Utc>>,
    pressure: MemoryPressureProbe,
    sets_since_check: AtomicU64,
    gets_since_check: AtomicU64,
}

impl SimpleCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_probe(max_entries, MemoryPressureProbe::system())
    }

    pub fn from_config(config: &crate::ClientConfig) -> Self {
        Self::new(config.http_cache_capacity)
    }

    pub fn with_probe(max_entries: usize, pressure: MemoryPressureProbe) -> Self {
        let actual_cache: Arc<DashMap<String, CachedRequest>> = Arc::new(DashMap::new());
        let evict_from = Arc::clone(&actual_cache);
        let lru_keys = ConcurrentLruSet::new(max_entries, move |key: String| {
            evict_from.remove(&key);
        });

        SimpleCache {
            lru_keys,
            actual_cache,
            last_write_per_db: DashMap::new(),
            pressure,
            sets_since_check: AtomicU64::new(0),
            gets_since_check: AtomicU64::new(0),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: CachedRequest) {
        if (self.sets_since_check.fetch_add(1, Ordering::Relaxed) + 1) % PRESSURE_CHECK_EVERY_SETS
            == 0
        {
            self.try_clear_memory();
        }
        let key = key.into();
        self.actual_cache.insert(key.clone(), value);
        self.lru_keys.push(key);
    }

    /// Cached response for `key`, flagged for a server check when the
    /// database was written at or after the time it was cached.
    pub fn get(&self, key: &str) -> Option<CachedRequest> {
        let mut value = self.actual_cache.get(key).map(|entry| entry.value().clone())?;

        self.lru_keys.push(key.to_string());
        if (self.gets_since_check.fetch_add(1, Ordering::Relaxed) + 1) % PRESSURE_CHECK_EVERY_GETS
            == 0
        {
            self.try_clear_memory();
        }

        if let Some(last_write) = self.last_write_per_db.get(&value.database) {
            if value.time <= *last_write {
                value.force_server_check = true;
            }
        }

        Some(value)
    }

    /// Mark every cached response of `database` as needing a server check.
    pub fn force_server_check_of_cached_items_for_database(&self, database: &str) {
        self.last_write_per_db
            .insert(database.to_string(), Utc::now());
    }

    fn try_clear_memory(&self) {
        if self.pressure.under_pressure() {
            let before = self.actual_cache.len();
            self.lru_keys.clear_half();
            tracing::warn!(
                "Memory pressure: response cache shrunk from {} to {} entries",
                before,
                self.actual_cache.len()
            );
        }
    }

    pub fn current_size(&self) -> usize {
        self.actual_cache.len()
    }

    pub fn clear(&self) {
        self.lru_keys.clear();
        self.actual_cache.clear();
    }
}
