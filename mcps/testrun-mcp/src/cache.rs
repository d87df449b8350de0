//! TTL + LRU cache for analysis reports

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use testrun_analyzer::config::CacheConfig;
use testrun_analyzer::{PlanId, Report, SuiteId};

/// (plan, suite, min ROC)
pub type ReportKey = (PlanId, SuiteId, i64);

struct Entry {
    report: Arc<Report>,
    stored_at: Instant,
}

/// LRU cache of finished reports with expiry and hit/miss tracking
pub struct ReportCache {
    enabled: bool,
    ttl: Duration,
    cache: Mutex<LruCache<ReportKey, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReportCache {
    pub fn new(enabled: bool, capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            enabled,
            ttl,
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.enabled,
            config.capacity,
            Duration::from_secs(config.ttl_seconds),
        )
    }

    /// Get a fresh report, dropping it if expired
    pub fn get(&self, key: &ReportKey) -> Option<Arc<Report>> {
        if !self.enabled {
            return None;
        }

        let mut cache = self.cache.lock();
        let fresh = cache
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.report.clone());
        if fresh.is_none() {
            // expired (or absent)
            cache.pop(key);
        }

        match fresh {
            Some(report) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(report)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: ReportKey, report: Arc<Report>) {
        if !self.enabled {
            return;
        }
        self.cache.lock().put(
            key,
            Entry {
                report,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            enabled: self.enabled,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: cache.len(),
            capacity: cache.cap().get(),
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
