use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by lookups, insertions and the sweeper. Not persisted.
#[derive(Debug)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserted: AtomicU64,
    pub duplicates: AtomicU64,
    pub refreshed: AtomicU64,
    pub reused_zones: AtomicU64,
    pub insert_failures: AtomicU64,
    pub expired_removals: AtomicU64,
    pub sweeps: AtomicU64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            refreshed: AtomicU64::new(0),
            reused_zones: AtomicU64::new(0),
            insert_failures: AtomicU64::new(0),
            expired_removals: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self, reused_zone: bool) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
        if reused_zone {
            self.reused_zones.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert_failure(&self) {
        self.insert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, removed: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.expired_removals.fetch_add(removed, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn debug_info(&self) -> String {
        format!(
            "hits={}, misses={}, hit_rate={:.2}%, inserted={}, duplicates={}, refreshed={}, reused_zones={}, insert_failures={}, expired={}, sweeps={}",
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.hit_rate() * 100.0,
            self.inserted.load(Ordering::Relaxed),
            self.duplicates.load(Ordering::Relaxed),
            self.refreshed.load(Ordering::Relaxed),
            self.reused_zones.load(Ordering::Relaxed),
            self.insert_failures.load(Ordering::Relaxed),
            self.expired_removals.load(Ordering::Relaxed),
            self.sweeps.load(Ordering::Relaxed),
        )
    }
}
