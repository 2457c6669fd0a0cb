// Time-boxed cache of the last fetched favorites snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::Clock;

use super::model::FavoritesSnapshot;

/// Default maximum age of a cached snapshot.
pub const DEFAULT_TTL_MS: i64 = 30_000;

/// The last snapshot received from the server and when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub snapshot: FavoritesSnapshot,
    pub fetched_at_ms: i64,
    /// Set by a successful mutation. The value is kept so it can still be
    /// shown while a refetch is pending.
    pub invalidated: bool,
}

/// Single-entry snapshot cache. Snapshot, timestamp, and invalidation flag
/// are replaced together under one lock.
pub struct FavoritesCache {
    entry: Mutex<Option<CacheEntry>>,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl FavoritesCache {
    pub fn new(ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entry: Mutex::new(None),
            ttl_ms,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CacheEntry>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Option<CacheEntry> {
        self.lock().clone()
    }

    /// Store `snapshot` stamped with the current time, marked fresh.
    pub fn write(&self, snapshot: FavoritesSnapshot) {
        let fetched_at_ms = self.clock.now_millis();
        *self.lock() = Some(CacheEntry {
            snapshot,
            fetched_at_ms,
            invalidated: false,
        });
    }

    /// Mark the entry stale regardless of age, keeping its value.
    pub fn invalidate(&self) {
        if let Some(entry) = self.lock().as_mut() {
            entry.invalidated = true;
        }
    }

    /// Drop the entry entirely (logout).
    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_fresh(&self) -> bool {
        let guard = self.lock();
        guard.as_ref().is_some_and(|e| self.entry_is_fresh(e))
    }

    fn entry_is_fresh(&self, entry: &CacheEntry) -> bool {
        !entry.invalidated && self.clock.now_millis() - entry.fetched_at_ms <= self.ttl_ms
    }
}
