/// Caching layer for the status overview read path
///
/// Provides:
/// - Overview memoisation with a configurable TTL
/// - Explicit invalidation after a sync writes incidents
/// - Thread-safe access via Mutex, shareable behind an Arc

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::overview::StatusOverview;

pub const DEFAULT_TTL_SECONDS: u64 = 30;

struct CachedOverview {
    data: StatusOverview,
    computed_at: Instant,
}

/// Overview cache with TTL-based expiration
pub struct OverviewCache {
    slot: Mutex<Option<CachedOverview>>,
    ttl: Duration,
}

impl OverviewCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_SECONDS)
    }

    pub fn with_ttl(ttl_seconds: u64) -> Self {
        OverviewCache {
            slot: Mutex::new(None),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    // A panic while holding the lock leaves at worst a stale entry; keep serving.
    fn lock(&self) -> MutexGuard<'_, Option<CachedOverview>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached overview if present and younger than the TTL
    pub fn get(&self) -> Option<StatusOverview> {
        let cache = self.lock();
        cache
            .as_ref()
            .filter(|cached| cached.computed_at.elapsed() < self.ttl)
            .map(|cached| cached.data.clone())
    }

    pub fn set(&self, overview: StatusOverview) {
        *self.lock() = Some(CachedOverview {
            data: overview,
            computed_at: Instant::now(),
        });
    }

    /// Serve from cache or compute and store.
    pub fn get_or_compute<F>(&self, compute: F) -> Result<StatusOverview, AppError>
    where
        F: FnOnce() -> Result<StatusOverview, AppError>,
    {
        if let Some(hit) = self.get() {
            return Ok(hit);
        }
        let fresh = compute()?;
        self.set(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached overview (call after incidents change)
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached: self.lock().is_some(),
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

impl Default for OverviewCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub cached: bool,
    pub ttl_seconds: u64,
}
