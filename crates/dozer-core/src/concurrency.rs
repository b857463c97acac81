//! Per-command concurrency limits.
//!
//! Acquire a permit before running a command body; the returned
//! [`ConcurrencyPermit`] releases the slot automatically on drop.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::rate_gate::{BucketKey, BucketScope};

/// Declared limit: at most `max` in-flight invocations per `scope` key.
#[derive(Clone, Copy, Debug)]
pub struct MaxConcurrency {
    pub max: u32,
    pub scope: BucketScope,
}

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    limit: MaxConcurrency,
    in_flight: Arc<Mutex<HashMap<BucketKey, u32>>>,
}

/// RAII guard returned by [`ConcurrencyLimiter::try_acquire`].
#[derive(Debug)]
pub struct ConcurrencyPermit {
    key: BucketKey,
    in_flight: Arc<Mutex<HashMap<BucketKey, u32>>>,
}

fn lock(map: &Mutex<HashMap<BucketKey, u32>>) -> MutexGuard<'_, HashMap<BucketKey, u32>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let mut map = lock(&self.in_flight);
        if let Some(count) = map.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.key);
            }
        }
    }
}

impl ConcurrencyLimiter {
    /// Enforces a minimum of 1.
    pub fn new(limit: MaxConcurrency) -> Self {
        Self {
            limit: MaxConcurrency {
                max: limit.max.max(1),
                scope: limit.scope,
            },
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn limit(&self) -> MaxConcurrency {
        self.limit
    }

    /// Returns a permit, or `None` if every slot for `key` is in use.
    pub fn try_acquire(&self, key: BucketKey) -> Option<ConcurrencyPermit> {
        let mut map = lock(&self.in_flight);
        let count = map.entry(key.clone()).or_insert(0);
        if *count >= self.limit.max {
            return None;
        }
        *count += 1;
        Some(ConcurrencyPermit {
            key,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn in_flight(&self, key: &BucketKey) -> u32 {
        lock(&self.in_flight).get(key).copied().unwrap_or(0)
    }
}
