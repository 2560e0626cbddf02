//! Deterministic in-memory store used by tests.
//!
//! Production deployments never hold rate limit state in process memory;
//! this double exists so the window and burst algorithms can be tested
//! with simulated clocks and simulated outages.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{RateLimitStore, StoreError, WindowSnapshot};

struct Counter {
    value: u64,
    expires_at: Instant,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    windows: Mutex<HashMap<String, Vec<i64>>>,
    counters: Mutex<HashMap<String, Counter>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every operation fails until cleared.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Timeout(Duration::from_millis(0)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn record_event(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        _ttl: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        self.check_available()?;

        let mut windows = self.windows.lock().unwrap();
        let events = windows.entry(key.to_string()).or_default();

        // Half-open window: an event at exactly window_start_ms is expired.
        events.retain(|&score| score > window_start_ms);
        let prior_count = events.len() as u64;
        events.push(now_ms);
        let oldest_ms = events.iter().copied().min().unwrap_or(now_ms);

        Ok(WindowSnapshot {
            prior_count,
            oldest_ms,
        })
    }

    async fn increment_counter(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.check_available()?;

        let mut counters = self.counters.lock().unwrap();
        let now = Instant::now();

        let counter = counters
            .entry(key.to_string())
            .and_modify(|c| {
                if c.expires_at <= now {
                    c.value = 0;
                    c.expires_at = now + ttl;
                }
            })
            .or_insert_with(|| Counter {
                value: 0,
                expires_at: now + ttl,
            });

        counter.value += 1;
        Ok(counter.value)
    }
}
