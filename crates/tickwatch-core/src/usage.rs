//! Daily/monthly call and cost accounting, persisted across restarts.
//!
//! Counters are mutated only by the rate limiter after each completed call
//! and reset when the UTC wall-clock day or month rolls over. Rollover is
//! detected on load (catching resets missed while the process was down) and
//! re-checked opportunistically on every mutation and from the limiter's
//! drain loop, so a long-lived session never overruns a stale window.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tickwatch_store::KvStore;

use crate::UtcDateTime;

/// Persisted counter image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PersistedUsage {
    daily_calls: u64,
    monthly_calls: u64,
    daily_cost: f64,
    monthly_cost: f64,
    last_daily_reset_ms: i64,
    last_monthly_reset_ms: i64,
}

impl PersistedUsage {
    fn fresh(now: UtcDateTime) -> Self {
        Self {
            daily_calls: 0,
            monthly_calls: 0,
            daily_cost: 0.0,
            monthly_cost: 0.0,
            last_daily_reset_ms: now.unix_ms(),
            last_monthly_reset_ms: now.unix_ms(),
        }
    }
}

/// Read-only snapshot of the usage counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageStats {
    pub daily_calls: u64,
    pub monthly_calls: u64,
    pub daily_cost: f64,
    pub monthly_cost: f64,
    pub last_daily_reset: UtcDateTime,
    pub last_monthly_reset: UtcDateTime,
}

/// Persisted daily/monthly usage accounting for one upstream budget.
pub struct UsageTracker {
    store: Arc<dyn KvStore>,
    key: String,
    inner: Mutex<PersistedUsage>,
}

impl UsageTracker {
    /// Load counters from `store` under `key`, starting fresh when the key
    /// is absent or unreadable, and applying any rollover missed while the
    /// process was not running.
    pub fn load(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let now = UtcDateTime::now();

        let mut usage = store
            .get(&key)
            .and_then(|raw| serde_json::from_str::<PersistedUsage>(&raw).ok())
            .unwrap_or_else(|| PersistedUsage::fresh(now));
        roll(&mut usage, now);

        Self {
            store,
            key,
            inner: Mutex::new(usage),
        }
    }

    /// Count one completed call at `cost`, persisting the new image.
    pub fn record_call(&self, cost: f64) {
        let now = UtcDateTime::now();
        let mut inner = self.inner.lock().expect("usage tracker lock");
        roll(&mut inner, now);

        inner.daily_calls += 1;
        inner.monthly_calls += 1;
        inner.daily_cost += cost;
        inner.monthly_cost += cost;

        self.persist(&inner);
    }

    /// Apply day/month rollover if the wall clock has crossed a boundary.
    pub fn roll_if_needed(&self) {
        let now = UtcDateTime::now();
        let mut inner = self.inner.lock().expect("usage tracker lock");
        if roll(&mut inner, now) {
            self.persist(&inner);
        }
    }

    pub fn stats(&self) -> UsageStats {
        let inner = self.inner.lock().expect("usage tracker lock");
        UsageStats {
            daily_calls: inner.daily_calls,
            monthly_calls: inner.monthly_calls,
            daily_cost: inner.daily_cost,
            monthly_cost: inner.monthly_cost,
            last_daily_reset: UtcDateTime::from_unix_ms(inner.last_daily_reset_ms),
            last_monthly_reset: UtcDateTime::from_unix_ms(inner.last_monthly_reset_ms),
        }
    }

    fn persist(&self, usage: &PersistedUsage) {
        match serde_json::to_string(usage) {
            Ok(raw) => {
                if let Err(err) = self.store.set(&self.key, &raw) {
                    warn!(key = %self.key, %err, "failed to persist usage counters");
                }
            }
            Err(err) => warn!(key = %self.key, %err, "usage counters not serializable"),
        }
    }
}

/// Zero the daily window on a UTC date change and the monthly window on a
/// month change. Returns whether anything rolled.
fn roll(usage: &mut PersistedUsage, now: UtcDateTime) -> bool {
    let now_date = now.into_inner().date();
    let daily_date = UtcDateTime::from_unix_ms(usage.last_daily_reset_ms)
        .into_inner()
        .date();
    let monthly_date = UtcDateTime::from_unix_ms(usage.last_monthly_reset_ms)
        .into_inner()
        .date();

    let mut rolled = false;

    if now_date != daily_date {
        debug!(calls = usage.daily_calls, "daily usage window rolled over");
        usage.daily_calls = 0;
        usage.daily_cost = 0.0;
        usage.last_daily_reset_ms = now.unix_ms();
        rolled = true;
    }

    if (now_date.year(), now_date.month()) != (monthly_date.year(), monthly_date.month()) {
        debug!(calls = usage.monthly_calls, "monthly usage window rolled over");
        usage.monthly_calls = 0;
        usage.monthly_cost = 0.0;
        usage.last_monthly_reset_ms = now.unix_ms();
        rolled = true;
    }

    rolled
}
