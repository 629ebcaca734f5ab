//! Priority-queued, budget-tracked rate limiter for upstream API calls.
//!
//! One [`RateLimiter`] guards one upstream budget. The embedder constructs
//! it once inside a tokio runtime and passes the handle (it is `Clone`) to
//! every caller; there is no hidden global instance.
//!
//! Requests are admitted through three gates before they ever queue: the
//! circuit breaker, the daily call quota, and the monthly cost budget — all
//! rejected synchronously, never retried by this layer. Queued requests
//! drain one at a time in priority-then-arrival order with a fixed
//! inter-request delay, each attempt bounded by the retry policy. Exhausting
//! retries surfaces the error to that caller only and counts as a single
//! breaker failure; any success closes the breaker and is charged to the
//! persisted usage counters.
//!
//! A caller whose future is dropped — queued or mid-turn — releases its
//! queue slot automatically, so one abandoned request cannot stall the
//! single-concurrency drain.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use tickwatch_store::KvStore;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::retry::RetryPolicy;
use crate::transport::FetchError;
use crate::usage::{UsageStats, UsageTracker};

/// Queue priority. Dequeue order is priority-then-arrival; completion order
/// is not guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Optional short-window request quota enforced while draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowQuota {
    pub limit: u32,
    pub window: Duration,
}

/// Rate limiter budgets and pacing.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Calls allowed per UTC day.
    pub max_daily_calls: u64,
    /// Upstream spend allowed per calendar month.
    pub max_monthly_cost: f64,
    /// Cost charged per completed call.
    pub cost_per_call: f64,
    /// Pause between consecutive dequeues, to avoid bursting the upstream.
    pub inter_request_delay: Duration,
    /// Optional windowed quota gate applied while draining.
    pub window_quota: Option<WindowQuota>,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    /// Store key the usage counters persist under.
    pub usage_key: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_daily_calls: 250,
            max_monthly_cost: 50.0,
            cost_per_call: 0.01,
            inter_request_delay: Duration::from_millis(250),
            window_quota: None,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            usage_key: String::from("tickwatch.usage"),
        }
    }
}

/// Queue-level and upstream failures surfaced by [`RateLimiter::enqueue`].
///
/// The first three are rejected synchronously before the request is ever
/// queued and are never retried here; re-submission is the caller's call.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("daily call quota exhausted ({used}/{limit})")]
    DailyQuotaExhausted { used: u64, limit: u64 },

    #[error("monthly cost budget exhausted (${used:.2}/${limit:.2})")]
    MonthlyBudgetExhausted { used: f64, limit: f64 },

    #[error("circuit breaker is open; retry in ~{}s", retry_in.as_secs())]
    CircuitOpen { retry_in: Duration },

    #[error("limiter is shut down")]
    Shutdown,

    #[error("upstream call failed after {attempts} attempt(s): {source}")]
    Upstream {
        attempts: u32,
        #[source]
        source: FetchError,
    },
}

struct Ticket {
    id: Uuid,
    endpoint: String,
    rank: u8,
    queued_at: Instant,
    turn_tx: oneshot::Sender<oneshot::Sender<()>>,
}

struct LimiterShared {
    config: LimiterConfig,
    breaker: CircuitBreaker,
    usage: UsageTracker,
    queue: Mutex<Vec<Ticket>>,
    notify: Notify,
    window_gate: Option<DefaultDirectRateLimiter>,
}

/// Handle to one shared upstream budget. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<LimiterShared>,
}

impl RateLimiter {
    /// Build a limiter persisting its usage counters to `store`, and spawn
    /// its drain task. Must be called within a tokio runtime. The drain
    /// task exits once every handle is dropped.
    pub fn new(config: LimiterConfig, store: Arc<dyn KvStore>) -> Self {
        let usage = UsageTracker::load(store, config.usage_key.clone());
        let breaker = CircuitBreaker::new(config.breaker);
        let window_gate = config.window_quota.map(|quota| {
            governor::RateLimiter::direct(quota_from_window(quota.window, quota.limit))
        });

        let shared = Arc::new(LimiterShared {
            config,
            breaker,
            usage,
            queue: Mutex::new(Vec::new()),
            notify: Notify::new(),
            window_gate,
        });

        tokio::spawn(drain_loop(Arc::downgrade(&shared)));
        Self { shared }
    }

    /// Queue `op` behind the shared budget and run it when its turn comes.
    ///
    /// `op` is invoked up to `retry.max_retries + 1` times with backoff and
    /// jitter between transient failures.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::CircuitOpen`], [`LimiterError::DailyQuotaExhausted`],
    ///   [`LimiterError::MonthlyBudgetExhausted`]: rejected before queueing.
    /// - [`LimiterError::Upstream`]: the call failed after exhausting its
    ///   retry budget; other queued requests are unaffected.
    pub async fn enqueue<T, F, Fut>(
        &self,
        endpoint: &str,
        priority: Priority,
        mut op: F,
    ) -> Result<T, LimiterError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, FetchError>> + Send,
    {
        let shared = &self.shared;
        shared.usage.roll_if_needed();
        self.check_admission()?;

        // Take a queue slot and wait for the drain task to grant the turn.
        let (turn_tx, turn_rx) = oneshot::channel();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            endpoint: endpoint.to_owned(),
            rank: priority.rank(),
            queued_at: Instant::now(),
            turn_tx,
        };
        {
            // Inserting before the first strictly lower priority keeps
            // arrival order within a tier without an explicit sequence.
            let mut queue = shared.queue.lock().expect("limiter queue lock");
            let position = queue
                .iter()
                .position(|queued| queued.rank > ticket.rank)
                .unwrap_or(queue.len());
            queue.insert(position, ticket);
        }
        shared.notify.notify_one();

        // Dropping `_turn_guard` — normally or through caller cancellation —
        // is what frees the drain slot for the next request.
        let _turn_guard: oneshot::Sender<()> =
            turn_rx.await.map_err(|_| LimiterError::Shutdown)?;

        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    shared.breaker.record_success();
                    shared.usage.record_call(shared.config.cost_per_call);
                    return Ok(value);
                }
                Err(err) if err.is_transient() && shared.config.retry.allows_retry(attempt) => {
                    let delay = shared.config.retry.delay_for_attempt(attempt);
                    debug!(endpoint, attempt, ?delay, %err, "transient upstream failure; backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    // One breaker failure per exhausted request, not per attempt.
                    shared.breaker.record_failure();
                    warn!(endpoint, attempts = attempt + 1, %err, "upstream call failed");
                    return Err(LimiterError::Upstream {
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }
        }
    }

    fn check_admission(&self) -> Result<(), LimiterError> {
        let shared = &self.shared;

        if shared.breaker.state() == CircuitState::Open {
            if let Some(retry_at) = shared.breaker.retry_at() {
                let now = Instant::now();
                if now < retry_at {
                    return Err(LimiterError::CircuitOpen {
                        retry_in: retry_at - now,
                    });
                }
            }
            // Timer elapsed: flip to half-open and admit the probe.
            let _ = shared.breaker.allow_request();
        }

        let stats = shared.usage.stats();
        if stats.daily_calls >= shared.config.max_daily_calls {
            return Err(LimiterError::DailyQuotaExhausted {
                used: stats.daily_calls,
                limit: shared.config.max_daily_calls,
            });
        }
        if stats.monthly_cost + shared.config.cost_per_call > shared.config.max_monthly_cost {
            return Err(LimiterError::MonthlyBudgetExhausted {
                used: stats.monthly_cost,
                limit: shared.config.max_monthly_cost,
            });
        }

        Ok(())
    }

    /// Whether a request submitted now would pass the admission gates.
    /// Side-effect free.
    pub fn can_make_request(&self) -> bool {
        let shared = &self.shared;

        let circuit_blocks = shared.breaker.state() == CircuitState::Open
            && shared
                .breaker
                .retry_at()
                .is_some_and(|retry_at| Instant::now() < retry_at);
        if circuit_blocks {
            return false;
        }

        let stats = shared.usage.stats();
        stats.daily_calls < shared.config.max_daily_calls
            && stats.monthly_cost + shared.config.cost_per_call <= shared.config.max_monthly_cost
    }

    pub fn remaining_daily_calls(&self) -> u64 {
        let stats = self.shared.usage.stats();
        self.shared.config.max_daily_calls.saturating_sub(stats.daily_calls)
    }

    pub fn remaining_monthly_budget(&self) -> f64 {
        let stats = self.shared.usage.stats();
        (self.shared.config.max_monthly_cost - stats.monthly_cost).max(0.0)
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.shared.usage.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.shared.breaker.state()
    }

    /// Requests currently waiting for a turn.
    pub fn pending_requests(&self) -> usize {
        self.shared.queue.lock().expect("limiter queue lock").len()
    }
}

async fn drain_loop(shared: Weak<LimiterShared>) {
    loop {
        let Some(strong) = shared.upgrade() else { return };

        // Timer-driven rollover check keeps long-lived sessions from
        // spending against a stale budget window.
        strong.usage.roll_if_needed();

        let next = {
            let mut queue = strong.queue.lock().expect("limiter queue lock");
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };

        let Some(ticket) = next else {
            // The 1-second tick bounds how long this handle is held while
            // idle, so every-handle-dropped shutdown is still prompt.
            tokio::select! {
                _ = strong.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            continue;
        };

        if let Some(gate) = &strong.window_gate {
            gate.until_ready().await;
        }

        debug!(
            id = %ticket.id,
            endpoint = %ticket.endpoint,
            waited_ms = ticket.queued_at.elapsed().as_millis() as u64,
            "granting request turn"
        );

        let (done_tx, done_rx) = oneshot::channel::<()>();
        if ticket.turn_tx.send(done_tx).is_ok() {
            // Resolves when the caller finishes or drops its future; either
            // way the slot is released.
            let _ = done_rx.await;
            tokio::time::sleep(strong.config.inter_request_delay).await;
        }
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let safe_limit = limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit is non-zero");

    let seconds_per_cell = (window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}
