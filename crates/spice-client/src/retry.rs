//! Retry Logic with Exponential Backoff
//!
//! This module drives the query retry loop: one logical query is attempted,
//! failures are classified, and retryable ones are retried after a growing,
//! jittered wait.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  query(...)  │ Client API
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │  RetryPolicy (shared, r/o)   │
//! │  - max_retries: 3            │
//! │  - initial_interval: 250ms   │
//! │  - multiplier: 1.5           │
//! │  - max_interval: 1.25s       │
//! │  - max_elapsed_time: 3.75s   │
//! └──────┬───────────────────────┘
//!        │ policy.backoff()  (fresh per call)
//!        ▼
//! ┌──────────────────────────────┐
//! │  ExponentialBackoff          │
//! │  ├─→ Attempt 1: Immediate    │
//! │  ├─→ Attempt 2: ~250ms       │
//! │  ├─→ Attempt 3: ~375ms       │
//! │  └─→ Attempt 4: ~562ms       │
//! └──────────────────────────────┘
//! ```
//!
//! `RetryPolicy` is plain data and can be shared between calls. The wait
//! state lives in `ExponentialBackoff`, which every call creates for itself,
//! so concurrent queries never disturb each other's timing.
//!
//! Which failures are retried is decided by [`crate::classify`].
//!
//! ## Examples
//!
//! ```ignore
//! use spice_client::retry::{retry_with_backoff, RetryPolicy};
//!
//! let policy = RetryPolicy::for_max_retries(3);
//! let stream = retry_with_backoff(&policy, &ctx, |_attempt| async {
//!     open_stream().await
//! }).await?;
//! ```

use crate::classify::classify;
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_MULTIPLIER: f64 = 1.5;
const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Retry policy configuration for exponential backoff.
///
/// # Backoff Calculation
///
/// ```text
/// wait(n) = min(initial_interval * multiplier^(n-1) * (1 ± randomization_factor), max_interval)
///
/// Retrying stops once `max_retries` waits were handed out, or once the time
/// since the first attempt plus the next wait would exceed `max_elapsed_time`
/// (zero disables the time cap).
/// ```
///
/// # Examples
///
/// ```ignore
/// // Defaults derived from the retry count
/// let policy = RetryPolicy::for_max_retries(3);
///
/// // Fixed, deterministic waits
/// let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(10), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,

    /// Wait before the first retry.
    pub initial_interval: Duration,

    /// Growth factor between consecutive waits.
    pub multiplier: f64,

    /// Upper bound of a single wait.
    pub max_interval: Duration,

    /// Upper bound of total time spent retrying. Zero means no time cap.
    pub max_elapsed_time: Duration,

    /// Jitter applied to each wait, as a fraction of it (0.5 = ±50%).
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_max_retries(3)
    }
}

impl RetryPolicy {
    /// Create a policy without jitter and without a time cap.
    pub fn new(
        max_retries: u32,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_interval,
            multiplier,
            max_interval,
            max_elapsed_time: Duration::ZERO,
            randomization_factor: 0.0,
        }
    }

    /// The client's default policy for a retry count.
    ///
    /// ```text
    /// initial_interval = 250ms
    /// max_interval     = 250ms * ceil(max_retries * 1.5)
    /// max_elapsed_time = max_interval * max_retries
    /// ```
    pub fn for_max_retries(max_retries: u32) -> Self {
        let steps = (f64::from(max_retries) * DEFAULT_MULTIPLIER).ceil() as u32;
        let max_interval = DEFAULT_INITIAL_INTERVAL * steps;
        Self {
            max_retries,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval,
            max_elapsed_time: max_interval * max_retries,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
        }
    }

    pub fn with_max_elapsed_time(mut self, max_elapsed_time: Duration) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }

    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered wait before retry `n` (1-indexed), capped at `max_interval`.
    pub fn interval(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(seconds.min(self.max_interval.as_secs_f64()).max(0.0))
    }

    /// Jittered wait before retry `n`, for a uniform sample `unit` in `[0, 1)`.
    pub fn randomized_interval(&self, n: u32, unit: f64) -> Duration {
        let base = self.interval(n).as_secs_f64();
        let delta = self.randomization_factor * (2.0 * unit - 1.0);
        let seconds = (base * (1.0 + delta))
            .min(self.max_interval.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(seconds)
    }

    /// Start a fresh wait sequence for one call.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

/// Per-call wait state. Never share one between concurrent calls.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    retries: u32,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: 0,
            started: Instant::now(),
        }
    }

    /// Number of waits handed out since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Restart the sequence at retry 1 with a new start time.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.started = Instant::now();
    }

    /// Next wait, or `None` once the retry count or time budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }
        let wait = self
            .policy
            .randomized_interval(self.retries + 1, rand::random::<f64>());
        if !self.policy.max_elapsed_time.is_zero()
            && self.started.elapsed() + wait > self.policy.max_elapsed_time
        {
            return None;
        }
        self.retries += 1;
        Some(wait)
    }
}

/// Retry an operation with exponential backoff.
///
/// # Behavior
///
/// 1. Run `operation(attempt)` (attempt is 1-indexed)
/// 2. On success, return the result
/// 3. On a permanent failure, return the error unchanged
/// 4. On a retryable failure, wait for the next backoff and go to 1;
///    once the policy is exhausted, return the last error unchanged
///
/// Cancelling `ctx` (or passing its deadline) during an attempt or a wait
/// stops the loop at once with `Cancelled` / `Timeout`.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    ctx: &RequestContext,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match ctx.run(operation(attempt)).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !classify(&err).is_retryable() {
            debug!(attempt, error = %err, "Non-retryable error, giving up");
            return Err(err);
        }

        let Some(wait) = backoff.next_backoff() else {
            warn!(
                attempt,
                max_retries = policy.max_retries,
                error = %err,
                "Retries exhausted, giving up"
            );
            return Err(err);
        };

        warn!(
            attempt,
            max_retries = policy.max_retries,
            backoff_ms = wait.as_millis() as u64,
            error = %err,
            "Retryable error, backing off"
        );

        ctx.run(async {
            sleep(wait).await;
            Ok::<(), ClientError>(())
        })
        .await?;
    }
}
