//! Retry-with-backoff shared by the index updater and the queue pull loop.
//!
//! Attempt `i` (from 0) waits `unit * growth^i`, plus up to one `unit` of jitter when enabled.
//! Retrying stops once the accumulated wait reaches `max_elapsed`.

use std::future::Future;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub unit: Duration,
    pub growth: u32,
    /// `None` retries forever.
    pub max_elapsed: Option<Duration>,
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Doubling waits with jitter, giving up after `ceiling_units` units of sleep.
    pub fn exponential(unit: Duration, ceiling_units: u32) -> Self {
        Self {
            unit,
            growth: 2,
            max_elapsed: Some(unit.checked_mul(ceiling_units).unwrap_or(Duration::MAX)),
            jitter: true,
        }
    }

    /// The same pause every time, forever.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            unit: interval,
            growth: 1,
            max_elapsed: None,
            jitter: false,
        }
    }

    /// Wait before retrying after failed attempt `attempt`, excluding jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.growth.checked_pow(attempt).unwrap_or(u32::MAX);
        self.unit.checked_mul(factor).unwrap_or(Duration::MAX)
    }
}

/// Source of the jitter fraction, uniform in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn fraction(&self) -> f64;
}

/// Draws jitter from the OS RNG so independently started processes do not retry in lockstep.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsJitter;

/// Largest multiple of 1000 that fits in a `u32`; draws at or above it are rejected so
/// every millisecond bucket is equally likely.
const JITTER_ZONE: u32 = u32::MAX - u32::MAX % 1000;

impl JitterSource for OsJitter {
    fn fraction(&self) -> f64 {
        // Millisecond resolution within one unit.
        loop {
            let draw = OsRng.next_u32();
            if draw < JITTER_ZONE {
                return f64::from(draw % 1000) / 1000.0;
            }
        }
    }
}

/// Fixed jitter, mostly for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantJitter(pub f64);

impl JitterSource for ConstantJitter {
    fn fraction(&self) -> f64 {
        self.0.clamp(0.0, 0.999)
    }
}

/// Per-invocation retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub attempt: u32,
    pub elapsed: Duration,
}

impl BackoffState {
    /// Wait owed after the current attempt failed.
    pub fn next_delay(&self, policy: &BackoffPolicy, jitter: &dyn JitterSource) -> Duration {
        let base = policy.base_delay(self.attempt);
        if policy.jitter {
            base.saturating_add(policy.unit.mul_f64(jitter.fraction()))
        } else {
            base
        }
    }

    pub fn record(&mut self, waited: Duration) {
        self.elapsed = self.elapsed.saturating_add(waited);
        self.attempt += 1;
    }

    pub fn exhausted(&self, policy: &BackoffPolicy) -> bool {
        policy
            .max_elapsed
            .map(|ceiling| self.elapsed >= ceiling)
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not retryable; no wait happened after it.
    Fatal(E),
    /// Retryable failures continued until the wait ceiling.
    Exhausted { state: BackoffState, last: E },
}

/// A successful value together with the retry bookkeeping that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub state: BackoffState,
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or the policy's
/// wait ceiling is reached. `op` receives the attempt number.
pub async fn retry<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    jitter: &dyn JitterSource,
    is_retryable: P,
    mut op: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut state = BackoffState::default();
    loop {
        let err = match op(state.attempt).await {
            Ok(value) => return Ok(Retried { value, state }),
            Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
            Err(err) => err,
        };

        let delay = state.next_delay(policy, jitter);
        tracing::warn!(
            attempt = state.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure, backing off",
        );
        sleep(delay).await;
        state.record(delay);

        if state.exhausted(policy) {
            return Err(RetryError::Exhausted { state, last: err });
        }
    }
}
