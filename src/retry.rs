//! Retry with exponential backoff and full jitter.
//!
//! Only transient faults are retried; the policy owns a predicate so the
//! caller decides what "transient" means. Sleeping goes through a `Sleeper`
//! seam so tests run without real delays.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Abstraction for sleeping between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Test sleeper that returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Test sleeper that records every requested delay without sleeping.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl Sleeper for TrackingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(duration);
    }
}

/// Outcome of a retried operation that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: usize, last: E },
    /// The predicate declared the error non-retryable; no further attempts.
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {attempts} attempts, last error: {last}")
            }
            RetryError::Aborted(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Aborted(e) => Some(e),
        }
    }
}

/// Exponential backoff (×2 per retry) with optional full jitter.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_retries: u32,
    base: Duration,
    max_delay: Duration,
    jitter: bool,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base", &self.base)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// `max_retries` additional attempts after the first, so zero disables
    /// retrying entirely.
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries,
            base,
            max_delay: Duration::from_secs(30),
            jitter: true,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Delay before retry number `retry` (0-indexed): `base · 2^retry`,
    /// capped, then jittered down to a uniform pick in `[0, delay]`.
    fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry);
        let delay = self.base.checked_mul(multiplier).unwrap_or(self.max_delay).min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.should_retry)(&e) => return Err(RetryError::Aborted(e)),
                Err(e) => {
                    if attempt == self.max_retries {
                        return Err(RetryError::Exhausted {
                            attempts: attempt as usize + 1,
                            last: e,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::debug!(attempt = attempt + 1, ?delay, "retrying after transient fault");
                    self.sleeper.sleep(delay).await;
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}
