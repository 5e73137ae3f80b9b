//! Per-endpoint circuit breaker.
//!
//! Lock-free state machine over atomics: closed → open after
//! `failure_threshold` consecutive failures, open → half-open after
//! `open_duration`, half-open → closed on a successful probe. Exactly one
//! probe is admitted in half-open; everything else fails fast.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Clock abstraction so breaker timing can be faked in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Error wrapper distinguishing a fast-failed call from a real fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// The breaker refused the call without touching the network.
    Open { failure_count: usize, open_for: Duration },
    /// The underlying operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { failure_count, open_for } => write!(
                f,
                "circuit breaker open ({failure_count} consecutive failures, open for {open_for:?})"
            ),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerShared {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    opened_at_millis: AtomicU64,
    probe_in_flight: AtomicBool,
}

impl BreakerShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
        }
    }
}

/// Breaker for one upstream endpoint. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    shared: Arc<BreakerShared>,
    failure_threshold: usize,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, open_duration: Duration) -> Self {
        Self {
            shared: Arc::new(BreakerShared::new()),
            failure_threshold: failure_threshold.max(1),
            open_duration,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock for deterministic tests.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> CircuitState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.shared.consecutive_failures.load(Ordering::Acquire)
    }

    /// Force the breaker back to closed, clearing counters.
    pub fn reset(&self) {
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        self.shared.consecutive_failures.store(0, Ordering::Release);
        self.shared.opened_at_millis.store(0, Ordering::Release);
        self.shared.probe_in_flight.store(false, Ordering::Release);
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, BreakerError<E>>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let mut is_probe = false;

        loop {
            match self.shared.state.load(Ordering::Acquire) {
                STATE_OPEN => {
                    let opened_at = self.shared.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed < self.open_duration.as_millis() as u64 {
                        return Err(BreakerError::Open {
                            failure_count: self.failure_count(),
                            open_for: Duration::from_millis(elapsed),
                        });
                    }
                    match self.shared.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!("circuit breaker: open -> half-open");
                            self.shared.probe_in_flight.store(true, Ordering::Release);
                            is_probe = true;
                            break;
                        }
                        // Lost the race; re-read the state.
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    if self
                        .shared
                        .probe_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        is_probe = true;
                        break;
                    }
                    // Another caller owns the probe; fail fast.
                    return Err(BreakerError::Open {
                        failure_count: self.failure_count(),
                        open_for: Duration::ZERO,
                    });
                }
                _ => break,
            }
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.on_success(is_probe),
            Err(_) => self.on_failure(is_probe),
        }

        result.map_err(BreakerError::Inner)
    }

    fn on_success(&self, was_probe: bool) {
        if was_probe {
            if self
                .shared
                .state
                .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::info!("circuit breaker: half-open -> closed");
            }
            self.shared.consecutive_failures.store(0, Ordering::Release);
            self.shared.opened_at_millis.store(0, Ordering::Release);
            self.shared.probe_in_flight.store(false, Ordering::Release);
        } else {
            self.shared.consecutive_failures.store(0, Ordering::Release);
        }
    }

    fn on_failure(&self, was_probe: bool) {
        let failures = self.shared.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if was_probe {
            if self
                .shared
                .state
                .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.shared.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                tracing::warn!(failures, "circuit breaker: probe failed, half-open -> open");
            }
            self.shared.probe_in_flight.store(false, Ordering::Release);
        } else if failures >= self.failure_threshold
            && self
                .shared
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.shared.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
            tracing::error!(
                failures,
                threshold = self.failure_threshold,
                "circuit breaker: closed -> open"
            );
        }
    }
}

/// Process-wide registry of breakers keyed by endpoint base URL. Fetching
/// the same endpoint twice yields handles sharing one state machine.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    failure_threshold: usize,
    open_duration: Duration,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: usize, open_duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            failure_threshold,
            open_duration,
        }
    }

    pub fn breaker_for(&self, endpoint: &str) -> CircuitBreaker {
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(endpoint.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.open_duration))
            .clone()
    }

    /// Sorted `(endpoint, state)` pairs for health reporting.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
