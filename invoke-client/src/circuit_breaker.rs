//! Circuit breaker pattern implementation.
//!
//! The default breaker tracks outcomes in a rolling window and opens once the
//! window holds enough requests and the error percentage reaches the
//! configured threshold. After a sleep window it lets a single probe through;
//! the probe's outcome closes or re-opens the circuit.

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single probe is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Failure-rate governor behind one circuit command.
///
/// Implementations must be cheap to query; the guard calls `is_allowed` on
/// every request.
pub trait Breaker: Send + Sync {
    /// Check if a request is allowed.
    fn is_allowed(&self) -> bool;

    /// Record a successful request.
    fn record_success(&self);

    /// Record a failed request.
    fn record_failure(&self);

    /// Apply a new error percent threshold.
    fn reconfigure(&self, error_percent_threshold: u32);

    /// Get the current circuit state.
    fn state(&self) -> CircuitState;

    /// Hold the circuit open until [`Breaker::reset`].
    fn force_open(&self);

    /// Reset the circuit breaker to closed state.
    fn reset(&self);
}

/// Creates one breaker per circuit command.
pub trait BreakerFactory: Send + Sync {
    fn create(&self, name: &str, error_percent_threshold: u32) -> Arc<dyn Breaker>;
}

/// Rolling-window breaker settings.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Minimum requests in the window before the error rate is considered.
    pub request_volume_threshold: u32,
    /// Time to wait before letting a probe through an open circuit.
    pub sleep_window: Duration,
    /// Number of one-second buckets in the rolling window.
    pub window_buckets: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            sleep_window: Duration::from_secs(5),
            window_buckets: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    second: u64,
    successes: u32,
    failures: u32,
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Default breaker: error percentage over a rolling window.
pub struct RollingBreaker {
    name: String,
    settings: BreakerSettings,
    error_percent_threshold: AtomicU32,
    epoch: Instant,
    buckets: Mutex<VecDeque<Bucket>>,
    inner: RwLock<BreakerState>,
    probe_in_flight: AtomicBool,
    forced_open: AtomicBool,
}

impl RollingBreaker {
    /// Create a new breaker.
    pub fn new(name: impl Into<String>, error_percent_threshold: u32, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            error_percent_threshold: AtomicU32::new(error_percent_threshold),
            epoch: Instant::now(),
            buckets: Mutex::new(VecDeque::new()),
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            probe_in_flight: AtomicBool::new(false),
            forced_open: AtomicBool::new(false),
        }
    }

    /// Get the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request count and error percentage over the rolling window.
    pub fn health(&self) -> (u32, u32) {
        let mut buckets = self.buckets.lock();
        self.evict(&mut buckets);
        let (successes, failures) = buckets
            .iter()
            .fold((0u32, 0u32), |(s, f), b| (s + b.successes, f + b.failures));
        let total = successes + failures;
        let percent = if total == 0 { 0 } else { failures * 100 / total };
        (total, percent)
    }

    fn current_second(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    fn evict(&self, buckets: &mut VecDeque<Bucket>) {
        let now = self.current_second();
        let span = self.settings.window_buckets as u64;
        while let Some(front) = buckets.front() {
            if now.saturating_sub(front.second) >= span {
                buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&self, success: bool) {
        let mut buckets = self.buckets.lock();
        self.evict(&mut buckets);
        let now = self.current_second();
        if buckets.back().is_none_or(|b| b.second != now) {
            buckets.push_back(Bucket {
                second: now,
                ..Default::default()
            });
        }
        if let Some(bucket) = buckets.back_mut() {
            if success {
                bucket.successes += 1;
            } else {
                bucket.failures += 1;
            }
        }
    }

    fn open(&self) {
        let mut inner = self.inner.write();
        if inner.state != CircuitState::Open {
            warn!(name = %self.name, "Circuit breaker OPENED");
        }
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        let mut inner = self.inner.write();
        if inner.state != CircuitState::Closed {
            info!(name = %self.name, "Circuit breaker CLOSED");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            self.buckets.lock().clear();
        }
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// Transition to half-open if the sleep window has elapsed.
    fn maybe_transition_to_half_open(&self) {
        if self.forced_open.load(Ordering::SeqCst) {
            return;
        }

        let inner = self.inner.read();
        if inner.state != CircuitState::Open {
            return;
        }

        if let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.settings.sleep_window
        {
            drop(inner);

            let mut inner = self.inner.write();
            if inner.state == CircuitState::Open {
                debug!(name = %self.name, "Circuit breaker transitioning to HALF-OPEN");
                inner.state = CircuitState::HalfOpen;
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Breaker for RollingBreaker {
    fn is_allowed(&self) -> bool {
        if self.forced_open.load(Ordering::SeqCst) {
            return false;
        }
        self.maybe_transition_to_half_open();

        match self.inner.read().state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .probe_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
        }
    }

    fn record_success(&self) {
        let state = self.inner.read().state;
        match state {
            CircuitState::HalfOpen => self.close(),
            CircuitState::Closed => self.record(true),
            CircuitState::Open => {
                debug!(name = %self.name, "Success recorded while circuit open");
            }
        }
    }

    fn record_failure(&self) {
        let state = self.inner.read().state;
        match state {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed => {
                self.record(false);
                let (total, percent) = self.health();
                let threshold = self.error_percent_threshold.load(Ordering::Relaxed);
                if total >= self.settings.request_volume_threshold && percent >= threshold {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn reconfigure(&self, error_percent_threshold: u32) {
        self.error_percent_threshold
            .store(error_percent_threshold, Ordering::Relaxed);
    }

    fn state(&self) -> CircuitState {
        if self.forced_open.load(Ordering::SeqCst) {
            return CircuitState::Open;
        }
        self.maybe_transition_to_half_open();
        self.inner.read().state
    }

    fn force_open(&self) {
        self.forced_open.store(true, Ordering::SeqCst);
        self.open();
    }

    fn reset(&self) {
        self.forced_open.store(false, Ordering::SeqCst);
        self.close();
    }
}

/// Builds [`RollingBreaker`]s with shared settings.
#[derive(Debug, Clone, Default)]
pub struct RollingBreakerFactory {
    settings: BreakerSettings,
}

impl RollingBreakerFactory {
    pub fn new(settings: BreakerSettings) -> Self {
        Self { settings }
    }
}

impl BreakerFactory for RollingBreakerFactory {
    fn create(&self, name: &str, error_percent_threshold: u32) -> Arc<dyn Breaker> {
        Arc::new(RollingBreaker::new(
            name,
            error_percent_threshold,
            self.settings.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(volume: u32, threshold: u32, sleep: Duration) -> RollingBreaker {
        RollingBreaker::new(
            "test",
            threshold,
            BreakerSettings {
                request_volume_threshold: volume,
                sleep_window: sleep,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_stays_closed_below_volume() {
        let cb = breaker(5, 50, Duration::from_secs(5));
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed());
    }

    #[test]
    fn test_opens_on_error_percentage() {
        let cb = breaker(4, 50, Duration::from_secs(5));
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.health(), (4, 50));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());
    }

    #[test]
    fn test_below_threshold_stays_closed() {
        let cb = breaker(4, 50, Duration::from_secs(5));
        for _ in 0..9 {
            cb.record_success();
        }
        cb.record_failure();
        assert_eq!(cb.health(), (10, 10));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_single_probe() {
        let cb = breaker(1, 1, Duration::ZERO);
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_allowed());
        assert!(!cb.is_allowed());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.health(), (0, 0));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 1, Duration::from_millis(20));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.is_allowed());
        cb.record_failure();

        assert_eq!(cb.inner.read().state, CircuitState::Open);
        assert!(!cb.is_allowed());
    }

    #[test]
    fn test_force_open_holds_until_reset() {
        let cb = breaker(20, 50, Duration::ZERO);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed());
    }

    #[test]
    fn test_reconfigure_threshold() {
        let cb = breaker(2, 100, Duration::from_secs(5));
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.reconfigure(10);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
