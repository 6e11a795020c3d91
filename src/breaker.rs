//! Circuit breaking for named clients.
//!
//! ```text
//! Closed ──[error % >= threshold, volume reached]──> Open
//!   ▲                                                  │ sleep window elapsed
//!   └──────[probe succeeds]──── HalfOpen <─────────────┘
//!                               │ probe fails
//!                               └──────────────> Open
//! ```
//!
//! [`CircuitBreakers`] keeps one circuit per client name. Outcomes are counted
//! in a rolling window of ten buckets; the circuit only trips once the window
//! holds at least `request_volume_threshold` calls.

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::{KitError, Result};

const WINDOW_BUCKETS: u32 = 10;

/// Boxed call executed through a [`Breaker`]. Resolves to the raw response body.
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Per-client breaker thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Longest a single call may run before it counts as failed.
    pub timeout: Duration,
    /// Calls allowed in flight at once; extra calls are rejected.
    pub max_concurrent_requests: usize,
    /// Error percentage in the rolling window that opens the circuit.
    pub error_percent_threshold: u8,
    /// Calls the rolling window must hold before the circuit may open.
    pub request_volume_threshold: u64,
    /// Time an open circuit waits before letting a probe through.
    pub sleep_window: Duration,
    /// Span of the outcome statistics.
    pub rolling_window: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            max_concurrent_requests: 100,
            error_percent_threshold: 20,
            request_volume_threshold: 20,
            sleep_window: Duration::from_millis(5_000),
            rolling_window: Duration::from_secs(10),
        }
    }
}

/// Registry of breakers keyed by client name.
#[async_trait]
pub trait Breaker: Send + Sync {
    /// Registers settings for `name`. Registering again is a no-op.
    fn configure(&self, name: &str, settings: BreakerSettings);

    /// Runs `call` through the breaker of `name`.
    ///
    /// Returns a breaker rejection without polling `call` when the circuit is
    /// open or the concurrency limit is reached.
    async fn execute(&self, name: &str, call: CallFuture<'_>) -> Result<String>;
}

/// Source of the current instant for breaker timing.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// A single probe call is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct Bucket {
    start: Instant,
    successes: u64,
    failures: u64,
}

#[derive(Debug)]
struct RollingWindow {
    span: Duration,
    bucket_width: Duration,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn new(span: Duration) -> Self {
        Self {
            span,
            bucket_width: (span / WINDOW_BUCKETS).max(Duration::from_millis(1)),
            buckets: VecDeque::with_capacity(WINDOW_BUCKETS as usize + 1),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.start) >= self.span {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool) {
        self.prune(now);
        let fresh = match self.buckets.back() {
            Some(last) => now.saturating_duration_since(last.start) >= self.bucket_width,
            None => true,
        };
        if fresh {
            self.buckets.push_back(Bucket {
                start: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if success {
                bucket.successes += 1;
            } else {
                bucket.failures += 1;
            }
        }
    }

    /// `(total, failures)` inside the window.
    fn totals(&mut self, now: Instant) -> (u64, u64) {
        self.prune(now);
        self.buckets.iter().fold((0, 0), |(total, failures), bucket| {
            (
                total + bucket.successes + bucket.failures,
                failures + bucket.failures,
            )
        })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    window: RollingWindow,
}

struct Circuit {
    settings: BreakerSettings,
    permits: Arc<Semaphore>,
    inner: Mutex<CircuitInner>,
}

impl Circuit {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.max_concurrent_requests)),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                opened_at: None,
                window: RollingWindow::new(settings.rolling_window),
            }),
            settings,
        }
    }

    /// Decides whether a call may proceed, moving an expired open circuit to half-open.
    fn allow(&self, name: &str, now: Instant) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled = inner.opened_at.map_or(true, |opened| {
                    now.saturating_duration_since(opened) >= self.settings.sleep_window
                });
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(client = name, "circuit half-open, probing");
                    Ok(())
                } else {
                    Err(KitError::CircuitOpen {
                        name: name.to_owned(),
                    })
                }
            }
            CircuitState::HalfOpen => Err(KitError::CircuitOpen {
                name: name.to_owned(),
            }),
        }
    }

    fn report(&self, name: &str, now: Instant, success: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if success => {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.window.reset();
                #[cfg(feature = "tracing")]
                tracing::debug!(client = name, "circuit closed");
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                #[cfg(feature = "tracing")]
                tracing::warn!(client = name, "probe failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.window.record(now, success);
                let (total, failures) = inner.window.totals(now);
                let threshold = u64::from(self.settings.error_percent_threshold);
                if total >= self.settings.request_volume_threshold
                    && total > 0
                    && failures * 100 >= threshold * total
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(client = name, total, failures, "circuit opened");
                }
            }
            // Late outcome of a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
        #[cfg(not(feature = "tracing"))]
        let _ = name;
    }

    fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

/// In-process [`Breaker`] implementation.
#[derive(Clone)]
pub struct CircuitBreakers {
    circuits: Arc<DashMap<String, Arc<Circuit>>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreakers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("CircuitBreakers")
            .field("circuits", &names)
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Current state of `name`, or `None` if it was never used.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.circuits.get(name).map(|circuit| circuit.state())
    }

    pub fn settings(&self, name: &str) -> Option<BreakerSettings> {
        self.circuits
            .get(name)
            .map(|circuit| circuit.settings.clone())
    }

    fn circuit(&self, name: &str) -> Arc<Circuit> {
        if let Some(circuit) = self.circuits.get(name) {
            return Arc::clone(circuit.value());
        }
        Arc::clone(
            self.circuits
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Circuit::new(BreakerSettings::default())))
                .value(),
        )
    }
}

#[async_trait]
impl Breaker for CircuitBreakers {
    /// The first settings registered for a name win; later differing settings
    /// are ignored so clients sharing a name cannot reset each other's circuit.
    fn configure(&self, name: &str, settings: BreakerSettings) {
        match self.circuits.entry(name.to_owned()) {
            Entry::Occupied(existing) => {
                if existing.get().settings != settings {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        client = name,
                        "breaker already configured, keeping settings"
                    );
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Circuit::new(settings)));
            }
        }
    }

    async fn execute(&self, name: &str, call: CallFuture<'_>) -> Result<String> {
        let circuit = self.circuit(name);

        let _permit = Arc::clone(&circuit.permits)
            .try_acquire_owned()
            .map_err(|_| KitError::MaxConcurrency {
                name: name.to_owned(),
            })?;
        circuit.allow(name, self.clock.now())?;
        let outcome = Outcome {
            circuit: Arc::clone(&circuit),
            clock: Arc::clone(&self.clock),
            name,
            settled: false,
        };

        let result = match tokio::time::timeout(circuit.settings.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(KitError::BreakerTimeout {
                name: name.to_owned(),
                timeout_ms: u64::try_from(circuit.settings.timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
        };

        outcome.settle(result.is_ok());
        result
    }
}

/// Reports the outcome of an admitted call. A call dropped before it settles
/// counts as a failure, so a cancelled half-open probe re-opens the circuit.
struct Outcome<'a> {
    circuit: Arc<Circuit>,
    clock: Arc<dyn Clock>,
    name: &'a str,
    settled: bool,
}

impl Outcome<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.circuit.report(self.name, self.clock.now(), success);
    }
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.circuit.report(self.name, self.clock.now(), false);
        }
    }
}
