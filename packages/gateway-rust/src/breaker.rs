//! Circuit breaker guarding calls to a remote dependency.
//!
//! # States
//! - Closed: calls pass through; outcomes are counted per `interval` window
//! - Open: calls fail fast with [`BreakerError::Open`]
//! - Half-Open: at most `max_requests` probes are admitted
//!
//! # State Transitions
//! ```text
//! Closed    -> Open:      consecutive failures >= failure_threshold
//! Open      -> Half-Open: timeout elapsed since opening
//! Half-Open -> Closed:    max_requests consecutive successes
//! Half-Open -> Open:      any probe failure
//! ```
//!
//! Errors are classified by the caller (see [`ErrorClass`]). An error that
//! says nothing about the dependency settles like a dropped call: it never
//! touches the closed-state streak and re-opens a half-open circuit.
//!
//! Every transition starts a new generation. Outcomes reported for an older
//! generation are discarded, so a slow call admitted before a transition
//! cannot influence the new state.

use std::future::Future;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::BreakerError;

/// Current position in the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Request and outcome counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// How a guarded call's `Err` is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The dependency is at fault.
    Failure,
    /// The dependency answered; the error concerns the request itself.
    Success,
    /// No verdict on the dependency, e.g. the caller went away.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// The admitted call ended without a verdict: dropped mid-flight or
    /// classified [`ErrorClass::Ignore`].
    Abandoned,
}

impl From<ErrorClass> for Outcome {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Failure => Self::Failure,
            ErrorClass::Success => Self::Success,
            ErrorClass::Ignore => Self::Abandoned,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// End of the current closed-state window or open-state timeout.
    expiry: Option<Instant>,
}

/// Generic fault-tolerance wrapper, independent of the protected protocol.
///
/// All state lives behind one internal lock; callers never synchronize
/// externally. Shared as `Arc<CircuitBreaker>`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Builds a breaker, or `None` when the config disables it.
    ///
    /// `max_requests == 0` is treated as 1.
    #[must_use]
    pub fn from_config(config: CircuitBreakerConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(config))
    }

    /// Builds an enabled breaker regardless of `config.enabled`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let config = config.normalized();
        let now = Instant::now();
        let breaker = Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: closed_expiry(&config, now),
            }),
            config,
        };
        breaker.export_state(CircuitState::Closed);
        breaker
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, applying any time-based transition that is due.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now())
    }

    /// Counters of the current generation.
    #[must_use]
    pub fn counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    /// Runs `op` if the breaker admits it, counting every `Err` as a failure.
    ///
    /// # Errors
    ///
    /// Returns the rejection converted into `E` when the breaker is open or
    /// the half-open probe quota is used up, or `op`'s own error.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
    {
        self.execute_with(op, |_| ErrorClass::Failure).await
    }

    /// Like [`execute`](Self::execute), with each `Err` counted as `classify`
    /// decides.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_with<T, E, F, Fut, P>(&self, op: F, classify: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
        P: Fn(&E) -> ErrorClass,
    {
        let generation = self.before_request().map_err(E::from)?;
        let mut guard = AdmissionGuard {
            breaker: self,
            generation,
            settled: false,
        };

        let result = op().await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(err) => Outcome::from(classify(err)),
        };
        guard.settle(outcome);
        result
    }

    fn before_request(&self) -> Result<u64, BreakerError> {
        let mut inner = self.inner.lock();
        let state = self.current_state(&mut inner, Instant::now());

        match state {
            CircuitState::Open => {
                self.record_rejection("open");
                return Err(BreakerError::Open);
            }
            CircuitState::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                self.record_rejection("too_many_requests");
                return Err(BreakerError::TooManyRequests);
            }
            CircuitState::HalfOpen | CircuitState::Closed => {}
        }

        inner.counts.on_request();
        Ok(inner.generation)
    }

    fn after_request(&self, generation: u64, outcome: Outcome) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        match (state, outcome) {
            (CircuitState::Closed, Outcome::Success) => inner.counts.on_success(),
            (CircuitState::Closed, Outcome::Failure) => {
                inner.counts.on_failure();
                if inner.counts.consecutive_failures >= self.config.failure_threshold.max(1) {
                    self.set_state(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_requests {
                    self.set_state(&mut inner, CircuitState::Closed, now);
                }
            }
            // A probe without a verdict cannot close the circuit, and keeping its
            // slot would wedge the half-open state.
            (CircuitState::HalfOpen, Outcome::Failure | Outcome::Abandoned) => {
                self.set_state(&mut inner, CircuitState::Open, now);
            }
            (CircuitState::Closed, Outcome::Abandoned) | (CircuitState::Open, _) => {}
        }
    }

    fn current_state(&self, inner: &mut BreakerState, now: Instant) -> CircuitState {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let from = inner.state;
        inner.state = state;
        self.new_generation(inner, now);

        match state {
            CircuitState::Open => tracing::warn!(
                breaker = %self.config.name,
                from = from.as_str(),
                timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                "circuit breaker opened"
            ),
            CircuitState::HalfOpen | CircuitState::Closed => tracing::info!(
                breaker = %self.config.name,
                from = from.as_str(),
                to = state.as_str(),
                "circuit breaker state changed"
            ),
        }
        self.export_state(state);
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => closed_expiry(&self.config, now),
            CircuitState::Open => Some(now + self.config.timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn export_state(&self, state: CircuitState) {
        metrics::gauge!("gateway_circuit_state", "breaker" => self.config.name.clone())
            .set(state.gauge_value());
    }

    fn record_rejection(&self, reason: &'static str) {
        metrics::counter!(
            "gateway_circuit_rejections_total",
            "breaker" => self.config.name.clone(),
            "reason" => reason
        )
        .increment(1);
    }
}

fn closed_expiry(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    if config.interval.is_zero() {
        None
    } else {
        Some(now + config.interval)
    }
}

/// Reports an admitted call's outcome exactly once, including when the
/// calling future is dropped mid-flight.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl AdmissionGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.after_request(self.generation, outcome);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_request(self.generation, Outcome::Abandoned);
        }
    }
}

/// Runs `op` through `breaker` when present, or calls it directly otherwise.
///
/// With `None` the result is exactly `op().await`.
///
/// # Errors
///
/// See [`CircuitBreaker::execute_with`].
pub async fn guarded<T, E, F, Fut, P>(
    breaker: Option<&CircuitBreaker>,
    op: F,
    classify: P,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<BreakerError>,
    P: Fn(&E) -> ErrorClass,
{
    match breaker {
        Some(breaker) => breaker.execute_with(op, classify).await,
        None => op().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
