//! Per-service circuit breakers.
//!
//! A breaker starts closed. After `threshold` consecutive failures it opens and
//! refuses every call until `cool_off` has elapsed, then lets a single trial call
//! through (half-open). A successful trial closes the circuit again; a failed one
//! reopens it for another full cool-off period.

use crate::config::CircuitBreakerConfig;
use crate::error::{AgentError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    threshold: usize,
    cool_off: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, threshold: usize, cool_off: Duration) -> Self {
        Self {
            service: service.into(),
            threshold: threshold.max(1),
            cool_off,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn from_config(service: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(service, config.threshold, config.cool_off())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooled_off(&self, inner: &BreakerState) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.cool_off)
            .unwrap_or(true)
    }

    /// Current state. An open circuit whose cool-off has elapsed reports `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.cooled_off(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Ask permission to make a call.
    ///
    /// Returns [`AgentError::CircuitOpen`] while the circuit is open, or while a
    /// half-open trial call is already in flight. The outcome of the call should
    /// be reported through the returned [`CircuitPermit`]. A trial permit dropped
    /// without an outcome frees the trial slot for the next caller.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.cooled_off(&inner) {
                    return Err(self.open_error());
                }
                info!(service = %self.service, "Circuit half-open, allowing trial call");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.open_error());
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Ok(CircuitPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            debug!(service = %self.service, "Trial call abandoned, releasing trial slot");
            inner.trial_in_flight = false;
        }
    }

    fn open_error(&self) -> AgentError {
        AgentError::CircuitOpen {
            service: self.service.clone(),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(service = %self.service, "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Record a failed call. Returns `true` when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(service = %self.service, "Trial call failed, circuit reopened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                true
            }
            CircuitState::Open => false,
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    warn!(
                        service = %self.service,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.lock().consecutive_failures
    }

    /// Time remaining until an open circuit admits a trial call
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => {
                let remaining = self.cool_off.saturating_sub(at.elapsed());
                (!remaining.is_zero()).then_some(remaining)
            }
            _ => None,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
#[must_use = "a permit should report the outcome of its call"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this is the single trial call of a half-open circuit
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Returns `true` when this failure opened the circuit.
    pub fn failure(mut self) -> bool {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// Breakers keyed by service name, created on first use.
///
/// Every model talking to the same service shares one breaker.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::from_config(service, &self.config)))
            .clone()
    }

    /// Snapshot of every known breaker's state, sorted by service name
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(service, breaker)| (service.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
