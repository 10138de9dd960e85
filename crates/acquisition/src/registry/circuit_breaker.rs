//! Per-source circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent cascading failures
//! when a source is experiencing issues. The circuit has three states:
//!
//! - **Closed**: Normal operation, calls are allowed through.
//! - **Open**: Source is failing, calls are rejected with `circuit-open`.
//! - **HalfOpen**: Recovery timeout elapsed; exactly one probe call is let through.
//!
//! Callers take a [`CircuitPermit`] before calling the source and report the
//! outcome through it. A permit dropped without an outcome (for example a
//! cancelled call) counts as nothing, and frees the probe slot.
//!
//! The circuit breaker is in-memory and resets on restart.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::source_map::SourceMap;
use crate::clock::{Clock, SystemClock};
use crate::errors::{ErrorKind, MarketDataError};

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait after the last failure before probing.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Source is failing - calls are rejected.
    Open,
    /// Testing recovery - one probe allowed.
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Internal circuit state for a single source.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Consecutive failures since the last success.
    failure_count: u32,
    /// Time of the last failure (for recovery timeout).
    last_failure: Option<Instant>,
    /// Whether the single HalfOpen probe is currently out.
    probe_in_flight: bool,
    config: CircuitBreakerConfig,
}

impl Circuit {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            probe_in_flight: false,
            config,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
        self.probe_in_flight = false;
    }
}

/// Point-in-time view of one circuit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub time_since_last_failure: Option<Duration>,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

/// Per-source circuit breaker.
///
/// Each source has its own circuit behind its own lock; state checks and
/// counter updates for one source are atomic with respect to each other.
pub struct CircuitBreaker {
    circuits: SourceMap<Circuit>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default(), Arc::new(SystemClock))
    }

    /// Create a circuit breaker with custom defaults and clock.
    pub fn with_config(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: SourceMap::new("Circuit breaker"),
            default_config: config,
            clock,
        }
    }

    /// Override the configuration of one source.
    pub fn configure(&self, source: &str, config: CircuitBreakerConfig) {
        let slot = self.circuits.entry(source, || Circuit::new(config));
        self.circuits.lock(&slot).config = config;
    }

    /// Ask to call `source`.
    ///
    /// Handles the Open -> HalfOpen transition once the recovery timeout has
    /// elapsed since the last failure. Rejections are not failures and do
    /// not touch the counters.
    pub fn try_acquire(&self, source: &str) -> Result<CircuitPermit<'_>, MarketDataError> {
        let slot = self
            .circuits
            .entry(source, || Circuit::new(self.default_config));
        let mut circuit = self.circuits.lock(&slot);

        let probe = match circuit.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    debug!("Circuit breaker: probe already in flight for '{}'", source);
                    return Err(MarketDataError::circuit_open(source));
                }
                circuit.probe_in_flight = true;
                true
            }
            CircuitState::Open => {
                let recovered = circuit.last_failure.map_or(true, |last| {
                    self.clock.now().saturating_duration_since(last)
                        >= circuit.config.recovery_timeout
                });
                if !recovered {
                    return Err(MarketDataError::circuit_open(source));
                }
                info!(
                    "Circuit breaker: transitioning '{}' from OPEN to HALF_OPEN",
                    source
                );
                circuit.state = CircuitState::HalfOpen;
                circuit.probe_in_flight = true;
                true
            }
        };

        Ok(CircuitPermit {
            breaker: self,
            source: source.to_string(),
            probe,
            settled: false,
        })
    }

    fn on_success(&self, source: &str, probe: bool) {
        let Some(slot) = self.circuits.get(source) else {
            return;
        };
        let mut circuit = self.circuits.lock(&slot);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
            }
            CircuitState::HalfOpen if probe => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful probe",
                    source
                );
                circuit.close();
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(
                    "Circuit breaker: stale success for '{}' in {}",
                    source, circuit.state
                );
            }
        }
    }

    fn on_failure(&self, source: &str, probe: bool) {
        let Some(slot) = self.circuits.get(source) else {
            return;
        };
        let mut circuit = self.circuits.lock(&slot);
        let now = self.clock.now();

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                circuit.last_failure = Some(now);
                if circuit.failure_count >= circuit.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        source, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        source, circuit.failure_count, circuit.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen if probe => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed probe",
                    source
                );
                circuit.failure_count += 1;
                circuit.last_failure = Some(now);
                circuit.state = CircuitState::Open;
                circuit.probe_in_flight = false;
            }
            CircuitState::HalfOpen => {
                // Only the probe decides the HalfOpen outcome
                debug!(
                    "Circuit breaker: stale failure for '{}' while probing",
                    source
                );
            }
            CircuitState::Open => {
                circuit.failure_count += 1;
                circuit.last_failure = Some(now);
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    source
                );
            }
        }
    }

    fn on_abandoned(&self, source: &str, probe: bool) {
        if !probe {
            return;
        }
        if let Some(slot) = self.circuits.get(source) {
            let mut circuit = self.circuits.lock(&slot);
            if circuit.state == CircuitState::HalfOpen {
                debug!("Circuit breaker: probe for '{}' abandoned", source);
                circuit.probe_in_flight = false;
            }
        }
    }

    /// Get the current state for a source.
    pub fn state(&self, source: &str) -> CircuitState {
        self.circuits
            .get(source)
            .map(|slot| self.circuits.lock(&slot).state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the consecutive failure count for a source.
    pub fn failure_count(&self, source: &str) -> u32 {
        self.circuits
            .get(source)
            .map(|slot| self.circuits.lock(&slot).failure_count)
            .unwrap_or(0)
    }

    pub fn snapshot(&self, source: &str) -> CircuitSnapshot {
        match self.circuits.get(source) {
            Some(slot) => self.describe(&self.circuits.lock(&slot)),
            None => self.describe(&Circuit::new(self.default_config)),
        }
    }

    /// Snapshots for every source that has been seen.
    pub fn snapshots(&self) -> Vec<(String, CircuitSnapshot)> {
        self.circuits
            .snapshot()
            .into_iter()
            .map(|(source, slot)| {
                let snapshot = self.describe(&self.circuits.lock(&slot));
                (source, snapshot)
            })
            .collect()
    }

    fn describe(&self, circuit: &Circuit) -> CircuitSnapshot {
        let now = self.clock.now();
        CircuitSnapshot {
            state: circuit.state,
            consecutive_failures: circuit.failure_count,
            time_since_last_failure: circuit
                .last_failure
                .map(|last| now.saturating_duration_since(last)),
            failure_threshold: circuit.config.failure_threshold,
            recovery_timeout: circuit.config.recovery_timeout,
        }
    }

    /// Reset the circuit for a source to Closed state.
    pub fn reset(&self, source: &str) {
        if let Some(slot) = self.circuits.get(source) {
            info!("Circuit breaker: manually resetting circuit for '{}'", source);
            self.circuits.lock(&slot).close();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Permission to make one call to a source.
///
/// Consumed by [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure).
#[must_use = "report the call outcome through the permit"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    source: String,
    probe: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this permit is the HalfOpen probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(&self.source, self.probe);
    }

    /// Record a failed call.
    ///
    /// Kinds that show the source answered (`not-found`, `validation`)
    /// count as successes.
    pub fn record_failure(mut self, kind: ErrorKind) {
        self.settled = true;
        if kind.is_source_fault() {
            self.breaker.on_failure(&self.source, self.probe);
        } else {
            self.breaker.on_success(&self.source, self.probe);
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(&self.source, self.probe);
        }
    }
}
