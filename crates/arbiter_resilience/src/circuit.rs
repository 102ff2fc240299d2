//! Per-tool circuit breaker.
//!
//! Each tool gets its own breaker. Consecutive failures open the circuit;
//! after a cooling-off period a bounded number of probe calls are admitted
//! in half-open state, and consecutive probe successes close it again.

use arbiter_core::{CoreResult, ToolError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// A limited number of probe calls are admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Tunable thresholds for a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub reset_timeout: Duration,
    /// Probe calls admitted while half-open
    pub half_open_max_calls: u32,
    /// Latencies at or above this count as failures even on success
    pub timeout_threshold: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            timeout_threshold: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the consecutive-failure threshold
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the half-open success threshold
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state cooling period
    #[must_use]
    pub const fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the half-open probe budget
    #[must_use]
    pub const fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    /// Treat slow successes as failures
    #[must_use]
    pub const fn with_timeout_threshold(mut self, threshold: Duration) -> Self {
        self.timeout_threshold = Some(threshold);
        self
    }
}

/// Snapshot of one tool's breaker, for status reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    /// Tool the breaker guards
    pub tool: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures observed
    pub failure_count: u32,
    /// Consecutive half-open successes observed
    pub success_count: u32,
    /// Time remaining before the next probe is admitted, if open
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct ToolCircuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

impl ToolCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }
}

/// Tracks failure state per tool and gates admission
#[derive(Debug)]
pub struct CircuitBreaker {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    circuits: Mutex<HashMap<String, ToolCircuit>>,
}

impl CircuitBreaker {
    /// Create a breaker registry with the given default thresholds
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            default_config: config,
            overrides: HashMap::new(),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Override thresholds for one tool
    #[must_use]
    pub fn with_tool_config(mut self, tool: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(tool.into(), config);
        self
    }

    fn config_for(&self, tool: &str) -> &CircuitBreakerConfig {
        self.overrides.get(tool).unwrap_or(&self.default_config)
    }

    /// Check admission for a call to `tool`.
    ///
    /// Transitions Open -> HalfOpen when the reset timeout has elapsed and
    /// counts the probe against the half-open budget.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::CircuitOpen`] when the circuit rejects the call.
    pub fn check(&self, tool: &str) -> CoreResult<()> {
        let config = self.config_for(tool).clone();
        let mut circuits = lock(&self.circuits);
        let circuit = circuits
            .entry(tool.to_string())
            .or_insert_with(ToolCircuit::new);

        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
                if elapsed >= config.reset_timeout {
                    info!(tool, "circuit transitioning to half-open");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.success_count = 0;
                    circuit.half_open_in_flight = 1;
                    Ok(())
                } else {
                    Err(ToolError::CircuitOpen {
                        tool: tool.to_string(),
                        failure_count: circuit.failure_count,
                        retry_after_ms: Some(
                            config.reset_timeout.saturating_sub(elapsed).as_millis() as u64,
                        ),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_in_flight < config.half_open_max_calls {
                    circuit.half_open_in_flight += 1;
                    Ok(())
                } else {
                    Err(ToolError::CircuitOpen {
                        tool: tool.to_string(),
                        failure_count: circuit.failure_count,
                        retry_after_ms: None,
                    })
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, tool: &str) {
        let config = self.config_for(tool).clone();
        let mut circuits = lock(&self.circuits);
        let circuit = circuits
            .entry(tool.to_string())
            .or_insert_with(ToolCircuit::new);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                circuit.success_count += 1;
                if circuit.success_count >= config.success_threshold {
                    info!(tool, "circuit closed after successful probes");
                    *circuit = ToolCircuit::new();
                }
            }
            // Success racing an open circuit: ignore
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, tool: &str) {
        let config = self.config_for(tool).clone();
        let mut circuits = lock(&self.circuits);
        let circuit = circuits
            .entry(tool.to_string())
            .or_insert_with(ToolCircuit::new);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count >= config.failure_threshold {
                    warn!(
                        tool,
                        failures = circuit.failure_count,
                        "circuit opened"
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // One failed probe reopens the circuit
                warn!(tool, "probe failed, circuit reopened");
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.failure_count += 1;
                circuit.success_count = 0;
                circuit.half_open_in_flight = 0;
            }
            CircuitState::Open => {
                circuit.failure_count += 1;
            }
        }
    }

    /// Record a latency observation. When a timeout threshold is configured
    /// and the latency meets it, the call counts as a failure.
    pub fn record_latency(&self, tool: &str, latency: Duration) {
        let Some(threshold) = self.config_for(tool).timeout_threshold else {
            return;
        };
        if latency >= threshold {
            self.record_failure(tool);
        }
    }

    /// Current state for `tool` (Closed if never seen)
    #[must_use]
    pub fn state(&self, tool: &str) -> CircuitState {
        lock(&self.circuits)
            .get(tool)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Snapshot one tool's breaker
    #[must_use]
    pub fn status(&self, tool: &str) -> CircuitStatus {
        let config = self.config_for(tool);
        let circuits = lock(&self.circuits);
        match circuits.get(tool) {
            Some(circuit) => {
                let retry_after = (circuit.state == CircuitState::Open)
                    .then(|| {
                        circuit.opened_at.map(|t| {
                            config.reset_timeout.saturating_sub(t.elapsed())
                        })
                    })
                    .flatten();
                CircuitStatus {
                    tool: tool.to_string(),
                    state: circuit.state,
                    failure_count: circuit.failure_count,
                    success_count: circuit.success_count,
                    retry_after,
                }
            }
            None => CircuitStatus {
                tool: tool.to_string(),
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                retry_after: None,
            },
        }
    }

    /// Snapshot every known breaker
    #[must_use]
    pub fn all_statuses(&self) -> Vec<CircuitStatus> {
        let tools: Vec<String> = lock(&self.circuits).keys().cloned().collect();
        tools.iter().map(|t| self.status(t)).collect()
    }

    /// Force a tool's breaker back to closed
    pub fn reset(&self, tool: &str) {
        lock(&self.circuits).remove(tool);
    }

    /// Force every breaker back to closed
    pub fn reset_all(&self) {
        lock(&self.circuits).clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn lock(circuits: &Mutex<HashMap<String, ToolCircuit>>) -> std::sync::MutexGuard<'_, HashMap<String, ToolCircuit>> {
    circuits
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
