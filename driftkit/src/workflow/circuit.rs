//! Per-step circuit breaker, scoped across runs by (workflow_id, step_id).
//!
//! Consecutive failures inside a rolling window open the breaker; an open
//! breaker short-circuits invocations with `CircuitOpen` until the cooldown
//! elapses, then admits a single half-open probe. Probe success closes the
//! breaker; probe failure re-opens it with a fresh timestamp. A cooldown of
//! zero disables the breaker entirely.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker tuning. `cooldown == 0` disables breaking.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker short-circuits before allowing a probe.
    pub cooldown: Duration,
    /// Rolling window; failures older than this no longer count as
    /// consecutive.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Disabled breaker (cooldown zero).
    pub fn disabled() -> Self {
        Self {
            cooldown: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.cooldown.is_zero()
    }
}

/// Persistable snapshot of one breaker cell, keyed by (workflow_id, step_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub workflow_id: String,
    pub step_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub window_started_at: Option<DateTime<Utc>>,
}

impl BreakerSnapshot {
    fn closed(workflow_id: &str, step_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            last_probe_at: None,
            window_started_at: None,
        }
    }
}

/// In-process breaker registry for all (workflow_id, step_id) pairs sharing
/// one configuration. Snapshots go to the retry state store on transitions.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    cells: DashMap<(String, String), BreakerSnapshot>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            cells: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether an invocation of the step may proceed. An open breaker past
    /// its cooldown transitions to half-open and admits one probe.
    pub fn allow(&self, workflow_id: &str, step_id: &str) -> bool {
        if !self.config.is_enabled() {
            return true;
        }
        let key = (workflow_id.to_string(), step_id.to_string());
        let mut cell = self
            .cells
            .entry(key)
            .or_insert_with(|| BreakerSnapshot::closed(workflow_id, step_id));
        let now = Utc::now();
        match cell.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = cell
                    .opened_at
                    .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default())
                    .unwrap_or_default();
                if elapsed >= self.config.cooldown {
                    cell.state = CircuitState::HalfOpen;
                    cell.last_probe_at = Some(now);
                    tracing::debug!(
                        workflow_id,
                        step_id,
                        "circuit breaker half-open, admitting probe"
                    );
                    true
                } else {
                    false
                }
            }
            // One probe at a time: the probe slot was taken when the breaker
            // moved to half-open; further callers wait for its verdict.
            CircuitState::HalfOpen => false,
        }
    }

    /// Records a successful invocation; closes the breaker.
    pub fn record_success(&self, workflow_id: &str, step_id: &str) {
        if !self.config.is_enabled() {
            return;
        }
        let key = (workflow_id.to_string(), step_id.to_string());
        if let Some(mut cell) = self.cells.get_mut(&key) {
            if cell.state != CircuitState::Closed || cell.failure_count > 0 {
                tracing::debug!(workflow_id, step_id, "circuit breaker closed");
            }
            cell.state = CircuitState::Closed;
            cell.failure_count = 0;
            cell.opened_at = None;
            cell.window_started_at = None;
        }
    }

    /// Records a failed invocation; may open (or re-open) the breaker.
    pub fn record_failure(&self, workflow_id: &str, step_id: &str) {
        if !self.config.is_enabled() {
            return;
        }
        let key = (workflow_id.to_string(), step_id.to_string());
        let mut cell = self
            .cells
            .entry(key)
            .or_insert_with(|| BreakerSnapshot::closed(workflow_id, step_id));
        let now = Utc::now();
        match cell.state {
            CircuitState::Closed => {
                let window_expired = cell
                    .window_started_at
                    .map(|t| {
                        now.signed_duration_since(t).to_std().unwrap_or_default()
                            > self.config.window
                    })
                    .unwrap_or(true);
                if window_expired {
                    cell.window_started_at = Some(now);
                    cell.failure_count = 0;
                }
                cell.failure_count += 1;
                if cell.failure_count >= self.config.failure_threshold {
                    cell.state = CircuitState::Open;
                    cell.opened_at = Some(now);
                    tracing::warn!(workflow_id, step_id, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                cell.state = CircuitState::Open;
                cell.opened_at = Some(now);
                tracing::warn!(workflow_id, step_id, "probe failed, circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Current snapshot for persistence, if the cell exists.
    pub fn snapshot(&self, workflow_id: &str, step_id: &str) -> Option<BreakerSnapshot> {
        self.cells
            .get(&(workflow_id.to_string(), step_id.to_string()))
            .map(|c| c.clone())
    }

    /// Restores a persisted snapshot (startup).
    pub fn restore(&self, snapshot: BreakerSnapshot) {
        self.cells.insert(
            (snapshot.workflow_id.clone(), snapshot.step_id.clone()),
            snapshot,
        );
    }
}
