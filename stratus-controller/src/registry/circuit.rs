//! Delegation circuit breaker
//!
//! - Closed: delegations flow normally
//! - Open: the cluster failed `failure_threshold` consecutive delegations
//!   and is excluded from candidate lists
//! - HalfOpen: the cooldown elapsed, the next delegation is a trial
//!
//! Only one trial runs at a time: while it is in flight the circuit reads
//! as open to everyone else. A success closes the circuit; a failed trial
//! reopens it for another cooldown window. A trial whose result never
//! arrives expires after one cooldown.

use std::time::Instant;
use stratus_core::dto::cluster::CircuitState;

use crate::config::CircuitConfig;

#[derive(Debug, Clone, Default)]
pub struct Circuit {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

impl Circuit {
    pub fn state(&self, now: Instant, config: &CircuitConfig) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(opened) if now.duration_since(opened) >= config.cooldown => {
                if self.trial_in_flight(now, config) {
                    CircuitState::Open
                } else {
                    CircuitState::HalfOpen
                }
            }
            Some(_) => CircuitState::Open,
        }
    }

    fn trial_in_flight(&self, now: Instant, config: &CircuitConfig) -> bool {
        self.trial_started
            .is_some_and(|started| now.duration_since(started) < config.cooldown)
    }

    /// Claims the right to delegate; a half-open circuit grants it once
    pub fn try_begin(&mut self, now: Instant, config: &CircuitConfig) -> bool {
        match self.state(now, config) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                self.trial_started = Some(now);
                true
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_started = None;
    }

    pub fn record_failure(&mut self, now: Instant, config: &CircuitConfig) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.trial_started.take().is_some() {
            self.opened_at = Some(now);
            return;
        }
        match self.state(now, config) {
            CircuitState::Closed if self.consecutive_failures >= config.failure_threshold => {
                self.opened_at = Some(now);
            }
            CircuitState::HalfOpen => self.opened_at = Some(now),
            _ => {}
        }
    }
}
