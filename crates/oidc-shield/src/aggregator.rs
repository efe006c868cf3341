//! Risk aggregation and the score-to-action mapping
//!
//! The aggregator is pure: given the same sequence of check results it always
//! produces the same decision. The engine feeds it one result at a time
//! through an [`Evaluation`] and stops feeding as soon as
//! [`Evaluation::should_stop`] says so.
//!
//! | Cumulative score | Action | Valid |
//! |------------------|--------|-------|
//! | `>= max_risk_score` | `BLOCK` | no |
//! | `>= 50` | `THROTTLE` | only when fail-open |
//! | `>= 25` | `MONITOR` | yes |
//! | `< 25` | `ALLOW` | yes |
//!
//! In fail-closed mode the first failing check also makes the decision
//! invalid, whatever the score; the action is then an audit annotation.

use uuid::Uuid;

use crate::types::{
    MAX_RISK_SCORE, ResponseAction, RiskScore, SecurityDecision, SecurityEvent, ValidationResult,
};

/// Score at or above which a request is throttled
pub const THROTTLE_THRESHOLD: RiskScore = 50;

/// Score at or above which a request is monitored
pub const MONITOR_THRESHOLD: RiskScore = 25;

/// Composes check results into a decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAggregator {
    block_threshold: f64,
    fail_closed: bool,
}

impl RiskAggregator {
    /// Create an aggregator with the given BLOCK cutoff
    pub fn new(block_threshold: f64, fail_closed: bool) -> Self {
        Self {
            block_threshold,
            fail_closed,
        }
    }

    /// Map a cumulative score to an action
    pub fn action_for(&self, score: RiskScore) -> ResponseAction {
        if f64::from(score) >= self.block_threshold {
            ResponseAction::Block
        } else if score >= THROTTLE_THRESHOLD {
            ResponseAction::Throttle
        } else if score >= MONITOR_THRESHOLD {
            ResponseAction::Monitor
        } else {
            ResponseAction::Allow
        }
    }

    /// Whether an action lets the request proceed
    pub fn permits(&self, action: ResponseAction) -> bool {
        match action {
            ResponseAction::Allow | ResponseAction::Monitor => true,
            ResponseAction::Throttle => !self.fail_closed,
            ResponseAction::Block | ResponseAction::EmergencyShutdown => false,
        }
    }

    /// Start a new evaluation
    pub fn begin(&self) -> Evaluation {
        Evaluation {
            aggregator: *self,
            events: Vec::new(),
            risk_score: 0,
            failed: false,
            checks_run: Vec::new(),
        }
    }

    /// Aggregate a complete list of results in one go
    pub fn aggregate<I>(&self, results: I, correlation_id: Uuid) -> SecurityDecision
    where
        I: IntoIterator<Item = (&'static str, ValidationResult)>,
    {
        let mut evaluation = self.begin();
        for (name, result) in results {
            if evaluation.should_stop() {
                break;
            }
            evaluation.record(name, result);
        }
        evaluation.finish(correlation_id)
    }

    /// Decision returned after the engine failed internally
    pub fn emergency_decision(
        event: SecurityEvent,
        checks_run: Vec<&'static str>,
        correlation_id: Uuid,
    ) -> SecurityDecision {
        SecurityDecision {
            valid: false,
            response_action: ResponseAction::EmergencyShutdown,
            events: vec![event],
            risk_score: MAX_RISK_SCORE,
            correlation_id,
            checks_run,
        }
    }
}

/// One in-progress evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    aggregator: RiskAggregator,
    events: Vec<SecurityEvent>,
    risk_score: RiskScore,
    failed: bool,
    checks_run: Vec<&'static str>,
}

impl Evaluation {
    /// Add one check result
    pub fn record(&mut self, name: &'static str, result: ValidationResult) {
        self.checks_run.push(name);
        self.risk_score = self
            .risk_score
            .saturating_add(result.risk_score)
            .min(MAX_RISK_SCORE);
        self.failed |= !result.valid;
        self.events.extend(result.events);
    }

    /// Whether no further checks should run
    pub fn should_stop(&self) -> bool {
        self.aggregator.fail_closed && self.failed
    }

    /// Cumulative score so far
    pub fn risk_score(&self) -> RiskScore {
        self.risk_score
    }

    /// Produce the decision
    pub fn finish(self, correlation_id: Uuid) -> SecurityDecision {
        let response_action = self.aggregator.action_for(self.risk_score);
        let valid = !self.should_stop() && self.aggregator.permits(response_action);
        SecurityDecision {
            valid,
            response_action,
            events: self.events,
            risk_score: self.risk_score,
            correlation_id,
            checks_run: self.checks_run,
        }
    }
}
