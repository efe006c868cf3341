//! Property-based tests for risk aggregation
//!
//! Uses proptest to verify invariants of:
//! - Determinism of the aggregator
//! - Score monotonicity and clamping
//! - Fail-closed short-circuiting
//! - Action bands

use chrono::{TimeZone, Utc};
use oidc_shield::checks::EventContext;
use oidc_shield::{
    MAX_RISK_SCORE, MONITOR_THRESHOLD, ResponseAction, RiskAggregator, SecurityEventType,
    THROTTLE_THRESHOLD, ThreatLevel, ValidationResult,
};
use proptest::prelude::*;
use uuid::Uuid;

const NAMES: [&str; 6] = ["rate_limit", "client", "redirect_uri", "nonce", "pkce_challenge", "scope"];

fn threat_level_strategy() -> impl Strategy<Value = ThreatLevel> {
    prop_oneof![
        Just(ThreatLevel::Low),
        Just(ThreatLevel::Medium),
        Just(ThreatLevel::High),
        Just(ThreatLevel::Critical),
    ]
}

/// Strategy for generating one check's result as (events, risk) pairs
fn result_strategy() -> impl Strategy<Value = Vec<(ThreatLevel, u32)>> {
    prop::collection::vec((threat_level_strategy(), 0u32..=100), 0..3)
}

fn build(signals: &[(ThreatLevel, u32)]) -> ValidationResult {
    let ctx = EventContext::new(
        Uuid::nil(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        "192.0.2.1",
        "authorize",
    );
    ValidationResult::from_events(
        signals
            .iter()
            .map(|&(level, risk)| {
                ctx.event(
                    SecurityEventType::SuspiciousClientBehavior,
                    level,
                    ResponseAction::Monitor,
                    risk,
                    "generated",
                )
            })
            .collect(),
    )
}

fn named(results: &[Vec<(ThreatLevel, u32)>]) -> Vec<(&'static str, ValidationResult)> {
    results
        .iter()
        .enumerate()
        .map(|(i, signals)| (NAMES[i % NAMES.len()], build(signals)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: identical check outputs yield identical decisions
    #[test]
    fn prop_aggregation_is_deterministic(
        results in prop::collection::vec(result_strategy(), 0..6),
        fail_closed in any::<bool>(),
        threshold in 50.0f64..=100.0,
    ) {
        let aggregator = RiskAggregator::new(threshold, fail_closed);
        let a = aggregator.aggregate(named(&results), Uuid::nil());
        let b = aggregator.aggregate(named(&results), Uuid::nil());

        prop_assert_eq!(a.valid, b.valid);
        prop_assert_eq!(a.risk_score, b.risk_score);
        prop_assert_eq!(a.response_action, b.response_action);
        prop_assert_eq!(&a.checks_run, &b.checks_run);
        prop_assert_eq!(a.event_types(), b.event_types());
    }

    /// Property: the score never decreases and never exceeds the maximum
    #[test]
    fn prop_score_monotone_and_bounded(results in prop::collection::vec(result_strategy(), 0..6)) {
        let mut evaluation = RiskAggregator::new(80.0, false).begin();
        let mut previous = 0;
        for (name, result) in named(&results) {
            evaluation.record(name, result);
            prop_assert!(evaluation.risk_score() >= previous);
            prop_assert!(evaluation.risk_score() <= MAX_RISK_SCORE);
            previous = evaluation.risk_score();
        }
    }

    /// Property: fail-closed runs no check after the first failure
    #[test]
    fn prop_fail_closed_stops_at_first_failure(results in prop::collection::vec(result_strategy(), 1..6)) {
        let inputs = named(&results);
        let first_failure = inputs.iter().position(|(_, r)| !r.valid);

        let decision = RiskAggregator::new(80.0, true).aggregate(inputs, Uuid::nil());

        match first_failure {
            Some(index) => {
                prop_assert!(!decision.valid);
                prop_assert_eq!(decision.checks_run.len(), index + 1);
            }
            None => prop_assert_eq!(decision.checks_run.len(), results.len()),
        }
    }

    /// Property: the action depends on the score alone
    #[test]
    fn prop_action_bands(score in 0u32..=100, fail_closed in any::<bool>()) {
        let aggregator = RiskAggregator::new(80.0, fail_closed);
        let action = aggregator.action_for(score);
        let expected = if score >= 80 {
            ResponseAction::Block
        } else if score >= THROTTLE_THRESHOLD {
            ResponseAction::Throttle
        } else if score >= MONITOR_THRESHOLD {
            ResponseAction::Monitor
        } else {
            ResponseAction::Allow
        };
        prop_assert_eq!(action, expected);
    }
}
