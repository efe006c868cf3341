//! Scope check

use std::collections::BTreeSet;

use crate::checks::EventContext;
use crate::types::{ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "scope";

/// Risk of a missing scope
pub const MISSING_SCOPE_RISK: RiskScore = 20;

/// Risk of a scope without `openid`
pub const MISSING_OPENID_RISK: RiskScore = 10;

/// Risk of a scope with more than [`MAX_SCOPE_TOKENS`] distinct tokens
pub const EXCESSIVE_SCOPE_RISK: RiskScore = 25;

/// Distinct scope tokens tolerated before a request is considered excessive
pub const MAX_SCOPE_TOKENS: usize = 10;

/// Score the requested scope
pub fn check(scope: Option<&str>, ctx: &EventContext<'_>) -> ValidationResult {
    let tokens: BTreeSet<&str> = scope.unwrap_or_default().split_whitespace().collect();

    if tokens.is_empty() {
        return ValidationResult::from_events(vec![ctx.event(
            SecurityEventType::InvalidScope,
            ThreatLevel::Medium,
            ResponseAction::Monitor,
            MISSING_SCOPE_RISK,
            "Request has no scope",
        )]);
    }

    let mut events = Vec::new();

    if !tokens.contains("openid") {
        events.push(ctx.event(
            SecurityEventType::InvalidScope,
            ThreatLevel::Low,
            ResponseAction::Allow,
            MISSING_OPENID_RISK,
            "Scope does not include 'openid'",
        ));
    }

    if tokens.len() > MAX_SCOPE_TOKENS {
        events.push(ctx.event(
            SecurityEventType::ExcessiveScopeRequest,
            ThreatLevel::Medium,
            ResponseAction::Monitor,
            EXCESSIVE_SCOPE_RISK,
            format!(
                "Scope requests {} distinct values, more than {MAX_SCOPE_TOKENS}",
                tokens.len()
            ),
        ));
    }

    ValidationResult::from_events(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::context;

    #[test]
    fn test_openid_scope_passes() {
        let result = check(Some("openid profile email"), &context());
        assert!(result.valid);
        assert_eq!(result.risk_score, 0);
    }

    #[test]
    fn test_missing_scope() {
        for scope in [None, Some(""), Some("   ")] {
            let result = check(scope, &context());
            assert!(result.valid);
            assert_eq!(result.risk_score, MISSING_SCOPE_RISK);
        }
    }

    #[test]
    fn test_missing_openid_is_informational() {
        let result = check(Some("profile"), &context());
        assert!(result.valid);
        assert_eq!(result.risk_score, MISSING_OPENID_RISK);
        assert_eq!(result.events[0].threat_level, ThreatLevel::Low);
    }

    #[test]
    fn test_excessive_scope_counts_distinct_tokens() {
        let eleven = (0..10).map(|i| format!("s{i}")).collect::<Vec<_>>().join(" ");
        let result = check(Some(&format!("openid {eleven}")), &context());
        assert_eq!(result.risk_score, EXCESSIVE_SCOPE_RISK);
        assert_eq!(
            result.event_types(),
            vec![SecurityEventType::ExcessiveScopeRequest]
        );

        let repeated = "openid profile ".repeat(20);
        assert_eq!(check(Some(&repeated), &context()).risk_score, 0);
    }
}
