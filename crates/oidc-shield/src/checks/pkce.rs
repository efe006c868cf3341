//! PKCE checks (RFC 7636)
//!
//! At the authorization endpoint the challenge is scored but never rejected on
//! its own. At the token endpoint a malformed verifier is a hard failure.

use crate::checks::EventContext;
use crate::types::{ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult};

/// Challenge check name reported in decisions
pub const CHALLENGE_NAME: &str = "pkce_challenge";

/// Verifier check name reported in decisions
pub const VERIFIER_NAME: &str = "pkce_verifier";

/// Risk of an authorization request without `code_challenge`
pub const MISSING_CHALLENGE_RISK: RiskScore = 30;

/// Risk of the `plain` method (or any method other than S256)
pub const WEAK_METHOD_RISK: RiskScore = 20;

/// Risk of a challenge shorter than [`MIN_LENGTH`]
pub const SHORT_CHALLENGE_RISK: RiskScore = 25;

/// Risk of a verifier outside the RFC 7636 bounds
pub const INVALID_VERIFIER_RISK: RiskScore = 75;

/// Minimum challenge and verifier length
pub const MIN_LENGTH: usize = 43;

/// Maximum verifier length
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Score the `code_challenge` of an authorization request
///
/// A missing method means S256.
pub fn check_challenge(
    challenge: Option<&str>,
    method: Option<&str>,
    ctx: &EventContext<'_>,
) -> ValidationResult {
    let violation = |risk, description: String| {
        ctx.event(
            SecurityEventType::PkceViolation,
            ThreatLevel::Medium,
            ResponseAction::Monitor,
            risk,
            description,
        )
    };

    let Some(challenge) = challenge.filter(|c| !c.is_empty()) else {
        return ValidationResult::from_events(vec![violation(
            MISSING_CHALLENGE_RISK,
            "Authorization request has no PKCE code_challenge".to_string(),
        )]);
    };

    let mut events = Vec::new();

    match method.unwrap_or("S256") {
        "S256" => {}
        "plain" => events.push(violation(
            WEAK_METHOD_RISK,
            "PKCE method 'plain' offers no interception protection".to_string(),
        )),
        other => events.push(violation(
            WEAK_METHOD_RISK,
            format!("Unsupported PKCE method '{other}'"),
        )),
    }

    if challenge.len() < MIN_LENGTH {
        events.push(violation(
            SHORT_CHALLENGE_RISK,
            format!(
                "PKCE code_challenge is {} characters, expected at least {MIN_LENGTH}",
                challenge.len()
            ),
        ));
    }

    ValidationResult::from_events(events)
}

/// Validate the `code_verifier` of a token request
///
/// Requests without a verifier are not checked.
pub fn check_verifier(verifier: Option<&str>, ctx: &EventContext<'_>) -> ValidationResult {
    let Some(verifier) = verifier else {
        return ValidationResult::pass();
    };

    let description = if !(MIN_LENGTH..=MAX_VERIFIER_LENGTH).contains(&verifier.len()) {
        format!(
            "PKCE code_verifier is {} characters, must be {MIN_LENGTH}-{MAX_VERIFIER_LENGTH}",
            verifier.len()
        )
    } else if !verifier.bytes().all(is_unreserved) {
        "PKCE code_verifier contains characters outside the unreserved set".to_string()
    } else {
        return ValidationResult::pass();
    };

    ValidationResult::from_events(vec![ctx.event(
        SecurityEventType::PkceViolation,
        ThreatLevel::High,
        ResponseAction::Block,
        INVALID_VERIFIER_RISK,
        description,
    )])
}

/// `ALPHA / DIGIT / "-" / "." / "_" / "~"`
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::context;

    const S256_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cME";

    #[test]
    fn test_strong_challenge_passes() {
        let result = check_challenge(Some(S256_CHALLENGE), Some("S256"), &context());
        assert!(result.valid);
        assert_eq!(result.risk_score, 0);

        let result = check_challenge(Some(S256_CHALLENGE), None, &context());
        assert_eq!(result.risk_score, 0);
    }

    #[test]
    fn test_challenge_scoring() {
        let result = check_challenge(None, None, &context());
        assert!(result.valid);
        assert_eq!(result.risk_score, MISSING_CHALLENGE_RISK);

        let result = check_challenge(Some(S256_CHALLENGE), Some("plain"), &context());
        assert!(result.valid);
        assert_eq!(result.risk_score, WEAK_METHOD_RISK);

        let result = check_challenge(Some("short"), Some("S256"), &context());
        assert_eq!(result.risk_score, SHORT_CHALLENGE_RISK);

        let result = check_challenge(Some("short"), Some("plain"), &context());
        assert_eq!(result.risk_score, WEAK_METHOD_RISK + SHORT_CHALLENGE_RISK);
        assert_eq!(result.events.len(), 2);

        let result = check_challenge(Some(S256_CHALLENGE), Some("S512"), &context());
        assert!(result.events[0].description.contains("Unsupported"));
    }

    #[test]
    fn test_verifier_length_bounds() {
        for (len, valid) in [(42, false), (43, true), (128, true), (129, false)] {
            let verifier = "a".repeat(len);
            let result = check_verifier(Some(&verifier), &context());
            assert_eq!(result.valid, valid, "verifier length {len}");
            if !valid {
                assert_eq!(result.risk_score, INVALID_VERIFIER_RISK);
            }
        }
    }

    #[test]
    fn test_verifier_charset() {
        let verifier = format!("{}+/", "a".repeat(50));
        let result = check_verifier(Some(&verifier), &context());
        assert!(!result.valid);

        let verifier = format!("{}-._~", "Z9".repeat(25));
        assert!(check_verifier(Some(&verifier), &context()).valid);
    }

    #[test]
    fn test_absent_verifier_is_skipped() {
        assert!(check_verifier(None, &context()).valid);
    }
}
