//! Client authentication check (token endpoint)

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::checks::EventContext;
use crate::types::{ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "client_authentication";

/// Risk of a token request without client credentials
pub const MISSING_CREDENTIALS_RISK: RiskScore = 80;

/// Require a `client_secret` or a usable `Basic` credential
pub fn check(
    client_secret: Option<&str>,
    authorization_header: Option<&str>,
    ctx: &EventContext<'_>,
) -> ValidationResult {
    let has_secret = client_secret.is_some_and(|s| !s.is_empty());
    let has_basic = authorization_header.and_then(basic_client_id).is_some();

    if has_secret || has_basic {
        return ValidationResult::pass();
    }

    ValidationResult::from_events(vec![ctx.event(
        SecurityEventType::InvalidClient,
        ThreatLevel::High,
        ResponseAction::Block,
        MISSING_CREDENTIALS_RISK,
        "Token request carries neither client_secret nor Basic credentials",
    )])
}

/// Client ID from a `Basic` header that decodes to `id:secret`
pub fn basic_client_id(header: &str) -> Option<String> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, _secret) = decoded.split_once(':')?;
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::context;

    fn basic(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[test]
    fn test_secret_or_basic_passes() {
        assert!(check(Some("s3cret"), None, &context()).valid);
        assert!(check(None, Some(&basic("c1:s3cret")), &context()).valid);
    }

    #[test]
    fn test_missing_credentials() {
        let result = check(None, None, &context());
        assert!(!result.valid);
        assert_eq!(result.risk_score, MISSING_CREDENTIALS_RISK);
        assert_eq!(result.events[0].event_type, SecurityEventType::InvalidClient);

        assert!(!check(Some(""), None, &context()).valid);
        assert!(!check(None, Some("Bearer abc.def.ghi"), &context()).valid);
        assert!(!check(None, Some("Basic !!not-base64!!"), &context()).valid);
        assert!(!check(None, Some(&basic("no-colon")), &context()).valid);
        assert!(!check(None, Some(&basic(":secret-only")), &context()).valid);
    }

    #[test]
    fn test_basic_client_id() {
        assert_eq!(basic_client_id(&basic("c1:pw")).as_deref(), Some("c1"));
        assert_eq!(basic_client_id(&basic("c1:pw:with:colons")).as_deref(), Some("c1"));
        assert_eq!(
            basic_client_id(&format!("basic {}", STANDARD.encode("c2:x"))).as_deref(),
            Some("c2")
        );
    }
}
