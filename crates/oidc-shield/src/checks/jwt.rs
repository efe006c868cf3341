//! JWT algorithm and key checks
//!
//! Token inspection happens in two strictly separated stages:
//!
//! 1. [`UntrustedHeader::from_token`] decodes the header only. The payload
//!    and the segment count are never looked at before the algorithm policy,
//!    so neither a forged claim set nor a mangled token can soften the
//!    outcome of [`check`] for a forbidden algorithm.
//! 2. [`UntrustedJwt::verify`] re-applies the algorithm policy and verifies
//!    the signature with `jsonwebtoken`. It is the only way to obtain a
//!    [`VerifiedClaims`] value.
//!
//! ```rust
//! use oidc_shield::ShieldConfig;
//! use oidc_shield::checks::jwt::UntrustedJwt;
//!
//! // {"alg":"none","typ":"JWT"}
//! let jwt = UntrustedJwt::parse("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.e30.")?;
//! assert_eq!(jwt.header().alg.as_deref(), Some("none"));
//! assert!(ShieldConfig::default().is_forbidden_algorithm("none"));
//! # Ok::<(), oidc_shield::ShieldError>(())
//! ```

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::checks::EventContext;
use crate::config::ShieldConfig;
use crate::error::{ShieldError, ShieldResult};
use crate::types::{
    MAX_RISK_SCORE, ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult,
};

/// Check name reported in decisions
pub const NAME: &str = "jwt";

/// Risk of an algorithm outside the allowed set, a missing algorithm, or an
/// undecodable header
pub const DISALLOWED_ALGORITHM_RISK: RiskScore = 85;

/// Risk of a header without `kid`
pub const MISSING_KID_RISK: RiskScore = 25;

/// Header fields read before any verification
///
/// Values are attacker-controlled until [`UntrustedJwt::verify`] succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UntrustedHeader {
    /// Declared signing algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
    /// Token type
    #[serde(default)]
    pub typ: Option<String>,
}

impl UntrustedHeader {
    /// Decode the first segment of a token, whatever follows it
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::MalformedToken`] if the segment is not
    /// base64url-encoded JSON.
    pub fn from_token(token: &str) -> ShieldResult<Self> {
        let segment = token.split_once('.').map_or(token, |(header, _)| header);
        let bytes = URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|e| ShieldError::MalformedToken(format!("header is not base64url: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ShieldError::MalformedToken(format!("header is not a JSON object: {e}")))
    }
}

fn check_structure(token: &str) -> ShieldResult<()> {
    if token.split('.').count() == 3 {
        Ok(())
    } else {
        Err(ShieldError::MalformedToken(
            "expected three dot-separated segments".to_string(),
        ))
    }
}

/// A compact JWS whose header has been decoded but whose signature has not
/// been checked
#[derive(Debug, Clone)]
pub struct UntrustedJwt<'a> {
    raw: &'a str,
    header: UntrustedHeader,
}

/// Claims whose signature has been verified
///
/// Only [`UntrustedJwt::verify`] constructs this type.
#[derive(Debug, Clone)]
pub struct VerifiedClaims<C> {
    header: Header,
    claims: C,
}

impl<C> VerifiedClaims<C> {
    /// Verified header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Verified claims
    pub fn claims(&self) -> &C {
        &self.claims
    }

    /// Take the verified claims
    pub fn into_claims(self) -> C {
        self.claims
    }
}

impl<'a> UntrustedJwt<'a> {
    /// Decode the header of a compact JWS
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::MalformedToken`] if the token does not have three
    /// segments or the header is not base64url-encoded JSON.
    pub fn parse(token: &'a str) -> ShieldResult<Self> {
        check_structure(token)?;
        let header = UntrustedHeader::from_token(token)?;
        Ok(Self { raw: token, header })
    }

    /// Decoded, untrusted header
    pub fn header(&self) -> &UntrustedHeader {
        &self.header
    }

    /// Verify the signature and decode the claims
    ///
    /// The header algorithm must pass the configured policy, and `validation`
    /// is pinned to that single algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::AlgorithmRejected`] if the algorithm is missing,
    /// forbidden, not allowed or unknown, and
    /// [`ShieldError::SignatureVerification`] if `jsonwebtoken` rejects the
    /// token.
    pub fn verify<C>(
        &self,
        key: &DecodingKey,
        config: &ShieldConfig,
        mut validation: Validation,
    ) -> ShieldResult<VerifiedClaims<C>>
    where
        C: DeserializeOwned + Clone,
    {
        let alg = self
            .header
            .alg
            .as_deref()
            .ok_or_else(|| ShieldError::AlgorithmRejected("missing alg".to_string()))?;

        if config.is_forbidden_algorithm(alg) || !config.is_allowed_algorithm(alg) {
            return Err(ShieldError::AlgorithmRejected(alg.to_string()));
        }

        let algorithm = Algorithm::from_str(alg)
            .map_err(|_| ShieldError::AlgorithmRejected(format!("unknown algorithm {alg}")))?;
        validation.algorithms = vec![algorithm];

        let data = decode::<C>(self.raw, key, &validation)?;
        debug!(alg, kid = ?data.header.kid, "JWT signature verified");

        Ok(VerifiedClaims {
            header: data.header,
            claims: data.claims,
        })
    }
}

/// Inspect the token header against the algorithm policy
///
/// A forbidden algorithm is CRITICAL and ends the check. A missing `kid` only
/// adds monitoring risk.
pub fn check(
    token: &str,
    expected_alg: Option<&str>,
    config: &ShieldConfig,
    ctx: &EventContext<'_>,
) -> ValidationResult {
    let violation = |level: ThreatLevel,
                     response: ResponseAction,
                     risk: RiskScore,
                     description: String| {
        ctx.event(
            SecurityEventType::JwtSecurityViolation,
            level,
            response,
            risk,
            description,
        )
    };
    let reject = |description: String| {
        ValidationResult::from_events(vec![violation(
            ThreatLevel::High,
            ResponseAction::Block,
            DISALLOWED_ALGORITHM_RISK,
            description,
        )])
    };

    let header = match UntrustedHeader::from_token(token) {
        Ok(header) => header,
        Err(e) => return reject(e.to_string()),
    };

    let Some(alg) = header.alg.as_deref() else {
        return reject("JWT header has no alg".to_string());
    };

    if config.is_forbidden_algorithm(alg) {
        warn!(alg, "Forbidden JWT algorithm presented");
        return ValidationResult::from_events(vec![violation(
            ThreatLevel::Critical,
            ResponseAction::Block,
            MAX_RISK_SCORE,
            format!("JWT algorithm '{alg}' is forbidden"),
        )]);
    }

    if !config.is_allowed_algorithm(alg) {
        return reject(format!("JWT algorithm '{alg}' is not allowed"));
    }

    if let Some(expected) = expected_alg.filter(|&expected| expected != alg) {
        return reject(format!("JWT algorithm '{alg}' does not match expected '{expected}'"));
    }

    if let Err(e) = check_structure(token) {
        return reject(e.to_string());
    }

    if header.kid.as_deref().is_none_or(str::is_empty) {
        return ValidationResult::from_events(vec![violation(
            ThreatLevel::Medium,
            ResponseAction::Monitor,
            MISSING_KID_RISK,
            "JWT header has no kid".to_string(),
        )]);
    }

    ValidationResult::pass()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::context;
    use jsonwebtoken::{EncodingKey, encode};
    use serde::Serialize;
    use serde_json::json;

    fn token(header: serde_json::Value, payload: serde_json::Value) -> String {
        format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    fn run(token: &str, expected: Option<&str>) -> ValidationResult {
        check(token, expected, &ShieldConfig::default(), &context())
    }

    #[test]
    fn test_allowed_algorithm_with_kid_passes() {
        let result = run(&token(json!({"alg": "RS256", "kid": "k1"}), json!({})), None);
        assert!(result.valid);
        assert_eq!(result.risk_score, 0);

        let result = run(
            &token(json!({"alg": "ES256", "kid": "k1"}), json!({})),
            Some("ES256"),
        );
        assert!(result.valid);
    }

    #[test]
    fn test_forbidden_algorithms_ignore_payload() {
        let forged = json!({"iss": "https://trusted.example", "sub": "admin", "exp": 9999999999u64});
        for alg in ["none", "None", "NONE", "HS256"] {
            let result = run(&token(json!({"alg": alg, "kid": "k1"}), forged.clone()), None);
            assert!(!result.valid, "alg {alg}");
            assert_eq!(result.risk_score, MAX_RISK_SCORE);
            assert_eq!(result.events.len(), 1);
            assert_eq!(result.events[0].threat_level, ThreatLevel::Critical);
        }
    }

    #[test]
    fn test_forbidden_algorithm_ignores_segment_count() {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none", "kid": "k1"}).to_string());
        for token in [
            header.clone(),
            format!("{header}.e30"),
            format!("{header}.e30.c2ln.ZXh0cmE"),
            format!("{header}...."),
        ] {
            let result = run(&token, None);
            assert!(!result.valid, "token {token}");
            assert_eq!(result.risk_score, MAX_RISK_SCORE, "token {token}");
            assert_eq!(result.events[0].threat_level, ThreatLevel::Critical);
        }
    }

    #[test]
    fn test_allowed_algorithm_with_bad_structure_is_rejected() {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "RS256", "kid": "k1"}).to_string());
        for token in [format!("{header}.e30"), format!("{header}.e30.c2ln.ZXh0cmE")] {
            let result = run(&token, None);
            assert!(!result.valid);
            assert_eq!(result.risk_score, DISALLOWED_ALGORITHM_RISK);
            assert_eq!(result.events[0].threat_level, ThreatLevel::High);
        }
    }

    #[test]
    fn test_disallowed_and_missing_algorithm() {
        let result = run(&token(json!({"alg": "HS512", "kid": "k1"}), json!({})), None);
        assert!(!result.valid);
        assert_eq!(result.risk_score, DISALLOWED_ALGORITHM_RISK);

        let result = run(&token(json!({"kid": "k1"}), json!({})), None);
        assert_eq!(result.risk_score, DISALLOWED_ALGORITHM_RISK);

        let result = run("not-a-jwt", None);
        assert!(!result.valid);
        assert_eq!(result.risk_score, DISALLOWED_ALGORITHM_RISK);
    }

    #[test]
    fn test_expected_algorithm_mismatch() {
        let result = run(
            &token(json!({"alg": "RS256", "kid": "k1"}), json!({})),
            Some("ES256"),
        );
        assert!(!result.valid);
        assert_eq!(result.risk_score, DISALLOWED_ALGORITHM_RISK);
    }

    #[test]
    fn test_missing_kid_is_monitored() {
        let result = run(&token(json!({"alg": "RS384"}), json!({})), None);
        assert!(result.valid);
        assert_eq!(result.risk_score, MISSING_KID_RISK);
        assert_eq!(result.events[0].recommended_response, ResponseAction::Monitor);
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        assert!(matches!(
            UntrustedJwt::parse("a.b"),
            Err(ShieldError::MalformedToken(_))
        ));
        assert!(UntrustedJwt::parse("a.b.c.d").is_err());
        assert!(UntrustedJwt::parse("!!!.e30.").is_err());
        let not_json = format!("{}.e30.", URL_SAFE_NO_PAD.encode("\"header\""));
        assert!(UntrustedJwt::parse(&not_json).is_err());
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        exp: u64,
    }

    #[test]
    fn test_verify_with_allowed_algorithm() {
        let config = ShieldConfig::builder()
            .allowed_jwt_algorithms(&["HS384"])
            .build();
        let claims = Claims {
            sub: "alice".to_string(),
            exp: 4_102_444_800,
        };
        let mut header = Header::new(Algorithm::HS384);
        header.kid = Some("k1".to_string());
        let signed = encode(&header, &claims, &EncodingKey::from_secret(b"secret")).unwrap();

        let jwt = UntrustedJwt::parse(&signed).unwrap();
        let verified: VerifiedClaims<Claims> = jwt
            .verify(
                &DecodingKey::from_secret(b"secret"),
                &config,
                Validation::default(),
            )
            .unwrap();
        assert_eq!(verified.claims(), &claims);
        assert_eq!(verified.header().kid.as_deref(), Some("k1"));
        assert_eq!(verified.into_claims().sub, "alice");

        let wrong_key = jwt.verify::<Claims>(
            &DecodingKey::from_secret(b"other"),
            &config,
            Validation::default(),
        );
        assert!(matches!(wrong_key, Err(ShieldError::SignatureVerification(_))));
    }

    #[test]
    fn test_verify_refuses_forbidden_algorithm_even_with_valid_signature() {
        let claims = Claims {
            sub: "mallory".to_string(),
            exp: 4_102_444_800,
        };
        let signed = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"public-key-bytes"),
        )
        .unwrap();

        let result = UntrustedJwt::parse(&signed).unwrap().verify::<Claims>(
            &DecodingKey::from_secret(b"public-key-bytes"),
            &ShieldConfig::default(),
            Validation::default(),
        );
        assert!(matches!(result, Err(ShieldError::AlgorithmRejected(_))));
    }
}
