//! Core types shared by the checks, the aggregator and the engine
//!
//! The threat taxonomy is a set of closed enums. Adding a threat level, an
//! event kind or a response action forces every `match` in the crate to be
//! revisited at compile time.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Additive risk contribution of a single event (0–100)
pub type RiskScore = u32;

/// Upper bound of the cumulative risk score
pub const MAX_RISK_SCORE: RiskScore = 100;

/// Severity of a detected threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    /// Informational, never rejects on its own
    Low,
    /// Suspicious, contributes to the cumulative score
    Medium,
    /// Rejects the check that raised it
    High,
    /// Protocol abuse, always fatal
    Critical,
}

impl ThreatLevel {
    /// Whether an event at this level makes its check fail
    pub fn is_rejecting(self) -> bool {
        match self {
            Self::Low | Self::Medium => false,
            Self::High | Self::Critical => true,
        }
    }

    /// Lowercase label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of security events the checks can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    /// Per-client or per-address request budget exhausted
    RateLimitExceeded,
    /// Missing or unauthenticated client
    InvalidClient,
    /// Request from a client that is currently blocked
    SuspiciousClientBehavior,
    /// Missing, malformed or insecure redirect URI
    InvalidRedirectUri,
    /// Nonce presented twice within its TTL
    NonceReplay,
    /// Weak or malformed PKCE parameters
    PkceViolation,
    /// Missing scope or missing `openid`
    InvalidScope,
    /// Suspiciously broad scope request
    ExcessiveScopeRequest,
    /// Authorization code presented twice
    AuthorizationCodeReuse,
    /// Forbidden, unexpected or incomplete JWT header
    JwtSecurityViolation,
    /// Global circuit breaker tripped
    EmergencyShutdown,
}

impl SecurityEventType {
    /// Snake-case label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::InvalidClient => "invalid_client",
            Self::SuspiciousClientBehavior => "suspicious_client_behavior",
            Self::InvalidRedirectUri => "invalid_redirect_uri",
            Self::NonceReplay => "nonce_replay",
            Self::PkceViolation => "pkce_violation",
            Self::InvalidScope => "invalid_scope",
            Self::ExcessiveScopeRequest => "excessive_scope_request",
            Self::AuthorizationCodeReuse => "authorization_code_reuse",
            Self::JwtSecurityViolation => "jwt_security_violation",
            Self::EmergencyShutdown => "emergency_shutdown",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement action the caller is expected to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseAction {
    /// Proceed normally
    Allow,
    /// Proceed, but flag for review
    Monitor,
    /// Slow the client down
    Throttle,
    /// Reject the request
    Block,
    /// The engine tripped its global circuit breaker
    EmergencyShutdown,
}

impl ResponseAction {
    /// Snake-case label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Monitor => "monitor",
            Self::Throttle => "throttle",
            Self::Block => "block",
            Self::EmergencyShutdown => "emergency_shutdown",
        }
    }
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique event ID
    pub id: Uuid,
    /// What was detected
    pub event_type: SecurityEventType,
    /// How severe it is
    pub threat_level: ThreatLevel,
    /// What the detecting check recommends
    pub recommended_response: ResponseAction,
    /// Client the request claimed to come from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Source network address
    pub network_address: String,
    /// Endpoint being protected (`authorize`, `token`, `jwt`, ...)
    pub endpoint: String,
    /// Human-readable explanation
    pub description: String,
    /// Contribution to the cumulative risk score
    pub risk_score: RiskScore,
    /// Redirect URI of the request, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Requested scope, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Requested response type, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    /// Token grant type, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
    /// Detection time
    pub timestamp: DateTime<Utc>,
    /// Ties together every event raised by one evaluation
    pub correlation_id: Uuid,
}

/// Outcome of a single check, or of a complete evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the check passed
    pub valid: bool,
    /// Events raised, in detection order
    pub events: Vec<SecurityEvent>,
    /// Sum of the event contributions, clamped to [`MAX_RISK_SCORE`]
    pub risk_score: RiskScore,
}

impl ValidationResult {
    /// A passing result with no events
    pub fn pass() -> Self {
        Self {
            valid: true,
            events: Vec::new(),
            risk_score: 0,
        }
    }

    /// Build a result from events; it fails if any event is HIGH or CRITICAL
    pub fn from_events(events: Vec<SecurityEvent>) -> Self {
        let valid = !events.iter().any(|e| e.threat_level.is_rejecting());
        let risk_score = events
            .iter()
            .fold(0, |acc: RiskScore, e| acc.saturating_add(e.risk_score))
            .min(MAX_RISK_SCORE);
        Self {
            valid,
            events,
            risk_score,
        }
    }

    /// Event kinds present in this result
    pub fn event_types(&self) -> Vec<SecurityEventType> {
        self.events.iter().map(|e| e.event_type).collect()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::pass()
    }
}

/// Decision returned for an authorization or token request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityDecision {
    /// Whether the request may proceed
    pub valid: bool,
    /// Action the caller should enforce
    pub response_action: ResponseAction,
    /// Every event raised during the evaluation
    pub events: Vec<SecurityEvent>,
    /// Cumulative risk score (0–100)
    pub risk_score: RiskScore,
    /// Correlation ID shared by all events of this evaluation
    pub correlation_id: Uuid,
    /// Names of the checks that actually ran, in order
    pub checks_run: Vec<&'static str>,
}

impl SecurityDecision {
    /// Event kinds present in this decision
    pub fn event_types(&self) -> Vec<SecurityEventType> {
        self.events.iter().map(|e| e.event_type).collect()
    }

    /// Number of events of the given kind
    pub fn count_of(&self, event_type: SecurityEventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

/// Parameters of an authorization request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// `client_id`
    #[serde(default)]
    pub client_id: Option<String>,
    /// `redirect_uri`
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// `response_type`
    #[serde(default)]
    pub response_type: Option<String>,
    /// `scope` (space separated)
    #[serde(default)]
    pub scope: Option<String>,
    /// `state`
    #[serde(default)]
    pub state: Option<String>,
    /// `nonce`
    #[serde(default)]
    pub nonce: Option<String>,
    /// `code_challenge`
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// `code_challenge_method`
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// Parameters of a token request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// `grant_type`
    #[serde(default)]
    pub grant_type: Option<String>,
    /// `code`
    #[serde(default)]
    pub code: Option<String>,
    /// `redirect_uri`
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// `client_id`
    #[serde(default)]
    pub client_id: Option<String>,
    /// `client_secret`
    #[serde(default)]
    pub client_secret: Option<String>,
    /// `code_verifier`
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// `scope`
    #[serde(default)]
    pub scope: Option<String>,
}

/// Transport-level context of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Source network address
    pub network_address: String,
    /// Endpoint name
    pub endpoint: String,
    /// Raw `Authorization` header, if any
    #[serde(default)]
    pub authorization_header: Option<String>,
    /// Caller-supplied correlation ID; generated when absent
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

impl RequestContext {
    /// Create a context for the given address and endpoint
    pub fn new(network_address: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            network_address: network_address.into(),
            endpoint: endpoint.into(),
            authorization_header: None,
            correlation_id: None,
        }
    }

    /// Attach the raw `Authorization` header
    pub fn with_authorization_header(mut self, header: impl Into<String>) -> Self {
        self.authorization_header = Some(header.into());
        self
    }

    /// Use a caller-supplied correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Dashboard snapshot returned by `get_security_metrics`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityMetrics {
    /// Events retained in the audit log
    pub total_events: usize,
    /// Retained events per threat level
    pub threat_distribution: BTreeMap<ThreatLevel, usize>,
    /// Known client profiles
    pub active_clients: usize,
    /// Profiles currently under a block
    pub blocked_clients: usize,
    /// Whitelisted profiles
    pub whitelisted_clients: usize,
    /// Live nonce cache entries
    pub nonce_cache_size: usize,
    /// Live authorization-code registry entries
    pub code_cache_size: usize,
    /// Rate-limit keys currently tracked
    pub rate_limit_keys: usize,
    /// Emergency shutdowns since start
    pub emergency_shutdowns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: ThreatLevel, risk: RiskScore) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::nil(),
            event_type: SecurityEventType::PkceViolation,
            threat_level: level,
            recommended_response: ResponseAction::Monitor,
            client_id: None,
            network_address: "10.0.0.1".to_string(),
            endpoint: "authorize".to_string(),
            description: "test".to_string(),
            risk_score: risk,
            redirect_uri: None,
            scope: None,
            response_type: None,
            grant_type: None,
            timestamp: Utc::now(),
            correlation_id: Uuid::nil(),
        }
    }

    #[test]
    fn test_threat_level_ordering() {
        assert!(ThreatLevel::Low < ThreatLevel::Medium);
        assert!(ThreatLevel::Medium < ThreatLevel::High);
        assert!(ThreatLevel::High < ThreatLevel::Critical);
        assert!(!ThreatLevel::Medium.is_rejecting());
        assert!(ThreatLevel::High.is_rejecting());
    }

    #[test]
    fn test_result_from_events_sums_and_clamps() {
        let result = ValidationResult::from_events(vec![
            event(ThreatLevel::Medium, 30),
            event(ThreatLevel::Medium, 25),
        ]);
        assert!(result.valid);
        assert_eq!(result.risk_score, 55);

        let result = ValidationResult::from_events(vec![
            event(ThreatLevel::Critical, 100),
            event(ThreatLevel::Medium, 25),
        ]);
        assert!(!result.valid);
        assert_eq!(result.risk_score, MAX_RISK_SCORE);
    }

    #[test]
    fn test_enum_serialization() {
        let json = serde_json::to_string(&SecurityEventType::NonceReplay).unwrap();
        assert_eq!(json, "\"NONCE_REPLAY\"");
        let json = serde_json::to_string(&ResponseAction::EmergencyShutdown).unwrap();
        assert_eq!(json, "\"EMERGENCY_SHUTDOWN\"");
    }

    #[test]
    fn test_authorization_request_from_json() {
        let request: AuthorizationRequest = serde_json::from_value(serde_json::json!({
            "client_id": "c1",
            "scope": "openid profile"
        }))
        .unwrap();
        assert_eq!(request.client_id.as_deref(), Some("c1"));
        assert!(request.nonce.is_none());
    }
}
