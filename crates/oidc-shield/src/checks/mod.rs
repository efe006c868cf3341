//! Independent threat-detection checks
//!
//! Every check turns one aspect of a request into a [`ValidationResult`]. A
//! check fails when it raises any HIGH or CRITICAL event; MEDIUM and LOW events
//! only add to the cumulative score.
//!
//! Checks never decide the final action. That is the job of the
//! [`aggregator`](crate::aggregator), which composes their results in the
//! fixed order driven by the [`engine`](crate::engine).
//!
//! | Check | Endpoint | Stateful |
//! |-------|----------|----------|
//! | [`rate`] | authorization | rate-limit windows |
//! | [`client`] | authorization | client profiles |
//! | [`redirect`] | authorization | - |
//! | [`nonce`] | authorization | nonce cache |
//! | [`pkce`] | authorization, token | - |
//! | [`scope`] | authorization | - |
//! | [`code`] | token | code registry |
//! | [`client_auth`] | token | - |
//! | [`jwt`] | JWT | - |

pub mod client;
pub mod client_auth;
pub mod code;
pub mod jwt;
pub mod nonce;
pub mod pkce;
pub mod rate;
pub mod redirect;
pub mod scope;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ShieldResult;
use crate::replay::{ReplayCheck, ReplayStore, replay_key};
use crate::types::{
    AuthorizationRequest, MAX_RISK_SCORE, RequestContext, ResponseAction, RiskScore,
    SecurityEvent, SecurityEventType, ThreatLevel, TokenRequest, ValidationResult,
};

/// Request facts stamped onto every event raised during one evaluation
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    /// Shared by all events of the evaluation
    pub correlation_id: Uuid,
    /// Evaluation time
    pub now: DateTime<Utc>,
    /// Claimed client
    pub client_id: Option<&'a str>,
    /// Source address
    pub network_address: &'a str,
    /// Endpoint name
    pub endpoint: &'a str,
    /// Redirect URI, if any
    pub redirect_uri: Option<&'a str>,
    /// Requested scope, if any
    pub scope: Option<&'a str>,
    /// Response type, if any
    pub response_type: Option<&'a str>,
    /// Grant type, if any
    pub grant_type: Option<&'a str>,
}

impl<'a> EventContext<'a> {
    /// Context with no protocol fields
    pub fn new(
        correlation_id: Uuid,
        now: DateTime<Utc>,
        network_address: &'a str,
        endpoint: &'a str,
    ) -> Self {
        Self {
            correlation_id,
            now,
            client_id: None,
            network_address,
            endpoint,
            redirect_uri: None,
            scope: None,
            response_type: None,
            grant_type: None,
        }
    }

    /// Context for an authorization request
    pub fn for_authorization(
        request: &'a AuthorizationRequest,
        context: &'a RequestContext,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: request.client_id.as_deref(),
            redirect_uri: request.redirect_uri.as_deref(),
            scope: request.scope.as_deref(),
            response_type: request.response_type.as_deref(),
            ..Self::new(correlation_id, now, &context.network_address, &context.endpoint)
        }
    }

    /// Context for a token request
    pub fn for_token(
        request: &'a TokenRequest,
        context: &'a RequestContext,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: request.client_id.as_deref(),
            redirect_uri: request.redirect_uri.as_deref(),
            scope: request.scope.as_deref(),
            grant_type: request.grant_type.as_deref(),
            ..Self::new(correlation_id, now, &context.network_address, &context.endpoint)
        }
    }

    /// Set the claimed client
    pub fn with_client(mut self, client_id: Option<&'a str>) -> Self {
        self.client_id = client_id;
        self
    }

    /// Build an event carrying this context
    pub fn event(
        &self,
        event_type: SecurityEventType,
        threat_level: ThreatLevel,
        recommended_response: ResponseAction,
        risk_score: RiskScore,
        description: impl Into<String>,
    ) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            event_type,
            threat_level,
            recommended_response,
            client_id: self.client_id.map(str::to_string),
            network_address: self.network_address.to_string(),
            endpoint: self.endpoint.to_string(),
            description: description.into(),
            risk_score,
            redirect_uri: self.redirect_uri.map(str::to_string),
            scope: self.scope.map(str::to_string),
            response_type: self.response_type.map(str::to_string),
            grant_type: self.grant_type.map(str::to_string),
            timestamp: self.now,
            correlation_id: self.correlation_id,
        }
    }
}

/// Record a one-time value, raising a CRITICAL event if it was already used
///
/// Shared by the nonce and authorization-code checks.
async fn one_time_use(
    store: &dyn ReplayStore,
    value: &str,
    event_type: SecurityEventType,
    label: &str,
    ctx: &EventContext<'_>,
) -> ShieldResult<ValidationResult> {
    let key = replay_key(ctx.client_id.unwrap_or_default(), value);
    match store.check_and_insert(&key, ctx.now).await? {
        ReplayCheck::Fresh => Ok(ValidationResult::pass()),
        ReplayCheck::Replayed { first_seen } => {
            tracing::warn!(
                client_id = ?ctx.client_id,
                network_address = %ctx.network_address,
                first_seen = %first_seen,
                "{label} replay detected"
            );
            Ok(ValidationResult::from_events(vec![ctx.event(
                event_type,
                ThreatLevel::Critical,
                ResponseAction::Block,
                MAX_RISK_SCORE,
                format!("{label} already used at {}", first_seen.to_rfc3339()),
            )]))
        }
    }
}
