//! Shield engine: runs the checks, aggregates risk and enforces fail-closed
//!
//! [`ShieldEngine`] is the single long-lived service instance owning every
//! store. It is cheap to clone and safe to share across tasks.
//!
//! ## Evaluation order
//!
//! | Endpoint | Checks |
//! |----------|--------|
//! | authorization | rate limit, client, redirect URI, nonce, PKCE challenge, scope |
//! | token | authorization code, PKCE verifier, client authentication |
//! | JWT | algorithm and key |
//!
//! With `fail_closed` (the default) the first failing check ends the
//! evaluation. Checks that did not run have no side effects, so a blocked
//! client never consumes a nonce.
//!
//! ## Failure handling
//!
//! A store error or a panic inside an evaluation triggers
//! [`ShieldEngine::emergency_shutdown`] and yields an invalid
//! `EMERGENCY_SHUTDOWN` decision with risk 100. Evaluations never fail open
//! and never return an error to the caller.
//!
//! ```rust
//! use oidc_shield::{AuthorizationRequest, RequestContext, ResponseAction, ShieldConfig, ShieldEngine};
//!
//! # tokio_test::block_on(async {
//! let engine = ShieldEngine::new(ShieldConfig::default()).unwrap();
//! let request = AuthorizationRequest {
//!     client_id: Some("c1".into()),
//!     redirect_uri: Some("https://app.example/cb".into()),
//!     scope: Some("openid profile".into()),
//!     nonce: Some("n1".into()),
//!     code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cME".into()),
//!     code_challenge_method: Some("S256".into()),
//!     ..Default::default()
//! };
//! let context = RequestContext::new("203.0.113.7", "authorize");
//!
//! let decision = engine.validate_authorization_request(&request, &context).await;
//! assert!(decision.valid);
//! assert_eq!(decision.response_action, ResponseAction::Allow);
//! # });
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Duration;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::RiskAggregator;
use crate::audit::{EventSink, SecurityEventLog, TracingSink};
use crate::checks::{
    EventContext, client, client_auth, code, jwt, nonce, pkce, rate, redirect, scope,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ShieldConfig};
use crate::error::{ShieldError, ShieldResult};
use crate::profile::{ClientSecurityProfile, MemoryProfileStore, ProfileStore};
use crate::rate_limit::{RateLimitConfig, RateLimitKey, SlidingWindowLimiter};
use crate::replay::{MemoryReplayCache, ReplayStore};
use crate::types::{
    AuthorizationRequest, MAX_RISK_SCORE, RequestContext, ResponseAction, SecurityDecision,
    SecurityEvent, SecurityEventType, SecurityMetrics, ThreatLevel, TokenRequest,
    ValidationResult,
};

/// Network address recorded on events the engine raises on its own behalf
const INTERNAL_ADDRESS: &str = "internal";

/// Runs the security checks for authorization, token and JWT requests
#[derive(Debug, Clone)]
pub struct ShieldEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    config: ShieldConfig,
    aggregator: RiskAggregator,
    clock: Arc<dyn Clock>,
    limiter: SlidingWindowLimiter,
    nonces: Arc<dyn ReplayStore>,
    codes: Arc<dyn ReplayStore>,
    profiles: Arc<dyn ProfileStore>,
    log: SecurityEventLog,
    emergency_shutdowns: AtomicU64,
}

/// Builder for [`ShieldEngine`]
///
/// Every store defaults to its in-memory implementation.
#[derive(Debug)]
pub struct ShieldEngineBuilder {
    config: ShieldConfig,
    clock: Option<Arc<dyn Clock>>,
    nonces: Option<Arc<dyn ReplayStore>>,
    codes: Option<Arc<dyn ReplayStore>>,
    profiles: Option<Arc<dyn ProfileStore>>,
    sinks: Vec<Arc<dyn EventSink>>,
    tracing_sink: bool,
}

impl ShieldEngineBuilder {
    /// Use a custom time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom nonce store
    pub fn nonce_store(mut self, store: Arc<dyn ReplayStore>) -> Self {
        self.nonces = Some(store);
        self
    }

    /// Use a custom authorization-code store
    pub fn code_store(mut self, store: Arc<dyn ReplayStore>) -> Self {
        self.codes = Some(store);
        self
    }

    /// Use a custom profile store
    pub fn profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(store);
        self
    }

    /// Deliver events to an additional sink
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Disable the default `audit::oidc` tracing sink
    pub fn without_tracing_sink(mut self) -> Self {
        self.tracing_sink = false;
        self
    }

    /// Validate the configuration and build the engine
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is inconsistent.
    pub fn build(self) -> Result<ShieldEngine, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let mut log = SecurityEventLog::new(config.max_audit_events);
        if self.tracing_sink {
            log = log.with_sink(Arc::new(TracingSink::new(config.service_name.clone())));
        }
        for sink in self.sinks {
            log = log.with_sink(sink);
        }

        let limiter = SlidingWindowLimiter::new(
            RateLimitConfig::new(config.rate_limit_threshold, config.rate_limit_window())
                .with_cleanup_interval(config.rate_limit_cleanup_interval()),
        );

        let inner = EngineInner {
            aggregator: RiskAggregator::new(config.max_risk_score, config.fail_closed),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            limiter,
            nonces: self
                .nonces
                .unwrap_or_else(|| Arc::new(MemoryReplayCache::new("nonce", config.nonce_ttl()))),
            codes: self
                .codes
                .unwrap_or_else(|| Arc::new(MemoryReplayCache::new("code", config.code_ttl()))),
            profiles: self
                .profiles
                .unwrap_or_else(|| Arc::new(MemoryProfileStore::new())),
            log,
            emergency_shutdowns: AtomicU64::new(0),
            config,
        };

        info!(
            service = %inner.config.service_name,
            fail_closed = inner.config.fail_closed,
            block_threshold = inner.config.max_risk_score,
            rate_limit_threshold = inner.config.rate_limit_threshold,
            "Shield engine initialized"
        );

        Ok(ShieldEngine {
            inner: Arc::new(inner),
        })
    }
}

impl ShieldEngine {
    /// Create an engine with in-memory stores
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is inconsistent.
    pub fn new(config: ShieldConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// Start building an engine
    pub fn builder(config: ShieldConfig) -> ShieldEngineBuilder {
        ShieldEngineBuilder {
            config,
            clock: None,
            nonces: None,
            codes: None,
            profiles: None,
            sinks: Vec::new(),
            tracing_sink: true,
        }
    }

    /// Configuration in force
    pub fn config(&self) -> &ShieldConfig {
        &self.inner.config
    }

    /// Evaluate an authorization request
    #[instrument(skip_all, fields(client_id = ?request.client_id, endpoint = %context.endpoint))]
    pub async fn validate_authorization_request(
        &self,
        request: &AuthorizationRequest,
        context: &RequestContext,
    ) -> SecurityDecision {
        let started = Instant::now();
        let correlation_id = context.correlation_id.unwrap_or_else(Uuid::new_v4);
        let now = self.inner.clock.now();
        let ctx = EventContext::for_authorization(request, context, correlation_id, now);

        let outcome = self
            .guard(self.evaluate_authorization(request, &ctx), correlation_id)
            .await;
        self.conclude(outcome, &ctx, started)
    }

    /// Evaluate a token request
    ///
    /// The client is taken from `client_id`, or from the `Basic` credential
    /// when the parameter is absent.
    #[instrument(skip_all, fields(client_id = ?request.client_id, endpoint = %context.endpoint))]
    pub async fn validate_token_request(
        &self,
        request: &TokenRequest,
        context: &RequestContext,
    ) -> SecurityDecision {
        let started = Instant::now();
        let correlation_id = context.correlation_id.unwrap_or_else(Uuid::new_v4);
        let now = self.inner.clock.now();
        let basic_client = context
            .authorization_header
            .as_deref()
            .and_then(client_auth::basic_client_id);
        let client_id = request.client_id.as_deref().or(basic_client.as_deref());
        let ctx = EventContext::for_token(request, context, correlation_id, now).with_client(client_id);

        let outcome = self
            .guard(self.evaluate_token(request, context, &ctx), correlation_id)
            .await;
        self.conclude(outcome, &ctx, started)
    }

    /// Inspect a JWT header against the algorithm policy
    ///
    /// Only the header is decoded; the payload never influences the result.
    pub async fn validate_jwt_security(
        &self,
        token: &str,
        expected_alg: Option<&str>,
    ) -> ValidationResult {
        let context = RequestContext::new(INTERNAL_ADDRESS, jwt::NAME);
        self.validate_jwt_security_for(token, expected_alg, &context)
            .await
    }

    /// Inspect a JWT header, attributing events to the given request
    pub async fn validate_jwt_security_for(
        &self,
        token: &str,
        expected_alg: Option<&str>,
        context: &RequestContext,
    ) -> ValidationResult {
        let correlation_id = context.correlation_id.unwrap_or_else(Uuid::new_v4);
        let ctx = EventContext::new(
            correlation_id,
            self.inner.clock.now(),
            &context.network_address,
            &context.endpoint,
        );
        let config = &self.inner.config;
        let outcome = self
            .guard(
                async { Ok(jwt::check(token, expected_alg, config, &ctx)) },
                correlation_id,
            )
            .await;
        self.settle_check(outcome)
    }

    /// Record a nonce for a client, reporting a replay
    pub async fn validate_nonce(&self, client_id: &str, nonce_value: &str) -> ValidationResult {
        let correlation_id = Uuid::new_v4();
        let ctx = EventContext::new(
            correlation_id,
            self.inner.clock.now(),
            INTERNAL_ADDRESS,
            nonce::NAME,
        )
        .with_client(Some(client_id));
        let outcome = self
            .guard(
                nonce::check(self.inner.nonces.as_ref(), Some(nonce_value), &ctx),
                correlation_id,
            )
            .await;
        self.settle_check(outcome)
    }

    /// Record an authorization code for a client, reporting reuse
    pub async fn validate_authorization_code(
        &self,
        client_id: &str,
        code_value: &str,
    ) -> ValidationResult {
        let correlation_id = Uuid::new_v4();
        let ctx = EventContext::new(
            correlation_id,
            self.inner.clock.now(),
            INTERNAL_ADDRESS,
            code::NAME,
        )
        .with_client(Some(client_id));
        let outcome = self
            .guard(
                code::check(self.inner.codes.as_ref(), Some(code_value), &ctx),
                correlation_id,
            )
            .await;
        self.settle_check(outcome)
    }

    /// Trip the global circuit breaker
    ///
    /// Blocks every known client for `emergency_block_seconds`, clears the
    /// nonce cache and the code registry, and logs one CRITICAL event. Store
    /// failures are logged and do not stop the remaining steps.
    pub async fn emergency_shutdown(&self, reason: &str) -> SecurityEvent {
        self.shutdown(reason, Uuid::new_v4()).await
    }

    /// Dashboard snapshot
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_security_metrics(&self) -> ShieldResult<SecurityMetrics> {
        let now = self.inner.clock.now();
        let counts = self.inner.profiles.counts(now).await?;
        Ok(SecurityMetrics {
            total_events: self.inner.log.len(),
            threat_distribution: self.inner.log.threat_distribution(),
            active_clients: counts.total,
            blocked_clients: counts.blocked,
            whitelisted_clients: counts.whitelisted,
            nonce_cache_size: self.inner.nonces.len().await?,
            code_cache_size: self.inner.codes.len().await?,
            rate_limit_keys: self.inner.limiter.tracked_keys().await,
            emergency_shutdowns: self.inner.emergency_shutdowns.load(Ordering::Relaxed),
        })
    }

    /// Block a client for `duration`
    ///
    /// A duration past the end of representable time blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Propagates profile store failures.
    pub async fn block_client(&self, client_id: &str, duration: Duration) -> ShieldResult<()> {
        let now = self.inner.clock.now();
        let until = now.checked_add_signed(duration);
        self.inner.profiles.block(client_id, until, now).await?;
        warn!(client_id, until = ?until, "Client blocked");
        Ok(())
    }

    /// Lift a client's block; returns whether the client was known
    ///
    /// # Errors
    ///
    /// Propagates profile store failures.
    pub async fn unblock_client(&self, client_id: &str) -> ShieldResult<bool> {
        let known = self.inner.profiles.unblock(client_id).await?;
        info!(client_id, known, "Client unblocked");
        Ok(known)
    }

    /// Exempt a client from the per-client rate limit, or revoke the exemption
    ///
    /// # Errors
    ///
    /// Propagates profile store failures.
    pub async fn set_whitelisted(&self, client_id: &str, whitelisted: bool) -> ShieldResult<()> {
        let now = self.inner.clock.now();
        self.inner
            .profiles
            .set_whitelisted(client_id, whitelisted, now)
            .await?;
        info!(client_id, whitelisted, "Client whitelist status changed");
        Ok(())
    }

    /// Requests counted in the current window for a client or an address
    pub async fn rate_limit_usage(&self, key: &RateLimitKey) -> Option<u32> {
        self.inner.limiter.usage(key, self.inner.clock.now()).await
    }

    /// Clear the rate-limit window of a client or an address
    ///
    /// Returns whether the key was tracked.
    pub async fn reset_rate_limit(&self, key: &RateLimitKey) -> bool {
        let reset = self.inner.limiter.reset(key).await;
        info!(key = ?key, reset, "Rate-limit window reset");
        reset
    }

    /// Current profile of a client
    ///
    /// # Errors
    ///
    /// Propagates profile store failures.
    pub async fn client_profile(&self, client_id: &str) -> ShieldResult<Option<ClientSecurityProfile>> {
        self.inner.profiles.get(client_id).await
    }

    /// The most recent `limit` logged events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.inner.log.recent(limit)
    }

    async fn evaluate_authorization(
        &self,
        request: &AuthorizationRequest,
        ctx: &EventContext<'_>,
    ) -> ShieldResult<SecurityDecision> {
        let inner = &self.inner;
        let mut evaluation = inner.aggregator.begin();

        macro_rules! step {
            ($name:expr, $check:expr) => {
                if !evaluation.should_stop() {
                    evaluation.record($name, $check);
                }
            };
        }

        let whitelisted = match ctx.client_id {
            Some(id) => inner
                .profiles
                .get(id)
                .await?
                .is_some_and(|p| p.whitelist_status),
            None => false,
        };

        step!(rate::NAME, rate::check(&inner.limiter, whitelisted, ctx).await);
        step!(client::NAME, client::check(inner.profiles.as_ref(), ctx).await?);
        step!(
            redirect::NAME,
            redirect::check(
                request.redirect_uri.as_deref(),
                inner.config.allow_loopback_http,
                ctx
            )
        );
        step!(
            nonce::NAME,
            nonce::check(inner.nonces.as_ref(), request.nonce.as_deref(), ctx).await?
        );
        step!(
            pkce::CHALLENGE_NAME,
            pkce::check_challenge(
                request.code_challenge.as_deref(),
                request.code_challenge_method.as_deref(),
                ctx
            )
        );
        step!(scope::NAME, scope::check(request.scope.as_deref(), ctx));

        let decision = evaluation.finish(ctx.correlation_id);
        self.record_outcome(ctx, &decision).await?;
        Ok(decision)
    }

    async fn evaluate_token(
        &self,
        request: &TokenRequest,
        context: &RequestContext,
        ctx: &EventContext<'_>,
    ) -> ShieldResult<SecurityDecision> {
        let inner = &self.inner;
        let mut evaluation = inner.aggregator.begin();

        macro_rules! step {
            ($name:expr, $check:expr) => {
                if !evaluation.should_stop() {
                    evaluation.record($name, $check);
                }
            };
        }

        step!(
            code::NAME,
            code::check(inner.codes.as_ref(), request.code.as_deref(), ctx).await?
        );
        step!(
            pkce::VERIFIER_NAME,
            pkce::check_verifier(request.code_verifier.as_deref(), ctx)
        );
        step!(
            client_auth::NAME,
            client_auth::check(
                request.client_secret.as_deref(),
                context.authorization_header.as_deref(),
                ctx
            )
        );

        let decision = evaluation.finish(ctx.correlation_id);
        self.record_outcome(ctx, &decision).await?;
        Ok(decision)
    }

    async fn record_outcome(
        &self,
        ctx: &EventContext<'_>,
        decision: &SecurityDecision,
    ) -> ShieldResult<()> {
        if let Some(client_id) = ctx.client_id.filter(|id| !id.is_empty()) {
            self.inner
                .profiles
                .record_outcome(client_id, decision.valid, ctx.now)
                .await?;
        }
        Ok(())
    }

    /// Run `evaluation`, turning errors and panics into an emergency shutdown
    async fn guard<T, F>(&self, evaluation: F, correlation_id: Uuid) -> Result<T, SecurityEvent>
    where
        F: Future<Output = ShieldResult<T>>,
    {
        let error = match AssertUnwindSafe(evaluation).catch_unwind().await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(panic) => ShieldError::Panic(panic_message(panic.as_ref())),
        };

        error!(
            error = %error,
            category = error.category(),
            correlation_id = %correlation_id,
            "Evaluation failed, failing closed"
        );
        Err(self
            .shutdown(&format!("engine failure: {error}"), correlation_id)
            .await)
    }

    fn conclude(
        &self,
        outcome: Result<SecurityDecision, SecurityEvent>,
        ctx: &EventContext<'_>,
        started: Instant,
    ) -> SecurityDecision {
        let decision = match outcome {
            Ok(decision) => {
                self.inner.log.record(&decision.events);
                decision
            }
            Err(event) => RiskAggregator::emergency_decision(event, Vec::new(), ctx.correlation_id),
        };

        crate::shield_metrics::record_evaluation(
            ctx.endpoint,
            decision.response_action.as_str(),
            started.elapsed().as_secs_f64(),
        );

        if decision.valid {
            debug!(
                correlation_id = %decision.correlation_id,
                action = decision.response_action.as_str(),
                risk_score = decision.risk_score,
                checks = ?decision.checks_run,
                "Request allowed"
            );
        } else {
            info!(
                correlation_id = %decision.correlation_id,
                action = decision.response_action.as_str(),
                risk_score = decision.risk_score,
                events = ?decision.event_types(),
                "Request rejected"
            );
        }
        decision
    }

    fn settle_check(&self, outcome: Result<ValidationResult, SecurityEvent>) -> ValidationResult {
        match outcome {
            Ok(result) => {
                self.inner.log.record(&result.events);
                result
            }
            Err(event) => ValidationResult {
                valid: false,
                events: vec![event],
                risk_score: MAX_RISK_SCORE,
            },
        }
    }

    async fn shutdown(&self, reason: &str, correlation_id: Uuid) -> SecurityEvent {
        let inner = &self.inner;
        let now = inner.clock.now();
        let until = now + inner.config.emergency_block();

        let blocked = inner.profiles.block_all(until).await.unwrap_or_else(|e| {
            error!(error = %e, "Emergency shutdown could not block clients");
            0
        });
        let nonces_cleared = inner.nonces.clear().await.unwrap_or_else(|e| {
            error!(error = %e, "Emergency shutdown could not clear nonce cache");
            0
        });
        let codes_cleared = inner.codes.clear().await.unwrap_or_else(|e| {
            error!(error = %e, "Emergency shutdown could not clear code registry");
            0
        });

        let event = EventContext::new(correlation_id, now, INTERNAL_ADDRESS, "emergency_shutdown")
            .event(
                SecurityEventType::EmergencyShutdown,
                ThreatLevel::Critical,
                ResponseAction::EmergencyShutdown,
                MAX_RISK_SCORE,
                format!("Emergency shutdown: {reason}"),
            );
        inner.log.record(std::slice::from_ref(&event));
        inner.emergency_shutdowns.fetch_add(1, Ordering::Relaxed);
        crate::shield_metrics::record_emergency_shutdown();

        error!(
            reason,
            blocked_clients = blocked,
            nonces_cleared,
            codes_cleared,
            block_until = %until,
            "Emergency shutdown engaged"
        );
        event
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
