//! Common test utilities for integration tests
//!
//! Engines built here run on a [`ManualClock`] and without the tracing sink,
//! so tests control time and stay quiet.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oidc_shield::{
    AuthorizationRequest, ClientSecurityProfile, ManualClock, MemoryProfileStore,
    MemoryReplayCache, ProfileStore, ReplayCheck, ReplayStore, RequestContext, ShieldConfig,
    ShieldEngine, ShieldError, ShieldResult, TokenRequest, profile::ProfileCounts,
};

/// A 64-character SHA-256 hex digest used as a strong challenge
pub const S256_CHALLENGE: &str =
    "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

/// A valid RFC 7636 verifier (43 characters)
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

/// Build an engine on a manual clock
pub fn engine(config: ShieldConfig) -> (ShieldEngine, ManualClock) {
    let clock = ManualClock::new();
    let engine = ShieldEngine::builder(config)
        .clock(Arc::new(clock.clone()))
        .without_tracing_sink()
        .build()
        .expect("valid test configuration");
    (engine, clock)
}

/// Build an engine with default configuration
pub fn default_engine() -> (ShieldEngine, ManualClock) {
    engine(ShieldConfig::default())
}

/// A well-formed authorization request that should score zero
pub fn authorization_request(client_id: &str, nonce: &str) -> AuthorizationRequest {
    AuthorizationRequest {
        client_id: Some(client_id.to_string()),
        redirect_uri: Some("https://app.example/cb".to_string()),
        response_type: Some("code".to_string()),
        scope: Some("openid profile".to_string()),
        state: Some("xyz".to_string()),
        nonce: Some(nonce.to_string()),
        code_challenge: Some(S256_CHALLENGE.to_string()),
        code_challenge_method: Some("S256".to_string()),
    }
}

/// A well-formed token request authenticated with a client secret
pub fn token_request(client_id: &str, code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".to_string()),
        code: Some(code.to_string()),
        redirect_uri: Some("https://app.example/cb".to_string()),
        client_id: Some(client_id.to_string()),
        client_secret: Some("s3cret".to_string()),
        code_verifier: Some(VERIFIER.to_string()),
        scope: None,
    }
}

/// Authorization endpoint context from a fixed address
pub fn authorize_context() -> RequestContext {
    RequestContext::new("203.0.113.10", "authorize")
}

/// Token endpoint context from a fixed address
pub fn token_context() -> RequestContext {
    RequestContext::new("203.0.113.10", "token")
}

/// Replay store that fails or panics on demand
#[derive(Debug)]
pub struct FaultyReplayStore {
    inner: MemoryReplayCache,
    fail: AtomicBool,
    panic: AtomicBool,
}

impl FaultyReplayStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryReplayCache::new("faulty", chrono::Duration::hours(1)),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
        }
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn panic_next(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplayStore for FaultyReplayStore {
    async fn check_and_insert(&self, key: &str, now: DateTime<Utc>) -> ShieldResult<ReplayCheck> {
        if self.panic.swap(false, Ordering::SeqCst) {
            panic!("replay store corrupted");
        }
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(ShieldError::ReplayStore("connection reset".to_string()));
        }
        self.inner.check_and_insert(key, now).await
    }

    async fn len(&self) -> ShieldResult<usize> {
        self.inner.len().await
    }

    async fn clear(&self) -> ShieldResult<usize> {
        self.inner.clear().await
    }
}

/// Profile store whose every call fails
#[derive(Debug, Default)]
pub struct UnavailableProfileStore;

#[async_trait]
impl ProfileStore for UnavailableProfileStore {
    async fn get(&self, _client_id: &str) -> ShieldResult<Option<ClientSecurityProfile>> {
        Err(unavailable())
    }

    async fn get_or_create(
        &self,
        _client_id: &str,
        _now: DateTime<Utc>,
    ) -> ShieldResult<(ClientSecurityProfile, bool)> {
        Err(unavailable())
    }

    async fn record_outcome(
        &self,
        _client_id: &str,
        _success: bool,
        _now: DateTime<Utc>,
    ) -> ShieldResult<()> {
        Err(unavailable())
    }

    async fn block(
        &self,
        _client_id: &str,
        _until: Option<DateTime<Utc>>,
        _now: DateTime<Utc>,
    ) -> ShieldResult<()> {
        Err(unavailable())
    }

    async fn unblock(&self, _client_id: &str) -> ShieldResult<bool> {
        Err(unavailable())
    }

    async fn set_whitelisted(
        &self,
        _client_id: &str,
        _whitelisted: bool,
        _now: DateTime<Utc>,
    ) -> ShieldResult<()> {
        Err(unavailable())
    }

    async fn block_all(&self, _until: DateTime<Utc>) -> ShieldResult<usize> {
        Err(unavailable())
    }

    async fn counts(&self, _now: DateTime<Utc>) -> ShieldResult<ProfileCounts> {
        Err(unavailable())
    }
}

fn unavailable() -> ShieldError {
    ShieldError::ProfileStore("profile backend unavailable".to_string())
}

/// Profile store shared with the test so it can be inspected directly
pub fn shared_profiles() -> Arc<MemoryProfileStore> {
    Arc::new(MemoryProfileStore::new())
}
