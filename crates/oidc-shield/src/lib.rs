//! # OIDC Shield - Fail-Closed Security Gate for OpenID Connect Flows
//!
//! Real-time threat detection and cumulative risk scoring for authorization and
//! token requests, evaluated before any token is issued.
//!
//! ## Design Principles
//!
//! - **Fail-Closed**: uncertainty or internal failure denies the request
//! - **Independent Checks**: every check is a small function over one aspect of a request
//! - **Pure Aggregation**: identical check outputs always yield the identical decision
//! - **Header-Only JWT Gate**: untrusted headers cannot become verified claims by accident
//!
//! ## Architecture
//!
//! - [`replay`] - Nonce and authorization-code caches with inline TTL eviction
//! - [`rate_limit`] - Per-client and per-address sliding windows
//! - [`profile`] - Client behavioral profiles
//! - [`checks`] - Individual threat-detection checks
//! - [`aggregator`] - Score-to-action mapping and fail-closed composition
//! - [`engine`] - [`ShieldEngine`], the service entry point and emergency shutdown
//! - [`audit`] - Bounded security event log and sinks
//! - [`config`] - [`ShieldConfig`] with file and environment loading
//! - [`logging`] - Subscriber bootstrap for hosts
//!
//! ## Quick Start
//!
//! ```rust
//! use oidc_shield::{RequestContext, ShieldConfig, ShieldEngine, TokenRequest};
//!
//! # tokio_test::block_on(async {
//! let engine = ShieldEngine::new(ShieldConfig::default()).unwrap();
//!
//! let request = TokenRequest {
//!     grant_type: Some("authorization_code".into()),
//!     code: Some("SplxlOBeZQQYbYS6WxSbIA".into()),
//!     client_id: Some("c1".into()),
//!     client_secret: Some("s3cret".into()),
//!     code_verifier: Some("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into()),
//!     ..Default::default()
//! };
//! let context = RequestContext::new("198.51.100.23", "token");
//!
//! let first = engine.validate_token_request(&request, &context).await;
//! assert!(first.valid);
//!
//! // Codes are one-time-use
//! let replay = engine.validate_token_request(&request, &context).await;
//! assert!(!replay.valid);
//! assert_eq!(replay.risk_score, 100);
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - Counters and histograms via the `metrics` facade
//! - `test-utils` - [`ManualClock`](clock::ManualClock) for deterministic time
//!
//! ## Standards
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 6819** - OAuth 2.0 Threat Model and Security Considerations
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **RFC 8725** - JSON Web Token Best Current Practices

pub mod aggregator;
pub mod audit;
pub mod checks;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod profile;
pub mod rate_limit;
pub mod replay;
pub mod shield_metrics;
pub mod types;

#[doc(inline)]
pub use types::*;

#[doc(inline)]
pub use config::{ConfigError, ShieldConfig, ShieldConfigBuilder};

#[doc(inline)]
pub use engine::{ShieldEngine, ShieldEngineBuilder};

#[doc(inline)]
pub use error::{ShieldError, ShieldResult};

pub use aggregator::{MONITOR_THRESHOLD, RiskAggregator, THROTTLE_THRESHOLD};
pub use audit::{EventSink, SecurityEventLog, TracingSink};
pub use checks::jwt::{UntrustedHeader, UntrustedJwt, VerifiedClaims};
pub use clock::{Clock, SystemClock};
pub use logging::{LogOutput, LogRotation, LoggingConfig, LoggingGuard};
pub use profile::{ClientSecurityProfile, MemoryProfileStore, ProfileStore};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitKey, SlidingWindowLimiter};
pub use replay::{MemoryReplayCache, ReplayCheck, ReplayStore};
pub use shield_metrics::init_shield_metrics;

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
