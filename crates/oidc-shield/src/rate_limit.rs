//! Sliding-window rate limiting for authorization and token endpoints
//!
//! Each key (a client ID or a network address) holds the ordered timestamps
//! of its accepted requests. On every call the timestamps older than the
//! window are discarded and the remainder is compared against the threshold.
//!
//! ## Limits
//!
//! - **Per client** - `threshold` requests per window
//! - **Per address** - `2 × threshold` requests per window, so that clients
//!   behind one NAT gateway are not throttled as a single client
//!
//! A request is recorded against both keys only if both are under their
//! limit. A rejected burst never inflates its own counter, so a client that
//! backs off for one window always recovers.
//!
//! ## Usage
//!
//! ```rust
//! use oidc_shield::rate_limit::{RateLimitConfig, SlidingWindowLimiter};
//! use chrono::{Duration, Utc};
//!
//! # tokio_test::block_on(async {
//! let limiter = SlidingWindowLimiter::new(RateLimitConfig::new(100, Duration::seconds(60)));
//! let decision = limiter.check_and_record(Some("client-1"), "203.0.113.7", Utc::now()).await;
//! assert!(decision.allowed);
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

/// Sliding-window limiter keyed by client and by address
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    state: Arc<RwLock<RateLimitState>>,
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per client in one window
    pub client_threshold: u32,
    /// Window length
    pub window: Duration,
    /// How often idle keys are dropped
    pub cleanup_interval: Duration,
}

/// Key for rate limiting
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum RateLimitKey {
    /// Per-client counter
    Client(String),
    /// Per-address counter
    Address(String),
}

/// Result of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request was admitted and recorded
    pub allowed: bool,
    /// Requests counted for the client in the current window
    pub client_rate: u32,
    /// Requests counted for the address in the current window
    pub address_rate: u32,
    /// Per-client limit in force
    pub client_limit: u32,
    /// Per-address limit in force
    pub address_limit: u32,
}

/// Internal state for tracking requests
#[derive(Debug, Default)]
struct RateLimitState {
    /// Map of key -> accepted request timestamps, oldest first
    entries: HashMap<RateLimitKey, VecDeque<DateTime<Utc>>>,
    /// Last idle-key cleanup
    last_cleanup: Option<DateTime<Utc>>,
}

impl RateLimitConfig {
    /// Create a configuration with the default five-minute cleanup interval
    pub fn new(client_threshold: u32, window: Duration) -> Self {
        Self {
            client_threshold,
            window,
            cleanup_interval: Duration::seconds(300),
        }
    }

    /// Set the idle-key cleanup interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Per-address limit (twice the per-client limit)
    pub fn address_threshold(&self) -> u32 {
        self.client_threshold.saturating_mul(2)
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(RateLimitState::default())),
        }
    }

    /// Check both counters and record the request if both admit it
    ///
    /// A `None` client is counted by address only.
    pub async fn check_and_record(
        &self,
        client_id: Option<&str>,
        address: &str,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let client_limit = self.config.client_threshold;
        let address_limit = self.config.address_threshold();

        let mut state = self.state.write().await;
        self.maybe_cleanup(&mut state, now);

        let window_start = now - self.config.window;
        let client_key = client_id.map(|c| RateLimitKey::Client(c.to_string()));
        let address_key = RateLimitKey::Address(address.to_string());

        let client_rate = client_key
            .as_ref()
            .map(|key| prune(&mut state.entries, key, window_start))
            .unwrap_or(0);
        let address_rate = prune(&mut state.entries, &address_key, window_start);

        let client_ok = client_key.is_none() || client_rate < client_limit;
        let address_ok = address_rate < address_limit;

        if !(client_ok && address_ok) {
            crate::shield_metrics::record_rate_limited(if client_ok { "address" } else { "client" });
            return RateLimitDecision {
                allowed: false,
                client_rate,
                address_rate,
                client_limit,
                address_limit,
            };
        }

        if let Some(key) = client_key {
            state.entries.entry(key).or_default().push_back(now);
        }
        state.entries.entry(address_key).or_default().push_back(now);

        RateLimitDecision {
            allowed: true,
            client_rate: client_id.map(|_| client_rate + 1).unwrap_or(0),
            address_rate: address_rate + 1,
            client_limit,
            address_limit,
        }
    }

    /// Requests counted in the current window for a key
    pub async fn usage(&self, key: &RateLimitKey, now: DateTime<Utc>) -> Option<u32> {
        let window_start = now - self.config.window;
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|timestamps| timestamps.iter().filter(|&&t| t > window_start).count() as u32)
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Forget the window of one key; returns whether it was tracked
    pub async fn reset(&self, key: &RateLimitKey) -> bool {
        self.state.write().await.entries.remove(key).is_some()
    }

    fn maybe_cleanup(&self, state: &mut RateLimitState, now: DateTime<Utc>) {
        let should_cleanup = state
            .last_cleanup
            .map(|t| now - t > self.config.cleanup_interval)
            .unwrap_or(true);

        if should_cleanup {
            // Remove entries with no recent activity
            let cutoff = now - self.config.window * 2;
            state.entries.retain(|_, timestamps| {
                timestamps.back().map(|&t| t > cutoff).unwrap_or(false)
            });
            state.last_cleanup = Some(now);
        }
    }
}

/// Drop timestamps at or before `window_start`, returning what remains
fn prune(
    entries: &mut HashMap<RateLimitKey, VecDeque<DateTime<Utc>>>,
    key: &RateLimitKey,
    window_start: DateTime<Utc>,
) -> u32 {
    match entries.get_mut(key) {
        Some(timestamps) => {
            while timestamps.front().is_some_and(|&t| t <= window_start) {
                timestamps.pop_front();
            }
            timestamps.len() as u32
        }
        None => 0,
    }
}
