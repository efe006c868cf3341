//! Temporal replay caches for nonces and authorization codes
//!
//! Each cache maps a `(client, value)` key to the time it was first seen. A
//! second insertion of the same key while the first is still within its TTL
//! is the replay signal. Expired entries are swept on the insertion path, so
//! there is no background task and the cache size stays bounded by the
//! insertion rate times the TTL.
//!
//! [`ReplayStore`] is the seam for multi-instance deployments: an external
//! store must implement `check_and_insert` as one atomic set-if-absent
//! operation, otherwise two racing replays could both observe "not present".

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::ShieldResult;

/// Outcome of recording a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    /// First use within the TTL; the value is now recorded
    Fresh,
    /// Already recorded; carries the time of first use
    Replayed {
        /// When the value was first recorded
        first_seen: DateTime<Utc>,
    },
}

impl ReplayCheck {
    /// Whether this was a replay
    pub fn is_replay(&self) -> bool {
        matches!(self, ReplayCheck::Replayed { .. })
    }
}

/// Store tracking one-time values
#[async_trait]
pub trait ReplayStore: Send + Sync + Debug {
    /// Atomically record `key` unless it is already live
    async fn check_and_insert(&self, key: &str, now: DateTime<Utc>) -> ShieldResult<ReplayCheck>;

    /// Number of entries currently held
    async fn len(&self) -> ShieldResult<usize>;

    /// Drop every entry, returning how many were removed
    async fn clear(&self) -> ShieldResult<usize>;
}

/// Build a cache key that cannot collide across clients
///
/// The client segment is length-prefixed, so `("a:b", "c")` and `("a", "b:c")`
/// map to different keys.
pub fn replay_key(client_id: &str, value: &str) -> String {
    format!("{}:{}:{}", client_id.len(), client_id, value)
}

/// In-memory replay cache
#[derive(Debug)]
pub struct MemoryReplayCache {
    /// Label used in traces ("nonce", "code")
    name: &'static str,
    /// Key -> first-seen time
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Minimum lifetime of an entry
    ttl: Duration,
}

impl MemoryReplayCache {
    /// Create a cache whose entries live for `ttl`
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayCache {
    async fn check_and_insert(&self, key: &str, now: DateTime<Utc>) -> ShieldResult<ReplayCheck> {
        let mut entries = self.entries.lock();

        if let Some(&first_seen) = entries.get(key) {
            if now - first_seen < self.ttl {
                return Ok(ReplayCheck::Replayed { first_seen });
            }
        }

        entries.insert(key.to_string(), now);

        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, &mut first_seen| now - first_seen < ttl);
        let swept = before - entries.len();
        if swept > 0 {
            trace!(cache = self.name, swept, remaining = entries.len(), "Swept expired replay entries");
        }

        Ok(ReplayCheck::Fresh)
    }

    async fn len(&self) -> ShieldResult<usize> {
        Ok(self.entries.lock().len())
    }

    async fn clear(&self) -> ShieldResult<usize> {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}
