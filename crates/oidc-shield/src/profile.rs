//! Per-client behavioral profiles
//!
//! A profile is created the first time a `client_id` is seen and updated after
//! every evaluation for that client. Profiles are never deleted; only their
//! block state is time-bounded.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ShieldResult;
use crate::types::RiskScore;

/// Behavioral statistics for one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecurityProfile {
    /// Client identifier
    pub client_id: String,
    /// When the client was first seen
    pub first_seen: DateTime<Utc>,
    /// Last evaluation for this client
    pub last_activity: DateTime<Utc>,
    /// Evaluations so far
    pub total_requests: u64,
    /// Evaluations that ended invalid
    pub failed_requests: u64,
    /// Whether a block has been placed
    pub is_blocked: bool,
    /// When the block lapses; `None` with `is_blocked` means indefinite
    pub block_until: Option<DateTime<Utc>>,
    /// Exempt from the per-client rate-limit counter
    pub whitelist_status: bool,
}

impl ClientSecurityProfile {
    /// Fresh profile for a newly seen client
    pub fn new(client_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            first_seen: now,
            last_activity: now,
            total_requests: 0,
            failed_requests: 0,
            is_blocked: false,
            block_until: None,
            whitelist_status: false,
        }
    }

    /// Share of evaluations that succeeded (1.0 before any request)
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
    }

    /// Failure ratio scaled to 0–100
    pub fn risk_score(&self) -> RiskScore {
        ((1.0 - self.success_rate()) * 100.0).round() as RiskScore
    }

    /// Whether a block is in force at `now`
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.is_blocked && self.block_until.is_none_or(|until| until > now)
    }

    /// Whether the profile carries a block that has lapsed
    pub fn block_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_blocked && self.block_until.is_some_and(|until| until <= now)
    }
}

/// Aggregate counts for dashboards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileCounts {
    /// Known profiles
    pub total: usize,
    /// Profiles blocked at the time of the count
    pub blocked: usize,
    /// Whitelisted profiles
    pub whitelisted: usize,
}

/// Store of client profiles
///
/// Every mutating method is a single read-modify-write on one profile, so an
/// external implementation can map each to one atomic operation.
#[async_trait]
pub trait ProfileStore: Send + Sync + Debug {
    /// Fetch a profile
    async fn get(&self, client_id: &str) -> ShieldResult<Option<ClientSecurityProfile>>;

    /// Fetch a profile, creating it if absent; the flag is `true` on creation
    async fn get_or_create(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> ShieldResult<(ClientSecurityProfile, bool)>;

    /// Count one evaluation
    async fn record_outcome(
        &self,
        client_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> ShieldResult<()>;

    /// Place a block, creating the profile if absent
    async fn block(
        &self,
        client_id: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ShieldResult<()>;

    /// Remove a block; returns whether the profile existed
    async fn unblock(&self, client_id: &str) -> ShieldResult<bool>;

    /// Set whitelist status, creating the profile if absent
    async fn set_whitelisted(
        &self,
        client_id: &str,
        whitelisted: bool,
        now: DateTime<Utc>,
    ) -> ShieldResult<()>;

    /// Block every known profile; returns how many were touched
    async fn block_all(&self, until: DateTime<Utc>) -> ShieldResult<usize>;

    /// Aggregate counts at `now`
    async fn counts(&self, now: DateTime<Utc>) -> ShieldResult<ProfileCounts>;
}

/// In-memory profile store
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: DashMap<String, ClientSecurityProfile>,
}

impl MemoryProfileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, client_id: &str) -> ShieldResult<Option<ClientSecurityProfile>> {
        Ok(self.profiles.get(client_id).map(|p| p.clone()))
    }

    async fn get_or_create(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> ShieldResult<(ClientSecurityProfile, bool)> {
        let mut created = false;
        let profile = self
            .profiles
            .entry(client_id.to_string())
            .or_insert_with(|| {
                created = true;
                ClientSecurityProfile::new(client_id, now)
            })
            .clone();
        Ok((profile, created))
    }

    async fn record_outcome(
        &self,
        client_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> ShieldResult<()> {
        let mut profile = self
            .profiles
            .entry(client_id.to_string())
            .or_insert_with(|| ClientSecurityProfile::new(client_id, now));
        profile.total_requests += 1;
        if !success {
            profile.failed_requests += 1;
        }
        profile.last_activity = now;
        if profile.block_expired_at(now) {
            profile.is_blocked = false;
            profile.block_until = None;
        }
        Ok(())
    }

    async fn block(
        &self,
        client_id: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ShieldResult<()> {
        let mut profile = self
            .profiles
            .entry(client_id.to_string())
            .or_insert_with(|| ClientSecurityProfile::new(client_id, now));
        profile.is_blocked = true;
        profile.block_until = until;
        Ok(())
    }

    async fn unblock(&self, client_id: &str) -> ShieldResult<bool> {
        match self.profiles.get_mut(client_id) {
            Some(mut profile) => {
                profile.is_blocked = false;
                profile.block_until = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_whitelisted(
        &self,
        client_id: &str,
        whitelisted: bool,
        now: DateTime<Utc>,
    ) -> ShieldResult<()> {
        self.profiles
            .entry(client_id.to_string())
            .or_insert_with(|| ClientSecurityProfile::new(client_id, now))
            .whitelist_status = whitelisted;
        Ok(())
    }

    async fn block_all(&self, until: DateTime<Utc>) -> ShieldResult<usize> {
        let mut touched = 0;
        for mut entry in self.profiles.iter_mut() {
            entry.is_blocked = true;
            entry.block_until = Some(until);
            touched += 1;
        }
        Ok(touched)
    }

    async fn counts(&self, now: DateTime<Utc>) -> ShieldResult<ProfileCounts> {
        let mut counts = ProfileCounts::default();
        for entry in self.profiles.iter() {
            counts.total += 1;
            if entry.is_blocked_at(now) {
                counts.blocked += 1;
            }
            if entry.whitelist_status {
                counts.whitelisted += 1;
            }
        }
        Ok(counts)
    }
}
