//! Client validity check

use tracing::{debug, info};

use crate::checks::EventContext;
use crate::error::ShieldResult;
use crate::profile::ProfileStore;
use crate::types::{ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "client";

/// Risk of a request without `client_id`
pub const MISSING_CLIENT_RISK: RiskScore = 90;

/// Risk of a request from a blocked client
pub const BLOCKED_CLIENT_RISK: RiskScore = 100;

/// Validate the claimed client against its profile
///
/// An unknown client gets a fresh profile at no risk. A lapsed block is
/// lifted on the way through.
///
/// # Errors
///
/// Propagates profile store failures.
pub async fn check(store: &dyn ProfileStore, ctx: &EventContext<'_>) -> ShieldResult<ValidationResult> {
    let Some(client_id) = ctx.client_id.filter(|id| !id.is_empty()) else {
        return Ok(ValidationResult::from_events(vec![ctx.event(
            SecurityEventType::InvalidClient,
            ThreatLevel::High,
            ResponseAction::Block,
            MISSING_CLIENT_RISK,
            "Request is missing client_id",
        )]));
    };

    let (profile, created) = store.get_or_create(client_id, ctx.now).await?;
    if created {
        info!(client_id, "First request from client, profile created");
        return Ok(ValidationResult::pass());
    }

    if profile.is_blocked_at(ctx.now) {
        let until = profile
            .block_until
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "further notice".to_string());
        return Ok(ValidationResult::from_events(vec![ctx.event(
            SecurityEventType::SuspiciousClientBehavior,
            ThreatLevel::High,
            ResponseAction::Block,
            BLOCKED_CLIENT_RISK,
            format!("Client is blocked until {until}"),
        )]));
    }

    if profile.block_expired_at(ctx.now) {
        store.unblock(client_id).await?;
        debug!(client_id, "Client block lapsed and was lifted");
    }

    Ok(ValidationResult::pass())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::context;
    use crate::profile::MemoryProfileStore;
    use chrono::Duration;

    #[tokio::test]
    async fn test_missing_client_id() {
        let store = MemoryProfileStore::new();
        let ctx = context().with_client(None);
        let result = check(&store, &ctx).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.risk_score, MISSING_CLIENT_RISK);
        assert_eq!(result.events[0].event_type, SecurityEventType::InvalidClient);

        let ctx = context().with_client(Some(""));
        assert!(!check(&store, &ctx).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_unknown_client_creates_profile() {
        let store = MemoryProfileStore::new();
        let ctx = context();
        let result = check(&store, &ctx).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.risk_score, 0);

        let profile = store.get("c1").await.unwrap().unwrap();
        assert_eq!(profile.first_seen, ctx.now);
    }

    #[tokio::test]
    async fn test_blocked_client_then_lapsed_block() {
        let store = MemoryProfileStore::new();
        let ctx = context();
        store
            .block("c1", Some(ctx.now + Duration::seconds(30)), ctx.now)
            .await
            .unwrap();

        let result = check(&store, &ctx).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.risk_score, BLOCKED_CLIENT_RISK);
        assert_eq!(
            result.events[0].event_type,
            SecurityEventType::SuspiciousClientBehavior
        );

        let later = EventContext {
            now: ctx.now + Duration::seconds(31),
            ..ctx
        };
        assert!(check(&store, &later).await.unwrap().valid);
        assert!(!store.get("c1").await.unwrap().unwrap().is_blocked);
    }
}
