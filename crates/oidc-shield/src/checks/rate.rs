//! Rate-limit check

use crate::checks::EventContext;
use crate::rate_limit::SlidingWindowLimiter;
use crate::types::{ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "rate_limit";

/// Risk of a request over either limit
pub const RATE_LIMIT_RISK: RiskScore = 75;

/// Count the request against its client and address windows
///
/// Whitelisted clients are counted by address only.
pub async fn check(
    limiter: &SlidingWindowLimiter,
    whitelisted: bool,
    ctx: &EventContext<'_>,
) -> ValidationResult {
    let client_key = if whitelisted { None } else { ctx.client_id };
    let decision = limiter
        .check_and_record(client_key, ctx.network_address, ctx.now)
        .await;

    if decision.allowed {
        return ValidationResult::pass();
    }

    let description = if client_key.is_some() && decision.client_rate >= decision.client_limit {
        format!(
            "Client exceeded {} requests per window ({} counted)",
            decision.client_limit, decision.client_rate
        )
    } else {
        format!(
            "Address {} exceeded {} requests per window ({} counted)",
            ctx.network_address, decision.address_limit, decision.address_rate
        )
    };

    ValidationResult::from_events(vec![ctx.event(
        SecurityEventType::RateLimitExceeded,
        ThreatLevel::High,
        ResponseAction::Throttle,
        RATE_LIMIT_RISK,
        description,
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::context;
    use crate::rate_limit::RateLimitConfig;
    use chrono::Duration;

    #[tokio::test]
    async fn test_rejects_over_limit() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig::new(1, Duration::seconds(60)));
        let ctx = context();

        assert!(check(&limiter, false, &ctx).await.valid);

        let result = check(&limiter, false, &ctx).await;
        assert!(!result.valid);
        assert_eq!(result.risk_score, RATE_LIMIT_RISK);
        assert_eq!(result.events[0].event_type, SecurityEventType::RateLimitExceeded);
        assert_eq!(result.events[0].recommended_response, ResponseAction::Throttle);
        assert!(result.events[0].description.starts_with("Client exceeded"));
    }

    #[tokio::test]
    async fn test_whitelisted_client_uses_address_budget() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig::new(1, Duration::seconds(60)));
        let ctx = context();

        // Address budget is 2
        assert!(check(&limiter, true, &ctx).await.valid);
        assert!(check(&limiter, true, &ctx).await.valid);
        let result = check(&limiter, true, &ctx).await;
        assert!(!result.valid);
        assert!(result.events[0].description.starts_with("Address"));
    }
}
