//! Authorization code reuse check
//!
//! Codes are one-time-use by protocol definition. A second presentation of the
//! same code by the same client is treated as interception evidence.

use crate::checks::{EventContext, one_time_use};
use crate::error::ShieldResult;
use crate::replay::ReplayStore;
use crate::types::{SecurityEventType, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "authorization_code";

/// Record the code and reject it if the client already redeemed it
///
/// Token requests without a code (other grant types) are not checked.
///
/// # Errors
///
/// Propagates replay store failures.
pub async fn check(
    store: &dyn ReplayStore,
    code: Option<&str>,
    ctx: &EventContext<'_>,
) -> ShieldResult<ValidationResult> {
    match code.filter(|c| !c.is_empty()) {
        Some(code) => {
            one_time_use(
                store,
                code,
                SecurityEventType::AuthorizationCodeReuse,
                "Authorization code",
                ctx,
            )
            .await
        }
        None => Ok(ValidationResult::pass()),
    }
}
