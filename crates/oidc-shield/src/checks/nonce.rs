//! Nonce replay check

use crate::checks::{EventContext, one_time_use};
use crate::error::ShieldResult;
use crate::replay::ReplayStore;
use crate::types::{SecurityEventType, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "nonce";

/// Record the nonce and reject it if the client already used it
///
/// Requests without a nonce are not checked.
///
/// # Errors
///
/// Propagates replay store failures.
pub async fn check(
    store: &dyn ReplayStore,
    nonce: Option<&str>,
    ctx: &EventContext<'_>,
) -> ShieldResult<ValidationResult> {
    match nonce.filter(|n| !n.is_empty()) {
        Some(nonce) => one_time_use(store, nonce, SecurityEventType::NonceReplay, "Nonce", ctx).await,
        None => Ok(ValidationResult::pass()),
    }
}
