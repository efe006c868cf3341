//! Shield metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `oidc_shield_evaluations_total` - Counter for completed evaluations (labels: endpoint, action)
//! - `oidc_shield_events_total` - Counter for security events (labels: event_type, threat_level)
//! - `oidc_shield_rate_limited_total` - Counter for rate-limited requests (labels: key_type)
//! - `oidc_shield_emergency_shutdowns_total` - Counter for emergency shutdowns
//! - `oidc_shield_evaluation_duration_seconds` - Histogram for evaluation duration
//!
//! ## Example
//!
//! ```rust,ignore
//! use oidc_shield::init_shield_metrics;
//!
//! init_shield_metrics();
//! ```

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Initialize shield metric descriptions. Call once at startup.
///
/// Safe to call multiple times; only the first call registers descriptions.
#[cfg(feature = "metrics")]
pub fn init_shield_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "oidc_shield_evaluations_total",
            "Total authorization, token and JWT evaluations"
        );
        describe_counter!(
            "oidc_shield_events_total",
            "Total security events raised by the checks"
        );
        describe_counter!(
            "oidc_shield_rate_limited_total",
            "Total requests rejected by the rate limiter"
        );
        describe_counter!(
            "oidc_shield_emergency_shutdowns_total",
            "Total emergency shutdowns"
        );
        describe_histogram!(
            "oidc_shield_evaluation_duration_seconds",
            "Evaluation duration in seconds"
        );
    });
}

/// Record a completed evaluation
#[cfg(feature = "metrics")]
pub(crate) fn record_evaluation(endpoint: &str, action: &'static str, duration_seconds: f64) {
    counter!(
        "oidc_shield_evaluations_total",
        "endpoint" => endpoint.to_owned(),
        "action" => action
    )
    .increment(1);
    histogram!("oidc_shield_evaluation_duration_seconds").record(duration_seconds);
}

/// Record a security event
#[cfg(feature = "metrics")]
pub(crate) fn record_event(event_type: &'static str, threat_level: &'static str) {
    counter!(
        "oidc_shield_events_total",
        "event_type" => event_type,
        "threat_level" => threat_level
    )
    .increment(1);
}

/// Record a rate-limited request
///
/// * `key_type` - Which window rejected it ("client" or "address")
#[cfg(feature = "metrics")]
pub(crate) fn record_rate_limited(key_type: &'static str) {
    counter!("oidc_shield_rate_limited_total", "key_type" => key_type).increment(1);
}

/// Record an emergency shutdown
#[cfg(feature = "metrics")]
pub(crate) fn record_emergency_shutdown() {
    counter!("oidc_shield_emergency_shutdowns_total").increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_shield_metrics() {}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub(crate) fn record_evaluation(_endpoint: &str, _action: &'static str, _duration_seconds: f64) {}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub(crate) fn record_event(_event_type: &'static str, _threat_level: &'static str) {}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub(crate) fn record_rate_limited(_key_type: &'static str) {}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub(crate) fn record_emergency_shutdown() {}
