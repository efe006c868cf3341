//! Redirect URI check

use url::{Host, Url};

use crate::checks::EventContext;
use crate::types::{ResponseAction, RiskScore, SecurityEventType, ThreatLevel, ValidationResult};

/// Check name reported in decisions
pub const NAME: &str = "redirect_uri";

/// Risk of a missing or unparseable redirect URI
pub const MISSING_REDIRECT_RISK: RiskScore = 85;

/// Risk of a redirect URI over an insecure transport or with a fragment
pub const INSECURE_REDIRECT_RISK: RiskScore = 80;

/// Validate the redirect URI of an authorization request
pub fn check(
    redirect_uri: Option<&str>,
    allow_loopback_http: bool,
    ctx: &EventContext<'_>,
) -> ValidationResult {
    let reject = |risk, description: String| {
        ValidationResult::from_events(vec![ctx.event(
            SecurityEventType::InvalidRedirectUri,
            ThreatLevel::High,
            ResponseAction::Block,
            risk,
            description,
        )])
    };

    let Some(raw) = redirect_uri.filter(|uri| !uri.is_empty()) else {
        return reject(
            MISSING_REDIRECT_RISK,
            "Request is missing redirect_uri".to_string(),
        );
    };

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            return reject(
                MISSING_REDIRECT_RISK,
                format!("redirect_uri is not a valid absolute URI: {e}"),
            );
        }
    };

    let secure = match url.scheme() {
        "https" => true,
        "http" => allow_loopback_http && is_loopback(&url),
        _ => false,
    };
    if !secure {
        return reject(
            INSECURE_REDIRECT_RISK,
            format!("redirect_uri uses insecure scheme '{}'", url.scheme()),
        );
    }

    if url.fragment().is_some() {
        return reject(
            INSECURE_REDIRECT_RISK,
            "redirect_uri must not contain a fragment".to_string(),
        );
    }

    ValidationResult::pass()
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(addr)) => addr.is_loopback(),
        Some(Host::Ipv6(addr)) => addr.is_loopback(),
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        None => false,
    }
}
