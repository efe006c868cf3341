//! Shield configuration
//!
//! All fields have production defaults, so a configuration file only needs the
//! values it wants to change:
//!
//! ```toml
//! fail_closed = true
//! rate_limit_threshold = 50
//! max_risk_score = 75.0
//! ```
//!
//! Environment variables with the `OIDC_SHIELD_` prefix override file values,
//! using `__` for nested keys (`OIDC_SHIELD_LOGGING__LEVEL=debug`).

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::aggregator::THROTTLE_THRESHOLD;
use crate::logging::LoggingConfig;
use crate::types::MAX_RISK_SCORE;

/// Default environment variable prefix for configuration overrides
pub const DEFAULT_ENV_PREFIX: &str = "OIDC_SHIELD";

/// Algorithms that are rejected outright (algorithm-confusion attacks)
pub const DEFAULT_FORBIDDEN_JWT_ALGORITHMS: &[&str] = &["none", "HS256"];

/// Asymmetric algorithms accepted for ID tokens and client assertions
pub const DEFAULT_ALLOWED_JWT_ALGORITHMS: &[&str] =
    &["RS256", "RS384", "RS512", "ES256", "ES384", "ES512"];

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Service name attached to audit records
    pub service_name: String,
    /// Reject on the first failing check instead of relying on the score alone
    pub fail_closed: bool,
    /// Lifetime of nonce replay entries
    pub nonce_ttl_seconds: u64,
    /// Lifetime of authorization-code reuse entries
    pub code_ttl_seconds: u64,
    /// Sliding window length
    pub rate_limit_window_seconds: u64,
    /// Requests per window per client (the per-address limit is twice this)
    pub rate_limit_threshold: u32,
    /// How often idle rate-limit keys are dropped
    pub rate_limit_cleanup_interval_seconds: u64,
    /// Cumulative score at or above which a request is blocked
    pub max_risk_score: f64,
    /// How long an emergency shutdown blocks every known client
    pub emergency_block_seconds: u64,
    /// Capacity of the in-memory audit log
    pub max_audit_events: usize,
    /// Accept `http` redirect URIs on loopback hosts (native apps)
    pub allow_loopback_http: bool,
    /// JWT algorithms rejected as CRITICAL
    pub forbidden_jwt_algorithms: Vec<String>,
    /// JWT algorithms accepted
    pub allowed_jwt_algorithms: Vec<String>,
    /// Logging bootstrap settings
    pub logging: LoggingConfig,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            service_name: "oidc-shield".to_string(),
            fail_closed: true,
            nonce_ttl_seconds: 3600,
            code_ttl_seconds: 3600,
            rate_limit_window_seconds: 60,
            rate_limit_threshold: 100,
            rate_limit_cleanup_interval_seconds: 300,
            max_risk_score: 80.0,
            emergency_block_seconds: 3600,
            max_audit_events: 10_000,
            allow_loopback_http: false,
            forbidden_jwt_algorithms: DEFAULT_FORBIDDEN_JWT_ALGORITHMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_jwt_algorithms: DEFAULT_ALLOWED_JWT_ALGORITHMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Values parsed but are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ShieldConfig {
    /// Create a configuration builder
    pub fn builder() -> ShieldConfigBuilder {
        ShieldConfigBuilder::default()
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// Environment variables with the `OIDC_SHIELD_` prefix override file
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unknown extension,
    /// cannot be parsed, or fails [`ShieldConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, DEFAULT_ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`ShieldConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check that the values are mutually consistent
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let throttle = f64::from(THROTTLE_THRESHOLD);
        let ceiling = f64::from(MAX_RISK_SCORE);
        if !(self.max_risk_score > throttle && self.max_risk_score <= ceiling) {
            return Err(ConfigError::Invalid(format!(
                "max_risk_score must be in ({throttle}, {ceiling}], got {}",
                self.max_risk_score
            )));
        }
        if self.rate_limit_threshold == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_threshold must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("rate_limit_window_seconds", self.rate_limit_window_seconds),
            ("nonce_ttl_seconds", self.nonce_ttl_seconds),
            ("code_ttl_seconds", self.code_ttl_seconds),
            ("emergency_block_seconds", self.emergency_block_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.allowed_jwt_algorithms.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed_jwt_algorithms must not be empty".to_string(),
            ));
        }
        if let Some(overlap) = self
            .allowed_jwt_algorithms
            .iter()
            .find(|alg| self.is_forbidden_algorithm(alg))
        {
            return Err(ConfigError::Invalid(format!(
                "algorithm {overlap} is both allowed and forbidden"
            )));
        }
        Ok(())
    }

    /// Nonce TTL as a duration
    pub fn nonce_ttl(&self) -> Duration {
        seconds(self.nonce_ttl_seconds)
    }

    /// Authorization-code TTL as a duration
    pub fn code_ttl(&self) -> Duration {
        seconds(self.code_ttl_seconds)
    }

    /// Rate-limit window as a duration
    pub fn rate_limit_window(&self) -> Duration {
        seconds(self.rate_limit_window_seconds)
    }

    /// Rate-limit cleanup interval as a duration
    pub fn rate_limit_cleanup_interval(&self) -> Duration {
        seconds(self.rate_limit_cleanup_interval_seconds)
    }

    /// Emergency block length as a duration
    pub fn emergency_block(&self) -> Duration {
        seconds(self.emergency_block_seconds)
    }

    /// Whether `alg` is in the forbidden set (`none` matches case-insensitively)
    pub fn is_forbidden_algorithm(&self, alg: &str) -> bool {
        self.forbidden_jwt_algorithms.iter().any(|f| {
            if f.eq_ignore_ascii_case("none") {
                alg.eq_ignore_ascii_case("none")
            } else {
                f == alg
            }
        })
    }

    /// Whether `alg` is in the allowed set
    pub fn is_allowed_algorithm(&self, alg: &str) -> bool {
        self.allowed_jwt_algorithms.iter().any(|a| a == alg)
    }
}

/// Longest duration any setting can express (100 years)
const MAX_DURATION_SECONDS: u64 = 100 * 365 * 86_400;

fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECONDS) as i64)
}

/// Builder for [`ShieldConfig`]
#[derive(Debug, Default)]
pub struct ShieldConfigBuilder {
    config: ShieldConfig,
}

impl ShieldConfigBuilder {
    /// Set the service name used in audit records
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Enable or disable fail-closed evaluation
    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.config.fail_closed = fail_closed;
        self
    }

    /// Set the nonce TTL
    pub fn nonce_ttl_seconds(mut self, secs: u64) -> Self {
        self.config.nonce_ttl_seconds = secs;
        self
    }

    /// Set the authorization-code TTL
    pub fn code_ttl_seconds(mut self, secs: u64) -> Self {
        self.config.code_ttl_seconds = secs;
        self
    }

    /// Set the per-client threshold and the window length
    pub fn rate_limit(mut self, threshold: u32, window_seconds: u64) -> Self {
        self.config.rate_limit_threshold = threshold;
        self.config.rate_limit_window_seconds = window_seconds;
        self
    }

    /// Set the BLOCK cutoff
    pub fn max_risk_score(mut self, score: f64) -> Self {
        self.config.max_risk_score = score;
        self
    }

    /// Set how long an emergency shutdown blocks clients
    pub fn emergency_block_seconds(mut self, secs: u64) -> Self {
        self.config.emergency_block_seconds = secs;
        self
    }

    /// Set the audit log capacity
    pub fn max_audit_events(mut self, capacity: usize) -> Self {
        self.config.max_audit_events = capacity;
        self
    }

    /// Accept `http` redirect URIs on loopback hosts
    pub fn allow_loopback_http(mut self, allow: bool) -> Self {
        self.config.allow_loopback_http = allow;
        self
    }

    /// Replace the allowed JWT algorithm set
    pub fn allowed_jwt_algorithms(mut self, algs: &[&str]) -> Self {
        self.config.allowed_jwt_algorithms = algs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Replace the forbidden JWT algorithm set
    pub fn forbidden_jwt_algorithms(mut self, algs: &[&str]) -> Self {
        self.config.forbidden_jwt_algorithms = algs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set the logging configuration
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ShieldConfig {
        self.config
    }
}
