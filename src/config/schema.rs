//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the courier.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::payload_types;

/// Maximum age of an envelope before it is considered stale.
pub const MAX_ENVELOPE_AGE_SECONDS: u64 = 300;

/// Allowed clock skew for envelopes timestamped in the future.
pub const MAX_FUTURE_TOLERANCE_SECONDS: u64 = 60;

/// How long a nonce stays rejectable. Twice the envelope age window so a nonce
/// outlives every envelope that could still pass the timestamp check.
pub const NONCE_TTL_SECONDS: u64 = 2 * MAX_ENVELOPE_AGE_SECONDS;

/// Root configuration for the courier.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CourierConfig {
    /// Retry/backoff policy for request/response sends.
    pub retry: RetryConfig,

    /// Per-destination circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Acknowledgement tracking on persistent connections.
    pub ack: AckConfig,

    /// Replay protection on the receiving side.
    pub replay: ReplayConfig,

    /// Inbound endpoint settings.
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,

    /// Base delay for exponential backoff in seconds.
    pub base_delay: f64,

    /// Maximum delay for exponential backoff in seconds.
    pub max_delay: f64,

    /// Multiply each computed delay by a random factor in [0.5, 1.5).
    pub jitter: bool,

    /// Deadline for a single attempt in seconds (none = transport default).
    pub attempt_timeout: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: 0.5,
            max_delay: 30.0,
            jitter: true,
            attempt_timeout: Some(30.0),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        secs(self.base_delay)
    }

    pub fn max_delay(&self) -> Duration {
        secs(self.max_delay)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout.map(secs)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Gate sends through the per-destination breaker.
    pub enabled: bool,

    /// Consecutive failures required to open.
    pub threshold: u32,

    /// Cool-down in seconds before a half-open probe is allowed.
    pub timeout: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            timeout: 60.0,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout)
    }
}

/// Acknowledgement tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AckConfig {
    /// Seconds to wait for an ack before retransmitting.
    pub ack_timeout_seconds: f64,

    /// Retransmissions before giving up on a message.
    pub max_ack_retries: u32,

    /// Sweep interval in seconds.
    pub ack_check_interval: f64,

    /// Payload types whose loss would silently drop work.
    pub ack_required_types: Vec<String>,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            ack_timeout_seconds: 30.0,
            max_ack_retries: 3,
            ack_check_interval: 5.0,
            ack_required_types: payload_types::ACK_REQUIRED
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl AckConfig {
    pub fn ack_timeout(&self) -> Duration {
        secs(self.ack_timeout_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        secs(self.ack_check_interval)
    }
}

/// Replay protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum envelope age in seconds.
    pub max_envelope_age_seconds: u64,

    /// Allowed future skew in seconds.
    pub max_future_tolerance_seconds: u64,

    /// Consult a nonce store for envelopes carrying a nonce.
    pub nonce_check_enabled: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_envelope_age_seconds: MAX_ENVELOPE_AGE_SECONDS,
            max_future_tolerance_seconds: MAX_FUTURE_TOLERANCE_SECONDS,
            nonce_check_enabled: true,
        }
    }
}

impl ReplayConfig {
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.max_envelope_age_seconds.saturating_mul(2))
    }
}

/// Inbound endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:7700").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,

    /// Capacity of the accepted-envelope channel.
    pub delivery_buffer: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7700".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
            delivery_buffer: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Negative and NaN map to zero; values too large for `Duration` saturate.
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
