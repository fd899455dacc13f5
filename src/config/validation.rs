//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays finite and non-negative, thresholds >= 1)
//! - Validate addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CourierConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::CourierConfig;

/// Upper bound for every seconds-valued setting: one year.
pub const MAX_CONFIG_SECONDS: u64 = 365 * 24 * 60 * 60;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `retry.base_delay`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &CourierConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    check_seconds(&mut errors, "retry.base_delay", retry.base_delay);
    check_seconds(&mut errors, "retry.max_delay", retry.max_delay);
    if retry.base_delay.is_finite()
        && retry.max_delay.is_finite()
        && retry.base_delay > retry.max_delay
    {
        errors.push(ValidationError::new(
            "retry.base_delay",
            "must not exceed retry.max_delay",
        ));
    }
    if let Some(timeout) = retry.attempt_timeout {
        check_positive(&mut errors, "retry.attempt_timeout", timeout);
    }

    let breaker = &config.circuit_breaker;
    if breaker.threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.threshold",
            "must be at least 1",
        ));
    }
    check_seconds(&mut errors, "circuit_breaker.timeout", breaker.timeout);

    let ack = &config.ack;
    check_positive(&mut errors, "ack.ack_timeout_seconds", ack.ack_timeout_seconds);
    check_positive(&mut errors, "ack.ack_check_interval", ack.ack_check_interval);
    if ack.ack_required_types.iter().any(|t| t.trim().is_empty()) {
        errors.push(ValidationError::new(
            "ack.ack_required_types",
            "payload types must not be empty",
        ));
    }

    let replay = &config.replay;
    if replay.max_envelope_age_seconds == 0 {
        errors.push(ValidationError::new(
            "replay.max_envelope_age_seconds",
            "must be greater than zero",
        ));
    } else if replay.max_envelope_age_seconds > MAX_CONFIG_SECONDS {
        errors.push(ValidationError::new(
            "replay.max_envelope_age_seconds",
            format!("must not exceed {MAX_CONFIG_SECONDS}"),
        ));
    }
    if replay.max_future_tolerance_seconds > MAX_CONFIG_SECONDS {
        errors.push(ValidationError::new(
            "replay.max_future_tolerance_seconds",
            format!("must not exceed {MAX_CONFIG_SECONDS}"),
        ));
    }

    let listener = &config.listener;
    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", listener.bind_address),
        ));
    }
    if listener.delivery_buffer == 0 {
        errors.push(ValidationError::new(
            "listener.delivery_buffer",
            "must be greater than zero",
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_seconds(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !value.is_finite() || value < 0.0 {
        errors.push(ValidationError::new(field, "must be a finite, non-negative number of seconds"));
    } else if value > MAX_CONFIG_SECONDS as f64 {
        errors.push(ValidationError::new(field, format!("must not exceed {MAX_CONFIG_SECONDS} seconds")));
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !value.is_finite() || value <= 0.0 {
        errors.push(ValidationError::new(field, "must be a positive number of seconds"));
    } else if value > MAX_CONFIG_SECONDS as f64 {
        errors.push(ValidationError::new(field, format!("must not exceed {MAX_CONFIG_SECONDS} seconds")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = CourierConfig::default();
        config.retry.base_delay = 10.0;
        config.retry.max_delay = 1.0;
        config.circuit_breaker.threshold = 0;
        config.ack.ack_check_interval = 0.0;
        config.listener.bind_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "retry.base_delay",
                "circuit_breaker.threshold",
                "ack.ack_check_interval",
                "listener.bind_address",
            ]
        );
    }

    #[test]
    fn test_rejects_non_finite_delay() {
        let mut config = CourierConfig::default();
        config.retry.max_delay = f64::NAN;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "retry.max_delay");
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let mut config = CourierConfig::default();
        config.circuit_breaker.timeout = 1e20;
        config.ack.ack_timeout_seconds = 1e12;
        config.replay.max_envelope_age_seconds = i64::MAX as u64;
        config.replay.max_future_tolerance_seconds = u64::MAX;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "circuit_breaker.timeout",
                "ack.ack_timeout_seconds",
                "replay.max_envelope_age_seconds",
                "replay.max_future_tolerance_seconds",
            ]
        );
    }

    #[test]
    fn test_one_year_is_accepted() {
        let mut config = CourierConfig::default();
        config.circuit_breaker.timeout = MAX_CONFIG_SECONDS as f64;
        config.replay.max_envelope_age_seconds = MAX_CONFIG_SECONDS;
        assert!(validate_config(&config).is_ok());
    }
}
