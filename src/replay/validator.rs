//! Envelope freshness and nonce validation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::ReplayConfig;
use crate::envelope::Envelope;
use crate::error::{NonceIssue, ReplayError, TimestampIssue};
use crate::observability::metrics;
use crate::replay::nonce::NonceStore;

/// Rejects stale, future-dated and replayed envelopes on the receiving side.
#[derive(Clone)]
pub struct ReplayValidator {
    max_age: u64,
    future_tolerance: u64,
    nonce_ttl: Duration,
    store: Option<Arc<dyn NonceStore>>,
}

impl ReplayValidator {
    /// Validator without nonce tracking.
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            max_age: config.max_envelope_age_seconds,
            future_tolerance: config.max_future_tolerance_seconds,
            nonce_ttl: config.nonce_ttl(),
            store: None,
        }
    }

    /// Build from config, attaching `store` only when nonce checking is enabled.
    pub fn from_config(config: &ReplayConfig, store: Arc<dyn NonceStore>) -> Self {
        let validator = Self::new(config);
        if config.nonce_check_enabled {
            validator.with_nonce_store(store)
        } else {
            validator
        }
    }

    pub fn with_nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn nonce_ttl(&self) -> Duration {
        self.nonce_ttl
    }

    /// Timestamp check, then nonce check.
    pub fn validate(&self, envelope: &Envelope) -> Result<(), ReplayError> {
        self.validate_timestamp(envelope)?;
        self.validate_nonce(envelope)
    }

    pub fn validate_timestamp(&self, envelope: &Envelope) -> Result<(), ReplayError> {
        self.validate_timestamp_at(envelope, Utc::now())
    }

    /// [`validate_timestamp`](Self::validate_timestamp) against an explicit clock.
    pub fn validate_timestamp_at(&self, envelope: &Envelope, now: DateTime<Utc>) -> Result<(), ReplayError> {
        let issue = match envelope.timestamp {
            None => Some(TimestampIssue::Missing),
            Some(ts) => {
                let age = now.signed_duration_since(ts);
                let age_secs = age.num_milliseconds() as f64 / 1000.0;
                if age_secs > self.max_age as f64 {
                    Some(TimestampIssue::TooOld {
                        age_secs,
                        max_age_secs: self.max_age,
                    })
                } else if -age_secs > self.future_tolerance as f64 {
                    Some(TimestampIssue::TooFarInFuture {
                        offset_secs: -age_secs,
                        tolerance_secs: self.future_tolerance,
                    })
                } else {
                    None
                }
            }
        };

        match issue {
            None => Ok(()),
            Some(issue) => Err(self.reject(ReplayError::InvalidTimestamp {
                envelope_id: envelope.id.clone(),
                issue,
            })),
        }
    }

    /// Nonce check. A no-op when the envelope has no nonce or no store is attached.
    pub fn validate_nonce(&self, envelope: &Envelope) -> Result<(), ReplayError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(raw) = envelope.nonce() else {
            return Ok(());
        };

        let invalid = |nonce: Option<String>, issue| ReplayError::InvalidNonce {
            envelope_id: envelope.id.clone(),
            nonce,
            issue,
        };

        let nonce = match raw {
            Value::String(s) => s,
            _ => return Err(self.reject(invalid(None, NonceIssue::NotAString))),
        };
        if nonce.is_empty() {
            return Err(self.reject(invalid(Some(String::new()), NonceIssue::Empty)));
        }
        if !store.check_and_mark(nonce, self.nonce_ttl) {
            return Err(self.reject(invalid(Some(nonce.clone()), NonceIssue::Duplicate)));
        }
        Ok(())
    }

    /// Forget the envelope's nonce so a retransmit is not taken for a replay.
    /// Used when a validated envelope could not be handed off.
    pub fn release_nonce(&self, envelope: &Envelope) {
        if let (Some(store), Some(Value::String(nonce))) = (&self.store, envelope.nonce()) {
            store.release(nonce);
        }
    }

    fn reject(&self, err: ReplayError) -> ReplayError {
        tracing::warn!(reason = err.reason(), error = %err, "Envelope rejected");
        metrics::record_replay_rejection(err.reason());
        err
    }
}

impl std::fmt::Debug for ReplayValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayValidator")
            .field("max_age", &self.max_age)
            .field("future_tolerance", &self.future_tolerance)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("nonce_store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_ENVELOPE_AGE_SECONDS, MAX_FUTURE_TOLERANCE_SECONDS, NONCE_TTL_SECONDS};
    use crate::envelope::NONCE_EXTENSION;
    use crate::replay::nonce::InMemoryNonceStore;
    use chrono::TimeDelta;
    use serde_json::json;

    fn envelope_at(ts: DateTime<Utc>) -> Envelope {
        Envelope::new("a", "b", "task.request", Value::Null).with_timestamp(ts)
    }

    fn validator_with_store() -> ReplayValidator {
        ReplayValidator::new(&ReplayConfig::default()).with_nonce_store(Arc::new(InMemoryNonceStore::new()))
    }

    #[test]
    fn test_stale_envelope_rejected_with_age() {
        let now = Utc::now();
        let ts = now - TimeDelta::seconds(MAX_ENVELOPE_AGE_SECONDS as i64 + 1);
        let err = ReplayValidator::new(&ReplayConfig::default())
            .validate_timestamp_at(&envelope_at(ts), now)
            .unwrap_err();
        match err {
            ReplayError::InvalidTimestamp {
                issue: TimestampIssue::TooOld { age_secs, max_age_secs },
                ..
            } => {
                assert!(age_secs > max_age_secs as f64);
                assert_eq!(max_age_secs, MAX_ENVELOPE_AGE_SECONDS);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_boundaries() {
        let validator = ReplayValidator::new(&ReplayConfig::default());
        let now = Utc::now();

        let at_limit = now - TimeDelta::seconds(MAX_ENVELOPE_AGE_SECONDS as i64);
        assert!(validator.validate_timestamp_at(&envelope_at(at_limit), now).is_ok());

        let skewed = now + TimeDelta::seconds(MAX_FUTURE_TOLERANCE_SECONDS as i64 - 1);
        assert!(validator.validate_timestamp_at(&envelope_at(skewed), now).is_ok());

        let too_far = now + TimeDelta::seconds(MAX_FUTURE_TOLERANCE_SECONDS as i64 + 1);
        let err = validator.validate_timestamp_at(&envelope_at(too_far), now).unwrap_err();
        assert_eq!(err.reason(), "timestamp_in_future");
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let mut env = Envelope::new("a", "b", "task.request", Value::Null);
        env.timestamp = None;
        let err = ReplayValidator::new(&ReplayConfig::default())
            .validate_timestamp(&env)
            .unwrap_err();
        assert_eq!(err.reason(), "timestamp_missing");
    }

    #[test]
    fn test_nonce_optional() {
        let env = Envelope::new("a", "b", "task.request", Value::Null);
        assert!(validator_with_store().validate_nonce(&env).is_ok());

        // No store configured: even a duplicate nonce passes.
        let validator = ReplayValidator::new(&ReplayConfig::default());
        let env = env.with_nonce();
        assert!(validator.validate_nonce(&env).is_ok());
        assert!(validator.validate_nonce(&env).is_ok());
    }

    #[test]
    fn test_disabled_nonce_check_ignores_store() {
        let config = ReplayConfig {
            nonce_check_enabled: false,
            ..ReplayConfig::default()
        };
        let validator = ReplayValidator::from_config(&config, Arc::new(InMemoryNonceStore::new()));
        let env = Envelope::new("a", "b", "task.request", Value::Null).with_nonce();
        assert!(validator.validate(&env).is_ok());
        assert!(validator.validate(&env).is_ok());
    }

    #[test]
    fn test_malformed_nonces() {
        let validator = validator_with_store();

        let env = Envelope::new("a", "b", "task.request", Value::Null).with_extension(NONCE_EXTENSION, json!(42));
        let err = validator.validate_nonce(&env).unwrap_err();
        assert_eq!(err.reason(), "nonce_not_string");

        let env = Envelope::new("a", "b", "task.request", Value::Null).with_extension(NONCE_EXTENSION, json!(""));
        let err = validator.validate_nonce(&env).unwrap_err();
        assert_eq!(err.reason(), "nonce_empty");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonce_single_use_within_ttl() {
        let validator = validator_with_store();
        assert_eq!(validator.nonce_ttl(), Duration::from_secs(NONCE_TTL_SECONDS));

        let env = Envelope::new("a", "b", "task.request", Value::Null).with_nonce();
        assert!(validator.validate_nonce(&env).is_ok());

        let err = validator.validate_nonce(&env).unwrap_err();
        match &err {
            ReplayError::InvalidNonce { nonce, issue, .. } => {
                assert_eq!(*issue, NonceIssue::Duplicate);
                assert_eq!(nonce.as_ref(), env.nonce().and_then(Value::as_str).map(str::to_string).as_ref());
            }
            other => panic!("unexpected: {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(NONCE_TTL_SECONDS + 1)).await;
        assert!(validator.validate_nonce(&env).is_ok());
    }

    #[test]
    fn test_timestamp_checked_before_nonce() {
        let validator = validator_with_store();
        let now = Utc::now();
        let stale = envelope_at(now - TimeDelta::seconds(3_600)).with_nonce();
        assert_eq!(validator.validate(&stale).unwrap_err().reason(), "timestamp_too_old");

        // The rejected envelope did not burn its nonce.
        let mut fresh = stale.clone();
        fresh.timestamp = Some(Utc::now());
        assert!(validator.validate(&fresh).is_ok());
    }

    #[tokio::test]
    async fn test_huge_age_window_does_not_overflow_nonce_expiry() {
        let config = ReplayConfig {
            max_envelope_age_seconds: i64::MAX as u64,
            ..ReplayConfig::default()
        };
        let validator = ReplayValidator::from_config(&config, Arc::new(InMemoryNonceStore::new()));
        let env = Envelope::new("a", "b", "task.request", Value::Null).with_nonce();

        assert!(validator.validate(&env).is_ok());
        assert!(validator.validate(&env).is_err(), "nonce still recorded");
    }

    #[test]
    fn test_release_nonce_allows_retransmit() {
        let validator = validator_with_store();
        let env = Envelope::new("a", "b", "task.request", Value::Null).with_nonce();

        assert!(validator.validate_nonce(&env).is_ok());
        validator.release_nonce(&env);
        assert!(validator.validate_nonce(&env).is_ok());
        assert!(validator.validate_nonce(&env).is_err());
    }
}
