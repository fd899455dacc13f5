//! Retry logic.
//!
//! # Responsibilities
//! - Classify each attempt (success, retriable, terminal)
//! - Execute retries with exponential backoff + jitter, honoring `Retry-After`
//! - Gate every attempt through the destination's circuit breaker
//! - Report exactly one outcome per logical send to the breaker
//!
//! # Design Decisions
//! - 5xx, 429, connection errors and timeouts are retriable; other 4xx are not
//! - Circuit-open rejections are surfaced immediately and never retried here
//! - A half-open probe gets a single attempt; its result decides the breaker state
//! - Backoff sleeps race the cancellation token so shutdown never waits on a delay

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::envelope::Envelope;
use crate::error::{DeliveryError, DeliveryResult};
use crate::observability::metrics;
use crate::resilience::backoff::{calculate_backoff, parse_retry_after};
use crate::resilience::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerRegistry};
use crate::resilience::timeouts::with_deadline;
use crate::transport::http::{HttpResponse, HttpTransport, OutboundRequest, TransportFailure};

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ServerError,
    RateLimited,
    Connect,
    Timeout,
    ClientError,
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ServerError => "server_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Connect => "connect",
            FailureKind::Timeout => "timeout",
            FailureKind::ClientError => "client_error",
            FailureKind::Fatal => "fatal",
        }
    }
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(HttpResponse),
    Retriable {
        kind: FailureKind,
        status: Option<StatusCode>,
        retry_after: Option<String>,
        cause: String,
    },
    Terminal {
        kind: FailureKind,
        status: Option<StatusCode>,
        cause: String,
    },
}

/// Classify the result of one transport call.
pub fn classify(result: Result<HttpResponse, TransportFailure>) -> AttemptOutcome {
    match result {
        Ok(response) if response.status.is_success() => AttemptOutcome::Success(response),
        Ok(response) => {
            let status = response.status;
            let cause = format!("peer returned {}", status);
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                let kind = if status == StatusCode::TOO_MANY_REQUESTS {
                    FailureKind::RateLimited
                } else {
                    FailureKind::ServerError
                };
                AttemptOutcome::Retriable {
                    kind,
                    status: Some(status),
                    retry_after: response.retry_after().map(str::to_string),
                    cause,
                }
            } else {
                // 1xx/3xx that survived redirect handling are as unusable as a 4xx.
                AttemptOutcome::Terminal {
                    kind: FailureKind::ClientError,
                    status: Some(status),
                    cause,
                }
            }
        }
        Err(TransportFailure::Timeout) => AttemptOutcome::Retriable {
            kind: FailureKind::Timeout,
            status: None,
            retry_after: None,
            cause: "timed out".to_string(),
        },
        Err(TransportFailure::Connect(cause)) => AttemptOutcome::Retriable {
            kind: FailureKind::Connect,
            status: None,
            retry_after: None,
            cause,
        },
        Err(TransportFailure::Fatal(cause)) => AttemptOutcome::Terminal {
            kind: FailureKind::Fatal,
            status: None,
            cause,
        },
    }
}

/// Retry parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter,
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Delay before retry `attempt_index`, preferring a usable `Retry-After`.
    pub fn delay_for(&self, attempt_index: u32, retry_after: Option<&str>) -> Duration {
        retry_after
            .and_then(parse_retry_after)
            .unwrap_or_else(|| {
                calculate_backoff(attempt_index, self.base_delay, self.max_delay, self.jitter)
            })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Breaker parameters used when a destination is first seen.
#[derive(Debug, Clone)]
struct BreakerSettings {
    registry: Arc<CircuitBreakerRegistry>,
    threshold: u32,
    timeout: Duration,
}

/// Wraps one logical request in retry/backoff and circuit-breaker gating.
pub struct RetrySender {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    breakers: Option<BreakerSettings>,
    cancel: CancellationToken,
}

impl RetrySender {
    /// Sender without circuit breaking.
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            breakers: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Build from config; breaker gating follows `circuit_breaker.enabled`.
    pub fn from_config(
        transport: Arc<dyn HttpTransport>,
        retry: &RetryConfig,
        breaker: &CircuitBreakerConfig,
        registry: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let sender = Self::new(transport, RetryPolicy::from_config(retry));
        if breaker.enabled {
            sender.with_circuit_breaker(registry, breaker.threshold, breaker.timeout())
        } else {
            sender
        }
    }

    pub fn with_circuit_breaker(
        mut self,
        registry: Arc<CircuitBreakerRegistry>,
        threshold: u32,
        timeout: Duration,
    ) -> Self {
        self.breakers = Some(BreakerSettings {
            registry,
            threshold,
            timeout,
        });
        self
    }

    /// Abandon in-flight sends when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// POST `envelope` as JSON to `url`.
    pub async fn send_envelope(&self, url: Url, envelope: &Envelope) -> DeliveryResult<HttpResponse> {
        let request = OutboundRequest::for_envelope(url, envelope)?;
        self.send(&request).await
    }

    /// Deliver `request`, retrying transient failures.
    pub async fn send(&self, request: &OutboundRequest) -> DeliveryResult<HttpResponse> {
        let destination = request.destination();
        let breaker = self.breakers.as_ref().map(|settings| {
            settings
                .registry
                .get_or_create(&destination, settings.threshold, settings.timeout)
        });

        let start = Instant::now();
        let result = self.run_attempts(request, &destination, breaker.as_deref()).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(DeliveryError::CircuitOpen { .. }) => "circuit_open",
            Err(DeliveryError::Timeout { .. }) => "timeout",
            Err(DeliveryError::Cancelled { .. }) => "cancelled",
            Err(_) => "failed",
        };
        metrics::record_send(&destination, outcome, start);
        result
    }

    async fn run_attempts(
        &self,
        request: &OutboundRequest,
        destination: &str,
        breaker: Option<&CircuitBreaker>,
    ) -> DeliveryResult<HttpResponse> {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut probing = false;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(destination, breaker, probing));
            }

            if let Some(cb) = breaker {
                match cb.try_acquire() {
                    Admission::Allowed => {}
                    Admission::Probe => probing = true,
                    Admission::Rejected => {
                        // Not recorded: this attempt never reached the peer.
                        let consecutive_failures = cb.consecutive_failures();
                        tracing::warn!(
                            destination = %destination,
                            consecutive_failures,
                            attempt,
                            "Circuit open, rejecting send"
                        );
                        metrics::record_circuit_rejection(destination);
                        return Err(DeliveryError::CircuitOpen {
                            destination: destination.to_string(),
                            consecutive_failures,
                        });
                    }
                }
            }

            let call = with_deadline(self.policy.attempt_timeout, self.transport.execute(request));
            let result = tokio::select! {
                result = call => result,
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(destination, breaker, probing));
                }
            };
            attempt += 1;

            let (kind, status, retry_after, cause) = match classify(result) {
                AttemptOutcome::Success(response) => {
                    if let Some(cb) = breaker {
                        cb.record_success();
                    }
                    tracing::debug!(
                        destination = %destination,
                        attempt,
                        status = %response.status,
                        "Send succeeded"
                    );
                    return Ok(response);
                }
                AttemptOutcome::Terminal { kind, status, cause } => {
                    tracing::warn!(
                        destination = %destination,
                        attempt,
                        reason = kind.as_str(),
                        error = %cause,
                        "Non-retriable failure"
                    );
                    return Err(self.give_up(destination, breaker, attempt, kind, status, cause));
                }
                AttemptOutcome::Retriable { kind, status, retry_after, cause } => {
                    (kind, status, retry_after, cause)
                }
            };

            if probing || attempt >= max_attempts {
                tracing::warn!(
                    destination = %destination,
                    attempts = attempt,
                    reason = kind.as_str(),
                    error = %cause,
                    probe = probing,
                    "Retries exhausted"
                );
                return Err(self.give_up(destination, breaker, attempt, kind, status, cause));
            }

            let delay = self.policy.delay_for(attempt - 1, retry_after.as_deref());
            tracing::info!(
                destination = %destination,
                attempt,
                reason = kind.as_str(),
                delay = ?delay,
                "Retrying send"
            );
            metrics::record_retry(destination, kind.as_str());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(destination, breaker, probing));
                }
            }
        }
    }

    fn give_up(
        &self,
        destination: &str,
        breaker: Option<&CircuitBreaker>,
        attempts: u32,
        kind: FailureKind,
        status: Option<StatusCode>,
        cause: String,
    ) -> DeliveryError {
        if let Some(cb) = breaker {
            cb.record_failure();
        }
        if kind == FailureKind::Timeout {
            DeliveryError::Timeout {
                destination: destination.to_string(),
                attempts,
            }
        } else {
            DeliveryError::Connection {
                destination: destination.to_string(),
                attempts,
                status: status.map(|s| s.as_u16()),
                cause,
            }
        }
    }

    fn cancelled(&self, destination: &str, breaker: Option<&CircuitBreaker>, probing: bool) -> DeliveryError {
        if probing {
            if let Some(cb) = breaker {
                cb.release_probe();
            }
        }
        tracing::debug!(destination = %destination, "Send cancelled");
        DeliveryError::Cancelled {
            destination: destination.to_string(),
        }
    }
}

impl std::fmt::Debug for RetrySender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrySender")
            .field("policy", &self.policy)
            .field("circuit_breaker", &self.breakers.is_some())
            .finish()
    }
}
