//! Acknowledgement-aware transport over a persistent connection.
//!
//! # Responsibilities
//! - Transmit envelopes once and track the ones whose type requires an ack
//! - Sweep pending entries on a timer: retransmit verbatim, or give up and
//!   escalate to the circuit breaker
//! - Clear entries when the receive side observes an ack
//!
//! # Design Decisions
//! - The pending map is the only state shared between `send`, the sweep and the
//!   receive loop; it is locked briefly and never across an await
//! - Retransmits reuse the exact bytes of the first transmission (same id)
//! - Exhaustion is not reported to the original `send` caller; it only shows up
//!   through the breaker, logs and metrics
//! - Closing cancels and joins the background tasks and discards pending entries

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::AckConfig;
use crate::envelope::{Envelope, Frame};
use crate::error::{DeliveryError, DeliveryResult};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Outbound half of a duplex connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, text: String) -> DeliveryResult<()>;

    /// Close the underlying connection. Defaults to doing nothing.
    async fn close(&self) {}
}

/// A message awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub message_id: String,
    pub sent_at: Instant,
    pub retry_count: u32,
    pub original_message: Arc<Envelope>,
    encoded: Arc<str>,
}

/// Timing and selection parameters for ack tracking.
#[derive(Debug, Clone)]
pub struct AckSettings {
    pub ack_timeout: Duration,
    pub max_ack_retries: u32,
    pub check_interval: Duration,
    pub ack_required: HashSet<String>,
}

impl AckSettings {
    pub fn from_config(config: &AckConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            max_ack_retries: config.max_ack_retries,
            check_interval: config.check_interval(),
            ack_required: config.ack_required_types.iter().cloned().collect(),
        }
    }

    pub fn requires_ack(&self, payload_type: &str) -> bool {
        self.ack_required.contains(payload_type)
    }
}

impl Default for AckSettings {
    fn default() -> Self {
        Self::from_config(&AckConfig::default())
    }
}

/// State shared by the transport handle, the sweep and the receive loop.
pub(crate) struct AckShared {
    sink: Arc<dyn FrameSink>,
    pending: Mutex<HashMap<String, PendingAck>>,
    settings: AckSettings,
    breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) cancel: CancellationToken,
}

impl AckShared {
    /// Remove the entry for `message_id`. Returns whether one was pending.
    pub(crate) fn acknowledge(&self, message_id: &str) -> bool {
        let removed = self.pending.lock().remove(message_id).is_some();
        if removed {
            metrics::adjust_pending_acks(-1.0);
            tracing::debug!(message_id = %message_id, "Ack received");
        } else {
            tracing::debug!(message_id = %message_id, "Ack for unknown or already settled message");
        }
        removed
    }

    fn discard_pending(&self) -> usize {
        let drained = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if drained > 0 {
            metrics::adjust_pending_acks(-(drained as f64));
        }
        drained
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut retransmit = Vec::new();
        let mut exhausted = Vec::new();

        {
            let mut pending = self.pending.lock();
            pending.retain(|id, entry| {
                if now.duration_since(entry.sent_at) < self.settings.ack_timeout {
                    return true;
                }
                if entry.retry_count >= self.settings.max_ack_retries {
                    exhausted.push((id.clone(), entry.retry_count));
                    return false;
                }
                entry.retry_count += 1;
                entry.sent_at = now;
                retransmit.push((id.clone(), entry.retry_count, entry.encoded.clone()));
                true
            });
        }

        for (message_id, retries) in exhausted {
            metrics::adjust_pending_acks(-1.0);
            metrics::record_ack_exhausted();
            tracing::warn!(message_id = %message_id, retries, "Ack retries exhausted, giving up");
            if let Some(cb) = &self.breaker {
                cb.record_failure();
            }
        }

        for (message_id, attempt, encoded) in retransmit {
            if self.cancel.is_cancelled() {
                return;
            }
            metrics::record_ack_retransmit();
            tracing::info!(message_id = %message_id, attempt, "Retransmitting unacknowledged message");
            if let Err(e) = self.sink.send_text(encoded.to_string()).await {
                // Still counted; the next sweep either retries again or gives up.
                tracing::warn!(message_id = %message_id, attempt, error = %e, "Retransmit failed");
            }
        }
    }
}

/// Sends envelopes over a persistent connection, retransmitting critical ones until
/// acknowledged.
pub struct AckAwareTransport {
    shared: Arc<AckShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AckAwareTransport {
    /// Wrap `sink` and start the sweep loop. Must be called inside a Tokio runtime.
    pub fn new(sink: Arc<dyn FrameSink>, settings: AckSettings, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        let shared = Arc::new(AckShared {
            sink,
            pending: Mutex::new(HashMap::new()),
            settings,
            breaker,
            cancel: CancellationToken::new(),
        });
        let sweep = tokio::spawn(run_sweep(shared.clone()));
        Self {
            shared,
            tasks: Mutex::new(vec![sweep]),
        }
    }

    pub fn from_config(sink: Arc<dyn FrameSink>, config: &AckConfig, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        Self::new(sink, AckSettings::from_config(config), breaker)
    }

    pub(crate) fn shared(&self) -> Arc<AckShared> {
        self.shared.clone()
    }

    /// Track a task that must stop when the transport closes.
    pub(crate) fn attach_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Transmit `envelope` once, registering it for ack tracking when its type requires it.
    pub async fn send(&self, envelope: Envelope) -> DeliveryResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        let message_id = envelope.id.clone();
        let tracked = self.shared.settings.requires_ack(&envelope.payload_type);
        let envelope = Arc::new(envelope);
        let encoded: Arc<str> = Frame::Envelope((*envelope).clone()).encode()?.into();

        if tracked {
            // Registered first so an ack racing the transmit still finds its entry.
            let entry = PendingAck {
                message_id: message_id.clone(),
                sent_at: Instant::now(),
                retry_count: 0,
                original_message: envelope.clone(),
                encoded: encoded.clone(),
            };
            if self.shared.pending.lock().insert(message_id.clone(), entry).is_none() {
                metrics::adjust_pending_acks(1.0);
            }
        }

        if let Err(e) = self.shared.sink.send_text(encoded.to_string()).await {
            if tracked && self.shared.pending.lock().remove(&message_id).is_some() {
                metrics::adjust_pending_acks(-1.0);
            }
            tracing::warn!(message_id = %message_id, error = %e, "Transmit failed");
            return Err(e);
        }

        tracing::debug!(
            message_id = %message_id,
            payload_type = %envelope.payload_type,
            tracked,
            "Envelope transmitted"
        );
        Ok(())
    }

    /// Settle `message_id`. Returns whether it was pending.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        self.shared.acknowledge(message_id)
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.shared.pending.lock().contains_key(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Snapshot of one pending entry.
    pub fn pending(&self, message_id: &str) -> Option<PendingAck> {
        self.shared.pending.lock().get(message_id).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop background tasks, discard pending entries and close the connection.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Transport task failed");
                }
            }
        }
        let discarded = self.shared.discard_pending();
        self.shared.sink.close().await;
        tracing::info!(discarded, "Ack-aware transport closed");
    }
}

impl Drop for AckAwareTransport {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn run_sweep(shared: Arc<AckShared>) {
    let mut ticker = time::interval(shared.settings.check_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => shared.sweep().await,
            _ = shared.cancel.cancelled() => {
                tracing::debug!("Ack sweep stopping");
                break;
            }
        }
    }
}
