//! Inbound envelope endpoint.
//!
//! # Responsibilities
//! - Accept envelopes over `POST /envelopes` and `GET /ws`
//! - Reserve the message id atomically before replay validation
//! - Run replay protection, then hand accepted envelopes to the consumer
//! - Wire up middleware (request ID, tracing, timeout, body limit)

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ListenerConfig;
use crate::envelope::Envelope;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::Acceptance;
use crate::http::websocket::ws_handler;
use crate::observability::metrics;
use crate::replay::{InMemoryNonceStore, NonceStore, ReplayValidator};

/// Shared state for inbound handlers.
#[derive(Clone)]
pub struct InboundState {
    validator: Arc<ReplayValidator>,
    seen: Arc<dyn NonceStore>,
    deliveries: mpsc::Sender<Envelope>,
}

impl InboundState {
    pub fn new(validator: ReplayValidator, deliveries: mpsc::Sender<Envelope>) -> Self {
        Self {
            validator: Arc::new(validator),
            seen: Arc::new(InMemoryNonceStore::new()),
            deliveries,
        }
    }

    /// Run one envelope through dedup, replay validation and hand-off.
    ///
    /// The message id is reserved atomically before validation, so a retransmit carrying
    /// the same nonce is answered as a duplicate rather than mistaken for a replay, and two
    /// concurrent deliveries of one id cannot both be handed off. The reservation is
    /// released when the envelope is rejected or cannot be handed off.
    pub async fn accept(&self, envelope: Envelope) -> Acceptance {
        let ttl = self.validator.nonce_ttl();

        let acceptance = if !self.seen.check_and_mark(&envelope.id, ttl) {
            Acceptance::Duplicate
        } else if let Err(err) = self.validator.validate(&envelope) {
            self.seen.release(&envelope.id);
            Acceptance::Rejected(err)
        } else {
            let message_id = envelope.id.clone();
            let payload_type = envelope.payload_type.clone();
            match self.deliveries.send(envelope).await {
                Ok(()) => {
                    tracing::debug!(message_id = %message_id, payload_type = %payload_type, "Envelope accepted");
                    Acceptance::Accepted
                }
                Err(mpsc::error::SendError(envelope)) => {
                    tracing::error!(message_id = %message_id, "Envelope consumer gone");
                    self.seen.release(&message_id);
                    self.validator.release_nonce(&envelope);
                    Acceptance::Unavailable
                }
            }
        };

        metrics::record_inbound(acceptance.outcome());
        acceptance
    }
}

/// HTTP/WebSocket server feeding accepted envelopes into an mpsc channel.
pub struct InboundServer {
    router: Router,
    config: ListenerConfig,
}

impl InboundServer {
    pub fn new(config: ListenerConfig, state: InboundState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ListenerConfig, state: InboundState) -> Router {
        Router::new()
            .route("/envelopes", post(envelope_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The configured router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Inbound server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("Inbound server stopped");
        Ok(())
    }
}

async fn envelope_handler(
    State(state): State<InboundState>,
    headers: HeaderMap,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    let request_id = request_id(&headers).to_string();
    let message_id = envelope.id.clone();
    let acceptance = state.accept(envelope).await;

    tracing::info!(
        request_id = %request_id,
        message_id = %message_id,
        outcome = acceptance.outcome(),
        "Inbound envelope"
    );
    acceptance
}
