//! Inbound WebSocket handling.
//!
//! # Data Flow
//! ```text
//! Peer ── envelope frame ──→ InboundState::accept ──→ consumer
//!   ↑                               │
//!   └──────── ack frame ←───────────┘ (accepted or duplicate)
//! ```
//!
//! # Design Decisions
//! - Rejected envelopes get no ack; the peer's sweep eventually gives up on them
//! - Ack frames from the peer are ignored; this endpoint only receives
//! - Replies go through a channel so the read loop never blocks on the socket writer

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::envelope::Frame;
use crate::http::server::InboundState;

const REPLY_BUFFER: usize = 64;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<InboundState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: InboundState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(REPLY_BUFFER);

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_frame(text.as_str(), &state, &tx).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    tracing::debug!("Inbound WebSocket closed");
}

async fn handle_frame(text: &str, state: &InboundState, replies: &mpsc::Sender<String>) {
    let envelope = match Frame::decode(text) {
        Ok(Frame::Envelope(envelope)) => envelope,
        Ok(Frame::Ack { message_id }) => {
            tracing::debug!(message_id = %message_id, "Ignoring ack on inbound socket");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed frame");
            return;
        }
    };

    let message_id = envelope.id.clone();
    let acceptance = state.accept(envelope).await;
    if !acceptance.acknowledges() {
        tracing::warn!(message_id = %message_id, outcome = acceptance.outcome(), "Envelope not acknowledged");
        return;
    }

    match Frame::ack(message_id).encode() {
        Ok(ack) => {
            let _ = replies.send(ack).await;
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode ack"),
    }
}
