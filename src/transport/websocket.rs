//! WebSocket client for the ack-aware transport.
//!
//! # Data Flow
//! ```text
//! send() ──→ WsFrameSink ──→ peer
//! peer ──→ receive loop ──┬─ ack frame ──→ AckShared::acknowledge
//!                         └─ envelope  ──→ mpsc::Sender<Envelope> (caller)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::AckConfig;
use crate::envelope::{Envelope, Frame};
use crate::error::{DeliveryError, DeliveryResult};
use crate::resilience::circuit_breaker::{destination_key, CircuitBreaker};
use crate::transport::ack::{AckAwareTransport, AckSettings, AckShared, FrameSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound envelopes buffered between the receive loop and the caller.
/// Envelopes arriving while it is full are dropped.
pub const INBOUND_BUFFER: usize = 256;

/// Write half of a client WebSocket.
pub struct WsFrameSink {
    destination: String,
    writer: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_text(&self, text: String) -> DeliveryResult<()> {
        self.writer
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(|e| DeliveryError::Connection {
                destination: self.destination.clone(),
                attempts: 1,
                status: None,
                cause: e.to_string(),
            })
    }

    async fn close(&self) {
        if let Err(e) = self.writer.lock().await.close().await {
            tracing::debug!(destination = %self.destination, error = %e, "WebSocket close failed");
        }
    }
}

impl AckAwareTransport {
    /// Dial `url` and start the receive loop.
    ///
    /// Non-ack envelopes from the peer are delivered on the returned receiver, best effort:
    /// when the caller falls [`INBOUND_BUFFER`] envelopes behind, newer ones are dropped.
    pub async fn connect(
        url: &Url,
        config: &AckConfig,
        breaker: Option<Arc<CircuitBreaker>>,
    ) -> DeliveryResult<(Self, mpsc::Receiver<Envelope>)> {
        let destination = destination_key(url);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| DeliveryError::Connection {
                destination: destination.clone(),
                attempts: 1,
                status: None,
                cause: e.to_string(),
            })?;
        tracing::info!(destination = %destination, "WebSocket connected");

        let (writer, reader) = stream.split();
        let sink = Arc::new(WsFrameSink {
            destination: destination.clone(),
            writer: Mutex::new(writer),
        });
        let transport = AckAwareTransport::new(sink, AckSettings::from_config(config), breaker);

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let receive = tokio::spawn(receive_loop(reader, transport.shared(), tx, destination));
        transport.attach_task(receive);

        Ok((transport, rx))
    }
}

async fn receive_loop(
    mut reader: SplitStream<WsStream>,
    shared: Arc<AckShared>,
    inbound: mpsc::Sender<Envelope>,
    destination: String,
) {
    loop {
        let message = tokio::select! {
            message = reader.next() => message,
            _ = shared.cancel.cancelled() => break,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!(destination = %destination, "WebSocket closed by peer");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(destination = %destination, error = %e, "WebSocket read failed");
                break;
            }
        };

        match Frame::decode(text.as_str()) {
            Ok(Frame::Ack { message_id }) => {
                shared.acknowledge(&message_id);
            }
            // Never await the caller here: acks queued behind a full buffer would stall.
            Ok(Frame::Envelope(envelope)) => match inbound.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(envelope)) => {
                    tracing::warn!(
                        destination = %destination,
                        message_id = %envelope.id,
                        "Inbound buffer full, dropping envelope"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(destination = %destination, "Inbound receiver dropped");
                }
            },
            Err(e) => {
                tracing::warn!(destination = %destination, error = %e, "Ignoring malformed frame");
            }
        }
    }
}
