//! Outbound transports.
//!
//! # Data Flow
//! ```text
//! Request/response path:
//!     RetrySender → HttpTransport (reqwest) → peer
//!
//! Persistent-connection path:
//!     AckAwareTransport → FrameSink (WebSocket) → peer
//!         ↑ sweep: retransmit / give up → CircuitBreaker
//!         ↑ receive loop: ack frames clear pending entries
//! ```

pub mod ack;
pub mod http;
pub mod websocket;

pub use ack::{AckAwareTransport, AckSettings, FrameSink, PendingAck};
pub use http::{HttpResponse, HttpTransport, OutboundRequest, ReqwestTransport, TransportFailure, MESSAGE_ID_HEADER};
pub use websocket::WsFrameSink;
