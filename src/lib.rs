//! Delivery-resilience core for agent-to-agent messaging.
//!
//! # Architecture Overview
//!
//! ```text
//!   sender side                                         receiving side
//!   ───────────                                         ──────────────
//!   RetrySender ──→ HttpTransport ──── POST ───→ InboundServer
//!       │                                           │  dedup by id
//!       │                                           │  ReplayValidator ──→ NonceStore
//!       ▼                                           ▼
//!   CircuitBreakerRegistry                     mpsc::Sender<Envelope>
//!       ▲
//!       │ exhaustion
//!   AckAwareTransport ──→ FrameSink ──── WS ───→ InboundServer (/ws)
//!       ▲ ack frames ─────────────────────────────────┘
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod replay;
pub mod resilience;
pub mod transport;

pub use config::CourierConfig;
pub use envelope::{Envelope, Frame};
pub use error::{DeliveryError, DeliveryResult, ReplayError};
pub use http::{InboundServer, InboundState};
pub use lifecycle::Shutdown;
pub use replay::{InMemoryNonceStore, NonceStore, ReplayValidator};
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, RetrySender};
pub use transport::{AckAwareTransport, HttpTransport, ReqwestTransport};
