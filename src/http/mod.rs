//! Inbound HTTP/WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → server.rs / websocket.rs (decode envelope)
//!     → InboundState::accept (dedup → replay validation → consumer channel)
//!     → response.rs (status code / ack frame)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use response::Acceptance;
pub use server::{InboundServer, InboundState};
