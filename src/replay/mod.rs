//! Replay protection for inbound envelopes.
//!
//! # Data Flow
//! ```text
//! Inbound envelope
//!     → validator.rs (timestamp within [now - max_age, now + tolerance])
//!     → validator.rs (nonce present? non-empty string?)
//!     → nonce.rs (atomic check-and-mark, TTL = 2 × max_age)
//! ```
//!
//! # Design Decisions
//! - Nonce TTL outlives the freshness window, so a replay is caught by one check or the other
//! - Nonce checking is optional per deployment; timestamps are always checked
//! - Expiry is lazy; there is no background purge task

pub mod nonce;
pub mod validator;

pub use nonce::{InMemoryNonceStore, NonceStore};
pub use validator::ReplayValidator;
