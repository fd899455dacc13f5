//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CourierConfig (validated, immutable)
//!     → sections handed to senders, transports and the inbound server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breakers keep the parameters they were created with
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AckConfig, CircuitBreakerConfig, CourierConfig, ListenerConfig, ObservabilityConfig,
    ReplayConfig, RetryConfig, MAX_ENVELOPE_AGE_SECONDS, MAX_FUTURE_TOLERANCE_SECONDS,
    NONCE_TTL_SECONDS,
};
