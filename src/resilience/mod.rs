//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound send:
//!     → circuit_breaker.rs (admit, probe, or reject per destination)
//!     → timeouts.rs (per-attempt deadline)
//!     → retries.rs (classify, back off, retry)
//!     → circuit_breaker.rs (one success/failure per logical send)
//! ```
//!
//! # Design Decisions
//! - Breakers live in an explicit registry passed by `Arc`, never a global
//! - Intermediate retry failures do not count against the breaker
//! - Backoff honors `Retry-After` before computed delays

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::{calculate_backoff, parse_retry_after};
pub use circuit_breaker::{destination_key, Admission, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use retries::{classify, AttemptOutcome, FailureKind, RetryPolicy, RetrySender};
pub use timeouts::with_deadline;
