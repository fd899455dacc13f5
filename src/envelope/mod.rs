//! Protocol envelopes as seen by the delivery layer.
//!
//! Schema validation, signing and routing live elsewhere; this module only carries
//! the fields delivery and replay protection read (`id`, `payload_type`, `timestamp`,
//! `extensions.nonce`) plus the frame wrapper used on persistent connections.

pub mod types;

pub use types::{Envelope, Frame, NONCE_EXTENSION};

/// Well-known payload types.
pub mod payload_types {
    pub const TASK_REQUEST: &str = "task.request";
    pub const TASK_RESPONSE: &str = "task.response";
    pub const TASK_UPDATE: &str = "task.update";
    pub const TASK_CANCEL: &str = "task.cancel";
    pub const STATE_QUERY: &str = "state.query";
    pub const STATE_RESPONSE: &str = "state.response";
    pub const TOOL_CALL: &str = "tool.call";
    pub const TOOL_RESULT: &str = "tool.result";

    /// Commands whose loss would silently drop work. Progress updates are best-effort.
    pub const ACK_REQUIRED: &[&str] = &[TASK_REQUEST, TASK_CANCEL, STATE_QUERY, TOOL_CALL];
}
