//! Error kinds, one per surface described in spec.md §7. Steady-state
//! per-listener faults (transient-io / fatal-io) aren't modeled here — they
//! terminate only the sender loop and are reported via `sender::Tick`, not
//! `Result`, per §7's propagation rules.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FallbackError {
    #[error("mount not found: {0}")]
    NotFound(String),

    #[error("forbidden: {message}")]
    Forbidden {
        message: String,
        /// Set when the caller should receive a redirect hint (e.g. mount
        /// at capacity, spec.md §4.4 step 3).
        redirect: bool,
    },

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("format mismatch for existing fallback handle")]
    FormatMismatch,

    #[error("cache is write-locked, would block")]
    WouldBlock,
}

impl FallbackError {
    pub fn forbidden(message: impl Into<String>, redirect: bool) -> Self {
        Self::Forbidden {
            message: message.into(),
            redirect,
        }
    }
}
