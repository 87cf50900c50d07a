//! Error types for rcctl.
//!
//! Every failure an administration step can hit falls into one of three
//! groups: a precondition that was checked before touching the cluster, a
//! remote primitive that failed against one node, or a local problem
//! (parsing, configuration, I/O). Findings about cluster health are not
//! errors at all; they live in [`crate::check::CheckReport`].

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RcctlError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum RcctlError {
    /// Invalid input, insufficient nodes or slots, unknown node ids,
    /// dependent replicas. Always raised before any mutating call.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A cluster primitive failed against one node.
    #[error("{operation} on {addr} failed: {message}")]
    Remote {
        addr: String,
        operation: &'static str,
        message: String,
    },

    /// A cluster primitive did not answer within its timeout.
    #[error("{operation} on {addr} timed out after {duration:?}")]
    Timeout {
        addr: String,
        operation: &'static str,
        duration: Duration,
    },

    /// A node listing, slot entry or address could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The configuration file is missing, malformed or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RcctlError {
    /// Build a [`RcctlError::Remote`] from any displayable cause.
    pub fn remote(addr: impl ToString, operation: &'static str, cause: impl ToString) -> Self {
        RcctlError::Remote {
            addr: addr.to_string(),
            operation,
            message: cause.to_string(),
        }
    }

    /// True when the store rejected a slot claim because the slot already
    /// has an owner ("Slot N is already busy").
    pub fn is_slot_busy(&self) -> bool {
        match self {
            RcctlError::Remote { message, .. } => message.contains("already busy"),
            _ => false,
        }
    }

    /// True for errors raised by a remote node (including timeouts).
    pub fn is_remote(&self) -> bool {
        matches!(self, RcctlError::Remote { .. } | RcctlError::Timeout { .. })
    }
}
