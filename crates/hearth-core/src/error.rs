//! Error types for the hub core.
//!
//! These are defensive surfaces: the driver's invariants (an event is only
//! delivered for a connection the event loop still tracks) make them
//! unreachable in a correct runtime. The runtime logs them and keeps
//! serving; it never tears down the loop over one bad session reference.

use thiserror::Error;

/// Errors that can occur while processing a hub event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Event referenced a connection that has no registered session.
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// Accept event reused a connection ID that is still registered.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(u64),
}
