//! Server error types.

use std::io;

use hearth_core::HubError;
use thiserror::Error;

/// Errors that can occur in the server runtime.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, etc.).
    ///
    /// Fatal at startup; fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error.
    ///
    /// Bind failures are fatal at startup. At runtime only a failure of the
    /// readiness wait itself carries this variant out of the event loop;
    /// per-connection I/O errors are handled in place.
    #[error("transport error: {0}")]
    Transport(String),

    /// Error from the hub core.
    ///
    /// Defensive surface; the event loop logs these and keeps serving, so
    /// this variant only escapes through explicit driver calls.
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
