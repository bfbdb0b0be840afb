//! Hearth protocol core.
//!
//! Sans-IO logic for a line-oriented chat hub: clients are grouped into
//! integer-numbered rooms, chat lines are broadcast to roommates, and
//! sessions that stop sending bytes are evicted after a liveness timeout.
//!
//! # Architecture
//!
//! The crate follows the action pattern: the runtime feeds [`HubEvent`]s
//! (accept, data, close, tick) plus the current time into
//! [`HubDriver::process_event`] and executes the returned [`HubAction`]s
//! (send, broadcast, close, log). The driver owns all mutable session state
//! and performs no I/O, so the whole protocol is testable with a virtual
//! clock and no sockets.
//!
//! # Components
//!
//! - [`SessionRegistry`]: session → room and room → members bookkeeping
//! - [`interpret`]: pure classification of an inbound line
//! - [`HubDriver`]: event→action orchestrator (routing, replies, eviction)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod driver;
pub mod error;
pub mod registry;

pub use command::{COMMAND_MARKER, LineKind, interpret};
pub use driver::{
    DEFAULT_LIVENESS_TIMEOUT, DEFAULT_MAX_CONNECTIONS, HubAction, HubConfig, HubDriver, HubEvent,
    LogLevel, UNKNOWN_COMMAND_LINE, WELCOME_LINE,
};
pub use error::HubError;
pub use registry::{LOBBY_ROOM, Session, SessionRegistry};
