//! Hearth production server.
//!
//! Single-threaded, readiness-multiplexed runtime for the hub core. One
//! thread owns everything: the listening socket, the per-connection
//! streams, the interest set, and the [`HubDriver`]. Each loop iteration
//! waits on the multiplexer with a bounded timeout, dispatches every ready
//! endpoint (listener → accept, connection → read), then feeds a tick to
//! the driver so idle sessions are reaped — all without a single lock,
//! because no other thread of control exists.
//!
//! # Architecture
//!
//! This crate provides production glue around [`hearth_core`]'s
//! action-based logic: the [`HubDriver`] decides, the [`Server`] executes.
//! Writes are fire-and-forget; a failed delivery is logged and the broken
//! peer is caught by its own read error or by the liveness sweep.
//!
//! # Components
//!
//! - [`Server`]: the event loop and action executor
//! - [`Multiplexer`] / [`PollMux`]: readiness notification strategy
//! - [`TcpTransport`]: the listening endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mux;
mod transport;

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use bytes::Bytes;
pub use error::ServerError;
pub use hearth_core::HubConfig;
use hearth_core::{HubAction, HubDriver, HubEvent, LogLevel};
use mio::net::TcpStream;
pub use mux::{LISTENER_ID, Multiplexer, PollMux};
pub use transport::TcpTransport;

/// Default upper bound on one readiness wait.
///
/// Short enough that the liveness sweep runs several times per default
/// eviction threshold even with no traffic at all.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Bytes read from a connection in one call. The protocol is line-oriented
/// text where one read is one logical message; longer or split messages are
/// not reassembled.
const READ_BUFFER_SIZE: usize = 1024;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:9000").
    pub bind_address: String,
    /// Upper bound on one readiness wait.
    pub poll_timeout: Duration,
    /// Hub configuration (liveness timeout, connection limit).
    pub hub: HubConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            hub: HubConfig::default(),
        }
    }
}

/// Production hub server.
///
/// Wraps [`HubDriver`] with a TCP listener and a readiness multiplexer.
/// Generic over the [`Multiplexer`] so the notification strategy can be
/// swapped without touching the loop.
pub struct Server<M = PollMux>
where
    M: Multiplexer,
{
    /// The action-based hub driver.
    driver: HubDriver,
    /// Listening endpoint.
    transport: TcpTransport,
    /// Interest set / readiness notification.
    mux: M,
    /// Live connection streams, keyed by connection id.
    ///
    /// Kept in lockstep with the driver's registry and the interest set:
    /// entries are added and removed within the same loop iteration.
    connections: HashMap<u64, TcpStream>,
    /// Next connection id to hand out; never reused.
    next_conn_id: u64,
    /// Upper bound on one readiness wait.
    poll_timeout: Duration,
}

impl Server<PollMux> {
    /// Create and bind a new server.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let mut transport = TcpTransport::bind(&config.bind_address)?;

        let mut mux = PollMux::new()
            .map_err(|e| ServerError::Transport(format!("failed to create poller: {e}")))?;
        mux.register_listener(transport.listener_mut())
            .map_err(|e| ServerError::Transport(format!("failed to watch listener: {e}")))?;

        Ok(Self {
            driver: HubDriver::new(config.hub),
            transport,
            mux,
            connections: HashMap::new(),
            next_conn_id: LISTENER_ID + 1,
            poll_timeout: config.poll_timeout,
        })
    }
}

impl<M> Server<M>
where
    M: Multiplexer,
{
    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the event loop.
    ///
    /// Returns only when the readiness wait itself fails; everything else —
    /// accept failures, per-connection read and write errors, hub
    /// rejections — is handled in place and the loop keeps serving.
    pub fn run(mut self) -> Result<(), ServerError> {
        tracing::info!("hub serving on {}", self.transport.local_addr()?);

        loop {
            let ready = match self.mux.wait(self.poll_timeout) {
                Ok(ready) => ready,
                Err(e) => {
                    tracing::error!("readiness wait failed: {e}");
                    return Err(ServerError::Transport(format!("readiness wait failed: {e}")));
                },
            };

            // Ascending id order; the listener (id 0) comes first when ready.
            for conn_id in ready {
                if conn_id == LISTENER_ID {
                    self.accept_pending();
                } else if self.connections.contains_key(&conn_id) {
                    // Ids closed earlier in this iteration are skipped.
                    self.drain_connection(conn_id);
                }
            }

            // Liveness sweep, strictly after all dispatch for this iteration.
            self.dispatch(HubEvent::Tick);
        }
    }

    /// Accept every pending inbound connection.
    ///
    /// The ready-only multiplexer signals the listener once per edge, so
    /// this drains the backlog to `WouldBlock`.
    fn accept_pending(&mut self) {
        loop {
            match self.transport.accept() {
                Ok((mut stream, peer_addr)) => {
                    let conn_id = self.next_conn_id;
                    self.next_conn_id += 1;

                    if let Err(e) = self.mux.register(conn_id, &mut stream) {
                        tracing::warn!("cannot watch connection {conn_id} from {peer_addr}: {e}");
                        continue;
                    }

                    self.connections.insert(conn_id, stream);
                    tracing::debug!(
                        "accepted connection {conn_id} from {peer_addr} ({} watched, high water {})",
                        self.mux.watched(),
                        self.mux.high_water()
                    );

                    self.dispatch(HubEvent::ConnectionAccepted { conn_id });
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    // Non-fatal: log and retry on the next readiness.
                    tracing::warn!("accept failed: {e}");
                    break;
                },
            }
        }
    }

    /// Read a ready connection until it has nothing more to give.
    ///
    /// Each successful chunk is one logical message for the hub. Zero bytes
    /// means the peer closed; a real error is treated the same way, the two
    /// differing only in the logged reason.
    fn drain_connection(&mut self, conn_id: u64) {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let read_result = match self.connections.get_mut(&conn_id) {
                Some(stream) => stream.read(&mut buf),
                None => return,
            };

            match read_result {
                Ok(0) => {
                    self.close_connection(conn_id);
                    self.dispatch(HubEvent::ConnectionClosed {
                        conn_id,
                        reason: "peer closed".to_string(),
                    });
                    return;
                },
                Ok(n) => {
                    let bytes = Bytes::copy_from_slice(&buf[..n]);
                    self.dispatch(HubEvent::DataReceived { conn_id, bytes });
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    self.close_connection(conn_id);
                    self.dispatch(HubEvent::ConnectionClosed {
                        conn_id,
                        reason: format!("read error: {e}"),
                    });
                    return;
                },
            }
        }
    }

    /// Feed one event to the driver and execute the resulting actions.
    fn dispatch(&mut self, event: HubEvent) {
        match self.driver.process_event(event, Instant::now()) {
            Ok(actions) => self.execute_actions(actions),
            Err(e) => tracing::warn!("hub rejected event: {e}"),
        }
    }

    /// Execute hub actions.
    fn execute_actions(&mut self, actions: Vec<HubAction>) {
        for action in actions {
            match action {
                HubAction::Send { conn_id, payload } => {
                    self.write_payload(conn_id, &payload);
                },

                HubAction::Broadcast { room_id, payload, exclude } => {
                    let recipients: Vec<u64> = self
                        .driver
                        .sessions_in_room(room_id)
                        .filter(|id| Some(*id) != exclude)
                        .collect();

                    for conn_id in recipients {
                        self.write_payload(conn_id, &payload);
                    }
                },

                HubAction::Close { conn_id, reason } => {
                    tracing::info!("closing connection {conn_id}: {reason}");
                    self.close_connection(conn_id);
                },

                HubAction::Log { level, message } => match level {
                    LogLevel::Debug => tracing::debug!("{message}"),
                    LogLevel::Info => tracing::info!("{message}"),
                    LogLevel::Warn => tracing::warn!("{message}"),
                    LogLevel::Error => tracing::error!("{message}"),
                },
            }
        }
    }

    /// Best-effort write to one connection.
    ///
    /// Failures are logged and never surfaced to the sender; a broken peer
    /// is reaped by its own read error or the liveness sweep.
    fn write_payload(&mut self, conn_id: u64, payload: &[u8]) {
        let Some(stream) = self.connections.get_mut(&conn_id) else {
            tracing::debug!("dropping write to closed connection {conn_id}");
            return;
        };

        if let Err(e) = stream.write_all(payload) {
            tracing::warn!("write to connection {conn_id} failed: {e}");
        }
    }

    /// Drop a connection from the stream map and the interest set.
    ///
    /// The stream is closed when it drops; the registry side is handled by
    /// the driver (either it already evicted the session, or the caller
    /// follows up with a close event).
    fn close_connection(&mut self, conn_id: u64) {
        if let Some(mut stream) = self.connections.remove(&conn_id) {
            if let Err(e) = self.mux.deregister(&mut stream) {
                tracing::debug!("deregister failed for connection {conn_id}: {e}");
            }
        }
    }
}
