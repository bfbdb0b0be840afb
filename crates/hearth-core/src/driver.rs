//! Hub driver.
//!
//! The event→action core of the hub: the runtime feeds it accept, data,
//! close, and tick events together with the current time, and executes the
//! actions it returns. The driver owns all session state and never touches
//! a socket, which keeps it deterministic and testable with a virtual clock.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{
    command::{self, LineKind},
    error::HubError,
    registry::SessionRegistry,
};

/// Default maximum idle time before a session is evicted.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on concurrently registered sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Greeting sent to every newly accepted connection.
pub const WELCOME_LINE: &str = "[System] Welcome! Use '/join <number>' to enter a room.\n";

/// Reply for a marker-prefixed line that matches no known command.
pub const UNKNOWN_COMMAND_LINE: &str = "[System] Unknown command.\n";

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum idle time before a session is evicted.
    pub liveness_timeout: Duration,
    /// Maximum concurrently registered sessions.
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Events the hub driver processes.
///
/// These are produced by the runtime's event loop; the current time is
/// passed alongside rather than read from a clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A new connection was accepted by the listener.
    ConnectionAccepted {
        /// Identifier assigned by the runtime; never reused while open.
        conn_id: u64,
    },

    /// One chunk of bytes was read from a connection.
    ///
    /// The protocol is line-oriented: one read is treated as one logical
    /// message. Split or coalesced lines are not reassembled.
    DataReceived {
        /// Connection the bytes came from.
        conn_id: u64,
        /// The received bytes, verbatim.
        bytes: Bytes,
    },

    /// A connection was closed by the peer or by a read error.
    ConnectionClosed {
        /// Connection that went away.
        conn_id: u64,
        /// Why it went away (peer close vs. read error).
        reason: String,
    },

    /// Periodic liveness sweep. Emitted once per event-loop iteration,
    /// strictly after all readiness dispatch.
    Tick,
}

/// Actions the hub driver produces for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubAction {
    /// Send a payload to one connection.
    Send {
        /// Target connection.
        conn_id: u64,
        /// Bytes to write.
        payload: Bytes,
    },

    /// Deliver a payload to every member of a room except `exclude`.
    ///
    /// Fire-and-forget: the executor reports nothing back and individual
    /// delivery failures must not reach the sender.
    Broadcast {
        /// Target room.
        room_id: i32,
        /// Bytes to write to each recipient.
        payload: Bytes,
        /// Member to skip (the sender).
        exclude: Option<u64>,
    },

    /// Close a connection and drop it from the interest set.
    Close {
        /// Connection to close.
        conn_id: u64,
        /// Reason, for the log.
        reason: String,
    },

    /// Emit a log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

/// Log levels for [`HubAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Action-based hub driver.
///
/// Owns the session registry and implements accept handling, heartbeat
/// refresh, command replies, room-scoped broadcast, and idle eviction.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug)]
pub struct HubDriver<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Session and room membership state.
    registry: SessionRegistry<I>,
    /// Hub configuration.
    config: HubConfig,
}

impl<I> HubDriver<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new hub driver.
    pub fn new(config: HubConfig) -> Self {
        Self { registry: SessionRegistry::new(), config }
    }

    /// Process one event and return the actions to execute.
    ///
    /// This is the single entry point for the runtime.
    pub fn process_event(&mut self, event: HubEvent, now: I) -> Result<Vec<HubAction>, HubError> {
        match event {
            HubEvent::ConnectionAccepted { conn_id } => self.handle_accepted(conn_id, now),
            HubEvent::DataReceived { conn_id, bytes } => self.handle_data(conn_id, &bytes, now),
            HubEvent::ConnectionClosed { conn_id, reason } => {
                Ok(self.handle_closed(conn_id, &reason))
            },
            HubEvent::Tick => Ok(self.handle_tick(now)),
        }
    }

    /// All sessions currently in a room. Used by the runtime to expand
    /// [`HubAction::Broadcast`] into per-connection writes.
    pub fn sessions_in_room(&self, room_id: i32) -> impl Iterator<Item = u64> + '_ {
        self.registry.members_of(room_id)
    }

    /// Room a connection is currently in. `None` if not registered.
    pub fn room_of(&self, conn_id: u64) -> Option<i32> {
        self.registry.room_of(conn_id)
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }

    fn handle_accepted(&mut self, conn_id: u64, now: I) -> Result<Vec<HubAction>, HubError> {
        if self.registry.session_count() >= self.config.max_connections {
            return Ok(vec![
                HubAction::Close { conn_id, reason: "max connections exceeded".to_string() },
                HubAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "connection {conn_id} rejected: {} sessions at limit",
                        self.registry.session_count()
                    ),
                },
            ]);
        }

        if !self.registry.register(conn_id, now) {
            return Err(HubError::SessionAlreadyExists(conn_id));
        }

        Ok(vec![
            HubAction::Send {
                conn_id,
                payload: Bytes::from_static(WELCOME_LINE.as_bytes()),
            },
            HubAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {conn_id} accepted into the lobby"),
            },
        ])
    }

    fn handle_data(
        &mut self,
        conn_id: u64,
        bytes: &Bytes,
        now: I,
    ) -> Result<Vec<HubAction>, HubError> {
        // Any successfully read chunk counts as a liveness signal.
        if !self.registry.touch(conn_id, now) {
            return Err(HubError::SessionNotFound(conn_id));
        }

        match command::interpret(bytes) {
            LineKind::Join(room_id) => {
                let old_room = self
                    .registry
                    .move_to_room(conn_id, room_id)
                    .ok_or(HubError::SessionNotFound(conn_id))?;

                Ok(vec![
                    HubAction::Send {
                        conn_id,
                        payload: Bytes::from(format!(
                            "[System] Moved from Room {old_room} to Room {room_id}\n"
                        )),
                    },
                    HubAction::Log {
                        level: LogLevel::Info,
                        message: format!(
                            "connection {conn_id} moved from room {old_room} to room {room_id}"
                        ),
                    },
                ])
            },

            LineKind::UnknownCommand => Ok(vec![HubAction::Send {
                conn_id,
                payload: Bytes::from_static(UNKNOWN_COMMAND_LINE.as_bytes()),
            }]),

            LineKind::Chat(_) => Ok(self.route_chat(conn_id, bytes.clone())),
        }
    }

    /// Room router: one broadcast to the sender's roommates, sender excluded.
    ///
    /// An unknown sender is a no-op rather than an error; the data handler
    /// already validated the session, so this only guards against state
    /// drift mid-iteration.
    fn route_chat(&self, sender: u64, payload: Bytes) -> Vec<HubAction> {
        let Some(room_id) = self.registry.room_of(sender) else {
            return Vec::new();
        };

        vec![HubAction::Broadcast { room_id, payload, exclude: Some(sender) }]
    }

    fn handle_closed(&mut self, conn_id: u64, reason: &str) -> Vec<HubAction> {
        // A close may race an eviction from the same iteration; the second
        // notification finds nothing to remove and stays silent.
        match self.registry.unregister(conn_id) {
            Some(session) => vec![HubAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "connection {conn_id} closed: {reason} (was in room {})",
                    session.room_id()
                ),
            }],
            None => Vec::new(),
        }
    }

    /// Heartbeat reaper: evict every session idle past the liveness timeout.
    fn handle_tick(&mut self, now: I) -> Vec<HubAction> {
        let mut actions = Vec::new();

        for conn_id in self.registry.expired(now, self.config.liveness_timeout) {
            self.registry.unregister(conn_id);

            actions.push(HubAction::Close { conn_id, reason: "idle timeout".to_string() });
            actions.push(HubAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "connection {conn_id} idle past {:?}, evicting",
                    self.config.liveness_timeout
                ),
            });
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Virtual clock: milliseconds since an arbitrary origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Millis(u64);

    impl Sub for Millis {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            Duration::from_millis(self.0 - rhs.0)
        }
    }

    fn driver() -> HubDriver<Millis> {
        HubDriver::new(HubConfig::default())
    }

    fn accept(driver: &mut HubDriver<Millis>, conn_id: u64, now: Millis) -> Vec<HubAction> {
        driver.process_event(HubEvent::ConnectionAccepted { conn_id }, now).unwrap()
    }

    fn data(
        driver: &mut HubDriver<Millis>,
        conn_id: u64,
        bytes: &'static [u8],
        now: Millis,
    ) -> Vec<HubAction> {
        driver
            .process_event(HubEvent::DataReceived { conn_id, bytes: Bytes::from_static(bytes) }, now)
            .unwrap()
    }

    fn sends_to(actions: &[HubAction]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|a| match a {
                HubAction::Send { conn_id, .. } => Some(*conn_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn accept_sends_welcome_and_registers() {
        let mut hub = driver();

        let actions = accept(&mut hub, 1, Millis(0));

        assert_eq!(hub.session_count(), 1);
        assert_eq!(hub.room_of(1), Some(0));
        assert!(matches!(
            &actions[0],
            HubAction::Send { conn_id: 1, payload } if payload == WELCOME_LINE.as_bytes()
        ));
    }

    #[test]
    fn accept_duplicate_id_is_an_error() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        let result = hub.process_event(HubEvent::ConnectionAccepted { conn_id: 1 }, Millis(1));

        assert_eq!(result, Err(HubError::SessionAlreadyExists(1)));
    }

    #[test]
    fn accept_past_limit_closes_without_welcome() {
        let mut hub: HubDriver<Millis> = HubDriver::new(HubConfig {
            max_connections: 2,
            ..HubConfig::default()
        });

        accept(&mut hub, 1, Millis(0));
        accept(&mut hub, 2, Millis(0));
        let actions = accept(&mut hub, 3, Millis(0));

        assert_eq!(hub.session_count(), 2);
        assert!(matches!(&actions[0], HubAction::Close { conn_id: 3, .. }));
        assert!(sends_to(&actions).is_empty());
    }

    #[test]
    fn chat_reaches_roommates_only() {
        let mut hub = driver();

        // A, B, C join room 5; D stays in the lobby.
        for id in 1..=4 {
            accept(&mut hub, id, Millis(0));
        }
        for id in 1..=3 {
            data(&mut hub, id, b"/join 5", Millis(10));
        }

        let actions = data(&mut hub, 1, b"hello\n", Millis(20));

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            HubAction::Broadcast { room_id, payload, exclude } => {
                assert_eq!(*room_id, 5);
                assert_eq!(payload.as_ref(), b"hello\n");
                assert_eq!(*exclude, Some(1));
            },
            other => panic!("expected Broadcast, got {other:?}"),
        }

        // The room index backing the broadcast holds exactly B and C plus
        // the excluded sender.
        let mut room5: Vec<_> = hub.sessions_in_room(5).collect();
        room5.sort_unstable();
        assert_eq!(room5, vec![1, 2, 3]);
        let lobby: Vec<_> = hub.sessions_in_room(0).collect();
        assert_eq!(lobby, vec![4]);
    }

    #[test]
    fn fresh_connections_share_the_lobby() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        accept(&mut hub, 2, Millis(0));

        let actions = data(&mut hub, 1, b"hi\n", Millis(5));

        assert!(matches!(
            &actions[0],
            HubAction::Broadcast { room_id: 0, exclude: Some(1), .. }
        ));
    }

    #[test]
    fn join_replies_to_sender_alone() {
        let mut hub = driver();

        for id in 1..=5 {
            accept(&mut hub, id, Millis(0));
        }

        let actions = data(&mut hub, 2, b"/join 7", Millis(10));

        assert_eq!(hub.room_of(2), Some(7));
        assert_eq!(sends_to(&actions), vec![2]);
        assert!(matches!(
            &actions[0],
            HubAction::Send { conn_id: 2, payload }
                if payload.as_ref() == b"[System] Moved from Room 0 to Room 7\n"
        ));
        // No broadcast accompanies a room change.
        assert!(!actions.iter().any(|a| matches!(a, HubAction::Broadcast { .. })));
    }

    #[test]
    fn join_non_numeric_lands_in_room_zero() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        data(&mut hub, 1, b"/join 9", Millis(5));

        let actions = data(&mut hub, 1, b"/join abc", Millis(10));

        assert_eq!(hub.room_of(1), Some(0));
        assert!(matches!(
            &actions[0],
            HubAction::Send { conn_id: 1, payload }
                if payload.as_ref() == b"[System] Moved from Room 9 to Room 0\n"
        ));
    }

    #[test]
    fn unknown_command_gets_one_reply_and_no_broadcast() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        accept(&mut hub, 2, Millis(0));

        let actions = data(&mut hub, 1, b"/nonsense", Millis(5));

        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            HubAction::Send { conn_id: 1, payload }
                if payload == UNKNOWN_COMMAND_LINE.as_bytes()
        ));
    }

    #[test]
    fn data_from_unknown_session_is_rejected() {
        let mut hub = driver();

        let result = hub.process_event(
            HubEvent::DataReceived { conn_id: 9, bytes: Bytes::from_static(b"hi") },
            Millis(0),
        );

        assert_eq!(result, Err(HubError::SessionNotFound(9)));
    }

    #[test]
    fn idle_session_is_evicted_on_tick() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));

        // Nothing sent for longer than the 5s default threshold.
        let actions = hub.process_event(HubEvent::Tick, Millis(5_001)).unwrap();

        assert!(matches!(&actions[0], HubAction::Close { conn_id: 1, .. }));
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn active_session_survives_indefinitely() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));

        // One byte within every threshold interval, for many intervals.
        for step in 1..20u64 {
            let now = Millis(step * 4_000);
            data(&mut hub, 1, b"x", now);
            let actions = hub.process_event(HubEvent::Tick, now).unwrap();
            assert!(actions.is_empty(), "evicted at step {step}: {actions:?}");
        }

        assert_eq!(hub.session_count(), 1);
    }

    #[test]
    fn eviction_removes_from_broadcast_consideration() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        accept(&mut hub, 2, Millis(0));

        // Only connection 2 stays alive.
        data(&mut hub, 2, b"x", Millis(5_000));
        hub.process_event(HubEvent::Tick, Millis(5_500)).unwrap();

        let lobby: Vec<_> = hub.sessions_in_room(0).collect();
        assert_eq!(lobby, vec![2]);
    }

    #[test]
    fn disconnect_leaves_room_intact_for_others() {
        let mut hub = driver();

        for id in 1..=3 {
            accept(&mut hub, id, Millis(0));
            data(&mut hub, id, b"/join 4", Millis(1));
        }

        hub.process_event(
            HubEvent::ConnectionClosed { conn_id: 2, reason: "peer closed".to_string() },
            Millis(2),
        )
        .unwrap();

        let actions = data(&mut hub, 1, b"still here\n", Millis(3));
        assert!(matches!(
            &actions[0],
            HubAction::Broadcast { room_id: 4, exclude: Some(1), .. }
        ));

        let mut room4: Vec<_> = hub.sessions_in_room(4).collect();
        room4.sort_unstable();
        assert_eq!(room4, vec![1, 3]);
    }

    #[test]
    fn close_after_eviction_is_silent() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        hub.process_event(HubEvent::Tick, Millis(6_000)).unwrap();

        let actions = hub
            .process_event(
                HubEvent::ConnectionClosed { conn_id: 1, reason: "read error".to_string() },
                Millis(6_001),
            )
            .unwrap();

        assert!(actions.is_empty());
    }

    #[test]
    fn tick_exactly_at_threshold_does_not_evict() {
        let mut hub = driver();

        accept(&mut hub, 1, Millis(0));
        let actions = hub.process_event(HubEvent::Tick, Millis(5_000)).unwrap();

        assert!(actions.is_empty());
        assert_eq!(hub.session_count(), 1);
    }
}
