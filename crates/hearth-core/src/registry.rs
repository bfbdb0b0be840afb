//! Session registry: per-connection state and room membership.
//!
//! The registry maintains bidirectional mappings: session → room (for
//! routing a sender's message) and room → member set (for broadcast). Both
//! are updated together so lookups stay O(1) in either direction. Empty
//! member sets are pruned when the last session leaves a room.
//!
//! The registry is owned exclusively by the hub driver; nothing else mutates
//! it. Time is passed in as a parameter, never read from a clock, so the
//! type is generic over the instant representation and tests can drive it
//! with a virtual clock.

use std::{
    collections::{HashMap, HashSet},
    ops::Sub,
    time::{Duration, Instant},
};

/// Room every session starts in.
pub const LOBBY_ROOM: i32 = 0;

/// State tracked for one registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current room. Mutated only through [`SessionRegistry::move_to_room`]
    /// so the room index stays consistent.
    room_id: i32,
    /// Last time any bytes were read from this session.
    last_active: I,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Room the session is currently in.
    pub fn room_id(&self) -> i32 {
        self.room_id
    }

    /// Last observed activity instant.
    pub fn last_active(&self) -> I {
        self.last_active
    }
}

/// Registry of live sessions and their room membership.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct SessionRegistry<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Connection ID → session state
    sessions: HashMap<u64, Session<I>>,
    /// Room ID → set of member connection IDs
    rooms: HashMap<i32, HashSet<u64>>,
}

impl<I> SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self { sessions: HashMap::new(), rooms: HashMap::new() }
    }

    /// Register a new session in the lobby with `now` as its first activity.
    ///
    /// Returns `false` if the connection ID is already registered.
    pub fn register(&mut self, conn_id: u64, now: I) -> bool {
        if self.sessions.contains_key(&conn_id) {
            return false;
        }

        self.sessions.insert(conn_id, Session { room_id: LOBBY_ROOM, last_active: now });
        self.rooms.entry(LOBBY_ROOM).or_default().insert(conn_id);
        true
    }

    /// Remove a session and its room membership.
    ///
    /// Returns the removed session state if it existed.
    pub fn unregister(&mut self, conn_id: u64) -> Option<Session<I>> {
        let session = self.sessions.remove(&conn_id)?;
        self.remove_member(session.room_id, conn_id);
        Some(session)
    }

    /// Check if a session is registered.
    pub fn has_session(&self, conn_id: u64) -> bool {
        self.sessions.contains_key(&conn_id)
    }

    /// Room a session is currently in. `None` if not registered.
    pub fn room_of(&self, conn_id: u64) -> Option<i32> {
        self.sessions.get(&conn_id).map(|s| s.room_id)
    }

    /// Move a session to another room, updating the member index.
    ///
    /// Returns the previous room, or `None` if the session is not
    /// registered. Moving to the current room is a valid (observable) no-op.
    pub fn move_to_room(&mut self, conn_id: u64, room_id: i32) -> Option<i32> {
        let session = self.sessions.get_mut(&conn_id)?;
        let old_room = session.room_id;
        session.room_id = room_id;

        if old_room != room_id {
            self.remove_member(old_room, conn_id);
            self.rooms.entry(room_id).or_default().insert(conn_id);
        }

        Some(old_room)
    }

    /// Refresh a session's activity instant.
    ///
    /// Returns `false` if the session is not registered.
    pub fn touch(&mut self, conn_id: u64, now: I) -> bool {
        match self.sessions.get_mut(&conn_id) {
            Some(session) => {
                session.last_active = now;
                true
            },
            None => false,
        }
    }

    /// All sessions currently in a room.
    pub fn members_of(&self, room_id: i32) -> impl Iterator<Item = u64> + '_ {
        self.rooms.get(&room_id).into_iter().flat_map(|m| m.iter().copied())
    }

    /// Number of sessions in a room.
    pub fn room_population(&self, room_id: i32) -> usize {
        self.rooms.get(&room_id).map_or(0, HashSet::len)
    }

    /// Total number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions whose last activity is strictly older than `timeout`.
    pub fn expired(&self, now: I, timeout: Duration) -> Vec<u64> {
        self.sessions
            .iter()
            .filter(|(_, session)| now - session.last_active > timeout)
            .map(|(conn_id, _)| *conn_id)
            .collect()
    }

    fn remove_member(&mut self, room_id: i32, conn_id: u64) {
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }
}

impl<I> Default for SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}
