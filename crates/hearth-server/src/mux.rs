//! Readiness multiplexing.
//!
//! The event loop is written against the [`Multiplexer`] interface —
//! `wait(timeout)` returning the ready connection ids in ascending order —
//! so the notification strategy underneath is swappable without touching
//! the loop. The production implementation, [`PollMux`], sits on
//! [`mio::Poll`]: a ready-only notification primitive, which is why the
//! accept and data handlers drain their sockets to `WouldBlock` rather than
//! performing one operation per notification.

use std::{io, time::Duration};

use mio::{
    Events, Interest, Poll, Token,
    net::{TcpListener, TcpStream},
};

/// Identifier reserved for the listening endpoint in ready lists.
pub const LISTENER_ID: u64 = 0;

/// Event buffer capacity for one wait call.
const EVENT_CAPACITY: usize = 1024;

/// Readiness notification strategy for the event loop.
///
/// Implementations own the interest set: the collection of endpoints
/// currently watched for readability, together with the highest identifier
/// handed out so far.
pub trait Multiplexer {
    /// Start watching the listening endpoint under [`LISTENER_ID`].
    fn register_listener(&mut self, listener: &mut TcpListener) -> io::Result<()>;

    /// Start watching a connection for readability.
    fn register(&mut self, conn_id: u64, stream: &mut TcpStream) -> io::Result<()>;

    /// Stop watching a connection.
    fn deregister(&mut self, stream: &mut TcpStream) -> io::Result<()>;

    /// Wait until at least one watched endpoint is ready or the timeout
    /// elapses. Returns ready identifiers ascending and deduplicated; an
    /// empty list means the wait timed out.
    fn wait(&mut self, timeout: Duration) -> io::Result<Vec<u64>>;

    /// Number of connections currently watched (listener excluded).
    fn watched(&self) -> usize;

    /// Highest connection identifier registered so far.
    fn high_water(&self) -> u64;
}

/// Production multiplexer on [`mio::Poll`].
#[derive(Debug)]
pub struct PollMux {
    /// OS readiness queue.
    poll: Poll,
    /// Reusable event buffer.
    events: Events,
    /// Connections currently registered.
    watched: usize,
    /// Highest connection id ever registered.
    high_water: u64,
}

impl PollMux {
    /// Create a new multiplexer.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            watched: 0,
            high_water: LISTENER_ID,
        })
    }
}

impl Multiplexer for PollMux {
    fn register_listener(&mut self, listener: &mut TcpListener) -> io::Result<()> {
        self.poll.registry().register(listener, Token(LISTENER_ID as usize), Interest::READABLE)
    }

    fn register(&mut self, conn_id: u64, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().register(stream, Token(conn_id as usize), Interest::READABLE)?;
        self.watched += 1;
        self.high_water = self.high_water.max(conn_id);
        Ok(())
    }

    fn deregister(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)?;
        self.watched = self.watched.saturating_sub(1);
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<Vec<u64>> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {},
            // A signal landing mid-wait is not a multiplexer failure.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut ready: Vec<u64> = self.events.iter().map(|event| event.token().0 as u64).collect();
        ready.sort_unstable();
        ready.dedup();
        Ok(ready)
    }

    fn watched(&self) -> usize {
        self.watched
    }

    fn high_water(&self) -> u64 {
        self.high_water
    }
}
