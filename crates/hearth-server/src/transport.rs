//! TCP listening endpoint.
//!
//! Thin wrapper over a non-blocking [`mio::net::TcpListener`]: bind with a
//! parsed address, accept one pending connection at a time, report the
//! local address. Accepted streams are non-blocking; all further I/O on
//! them is driven by the event loop's readiness dispatch.

use std::{io, net::SocketAddr};

use mio::net::{TcpListener, TcpStream};

use crate::error::ServerError;

/// Non-blocking TCP transport.
pub struct TcpTransport {
    /// Listening socket.
    listener: TcpListener,
}

impl TcpTransport {
    /// Create and bind a new TCP transport.
    pub fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("TCP transport bound to {}", listener.local_addr()?);

        Ok(Self { listener })
    }

    /// Accept one pending inbound connection.
    ///
    /// Non-blocking: returns `WouldBlock` when nothing is pending, which is
    /// not an error.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept()
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// The listening socket, for interest-set registration.
    pub fn listener_mut(&mut self) -> &mut TcpListener {
        &mut self.listener
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_binds_ephemeral_port() {
        let transport = TcpTransport::bind("127.0.0.1:0");
        assert!(transport.is_ok(), "transport should bind to an ephemeral port");

        let transport = transport.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0, "should have assigned a port");
    }

    #[test]
    fn transport_rejects_invalid_address() {
        let result = TcpTransport::bind("invalid:address:format");
        assert!(result.is_err(), "should reject invalid address");
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn accept_without_pending_would_block() {
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();
        let err = transport.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
