//! Loopback TCP listener.
//!
//! # Responsibilities
//! - Bind to 127.0.0.1 on the configured port
//! - Accept incoming TCP connections
//! - Graceful handling of accept errors
//!
//! Binding is synchronous so the caller learns about a busy port right
//! away; the socket is then handed to the server thread's runtime.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Bind a non-blocking listening socket on the loopback interface.
pub fn bind_loopback(port: u16) -> Result<std::net::TcpListener, ListenerError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = std::net::TcpListener::bind(addr).map_err(ListenerError::Bind)?;
    listener.set_nonblocking(true).map_err(ListenerError::Bind)?;

    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
    tracing::info!(address = %local_addr, "MGMT listener bound");
    Ok(listener)
}

/// A listener accepting one management connection at a time.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Register a bound socket with the current runtime.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, ListenerError> {
        let inner = TcpListener::from_std(listener).map_err(ListenerError::Bind)?;
        Ok(Self { inner })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_loopback_only() {
        let listener = bind_loopback(0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn busy_port_is_bind_error() {
        let first = bind_loopback(0).unwrap();
        let port = first.local_addr().unwrap().port();

        let err = bind_loopback(port).unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
        assert!(err.to_string().starts_with("Failed to bind"));
    }
}
