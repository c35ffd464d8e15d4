//! The per-connection relay engine
//!
//! Provides:
//! - The destination address header parser
//! - The connection pair state machine (`Handshaking → Connecting →
//!   Streaming → Closed`)
//! - Listen sockets and the accept loop
//! - Process-wide relay state: read-only cipher configuration, the upstream
//!   connect timeout, and open-connection counters

mod address;
mod listener;
mod session;

pub use address::Address;
pub use listener::RelayListener;
pub use session::Session;

use crate::crypto::CipherConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Relay errors
///
/// These never cross the pair boundary: every variant resolves locally into
/// teardown of the pair that produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    #[error("Malformed request header")]
    BadHandshake,

    #[error("Connection closed before the request header completed")]
    TruncatedHandshake,

    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("Could not resolve bind address {0}")]
    BindAddress(String),
}

/// Lifecycle position of a connection pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the decrypted request header from the client
    Handshaking,
    /// Upstream connect issued, awaiting its outcome
    Connecting,
    /// Bidirectional relay active
    Streaming,
    /// Teardown complete
    Closed,
}

/// Process-wide relay state
///
/// The cipher configuration and timeout are read-only after startup; the
/// counters track live endpoints for observability.
pub struct RelayState {
    cipher: CipherConfig,
    connect_timeout: Duration,
    open_clients: AtomicUsize,
    open_upstreams: AtomicUsize,
}

impl RelayState {
    pub fn new(cipher: CipherConfig, connect_timeout: Duration) -> Self {
        Self {
            cipher,
            connect_timeout,
            open_clients: AtomicUsize::new(0),
            open_upstreams: AtomicUsize::new(0),
        }
    }

    pub fn cipher(&self) -> &CipherConfig {
        &self.cipher
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Number of client endpoints currently open
    pub fn open_clients(&self) -> usize {
        self.open_clients.load(Ordering::Relaxed)
    }

    /// Number of upstream endpoints currently open
    pub fn open_upstreams(&self) -> usize {
        self.open_upstreams.load(Ordering::Relaxed)
    }
}

/// Which half of a pair a counter tracks
#[derive(Debug, Clone, Copy)]
pub(crate) enum Endpoint {
    Client,
    Upstream,
}

/// Open-endpoint counter guard
///
/// Increments on construction and decrements exactly once on drop, so the
/// counters stay accurate on every teardown path.
pub(crate) struct ConnGuard {
    state: Arc<RelayState>,
    endpoint: Endpoint,
}

impl ConnGuard {
    pub(crate) fn open(state: &Arc<RelayState>, endpoint: Endpoint) -> Self {
        let guard = ConnGuard {
            state: Arc::clone(state),
            endpoint,
        };
        guard.counter().fetch_add(1, Ordering::Relaxed);
        guard
    }

    fn counter(&self) -> &AtomicUsize {
        match self.endpoint {
            Endpoint::Client => &self.state.open_clients,
            Endpoint::Upstream => &self.state.open_upstreams,
        }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.counter().fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherConfig, Method};

    fn state() -> Arc<RelayState> {
        let cipher = CipherConfig::new("barfoo!", Method::Plain).unwrap();
        Arc::new(RelayState::new(cipher, Duration::from_secs(1)))
    }

    #[test]
    fn counters_follow_guard_lifetimes() {
        let state = state();
        assert_eq!(state.open_clients(), 0);

        let client = ConnGuard::open(&state, Endpoint::Client);
        let upstream = ConnGuard::open(&state, Endpoint::Upstream);
        assert_eq!(state.open_clients(), 1);
        assert_eq!(state.open_upstreams(), 1);

        drop(upstream);
        assert_eq!(state.open_clients(), 1);
        assert_eq!(state.open_upstreams(), 0);

        drop(client);
        assert_eq!(state.open_clients(), 0);
    }
}
