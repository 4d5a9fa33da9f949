//! Connections to a single server and the pool that shares them.
//!
//! A [`ConnectionPool`] owns the idle connections to one [`ServerAddress`]. Callers check a
//! connection out with [`ConnectionPool::acquire`] and get a [`PooledConnection`] guard that
//! hands it back on drop. The pool caps its size, bounds how many threads may wait for a
//! connection, and runs a maintenance worker that retires old or idle connections and keeps
//! the pool at its minimum size.

mod auth;
mod conn;
mod options;
mod pool;
mod worker;

use std::{fmt, str::FromStr};

pub use self::{
    auth::{Authenticator, Credential, NoAuthentication},
    conn::{Connection, ConnectionFactory, ConnectionState, Stream, TcpConnectionFactory},
    options::{PoolSettings, PoolSettingsBuilder},
    pool::{ConnectionPool, ConnectionPoolBuilder, PooledConnection},
};
use crate::{
    error::{Error, Result},
    sdam::ServerState,
};

/// The port used when an address does not name one.
pub const DEFAULT_PORT: u16 = 27017;

/// The host and port of a server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Creates an address. Host names compare case-insensitively, so the host is stored in
    /// lower case.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[ipv6]` or `[ipv6]:port`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let invalid = || Error::invalid_argument(format!("invalid server address \"{address}\""));

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            match rest {
                "" => (host, None),
                _ => (host, Some(rest.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match address.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid()),
                Ok(port) => port,
            },
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Reports whether the server behind a pool is reachable.
///
/// The maintenance worker consults this before each tick so that it does not churn
/// connections to a server that is known to be down.
pub trait ServerStateProvider: Send + Sync {
    /// The last known state, without doing any I/O.
    fn state(&self) -> ServerState;

    /// Re-checks reachability and returns the resulting state.
    fn verify_state(&self) -> ServerState {
        self.state()
    }
}

/// A provider for pools that are not attached to a monitored server.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AlwaysConnected;

impl ServerStateProvider for AlwaysConnected {
    fn state(&self) -> ServerState {
        ServerState::Connected
    }
}
