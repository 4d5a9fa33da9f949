use std::{
    fmt,
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use ahash::AHashMap;

use super::{Authenticator, Credential, ServerAddress};
use crate::error::{Error, Result};

/// The largest message a connection will accept from a server.
pub(crate) const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// The size of the standard message header: length, request id, response to, opcode.
pub(crate) const HEADER_LENGTH: usize = 16;

/// A bidirectional byte stream to a server.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// Whether a connection can still carry messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// A single connection to a server.
///
/// A connection is owned either by its pool's idle list or by exactly one caller. Any I/O
/// failure closes it, after which the pool discards it on release.
pub struct Connection {
    id: u32,
    address: ServerAddress,
    generation: u32,
    created_at: Instant,
    last_used_at: Instant,
    state: ConnectionState,
    stream: Option<Box<dyn Stream>>,
    authenticated: AHashMap<String, Credential>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        id: u32,
        address: ServerAddress,
        generation: u32,
        stream: Box<dyn Stream>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            generation,
            created_at: now,
            last_used_at: now,
            state: ConnectionState::Open,
            stream: Some(stream),
            authenticated: AHashMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The pool generation this connection was opened in.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub(crate) fn mark_used(&mut self) {
        self.last_used_at = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, age: Duration, idle: Duration) {
        let now = Instant::now();
        self.created_at = now.checked_sub(age).unwrap_or(self.created_at);
        self.last_used_at = now.checked_sub(idle).unwrap_or(self.last_used_at);
    }

    /// Whether the connection is already authenticated as `credential`. A connection without
    /// a credential counts as authenticated.
    pub fn is_authenticated(&self, credential: Option<&Credential>) -> bool {
        match credential {
            Some(credential) => self.authenticated.get(&credential.source) == Some(credential),
            None => true,
        }
    }

    /// Whether the connection could authenticate as `credential`: it has not yet authenticated
    /// against that source database as somebody else.
    pub fn can_authenticate(&self, credential: Option<&Credential>) -> bool {
        match credential {
            Some(credential) => self
                .authenticated
                .get(&credential.source)
                .is_none_or(|existing| existing == credential),
            None => true,
        }
    }

    pub(crate) fn authenticate(
        &mut self,
        authenticator: &dyn Authenticator,
        credential: &Credential,
    ) -> Result<()> {
        if self.is_authenticated(Some(credential)) {
            return Ok(());
        }
        if !self.can_authenticate(Some(credential)) {
            return Err(Error::invalid_argument(format!(
                "connection {} is already authenticated against \"{}\" as another user",
                self.id, credential.source
            )));
        }
        authenticator.authenticate(self, credential)?;
        self.authenticated
            .insert(credential.source.clone(), credential.clone());
        Ok(())
    }

    /// Writes one complete message.
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(message).and_then(|_| stream.flush()),
            None => return Err(self.closed_error()),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Reads one complete message, header included.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.closed_error());
        };

        let mut length = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut length) {
            return Err(self.fail(e));
        }
        let length = i32::from_le_bytes(length);
        if length < HEADER_LENGTH as i32 || length as usize > MAX_MESSAGE_SIZE {
            self.close();
            return Err(Error::connection_failure(
                &self.address,
                format!("invalid message length {length}"),
            ));
        }

        let mut message = vec![0u8; length as usize];
        message[..4].copy_from_slice(&length.to_le_bytes());
        if let Err(e) = stream.read_exact(&mut message[4..]) {
            return Err(self.fail(e));
        }
        Ok(message)
    }

    /// Closes the underlying stream. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::trace!(id = self.id, address = %self.address, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    fn fail(&mut self, error: std::io::Error) -> Error {
        self.close();
        Error::connection_failure(&self.address, error)
    }

    fn closed_error(&self) -> Error {
        Error::connection_failure(&self.address, format!("connection {} is closed", self.id))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens byte streams to servers. The pool calls this outside its lock.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, address: &ServerAddress) -> Result<Box<dyn Stream>>;
}

/// Opens TCP streams with `TCP_NODELAY` set.
#[derive(Clone, Debug)]
pub struct TcpConnectionFactory {
    connect_timeout: Duration,
    socket_timeout: Option<Duration>,
}

impl TcpConnectionFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            socket_timeout: None,
        }
    }

    /// Sets the read and write timeout of opened streams.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn connect(&self, address: &ServerAddress) -> Result<Box<dyn Stream>> {
        let candidates = (address.host(), address.port())
            .to_socket_addrs()
            .map_err(|e| Error::connection_failure(address, e))?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .and_then(|_| stream.set_read_timeout(self.socket_timeout))
                        .and_then(|_| stream.set_write_timeout(self.socket_timeout))
                        .map_err(|e| Error::connection_failure(address, e))?;
                    return Ok(Box::new(stream));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => Error::connection_failure(address, e),
            None => Error::connection_failure(address, "host did not resolve to any address"),
        })
    }
}
