use std::fmt;

use super::Connection;
use crate::error::Result;

/// The identity a connection authenticates as, against a source database.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    pub source: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(
        source: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runs an authentication handshake over a freshly checked-out connection.
///
/// The pool records a successful handshake on the connection, so an authenticator is only
/// invoked once per connection and source database.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, connection: &mut Connection, credential: &Credential) -> Result<()>;
}

/// Accepts every credential without talking to the server.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthentication;

impl Authenticator for NoAuthentication {
    fn authenticate(&self, _connection: &mut Connection, _credential: &Credential) -> Result<()> {
        Ok(())
    }
}
