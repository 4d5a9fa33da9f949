//! Sessions hand out channels to servers chosen by the cluster.
//!
//! A [`ClusterSession`] in [`SessionBehavior::Monotonic`] mode pins itself to the primary as
//! soon as it issues a write, so that later reads observe that write.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    Document,
    cancellation::CancellationToken,
    cmap::{Connection, Credential, PooledConnection, ServerAddress},
    error::{Error, ErrorKind, Result},
    sdam::{ClusterServer, PrimaryServerSelector, ServerDescription, ServerSelector, TopologyProvider},
    serializer::{BsonType, SerializationContext},
    wire,
};

/// How a session routes reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionBehavior {
    /// Every request uses its own selector.
    #[default]
    Default,
    /// Once a write has been issued, every later request goes to the primary.
    Monotonic,
}

/// What a channel is needed for.
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    pub selector: Arc<dyn ServerSelector>,
    /// Reads are queries; anything else counts as a write.
    pub is_query: bool,
    /// Bounds both server selection and connection checkout.
    pub timeout: Duration,
    pub cancellation: CancellationToken,
    /// Dispose the session when the channel provider is disposed.
    pub dispose_session: bool,
    pub credential: Option<Credential>,
}

impl ChannelOptions {
    /// Options for a query using `selector`.
    pub fn new(selector: impl ServerSelector + 'static) -> Self {
        Self {
            selector: Arc::new(selector),
            is_query: true,
            timeout: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
            dispose_session: false,
            credential: None,
        }
    }

    pub fn query(mut self, is_query: bool) -> Self {
        self.is_query = is_query;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn dispose_session(mut self, dispose_session: bool) -> Self {
        self.dispose_session = dispose_session;
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

struct SessionInner {
    topology: Arc<dyn TopologyProvider>,
    behavior: SessionBehavior,
    use_primary: Mutex<bool>,
    disposed: AtomicBool,
}

/// A session over a whole cluster. Clones share the same state.
#[derive(Clone)]
pub struct ClusterSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ClusterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSession")
            .field("behavior", &self.inner.behavior)
            .field("use_primary", &*self.inner.use_primary.lock())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ClusterSession {
    pub fn new(topology: Arc<dyn TopologyProvider>, behavior: SessionBehavior) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                topology,
                behavior,
                use_primary: Mutex::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn behavior(&self) -> SessionBehavior {
        self.inner.behavior
    }

    /// Whether the session has pinned itself to the primary.
    pub fn uses_primary(&self) -> bool {
        *self.inner.use_primary.lock()
    }

    /// Selects a server for a request and returns a provider of channels to it.
    ///
    /// The server must also satisfy the caller's own selector; a server picked for the
    /// primary that the caller's selector rejects is an [`ErrorKind::IncompatibleServer`].
    pub fn create_channel_provider(&self, options: ChannelOptions) -> Result<ChannelProvider> {
        self.check_disposed()?;

        let use_primary = {
            let mut use_primary = self.inner.use_primary.lock();
            *use_primary = (*use_primary || !options.is_query)
                && self.inner.behavior == SessionBehavior::Monotonic;
            *use_primary
        };

        let server = if use_primary {
            self.inner.topology.select_server(
                &PrimaryServerSelector,
                options.timeout,
                &options.cancellation,
            )?
        } else {
            self.inner.topology.select_server(
                options.selector.as_ref(),
                options.timeout,
                &options.cancellation,
            )?
        };

        let description = server.description();
        if !options.selector.matches(&description) {
            return Err(ErrorKind::IncompatibleServer {
                address: description.address,
            }
            .into());
        }
        debug!(
            address = %description.address,
            use_primary,
            is_query = options.is_query,
            "channel provider created"
        );

        Ok(ChannelProvider {
            session: self.clone(),
            server: Mutex::new(Some(server)),
            address: description.address,
            options,
            disposed: AtomicBool::new(false),
        })
    }

    /// Selects a server and checks out a connection to it. Closing the channel disposes the
    /// provider it came from.
    pub fn create_channel(&self, options: ChannelOptions) -> Result<Channel> {
        self.create_channel_provider(options)?.into_channel()
    }

    /// Marks the session disposed. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            debug!("cluster session disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::disposed("ClusterSession"))
        } else {
            Ok(())
        }
    }
}

/// A handle to the server chosen for one request.
pub struct ChannelProvider {
    session: ClusterSession,
    server: Mutex<Option<Arc<ClusterServer>>>,
    address: ServerAddress,
    options: ChannelOptions,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ChannelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProvider")
            .field("address", &self.address)
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ChannelProvider {
    /// The selected server's current description.
    pub fn server(&self) -> Result<ServerDescription> {
        Ok(self.server_handle()?.description())
    }

    /// Checks out a connection to the selected server.
    pub fn channel(&self) -> Result<PooledConnection> {
        self.server_handle()?.acquire(
            self.options.credential.as_ref(),
            self.options.timeout,
            &self.options.cancellation,
        )
    }

    /// Turns this provider into a single channel that owns it.
    ///
    /// If no connection can be checked out the server handle is released, but the session
    /// stays usable even when the provider was asked to dispose it.
    pub fn into_channel(self) -> Result<Channel> {
        match self.channel() {
            Ok(connection) => Ok(Channel {
                connection: Some(connection),
                provider: self,
            }),
            Err(e) => {
                self.release_server();
                Err(e)
            }
        }
    }

    /// Releases the server handle and, if requested, disposes the session. Disposing twice
    /// is a no-op.
    pub fn dispose(&self) {
        if self.release_server() && self.options.dispose_session {
            self.session.dispose();
        }
    }

    /// Marks the provider disposed and drops the server handle. Returns `false` if that
    /// already happened.
    fn release_server(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.server.lock().take();
        true
    }

    fn server_handle(&self) -> Result<Arc<ClusterServer>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::disposed("ChannelProvider"));
        }
        self.session.check_disposed()?;
        self.server
            .lock()
            .clone()
            .ok_or_else(|| Error::disposed("ChannelProvider"))
    }
}

impl Drop for ChannelProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A connection to a selected server, used to run commands.
#[derive(Debug)]
pub struct Channel {
    connection: Option<PooledConnection>,
    provider: ChannelProvider,
}

impl Channel {
    pub fn address(&self) -> &ServerAddress {
        &self.provider.address
    }

    pub fn session(&self) -> &ClusterSession {
        &self.provider.session
    }

    /// Runs `command` against `db` and returns the reply.
    pub fn run_command(&mut self, db: &str, command: &Document) -> Result<Document> {
        let connection = self.connection()?;
        wire::run_command(connection, db, command)
    }

    /// Runs `command` against `db` and deserializes the reply through `ctx`.
    pub fn run_command_as<T: BsonType>(
        &mut self,
        ctx: &SerializationContext,
        db: &str,
        command: &Document,
    ) -> Result<T> {
        let connection = self.connection()?;
        wire::run_command_as(ctx, connection, db, command)
    }

    /// Returns the connection to its pool and disposes the provider.
    pub fn close(mut self) {
        self.connection.take();
        self.provider.dispose();
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        self.provider.session.check_disposed()?;
        if self.provider.disposed.load(Ordering::Acquire) {
            return Err(Error::disposed("Channel"));
        }
        match self.connection.as_mut() {
            Some(connection) => Ok(connection.connection_mut()),
            None => Err(Error::disposed("Channel")),
        }
    }
}
