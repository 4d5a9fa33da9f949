use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info};

use super::{ServerDescription, ServerSelector, ServerState};
use crate::{
    cancellation::{CANCELLATION_POLL_INTERVAL, CancellationToken},
    cmap::{
        ConnectionFactory,
        ConnectionPool,
        Credential,
        PoolSettings,
        PooledConnection,
        ServerAddress,
        ServerStateProvider,
    },
    error::{Error, Result},
    settings::ClientSettings,
};

/// Picks a server for an operation.
pub trait TopologyProvider: Send + Sync {
    /// Waits up to `timeout` for a server matching `selector`.
    fn select_server(
        &self,
        selector: &dyn ServerSelector,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<ClusterServer>>;
}

/// The current description of a server, shared with its pool's maintenance worker.
#[derive(Debug)]
struct ServerMonitor {
    description: RwLock<ServerDescription>,
}

impl ServerStateProvider for ServerMonitor {
    fn state(&self) -> ServerState {
        self.description.read().state
    }
}

/// One server of a [`Cluster`] together with its connection pool.
#[derive(Debug)]
pub struct ClusterServer {
    monitor: Arc<ServerMonitor>,
    pool: ConnectionPool,
}

impl ClusterServer {
    fn new(
        description: ServerDescription,
        settings: PoolSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        let monitor = Arc::new(ServerMonitor {
            description: RwLock::new(description),
        });
        let address = monitor.description.read().address.clone();
        let pool = ConnectionPool::builder(address, factory)
            .settings(settings)
            .server_state(monitor.clone())
            .build()?;
        Ok(Self { monitor, pool })
    }

    pub fn address(&self) -> ServerAddress {
        self.monitor.description.read().address.clone()
    }

    /// A snapshot of the server's description.
    pub fn description(&self) -> ServerDescription {
        self.monitor.description.read().clone()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Checks out a connection to this server, waiting at most `timeout` (or the pool's wait
    /// queue timeout, if shorter) for one to become available.
    pub fn acquire(
        &self,
        credential: Option<&Credential>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection> {
        self.pool.acquire_with_timeout(credential, timeout, cancel)
    }
}

/// The servers of one deployment.
///
/// Descriptions are pushed in through [`update_description`](Self::update_description);
/// threads blocked in [`select_server`](Self::select_server) wake up on every change.
pub struct Cluster {
    servers: RwLock<Vec<Arc<ClusterServer>>>,
    version: Mutex<u64>,
    changed: Condvar,
    pool_settings: PoolSettings,
    factory: Arc<dyn ConnectionFactory>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("servers", &*self.servers.read())
            .field("pool_settings", &self.pool_settings)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// An empty cluster whose servers use `factory` and `pool_settings`.
    pub fn new(pool_settings: PoolSettings, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            version: Mutex::new(0),
            changed: Condvar::new(),
            pool_settings,
            factory,
        }
    }

    /// A cluster with one server per host in `settings`, each not yet connected.
    pub fn from_settings(
        settings: &ClientSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        let cluster = Self::new(settings.pool.clone(), factory);
        for host in &settings.hosts {
            cluster.add_server(ServerDescription::new(host.clone()))?;
        }
        Ok(cluster)
    }

    /// Adds a server. Fails if a server with the same address is already present.
    pub fn add_server(&self, description: ServerDescription) -> Result<Arc<ClusterServer>> {
        let mut servers = self.servers.write();
        if servers.iter().any(|s| s.address() == description.address) {
            return Err(Error::invalid_argument(format!(
                "server {} is already part of the cluster",
                description.address
            )));
        }

        info!(address = %description.address, server_type = ?description.server_type, "server added");
        let server = Arc::new(ClusterServer::new(
            description,
            self.pool_settings.clone(),
            self.factory.clone(),
        )?);
        servers.push(server.clone());
        drop(servers);

        self.notify_changed();
        Ok(server)
    }

    pub fn servers(&self) -> Vec<Arc<ClusterServer>> {
        self.servers.read().clone()
    }

    pub fn server(&self, address: &ServerAddress) -> Option<Arc<ClusterServer>> {
        self.servers
            .read()
            .iter()
            .find(|s| &s.address() == address)
            .cloned()
    }

    pub fn descriptions(&self) -> Vec<ServerDescription> {
        self.servers.read().iter().map(|s| s.description()).collect()
    }

    /// Replaces the description of the server at `description.address`.
    ///
    /// A server that becomes disconnected has its pool cleared.
    pub fn update_description(&self, description: ServerDescription) -> Result<()> {
        let server = self.server(&description.address).ok_or_else(|| {
            Error::invalid_argument(format!(
                "server {} is not part of the cluster",
                description.address
            ))
        })?;

        let previous = {
            let mut current = server.monitor.description.write();
            std::mem::replace(&mut *current, description.clone())
        };
        debug!(
            address = %description.address,
            server_type = ?description.server_type,
            state = ?description.state,
            "server description changed"
        );

        if description.state == ServerState::Disconnected
            && previous.state != ServerState::Disconnected
        {
            server.pool.clear();
        }

        self.notify_changed();
        Ok(())
    }

    fn notify_changed(&self) {
        *self.version.lock() += 1;
        self.changed.notify_all();
    }

    /// Shuts down the pools of every server.
    pub fn shutdown(&self) {
        for server in self.servers.read().iter() {
            server.pool.shutdown();
        }
    }
}

impl TopologyProvider for Cluster {
    fn select_server(
        &self,
        selector: &dyn ServerSelector,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<ClusterServer>> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            cancel.check()?;
            let seen = *self.version.lock();

            let servers = self.servers();
            let descriptions: Vec<_> = servers.iter().map(|s| s.description()).collect();
            let selected = selector.select_servers(descriptions.iter().collect());
            if !selected.is_empty() {
                let chosen = selected[rand::rng().random_range(0..selected.len())];
                if let Some(server) = servers.iter().find(|s| s.address() == chosen.address) {
                    debug!(address = %chosen.address, selector = ?selector, "server selected");
                    return Ok(server.clone());
                }
            }

            let mut version = self.version.lock();
            if *version != seen {
                continue;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::server_selection(format!(
                            "no server matching {selector:?} was found within {timeout:?}"
                        )));
                    }
                    (deadline - now).min(CANCELLATION_POLL_INTERVAL)
                }
                None => CANCELLATION_POLL_INTERVAL,
            };
            self.changed.wait_for(&mut version, wait);
        }
    }
}
