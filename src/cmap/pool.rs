use std::{
    fmt,
    mem::{self, ManuallyDrop},
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use super::{
    AlwaysConnected,
    Authenticator,
    Connection,
    ConnectionFactory,
    Credential,
    NoAuthentication,
    PoolSettings,
    ServerAddress,
    ServerStateProvider,
    worker::MaintenanceWorker,
};
use crate::{
    cancellation::{CANCELLATION_POLL_INTERVAL, CancellationToken},
    error::{Error, ErrorKind, Result},
    sdam::ServerState,
};

/// Builder for [`ConnectionPool`].
pub struct ConnectionPoolBuilder {
    address: ServerAddress,
    settings: PoolSettings,
    factory: Arc<dyn ConnectionFactory>,
    authenticator: Arc<dyn Authenticator>,
    server: Arc<dyn ServerStateProvider>,
    maintenance: bool,
}

impl ConnectionPoolBuilder {
    pub fn new(address: ServerAddress, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            address,
            settings: PoolSettings::default(),
            factory,
            authenticator: Arc::new(NoAuthentication),
            server: Arc::new(AlwaysConnected),
            maintenance: true,
        }
    }

    pub fn settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Sets the provider the maintenance worker asks before each tick.
    pub fn server_state(mut self, server: Arc<dyn ServerStateProvider>) -> Self {
        self.server = server;
        self
    }

    /// Whether to start the background maintenance worker. Enabled by default; without it,
    /// maintenance only happens through [`ConnectionPool::run_maintenance`].
    pub fn maintenance(mut self, enabled: bool) -> Self {
        self.maintenance = enabled;
        self
    }

    pub fn build(self) -> Result<ConnectionPool> {
        self.settings.validate()?;

        let inner = Arc::new(PoolInner {
            address: self.address,
            settings: self.settings,
            factory: self.factory,
            authenticator: self.authenticator,
            server: self.server,
            state: Mutex::new(PoolState::default()),
            available_changed: Condvar::new(),
            warming_up: AtomicBool::new(false),
            next_connection_id: AtomicU32::new(1),
        });

        let worker = if self.maintenance {
            Some(MaintenanceWorker::start(&inner)?)
        } else {
            None
        };

        debug!(address = %inner.address, settings = ?inner.settings, "connection pool created");
        Ok(ConnectionPool {
            inner,
            worker: Mutex::new(worker),
        })
    }
}

/// A pool of connections to one server.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    worker: Mutex<Option<MaintenanceWorker>>,
}

impl ConnectionPool {
    pub fn builder(
        address: ServerAddress,
        factory: Arc<dyn ConnectionFactory>,
    ) -> ConnectionPoolBuilder {
        ConnectionPoolBuilder::new(address, factory)
    }

    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Checks out a connection authenticated as `credential`.
    ///
    /// Idle connections are preferred, most recently used first. When none is idle and the
    /// pool is below its max size a new connection is opened; otherwise the caller waits up
    /// to the wait queue timeout. Fails immediately with
    /// [`ErrorKind::WaitQueueFull`] if too many threads are already waiting.
    pub fn acquire(&self, credential: Option<&Credential>) -> Result<PooledConnection> {
        self.acquire_with(credential, &CancellationToken::new())
    }

    /// Like [`acquire`](Self::acquire), but gives up with [`ErrorKind::Cancelled`] once
    /// `cancel` is triggered.
    pub fn acquire_with(
        &self,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection> {
        self.inner
            .acquire(credential, self.inner.settings.wait_queue_timeout, cancel)
    }

    /// Like [`acquire_with`](Self::acquire_with), but waits no longer than `timeout` even
    /// when the pool's wait queue timeout is longer.
    pub fn acquire_with_timeout(
        &self,
        credential: Option<&Credential>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection> {
        let timeout = timeout.min(self.inner.settings.wait_queue_timeout);
        self.inner.acquire(credential, timeout, cancel)
    }

    /// Returns a connection to the pool. Dropping the guard does the same.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Closes every idle connection and starts a new generation. Connections checked out
    /// now are closed when they come back.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Open connections, idle and checked out, in the current generation.
    pub fn current_size(&self) -> usize {
        self.inner.state.lock().size
    }

    pub fn available_count(&self) -> usize {
        self.inner.state.lock().available.len()
    }

    pub fn generation(&self) -> u32 {
        self.inner.state.lock().generation
    }

    /// Threads currently inside [`acquire`](Self::acquire).
    pub fn wait_queue_depth(&self) -> usize {
        self.inner.state.lock().waiting
    }

    /// Runs one maintenance tick: retires at most one old or idle connection and starts a
    /// warm-up if the pool is below its minimum size.
    pub fn run_maintenance(&self) {
        self.inner.run_maintenance();
    }

    /// Stops the maintenance worker and closes idle connections. Later acquires fail with
    /// [`ErrorKind::Disposed`]. Shutting down twice is a no-op.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop();
        }

        let first = {
            let mut state = self.inner.state.lock();
            !mem::replace(&mut state.shut_down, true)
        };
        if first {
            self.inner.clear();
            info!(address = %self.inner.address, "connection pool shut down");
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("size", &state.size)
            .field("available", &state.available.len())
            .field("generation", &state.generation)
            .finish_non_exhaustive()
    }
}

/// A checked-out connection. Returns itself to its pool when dropped.
pub struct PooledConnection {
    connection: ManuallyDrop<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn new(connection: Connection, pool: Arc<PoolInner>) -> Self {
        Self {
            connection: ManuallyDrop::new(connection),
            pool,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // SAFETY: `connection` is never touched again after this point.
        let connection = unsafe { ManuallyDrop::take(&mut self.connection) };
        self.pool.release(connection);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &*self.connection)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PoolState {
    /// Open connections of the current generation, idle or checked out.
    size: usize,
    /// Idle connections, least recently used first.
    available: Vec<Connection>,
    generation: u32,
    waiting: usize,
    removed_since_last_tick: usize,
    evicted_this_tick: bool,
    shut_down: bool,
}

impl PoolState {
    fn take_available(&mut self, credential: Option<&Credential>) -> Option<Checkout> {
        if self.available.is_empty() {
            return None;
        }

        if let Some(i) = self
            .available
            .iter()
            .rposition(|c| c.is_authenticated(credential))
        {
            return Some(Checkout::Existing(self.available.remove(i)));
        }
        if let Some(i) = self
            .available
            .iter()
            .rposition(|c| c.can_authenticate(credential))
        {
            return Some(Checkout::Existing(self.available.remove(i)));
        }

        let lru = self.available.remove(0);
        Some(Checkout::Replace(lru, self.generation))
    }

    /// Forgets a connection that is being closed. Only connections of the current generation
    /// count toward the size.
    fn forget(&mut self, connection: &Connection) -> bool {
        if connection.generation() != self.generation {
            return false;
        }
        self.size = self.size.saturating_sub(1);
        true
    }
}

enum Checkout {
    Existing(Connection),
    /// No idle connection could serve the credential; close this one and open a replacement
    /// in its slot.
    Replace(Connection, u32),
    /// A slot was reserved for a new connection in the given generation.
    New(u32),
}

pub(super) struct PoolInner {
    pub(super) address: ServerAddress,
    pub(super) settings: PoolSettings,
    factory: Arc<dyn ConnectionFactory>,
    authenticator: Arc<dyn Authenticator>,
    server: Arc<dyn ServerStateProvider>,
    state: Mutex<PoolState>,
    available_changed: Condvar,
    warming_up: AtomicBool,
    next_connection_id: AtomicU32,
}

impl PoolInner {
    fn acquire(
        self: &Arc<Self>,
        credential: Option<&Credential>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection> {
        let mut connection = match self.check_out(credential, timeout, cancel)? {
            Checkout::Existing(connection) => connection,
            Checkout::Replace(mut lru, generation) => {
                debug!(
                    address = %self.address,
                    id = lru.id(),
                    "replacing least recently used connection"
                );
                lru.close();
                self.open_reserved(generation)?
            }
            Checkout::New(generation) => self.open_reserved(generation)?,
        };

        if let Some(credential) = credential {
            if let Err(e) = connection.authenticate(self.authenticator.as_ref(), credential) {
                connection.close();
                self.release(connection);
                return Err(e);
            }
        }

        trace!(address = %self.address, id = connection.id(), "connection checked out");
        Ok(PooledConnection::new(connection, Arc::clone(self)))
    }

    fn check_out(
        &self,
        credential: Option<&Credential>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Checkout> {
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.state.lock();
        if state.shut_down {
            return Err(Error::disposed("ConnectionPool"));
        }
        if state.waiting >= self.settings.wait_queue_size {
            warn!(
                address = %self.address,
                waiting = state.waiting,
                "connection wait queue is full"
            );
            return Err(ErrorKind::WaitQueueFull {
                address: self.address.clone(),
                size: self.settings.wait_queue_size,
            }
            .into());
        }

        state.waiting += 1;
        let result = self.wait_for_checkout(&mut state, credential, cancel, timeout, deadline);
        state.waiting -= 1;
        result
    }

    fn wait_for_checkout(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
        timeout: Duration,
        deadline: Option<Instant>,
    ) -> Result<Checkout> {
        loop {
            cancel.check()?;
            if state.shut_down {
                return Err(Error::disposed("ConnectionPool"));
            }

            if let Some(checkout) = state.take_available(credential) {
                return Ok(checkout);
            }

            if state.size < self.settings.max_size {
                state.size += 1;
                debug!(address = %self.address, size = state.size, "pool size increased");
                return Ok(Checkout::New(state.generation));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            address = %self.address,
                            timeout = ?timeout,
                            "timed out waiting for a connection"
                        );
                        return Err(ErrorKind::WaitQueueTimeout {
                            address: self.address.clone(),
                            timeout,
                        }
                        .into());
                    }
                    (deadline - now).min(CANCELLATION_POLL_INTERVAL)
                }
                None => CANCELLATION_POLL_INTERVAL,
            };
            self.available_changed.wait_for(state, wait);
        }
    }

    /// Opens a connection for a slot already counted in the pool size. On failure the slot is
    /// given back.
    fn open_reserved(&self, generation: u32) -> Result<Connection> {
        match self.factory.connect(&self.address) {
            Ok(stream) => {
                let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                trace!(address = %self.address, id, generation, "connection opened");
                Ok(Connection::new(id, self.address.clone(), generation, stream))
            }
            Err(e) => {
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.size = state.size.saturating_sub(1);
                    debug!(address = %self.address, size = state.size, "pool size decreased");
                }
                self.available_changed.notify_one();
                Err(e)
            }
        }
    }

    pub(super) fn release(&self, mut connection: Connection) {
        let mut state = self.state.lock();

        let discard = if !connection.is_open() {
            true
        } else if state.removed_since_last_tick == 0
            && !state.evicted_this_tick
            && connection.created_at().elapsed() > self.settings.max_connection_lifetime
        {
            debug!(
                address = %self.address,
                id = connection.id(),
                "retiring connection past its max lifetime"
            );
            true
        } else {
            false
        };

        if discard {
            if state.forget(&connection) {
                state.removed_since_last_tick += 1;
                debug!(address = %self.address, size = state.size, "pool size decreased");
                self.available_changed.notify_one();
            }
            drop(state);
            connection.close();
            return;
        }

        if connection.generation() != state.generation {
            drop(state);
            debug!(
                address = %self.address,
                id = connection.id(),
                generation = connection.generation(),
                "closing connection from a cleared generation"
            );
            connection.close();
            return;
        }

        connection.mark_used();
        trace!(address = %self.address, id = connection.id(), "connection checked in");
        state.available.push(connection);
        self.available_changed.notify_one();
    }

    fn clear(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.generation = state.generation.wrapping_add(1);
            state.size = 0;
            info!(
                address = %self.address,
                generation = state.generation,
                "connection pool cleared"
            );
            self.available_changed.notify_all();
            mem::take(&mut state.available)
        };
        for mut connection in drained {
            connection.close();
        }
    }

    pub(super) fn run_maintenance(self: &Arc<Self>) {
        if self.server.state() == ServerState::Disconnected
            || self.server.verify_state() == ServerState::Disconnected
        {
            trace!(address = %self.address, "server disconnected, skipping maintenance");
            return;
        }

        let (evicted, generation, below_min) = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }

            let may_evict = state.removed_since_last_tick == 0;
            state.removed_since_last_tick = 0;
            state.evicted_this_tick = false;

            let evicted = if may_evict {
                self.select_eviction(&mut state)
            } else {
                None
            };
            if evicted.is_some() {
                state.size = state.size.saturating_sub(1);
                state.evicted_this_tick = true;
                debug!(address = %self.address, size = state.size, "pool size decreased");
                self.available_changed.notify_one();
            }
            (
                evicted,
                state.generation,
                state.size < self.settings.min_size,
            )
        };

        if let Some(mut connection) = evicted {
            connection.close();
        }
        if below_min {
            self.start_warm_up(generation);
        }
    }

    /// Picks the oldest idle connection past its lifetime, or failing that the least recently
    /// used idle connection past its idle time while the pool is above its minimum.
    fn select_eviction(&self, state: &mut PoolState) -> Option<Connection> {
        let now = Instant::now();

        let oldest = state
            .available
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.created_at())
            .map(|(i, _)| i);
        if let Some(i) = oldest {
            let age = now.duration_since(state.available[i].created_at());
            if age > self.settings.max_connection_lifetime {
                info!(
                    address = %self.address,
                    id = state.available[i].id(),
                    age = ?age,
                    "evicting connection past its max lifetime"
                );
                return Some(state.available.remove(i));
            }
        }

        if state.size > self.settings.min_size {
            if let Some(lru) = state.available.first() {
                let idle = now.duration_since(lru.last_used_at());
                if idle > self.settings.max_idle_time {
                    info!(
                        address = %self.address,
                        id = lru.id(),
                        idle = ?idle,
                        "evicting connection past its max idle time"
                    );
                    return Some(state.available.remove(0));
                }
            }
        }

        None
    }

    fn start_warm_up(self: &Arc<Self>, generation: u32) {
        if self.warming_up.swap(true, Ordering::AcqRel) {
            return;
        }

        let pool = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("mongo-pool-warm-up-{}", self.address))
            .spawn(move || {
                pool.warm_up(generation);
                pool.warming_up.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            warn!(address = %self.address, error = %e, "could not start pool warm-up");
            self.warming_up.store(false, Ordering::Release);
        }
    }

    /// Opens connections one at a time until the pool reaches its minimum size. Stops as soon
    /// as the pool moves to another generation.
    fn warm_up(&self, generation: u32) {
        debug!(address = %self.address, generation, "pool warm-up started");
        loop {
            {
                let mut state = self.state.lock();
                if state.shut_down
                    || state.generation != generation
                    || state.size >= self.settings.min_size
                    || state.size >= self.settings.max_size
                {
                    break;
                }
                state.size += 1;
            }

            match self.open_reserved(generation) {
                Ok(mut connection) => {
                    let mut state = self.state.lock();
                    if state.generation == generation && !state.shut_down {
                        connection.mark_used();
                        trace!(address = %self.address, size = state.size, "warm-up added a connection");
                        state.available.push(connection);
                        self.available_changed.notify_one();
                    } else {
                        drop(state);
                        connection.close();
                    }
                }
                Err(e) => {
                    warn!(address = %self.address, error = %e, "pool warm-up failed to open a connection");
                    if self.server.state() == ServerState::Disconnected {
                        break;
                    }
                    thread::sleep(self.settings.warm_up_backoff);
                }
            }
        }
        debug!(address = %self.address, generation, "pool warm-up finished");
    }

    #[cfg(test)]
    pub(super) fn backdate_available(&self, age: std::time::Duration, idle: std::time::Duration) {
        for connection in self.state.lock().available.iter_mut() {
            connection.backdate(age, idle);
        }
    }
}

#[cfg(test)]
impl ConnectionPool {
    /// Ages every idle connection, for eviction tests.
    pub(crate) fn backdate_available(&self, age: std::time::Duration, idle: std::time::Duration) {
        self.inner.backdate_available(age, idle);
    }
}
