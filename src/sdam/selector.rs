use std::{fmt, sync::Arc, time::Duration};

use super::{ServerDescription, ServerType};
use crate::cmap::ServerAddress;

/// How far behind the fastest server a server may be and still be considered "near".
pub const DEFAULT_LATENCY_WINDOW: Duration = Duration::from_millis(15);

/// Narrows a set of servers down to the ones an operation may use.
///
/// Selectors only look at descriptions; the [`Cluster`](super::Cluster) picks one of the
/// survivors at random.
pub trait ServerSelector: Send + Sync + fmt::Debug {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription>;

    /// Whether `server` alone would be selected.
    fn matches(&self, server: &ServerDescription) -> bool {
        !self.select_servers(vec![server]).is_empty()
    }
}

/// Selects connected servers that accept writes.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrimaryServerSelector;

impl ServerSelector for PrimaryServerSelector {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|s| s.is_connected() && s.server_type.is_writable())
            .collect()
    }
}

/// Which members of a replica set reads may go to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Selects servers for a read according to a [`ReadPreference`].
///
/// Standalone servers and mongos routers satisfy every preference. Among secondaries, only
/// those within the latency window of the fastest one are kept.
#[derive(Clone, Debug)]
pub struct ReadPreferenceServerSelector {
    read_preference: ReadPreference,
    latency_window: Duration,
}

impl ReadPreferenceServerSelector {
    pub fn new(read_preference: ReadPreference) -> Self {
        Self {
            read_preference,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }

    pub fn with_latency_window(mut self, latency_window: Duration) -> Self {
        self.latency_window = latency_window;
        self
    }

    pub fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }
}

impl ServerSelector for ReadPreferenceServerSelector {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let connected: Vec<_> = servers.into_iter().filter(|s| s.is_connected()).collect();

        let direct: Vec<_> = connected
            .iter()
            .copied()
            .filter(|s| matches!(s.server_type, ServerType::Standalone | ServerType::Mongos))
            .collect();
        if !direct.is_empty() {
            return within_latency_window(direct, self.latency_window);
        }

        let primaries: Vec<_> = connected
            .iter()
            .copied()
            .filter(|s| s.server_type == ServerType::RsPrimary)
            .collect();
        let secondaries = || {
            within_latency_window(
                connected
                    .iter()
                    .copied()
                    .filter(|s| s.server_type == ServerType::RsSecondary)
                    .collect(),
                self.latency_window,
            )
        };

        match self.read_preference {
            ReadPreference::Primary => primaries,
            ReadPreference::PrimaryPreferred if !primaries.is_empty() => primaries,
            ReadPreference::PrimaryPreferred | ReadPreference::Secondary => secondaries(),
            ReadPreference::SecondaryPreferred => {
                let secondaries = secondaries();
                if secondaries.is_empty() {
                    primaries
                } else {
                    secondaries
                }
            }
            ReadPreference::Nearest => within_latency_window(
                connected
                    .iter()
                    .copied()
                    .filter(|s| {
                        matches!(
                            s.server_type,
                            ServerType::RsPrimary | ServerType::RsSecondary
                        )
                    })
                    .collect(),
                self.latency_window,
            ),
        }
    }
}

/// Selects the server at one address.
#[derive(Clone, Debug)]
pub struct EndpointServerSelector {
    address: ServerAddress,
}

impl EndpointServerSelector {
    pub fn new(address: ServerAddress) -> Self {
        Self { address }
    }
}

impl ServerSelector for EndpointServerSelector {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|s| s.address == self.address)
            .collect()
    }
}

/// Keeps the servers whose round trip time is within a window of the fastest one.
#[derive(Clone, Debug)]
pub struct LatencyLimitingServerSelector {
    window: Duration,
}

impl LatencyLimitingServerSelector {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl Default for LatencyLimitingServerSelector {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl ServerSelector for LatencyLimitingServerSelector {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        within_latency_window(servers, self.window)
    }
}

/// Runs several selectors in sequence, each narrowing the previous result.
#[derive(Clone, Debug, Default)]
pub struct CompositeServerSelector {
    selectors: Vec<Arc<dyn ServerSelector>>,
}

impl CompositeServerSelector {
    pub fn new(selectors: Vec<Arc<dyn ServerSelector>>) -> Self {
        Self { selectors }
    }

    pub fn push(mut self, selector: impl ServerSelector + 'static) -> Self {
        self.selectors.push(Arc::new(selector));
        self
    }
}

impl ServerSelector for CompositeServerSelector {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        self.selectors
            .iter()
            .fold(servers, |servers, selector| selector.select_servers(servers))
    }
}

type Predicate = dyn Fn(&ServerDescription) -> bool + Send + Sync;

/// Selects the servers accepted by a closure.
#[derive(Clone)]
pub struct DelegateServerSelector {
    predicate: Arc<Predicate>,
}

impl DelegateServerSelector {
    pub fn new(predicate: impl Fn(&ServerDescription) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for DelegateServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateServerSelector").finish_non_exhaustive()
    }
}

impl ServerSelector for DelegateServerSelector {
    fn select_servers<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers.into_iter().filter(|s| (self.predicate)(s)).collect()
    }
}

fn within_latency_window(
    servers: Vec<&ServerDescription>,
    window: Duration,
) -> Vec<&ServerDescription> {
    let Some(fastest) = servers.iter().map(|s| s.round_trip_time).min() else {
        return servers;
    };
    let limit = fastest.saturating_add(window);
    servers
        .into_iter()
        .filter(|s| s.round_trip_time <= limit)
        .collect()
}
