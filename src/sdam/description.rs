use std::{collections::BTreeMap, time::Duration};

use crate::cmap::ServerAddress;

/// The role a server plays in its deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServerType {
    Standalone,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    Mongos,
    #[default]
    Unknown,
}

impl ServerType {
    /// Whether writes may be sent to a server of this type.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Standalone | Self::RsPrimary | Self::Mongos)
    }

    /// Whether the server holds data, as opposed to an arbiter or an unknown server.
    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::RsPrimary | Self::RsSecondary | Self::Mongos
        )
    }
}

/// Reachability of a server as last observed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServerState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
}

/// What is known about one server.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerDescription {
    pub address: ServerAddress,
    pub server_type: ServerType,
    pub state: ServerState,
    pub round_trip_time: Duration,
    pub tags: BTreeMap<String, String>,
}

impl ServerDescription {
    /// A description of a server nothing is known about yet.
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            state: ServerState::Disconnected,
            round_trip_time: Duration::ZERO,
            tags: BTreeMap::new(),
        }
    }

    /// A connected server of the given type.
    pub fn connected(address: ServerAddress, server_type: ServerType) -> Self {
        Self {
            server_type,
            state: ServerState::Connected,
            ..Self::new(address)
        }
    }

    pub fn with_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self
    }

    pub fn with_state(mut self, state: ServerState) -> Self {
        self.state = state;
        self
    }

    pub fn with_round_trip_time(mut self, round_trip_time: Duration) -> Self {
        self.round_trip_time = round_trip_time;
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state == ServerState::Connected
    }
}
