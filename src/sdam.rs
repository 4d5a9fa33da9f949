//! Server discovery: descriptions of the servers in a cluster, server selectors, and the
//! [`Cluster`] that picks a server for an operation.

mod cluster;
mod description;
mod selector;

pub use self::{
    cluster::{Cluster, ClusterServer, TopologyProvider},
    description::{ServerDescription, ServerState, ServerType},
    selector::{
        CompositeServerSelector,
        DEFAULT_LATENCY_WINDOW,
        DelegateServerSelector,
        EndpointServerSelector,
        LatencyLimitingServerSelector,
        PrimaryServerSelector,
        ReadPreference,
        ReadPreferenceServerSelector,
        ServerSelector,
    },
};
