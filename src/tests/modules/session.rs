use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::{
    cmap::{PoolSettings, ServerAddress},
    doc,
    error::ErrorKind,
    sdam::{
        Cluster,
        ReadPreference,
        ReadPreferenceServerSelector,
        ServerDescription,
        ServerType,
    },
    session::{ChannelOptions, ClusterSession, SessionBehavior},
    tests::MockFactory,
};

const PRIMARY: u16 = 1;
const SECONDARY: u16 = 2;

fn replica_set() -> (Arc<Cluster>, Arc<MockFactory>) {
    let factory = MockFactory::with_handler(|command| {
        doc! { "ok": 1, "command": command.keys().next().cloned().unwrap_or_default() }
    });
    let cluster = Cluster::new(PoolSettings::default(), factory.clone());
    for (port, server_type) in [
        (PRIMARY, ServerType::RsPrimary),
        (SECONDARY, ServerType::RsSecondary),
    ] {
        cluster
            .add_server(ServerDescription::connected(
                ServerAddress::new("session.test", port),
                server_type,
            ))
            .unwrap();
    }
    (Arc::new(cluster), factory)
}

/// A single primary whose pool holds one connection and would make callers wait three
/// seconds for it.
fn single_connection_primary() -> Arc<Cluster> {
    let settings = PoolSettings::builder()
        .max_size(1)
        .wait_queue_timeout(Duration::from_secs(3))
        .build()
        .unwrap();
    let cluster = Cluster::new(settings, MockFactory::new());
    cluster
        .add_server(ServerDescription::connected(
            ServerAddress::new("session.test", PRIMARY),
            ServerType::RsPrimary,
        ))
        .unwrap();
    Arc::new(cluster)
}

fn options(preference: ReadPreference) -> ChannelOptions {
    ChannelOptions::new(ReadPreferenceServerSelector::new(preference))
        .timeout(Duration::from_millis(200))
}

#[test]
fn default_sessions_follow_each_selector() {
    let (cluster, _) = replica_set();
    let session = ClusterSession::new(cluster, SessionBehavior::default());

    let write = session
        .create_channel_provider(options(ReadPreference::Primary).query(false))
        .unwrap();
    assert_eq!(write.server().unwrap().address.port(), PRIMARY);

    let read = session
        .create_channel_provider(options(ReadPreference::Secondary))
        .unwrap();
    assert_eq!(read.server().unwrap().address.port(), SECONDARY);
    assert!(!session.uses_primary());
}

#[test]
fn monotonic_sessions_stick_to_the_primary_after_a_write() {
    let (cluster, _) = replica_set();
    let session = ClusterSession::new(cluster, SessionBehavior::Monotonic);

    let read = session
        .create_channel_provider(options(ReadPreference::Secondary))
        .unwrap();
    assert_eq!(read.server().unwrap().address.port(), SECONDARY);
    assert!(!session.uses_primary());

    session
        .create_channel_provider(options(ReadPreference::Primary).query(false))
        .unwrap();
    assert!(session.uses_primary());

    let read = session
        .create_channel_provider(options(ReadPreference::Nearest))
        .unwrap();
    assert_eq!(read.server().unwrap().address.port(), PRIMARY);

    // the primary does not satisfy a secondary-only read
    let err = session
        .create_channel_provider(options(ReadPreference::Secondary))
        .unwrap_err();
    assert_matches!(err.kind, ErrorKind::IncompatibleServer { ref address } if address.port() == PRIMARY);
    assert!(err.is_topology_error());

    // later queries do not unpin the session
    assert!(session.uses_primary());
}

#[test]
fn channels_run_commands() {
    let (cluster, factory) = replica_set();
    let session = ClusterSession::new(cluster.clone(), SessionBehavior::Default);

    let mut channel = session
        .create_channel(options(ReadPreference::Primary))
        .unwrap();
    assert_eq!(channel.address().port(), PRIMARY);
    let reply = channel.run_command("test", &doc! { "count": "c" }).unwrap();
    assert_eq!(reply, doc! { "ok": 1, "command": "count" });
    channel.close();

    let primary = cluster
        .server(&ServerAddress::new("session.test", PRIMARY))
        .unwrap();
    assert_eq!(primary.pool().available_count(), 1);
    assert_eq!(factory.connects(), 1);

    // the returned connection is reused
    let mut channel = session
        .create_channel(options(ReadPreference::Primary))
        .unwrap();
    channel.run_command("test", &doc! { "ping": 1 }).unwrap();
    assert_eq!(factory.connects(), 1);
}

#[test]
fn selection_failures() {
    let (cluster, _) = replica_set();
    cluster
        .update_description(ServerDescription::connected(
            ServerAddress::new("session.test", PRIMARY),
            ServerType::RsSecondary,
        ))
        .unwrap();
    let session = ClusterSession::new(cluster, SessionBehavior::Monotonic);

    let err = session
        .create_channel_provider(options(ReadPreference::Primary).query(false))
        .unwrap_err();
    assert_matches!(err.kind, ErrorKind::ServerSelection { .. });
}

#[test]
fn disposal() {
    let (cluster, _) = replica_set();
    let session = ClusterSession::new(cluster, SessionBehavior::Default);

    let provider = session
        .create_channel_provider(options(ReadPreference::Primary))
        .unwrap();
    provider.dispose();
    provider.dispose();
    assert_matches!(
        provider.channel().unwrap_err().kind,
        ErrorKind::Disposed { object: "ChannelProvider" }
    );
    assert!(!session.is_disposed());

    let owning = session
        .create_channel_provider(options(ReadPreference::Primary).dispose_session(true))
        .unwrap();
    let mut channel = owning.into_channel().unwrap();
    channel.run_command("test", &doc! { "ping": 1 }).unwrap();
    channel.close();
    assert!(session.is_disposed());

    assert_matches!(
        session
            .create_channel_provider(options(ReadPreference::Primary))
            .unwrap_err()
            .kind,
        ErrorKind::Disposed { object: "ClusterSession" }
    );
}

#[test]
fn disposing_the_session_invalidates_open_channels() {
    let (cluster, _) = replica_set();
    let session = ClusterSession::new(cluster, SessionBehavior::Default);
    let mut channel = session
        .create_channel(options(ReadPreference::Primary))
        .unwrap();

    channel.session().dispose();
    let err = channel.run_command("test", &doc! { "ping": 1 }).unwrap_err();
    assert!(err.is_resource_error());
}

#[test]
fn channel_timeout_bounds_checkout() {
    let cluster = single_connection_primary();
    let session = ClusterSession::new(cluster, SessionBehavior::Default);
    let _held = session
        .create_channel(options(ReadPreference::Primary))
        .unwrap();

    let start = Instant::now();
    let err = session
        .create_channel(options(ReadPreference::Primary).timeout(Duration::from_millis(100)))
        .unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_matches!(
        err.kind,
        ErrorKind::WaitQueueTimeout { timeout, .. } if timeout == Duration::from_millis(100)
    );
}

#[test]
fn failed_checkout_keeps_the_session() {
    let cluster = single_connection_primary();
    let session = ClusterSession::new(cluster.clone(), SessionBehavior::Default);
    let held = session
        .create_channel(options(ReadPreference::Primary))
        .unwrap();

    let owning = session
        .create_channel_provider(
            options(ReadPreference::Primary)
                .timeout(Duration::from_millis(100))
                .dispose_session(true),
        )
        .unwrap();
    assert!(owning.into_channel().is_err());
    assert!(!session.is_disposed());

    held.close();
    let mut channel = session
        .create_channel(options(ReadPreference::Primary))
        .unwrap();
    channel.run_command("test", &doc! { "ping": 1 }).unwrap();
}
