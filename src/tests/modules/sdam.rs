use std::{sync::Arc, thread, time::Duration};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::{
    cancellation::CancellationToken,
    cmap::{PoolSettings, ServerAddress},
    error::ErrorKind,
    sdam::{
        Cluster,
        CompositeServerSelector,
        DelegateServerSelector,
        EndpointServerSelector,
        LatencyLimitingServerSelector,
        PrimaryServerSelector,
        ReadPreference,
        ReadPreferenceServerSelector,
        ServerDescription,
        ServerSelector,
        ServerState,
        ServerType,
        TopologyProvider,
    },
    settings::ClientSettings,
    tests::MockFactory,
};

fn server(port: u16, server_type: ServerType, rtt_ms: u64) -> ServerDescription {
    ServerDescription::connected(ServerAddress::new("rs.test", port), server_type)
        .with_round_trip_time(Duration::from_millis(rtt_ms))
}

fn ports(selected: Vec<&ServerDescription>) -> Vec<u16> {
    let mut ports: Vec<_> = selected.iter().map(|s| s.address.port()).collect();
    ports.sort_unstable();
    ports
}

fn replica_set() -> Vec<ServerDescription> {
    vec![
        server(1, ServerType::RsPrimary, 5),
        server(2, ServerType::RsSecondary, 10),
        server(3, ServerType::RsSecondary, 40),
        server(4, ServerType::RsArbiter, 1),
        server(5, ServerType::RsSecondary, 1).with_state(ServerState::Connecting),
    ]
}

#[test]
fn server_address_parsing() {
    let address = ServerAddress::parse("Example.COM:27018").unwrap();
    assert_eq!(address.host(), "example.com");
    assert_eq!(address.port(), 27018);
    assert_eq!(address.to_string(), "example.com:27018");

    assert_eq!(ServerAddress::parse("db").unwrap().port(), 27017);
    let v6: ServerAddress = "[::1]:1000".parse().unwrap();
    assert_eq!(v6.host(), "::1");
    assert_eq!(v6.to_string(), "[::1]:1000");

    for bad in ["", ":27017", "host:0", "host:port", "[::1", "[::1]x"] {
        assert!(ServerAddress::parse(bad).is_err(), "{bad}");
    }
}

#[test]
fn primary_selector() {
    let servers = replica_set();
    let standalone = server(9, ServerType::Standalone, 1);
    assert_eq!(
        ports(PrimaryServerSelector.select_servers(servers.iter().collect())),
        vec![1]
    );
    assert!(PrimaryServerSelector.matches(&standalone));
    assert!(!PrimaryServerSelector.matches(&standalone.clone().with_state(ServerState::Disconnected)));
}

#[test]
fn read_preference_selector() {
    let servers = replica_set();
    let select = |preference| {
        ports(
            ReadPreferenceServerSelector::new(preference).select_servers(servers.iter().collect()),
        )
    };

    assert_eq!(select(ReadPreference::Primary), vec![1]);
    assert_eq!(select(ReadPreference::PrimaryPreferred), vec![1]);
    // the 40ms secondary falls outside the latency window
    assert_eq!(select(ReadPreference::Secondary), vec![2]);
    assert_eq!(select(ReadPreference::SecondaryPreferred), vec![2]);
    assert_eq!(select(ReadPreference::Nearest), vec![1, 2]);

    let wide = ReadPreferenceServerSelector::new(ReadPreference::Secondary)
        .with_latency_window(Duration::from_millis(100));
    assert_eq!(ports(wide.select_servers(servers.iter().collect())), vec![2, 3]);
}

#[test]
fn read_preference_fallbacks() {
    let no_primary: Vec<_> = replica_set().into_iter().skip(1).collect();
    let selector = ReadPreferenceServerSelector::new(ReadPreference::PrimaryPreferred);
    assert_eq!(ports(selector.select_servers(no_primary.iter().collect())), vec![2]);
    let selector = ReadPreferenceServerSelector::new(ReadPreference::Primary);
    assert!(selector.select_servers(no_primary.iter().collect()).is_empty());

    let only_primary = vec![server(1, ServerType::RsPrimary, 5)];
    let selector = ReadPreferenceServerSelector::new(ReadPreference::SecondaryPreferred);
    assert_eq!(ports(selector.select_servers(only_primary.iter().collect())), vec![1]);

    let routers = vec![
        server(1, ServerType::Mongos, 5),
        server(2, ServerType::Mongos, 50),
    ];
    let selector = ReadPreferenceServerSelector::new(ReadPreference::Secondary);
    assert_eq!(ports(selector.select_servers(routers.iter().collect())), vec![1]);
}

#[test]
fn composite_and_helper_selectors() {
    let servers = replica_set();

    let endpoint = EndpointServerSelector::new(ServerAddress::new("rs.test", 3));
    assert_eq!(ports(endpoint.select_servers(servers.iter().collect())), vec![3]);

    let latency = LatencyLimitingServerSelector::default();
    assert_eq!(
        ports(latency.select_servers(servers.iter().collect())),
        vec![1, 2, 4, 5]
    );

    let composite = CompositeServerSelector::default()
        .push(DelegateServerSelector::new(|s| s.server_type.is_data_bearing()))
        .push(DelegateServerSelector::new(|s| s.is_connected()))
        .push(LatencyLimitingServerSelector::new(Duration::from_millis(2)));
    assert_eq!(ports(composite.select_servers(servers.iter().collect())), vec![1]);
}

fn cluster(factory: &Arc<MockFactory>) -> Cluster {
    Cluster::new(PoolSettings::default(), factory.clone())
}

#[test]
fn cluster_selects_a_matching_server() {
    let factory = MockFactory::new();
    let cluster = cluster(&factory);
    cluster
        .add_server(server(1, ServerType::RsSecondary, 1))
        .unwrap();
    cluster
        .add_server(server(2, ServerType::RsPrimary, 1))
        .unwrap();
    assert!(
        cluster
            .add_server(server(2, ServerType::RsPrimary, 1))
            .is_err()
    );

    let selected = cluster
        .select_server(
            &PrimaryServerSelector,
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(selected.address().port(), 2);

    let connection = selected
        .acquire(None, Duration::from_secs(1), &CancellationToken::new())
        .unwrap();
    assert!(connection.is_open());
    assert_eq!(factory.connects(), 1);
}

#[test]
fn cluster_selection_times_out() {
    let cluster = cluster(&MockFactory::new());
    cluster
        .add_server(server(1, ServerType::RsSecondary, 1))
        .unwrap();

    let err = cluster
        .select_server(
            &PrimaryServerSelector,
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_matches!(err.kind, ErrorKind::ServerSelection { .. });
    assert!(err.is_topology_error());
}

#[test]
fn cluster_selection_is_cancellable() {
    let cluster = cluster(&MockFactory::new());
    let token = CancellationToken::new();
    token.cancel();
    let err = cluster
        .select_server(&PrimaryServerSelector, Duration::from_secs(30), &token)
        .unwrap_err();
    assert_matches!(err.kind, ErrorKind::Cancelled);
}

#[test]
fn selection_wakes_up_on_description_changes() {
    let cluster = Arc::new(cluster(&MockFactory::new()));
    cluster
        .add_server(server(1, ServerType::RsSecondary, 1))
        .unwrap();

    let promoter = {
        let cluster = Arc::clone(&cluster);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cluster
                .update_description(server(1, ServerType::RsPrimary, 1))
                .unwrap();
        })
    };
    let selected = cluster
        .select_server(
            &PrimaryServerSelector,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(selected.description().server_type, ServerType::RsPrimary);
    promoter.join().unwrap();
}

#[test]
fn disconnecting_clears_the_pool() {
    let factory = MockFactory::new();
    let cluster = cluster(&factory);
    let server = cluster
        .add_server(server(1, ServerType::Standalone, 1))
        .unwrap();
    drop(
        server
            .acquire(None, Duration::from_secs(1), &CancellationToken::new())
            .unwrap(),
    );
    assert_eq!(server.pool().available_count(), 1);

    cluster
        .update_description(server.description().with_state(ServerState::Disconnected))
        .unwrap();
    assert_eq!(server.pool().available_count(), 0);
    assert_eq!(server.pool().generation(), 1);

    let unknown = ServerDescription::new(ServerAddress::new("elsewhere", 1));
    assert!(cluster.update_description(unknown).is_err());
}

#[test]
fn cluster_from_settings() {
    let settings: ClientSettings = "mongodb://a.test,b.test:27018/?maxPoolSize=7"
        .parse()
        .unwrap();
    let cluster = Cluster::from_settings(&settings, MockFactory::new()).unwrap();

    let descriptions = cluster.descriptions();
    assert_eq!(descriptions.len(), 2);
    assert!(descriptions.iter().all(|d| d.server_type == ServerType::Unknown));
    assert_eq!(cluster.servers()[1].pool().settings().max_size, 7);
    cluster.shutdown();
}
