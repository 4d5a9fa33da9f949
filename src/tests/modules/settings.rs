use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    cmap::{Credential, ServerAddress},
    settings::ClientSettings,
};

#[test]
fn defaults() {
    let settings = ClientSettings::parse("mongodb://localhost").unwrap();
    assert_eq!(settings, ClientSettings::default());
    assert_eq!(settings.hosts, vec![ServerAddress::new("localhost", 27017)]);
    assert!(settings.writer_settings().check_element_names);
}

#[test]
fn hosts_database_and_options() {
    let settings: ClientSettings = "mongodb://one.test:27018,[::1]:27019/inventory?MinPoolSize=2&maxpoolsize=20;waitQueueTimeoutMS=500&maxIdleTimeMS=1000&maxLifetimeMS=2000&connectTimeoutMS=3000&serverSelectionTimeoutMS=4000"
        .parse()
        .unwrap();

    assert_eq!(
        settings.hosts,
        vec![
            ServerAddress::new("one.test", 27018),
            ServerAddress::new("::1", 27019)
        ]
    );
    assert_eq!(settings.database.as_deref(), Some("inventory"));
    assert_eq!(settings.pool.min_size, 2);
    assert_eq!(settings.pool.max_size, 20);
    assert_eq!(settings.pool.wait_queue_timeout, Duration::from_millis(500));
    assert_eq!(settings.pool.max_idle_time, Duration::from_secs(1));
    assert_eq!(settings.pool.max_connection_lifetime, Duration::from_secs(2));
    assert_eq!(settings.connect_timeout, Duration::from_secs(3));
    assert_eq!(settings.server_selection_timeout, Duration::from_secs(4));
    assert_eq!(settings.credential, None);
}

#[test]
fn wait_queue_options() {
    let settings = ClientSettings::parse("mongodb://h/?maxPoolSize=10&waitQueueMultiple=3").unwrap();
    assert_eq!(settings.pool.wait_queue_size, 30);

    // an explicit size wins over the multiple
    let settings =
        ClientSettings::parse("mongodb://h/?waitQueueMultiple=3&waitQueueSize=4").unwrap();
    assert_eq!(settings.pool.wait_queue_size, 4);
}

#[test]
fn credentials() {
    let settings = ClientSettings::parse("mongodb://al%40ice:p%3Ass@h/sales").unwrap();
    assert_eq!(
        settings.credential,
        Some(Credential::new("sales", "al@ice", "p:ss"))
    );

    let settings = ClientSettings::parse("mongodb://bob:pw@h/sales?authSource=users").unwrap();
    assert_eq!(settings.credential.unwrap().source, "users");

    let settings = ClientSettings::parse("mongodb://bob@h").unwrap();
    assert_eq!(settings.credential, Some(Credential::new("admin", "bob", "")));
}

#[test]
fn invalid_connection_strings() {
    for uri in [
        "http://h",
        "mongodb://",
        "mongodb://h:notaport",
        "mongodb://h/?bogus=1",
        "mongodb://h/?maxPoolSize",
        "mongodb://h/?maxPoolSize=-1",
        "mongodb://h/?maxPoolSize=0",
        "mongodb://h/?minPoolSize=5&maxPoolSize=2",
        "mongodb://h/%zz",
    ] {
        let err = ClientSettings::parse(uri).unwrap_err();
        assert!(!err.is_network_error(), "{uri}");
    }
}
