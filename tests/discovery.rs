#[allow(dead_code)]
mod transfer_trial;

use std::net;
use std::thread;
use std::time;

use linewise::discovery::{self, Beacon, BeaconConfig, RegistryServer};
use linewise::source::LineFiles;
use linewise::store::MemoryStore;
use linewise::Error;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(5);

fn free_port() -> u16 {
    net::UdpSocket::bind(("127.0.0.1", 0))
        .and_then(|socket| socket.local_addr())
        .map(|addr| addr.port())
        .expect("failed to find a free port")
}

#[test]
fn registry_resolves_registered_server() {
    let mut registry = RegistryServer::bind(("127.0.0.1", 0)).expect("failed to create registry");
    let registry_addr = registry.local_addr();

    let registry_thread = thread::spawn(move || {
        // Empty query, registration, query
        for _ in 0..3 {
            assert!(registry.handle_request(Some(REQUEST_TIMEOUT)).unwrap());
        }
        registry
    });

    let result = discovery::query_registry(registry_addr, 1, REQUEST_TIMEOUT);
    assert!(matches!(result, Err(Error::NoService(_))));

    let server = linewise::Server::bind_with_config(
        ("127.0.0.1", 0),
        linewise::server::Config {
            file_count: 2,
            ack_timeout_ms: 50,
            ..Default::default()
        },
        MemoryStore::new(),
    )
    .expect("failed to create server");
    let server_addr = server.local_addr();

    discovery::register_service(registry_addr, server_addr).unwrap();

    let resolved = discovery::query_registry(registry_addr, 3, REQUEST_TIMEOUT).unwrap();
    assert_eq!(resolved, server_addr);

    let registry = registry_thread.join().unwrap();
    assert_eq!(registry.registered().map(|r| r.port), Some(server_addr.port() as i32));

    // The resolved address carries a full transfer
    let server_thread = transfer_trial::spawn_server(server, 1);

    let texts = transfer_trial::quote_texts(0, &[5, 6]);
    let client_config = linewise::client::Config {
        ack_timeout_ms: 50,
        ..Default::default()
    };
    let mut client =
        linewise::Client::bind_with_config(("127.0.0.1", 0), resolved, client_config).unwrap();

    let mut result = Vec::new();
    client
        .transfer(&LineFiles::from_texts(&texts).unwrap(), &mut result)
        .unwrap();

    assert_eq!(md5::compute(&result), md5::compute(texts.concat().as_bytes()));

    server_thread.join().unwrap();
}

#[test]
fn beacon_advertises_server() {
    let port = free_port();
    let service: net::SocketAddr = "127.0.0.1:4950".parse().unwrap();

    let beacon = Beacon::start(
        service,
        BeaconConfig {
            interval_ms: 20,
            destination: (net::Ipv4Addr::LOCALHOST, port).into(),
        },
    )
    .expect("failed to start beacon");

    let discovered = discovery::listen_for_beacon(("127.0.0.1", port), REQUEST_TIMEOUT).unwrap();

    beacon.stop();

    assert_eq!(discovered, service);
}
