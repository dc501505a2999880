use std::thread;
use std::time;

use linewise::client::{self, SendOrder};
use linewise::server::{self, Cycle, RandomFaults};
use linewise::source::LineFiles;
use linewise::store::{ChunkSink, MemoryStore};

const SERVER_IDLE_TIMEOUT: time::Duration = time::Duration::from_secs(10);

#[derive(Clone)]
pub struct Config {
    /// Line count of each file
    pub sizes: Vec<u32>,
    pub send_order: SendOrder,
    pub damage_rate: f64,
    pub loss_rate: f64,
    pub retry_limit: u32,
    pub ack_timeout_ms: u64,
    /// Clients run one after another against the same server
    pub cycles: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sizes: vec![9, 9, 10, 9, 8, 12, 12, 8, 7, 11],
            send_order: SendOrder::Random,
            damage_rate: 0.0,
            loss_rate: 0.0,
            retry_limit: 10,
            ack_timeout_ms: 50,
            cycles: 1,
        }
    }
}

pub fn quote_text(cycle: usize, file_id: usize, lines: u32) -> String {
    (0..lines)
        .map(|line| {
            let filler = "~".repeat(line as usize % 7);
            format!("cycle {cycle} quote {file_id} line {line}: {filler}\n")
        })
        .collect()
}

pub fn quote_texts(cycle: usize, sizes: &[u32]) -> Vec<String> {
    sizes
        .iter()
        .enumerate()
        .map(|(file_id, &lines)| quote_text(cycle, file_id, lines))
        .collect()
}

fn server_config(config: &Config) -> server::Config {
    server::Config {
        file_count: config.sizes.len() as u32,
        retry_limit: config.retry_limit,
        ack_timeout_ms: config.ack_timeout_ms,
        ..Default::default()
    }
}

fn client_config(config: &Config) -> client::Config {
    client::Config {
        retry_limit: config.retry_limit,
        ack_timeout_ms: config.ack_timeout_ms,
        send_order: config.send_order,
        ..Default::default()
    }
}

/// Serves `cycles` cycles on a background thread, returning the server once they are done.
pub fn spawn_server<S>(
    server: linewise::Server<S>,
    cycles: usize,
) -> thread::JoinHandle<(linewise::Server<S>, Vec<Cycle>)>
where
    S: ChunkSink + Send + 'static,
{
    let mut server = server;

    thread::spawn(move || {
        let mut done = Vec::new();

        for _ in 0..cycles {
            let cycle = server
                .serve_cycle_timeout(SERVER_IDLE_TIMEOUT)
                .expect("server failed")
                .expect("server went idle before the cycle completed");
            done.push(cycle);
        }

        (server, done)
    })
}

pub fn run(config: Config) -> (linewise::Server<MemoryStore>, Vec<Cycle>) {
    let mut server = linewise::Server::bind_with_config(
        ("127.0.0.1", 0),
        server_config(&config),
        MemoryStore::new(),
    )
    .expect("failed to create server");

    if config.damage_rate > 0.0 || config.loss_rate > 0.0 {
        server = server.with_faults(RandomFaults::new(config.damage_rate, config.loss_rate));
    }

    let server_addr = server.local_addr();
    let server_thread = spawn_server(server, config.cycles);

    for cycle in 0..config.cycles {
        let texts = quote_texts(cycle, &config.sizes);
        let source = LineFiles::from_texts(&texts).unwrap();

        let mut client = linewise::Client::bind_with_config(
            ("127.0.0.1", 0),
            server_addr,
            client_config(&config),
        )
        .expect("failed to create client");

        let mut result = Vec::new();
        let report = client
            .transfer(&source, &mut result)
            .expect("transfer failed");

        let expected = texts.concat();

        assert_eq!(md5::compute(&result), md5::compute(expected.as_bytes()));
        assert_eq!(
            report.result_lines,
            config.sizes.iter().sum::<u32>(),
            "cycle {cycle}"
        );
        assert!(report.transmissions >= report.packets);
    }

    let (server, cycles) = server_thread.join().unwrap();

    assert_eq!(cycles.len(), config.cycles);

    for (i, cycle) in cycles.iter().enumerate() {
        let expected = quote_texts(i, &config.sizes).concat();
        assert_eq!(
            md5::compute(&cycle.concatenated),
            md5::compute(expected.as_bytes())
        );
        assert!(cycle.returned, "cycle {i} result not acknowledged");
    }

    (server, cycles)
}
