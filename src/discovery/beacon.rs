use std::net;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;

use super::ServiceRecord;
use crate::error::{Error, Result};
use crate::socket::{Link, Socket};

const BEACON_INTERVAL_DEFAULT_MS: u64 = 3_000;

/// Configuration for a [`Beacon`].
#[derive(Clone, Debug)]
pub struct BeaconConfig {
    /// Time between advertisements, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 3,000
    pub interval_ms: u64,

    /// Where advertisements are sent. May be a broadcast address.
    ///
    /// Default value: `127.0.0.1:4951`
    pub destination: net::SocketAddr,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            interval_ms: BEACON_INTERVAL_DEFAULT_MS,
            destination: (net::Ipv4Addr::LOCALHOST, crate::DISCOVERY_PORT).into(),
        }
    }
}

impl BeaconConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::Config("beacon interval_ms == 0".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> time::Duration {
        time::Duration::from_millis(self.interval_ms)
    }
}

/// Periodically advertises a service address from a thread of its own.
///
/// The thread stops when [`Beacon::stop`] is called or the handle is dropped.
pub struct Beacon {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Beacon {
    /// Starts advertising `service`.
    pub fn start(service: net::SocketAddr, config: BeaconConfig) -> Result<Self> {
        config.validate()?;

        let datagram = ServiceRecord::advertise(service)
            .encode()
            .map_err(|e| Error::Config(format!("cannot advertise {service}: {e}")))?;

        let mut socket = Socket::bind(super::ephemeral_bind_addr(&config.destination))?;
        socket.set_broadcast(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("beacon".into())
            .spawn(move || {
                tracing::info!(%service, destination = %config.destination, "beacon started");

                while !stop_flag.load(Ordering::Acquire) {
                    if let Err(e) = socket.send_to(&datagram, &config.destination) {
                        tracing::warn!(error = %e, "failed to send beacon");
                    }

                    thread::park_timeout(config.interval());
                }

                tracing::info!("beacon stopped");
            })
            .map_err(Error::Transport)?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stops advertising and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Waits up to `timeout` on `bind_addr` for a beacon. The first valid advertisement wins.
pub fn listen_for_beacon<A>(bind_addr: A, timeout: time::Duration) -> Result<net::SocketAddr>
where
    A: net::ToSocketAddrs,
{
    let mut socket = Socket::bind(bind_addr)?;
    let deadline = time::Instant::now() + timeout;

    tracing::info!(local_addr = %socket.local_addr(), "listening for beacon");

    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());

        if remaining.is_zero() {
            return Err(Error::NoService("no beacon received".into()));
        }

        let Some((frame_bytes, sender_addr)) = socket.wait_for_frame(Some(remaining))? else {
            continue;
        };

        let record = match ServiceRecord::decode(frame_bytes) {
            Ok(record) if !record.is_none() => record,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(%sender_addr, error = %e, "ignoring malformed beacon");
                continue;
            }
        };

        match record.socket_addr() {
            Ok(service) => {
                tracing::info!(%service, %sender_addr, "beacon received");
                return Ok(service);
            }
            Err(e) => {
                tracing::debug!(%sender_addr, error = %e, "ignoring unusable beacon");
            }
        }
    }
}
