use std::net;
use std::time;

use super::{ephemeral_bind_addr, ServiceRecord};
use crate::error::{Error, Result};
use crate::socket::{Link, Socket};

/// Remembers the most recently registered service and hands it to anyone who asks.
pub struct RegistryServer {
    socket: Socket,
    registered: Option<ServiceRecord>,
}

impl RegistryServer {
    pub fn bind<A>(bind_addr: A) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let socket = Socket::bind(bind_addr)?;

        tracing::info!(local_addr = %socket.local_addr(), "registry bound");

        Ok(Self {
            socket,
            registered: None,
        })
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.socket.local_addr()
    }

    pub fn registered(&self) -> Option<&ServiceRecord> {
        self.registered.as_ref()
    }

    /// Serves requests until a socket error occurs.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.handle_request(None)?;
        }
    }

    /// Handles at most one request, waiting up to `timeout` for it. Returns false if none
    /// arrived.
    pub fn handle_request(&mut self, timeout: Option<time::Duration>) -> Result<bool> {
        let (decoded, sender_addr) = match self.socket.wait_for_frame(timeout)? {
            Some((frame_bytes, sender_addr)) => (ServiceRecord::decode(frame_bytes), sender_addr),
            None => return Ok(false),
        };

        let record = match decoded {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(%sender_addr, error = %e, "ignoring malformed request");
                return Ok(true);
            }
        };

        if record.register {
            tracing::info!(
                %sender_addr,
                address = %record.address,
                port = record.port,
                "service registered"
            );

            self.registered = Some(ServiceRecord {
                register: false,
                query: false,
                ..record.clone()
            });
        }

        if record.query {
            let reply = self.registered.clone().unwrap_or_else(ServiceRecord::none);

            tracing::debug!(%sender_addr, port = reply.port, "answering query");

            // A stored record always encodes; it was decoded from the same layout
            if let Ok(datagram) = reply.encode() {
                self.socket.send_to(&datagram, &sender_addr)?;
            }
        }

        Ok(true)
    }
}

/// Registers `service` with the registry at `registry_addr`. Delivery is not confirmed.
pub fn register_service(registry_addr: net::SocketAddr, service: net::SocketAddr) -> Result<()> {
    let record = ServiceRecord {
        register: true,
        ..ServiceRecord::advertise(service)
    };

    let datagram = record
        .encode()
        .map_err(|e| Error::Config(format!("cannot register {service}: {e}")))?;

    let mut socket = Socket::bind(ephemeral_bind_addr(&registry_addr))?;
    socket.send_to(&datagram, &registry_addr)?;

    tracing::info!(%service, %registry_addr, "registration sent");

    Ok(())
}

/// Asks the registry at `registry_addr` for the registered service, making up to `attempts`
/// requests and waiting `timeout` for each reply.
pub fn query_registry(
    registry_addr: net::SocketAddr,
    attempts: u32,
    timeout: time::Duration,
) -> Result<net::SocketAddr> {
    let query = ServiceRecord {
        query: true,
        ..ServiceRecord::none()
    };

    let datagram = query
        .encode()
        .map_err(|e| Error::Config(format!("cannot encode query: {e}")))?;

    let mut socket = Socket::bind(ephemeral_bind_addr(&registry_addr))?;

    for attempt in 1..=attempts {
        socket.send_to(&datagram, &registry_addr)?;

        tracing::debug!(%registry_addr, attempt, "queried registry");

        let deadline = time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());

            if remaining.is_zero() {
                tracing::warn!(%registry_addr, attempt, "registry query timed out");
                break;
            }

            let (decoded, sender_addr) = match socket.wait_for_frame(Some(remaining))? {
                Some((frame_bytes, sender_addr)) => {
                    (ServiceRecord::decode(frame_bytes), sender_addr)
                }
                None => continue,
            };

            if sender_addr != registry_addr {
                continue;
            }

            match decoded {
                Ok(record) if record.is_none() => {
                    return Err(Error::NoService("registry has no service registered".into()));
                }
                Ok(record) => {
                    let service = record.socket_addr()?;
                    tracing::info!(%service, "service resolved through registry");
                    return Ok(service);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed registry reply");
                }
            }
        }
    }

    Err(Error::NoService(format!(
        "registry at {registry_addr} did not answer after {attempts} attempts"
    )))
}
