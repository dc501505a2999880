//! Resolving the server's data-plane address before a transfer starts.
//!
//! A server either advertises itself with a periodic [`Beacon`], or registers with a
//! [`RegistryServer`] that clients query. Both carry a [`ServiceRecord`]:
//!
//! ```text
//! offset  size  field
//!      0     1  address length (<= 46)
//!      1    46  address text, zero padded
//!     47     4  port (i32, big-endian, -1 if no service)
//!     51     1  register flag
//!     52     1  query flag
//! ```

mod beacon;
mod registry;

use std::net;

use crate::error::{Error, Result};
use crate::packet::serial::{Reader, Writer};

pub use beacon::{listen_for_beacon, Beacon, BeaconConfig};
pub use registry::{query_registry, register_service, RegistryServer};

/// Longest textual address a record can carry; fits any IPv6 address.
pub const ADDRESS_LEN_MAX: usize = 46;

pub const RECORD_SIZE: usize = 1 + ADDRESS_LEN_MAX + 4 + 1 + 1;

/// Port value meaning "no service".
pub const NO_SERVICE_PORT: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record is {0} bytes, expected {expected}", expected = RECORD_SIZE)]
    WrongSize(usize),
    #[error("address of {0} bytes is too long")]
    AddressTooLong(usize),
    #[error("address is not valid UTF-8")]
    AddressNotUtf8,
    #[error("invalid flag byte {0}")]
    InvalidFlag(u8),
}

/// Where a service can be reached, plus the registry intent flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    pub address: String,
    pub port: i32,
    /// Asks a registry to store this record.
    pub register: bool,
    /// Asks a registry to reply with its stored record.
    pub query: bool,
}

impl ServiceRecord {
    /// A record advertising `addr`.
    pub fn advertise(addr: net::SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port() as i32,
            register: false,
            query: false,
        }
    }

    /// A record naming no service.
    pub fn none() -> Self {
        Self {
            address: String::new(),
            port: NO_SERVICE_PORT,
            register: false,
            query: false,
        }
    }

    pub fn is_none(&self) -> bool {
        self.port == NO_SERVICE_PORT
    }

    /// Parses the advertised address.
    pub fn socket_addr(&self) -> Result<net::SocketAddr> {
        let ip = self
            .address
            .parse::<net::IpAddr>()
            .map_err(|e| Error::NoService(format!("bad address {:?}: {}", self.address, e)))?;

        let port = u16::try_from(self.port)
            .map_err(|_| Error::NoService(format!("bad port {}", self.port)))?;

        Ok(net::SocketAddr::new(ip, port))
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, RecordError> {
        let address = self.address.as_bytes();

        if address.len() > ADDRESS_LEN_MAX {
            return Err(RecordError::AddressTooLong(address.len()));
        }

        let mut wr = Writer::with_capacity(RECORD_SIZE);

        wr.write_u8(address.len() as u8);
        wr.write_slice(address);
        wr.write_slice(&[0; ADDRESS_LEN_MAX][address.len()..]);
        wr.write_u32(self.port as u32);
        wr.write_u8(self.register as u8);
        wr.write_u8(self.query as u8);

        Ok(wr.finish())
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, RecordError> {
        if bytes.len() != RECORD_SIZE {
            return Err(RecordError::WrongSize(bytes.len()));
        }

        let address_len = bytes[0] as usize;
        if address_len > ADDRESS_LEN_MAX {
            return Err(RecordError::AddressTooLong(address_len));
        }

        let address = std::str::from_utf8(&bytes[1..1 + address_len])
            .map_err(|_| RecordError::AddressNotUtf8)?
            .to_string();

        let mut rd = Reader::new(&bytes[1 + ADDRESS_LEN_MAX..]);
        let wrong_size = || RecordError::WrongSize(bytes.len());

        let port = rd.read_i32().ok_or_else(wrong_size)?;
        let register = flag(rd.read_u8().ok_or_else(wrong_size)?)?;
        let query = flag(rd.read_u8().ok_or_else(wrong_size)?)?;

        Ok(Self {
            address,
            port,
            register,
            query,
        })
    }
}

fn flag(byte: u8) -> std::result::Result<bool, RecordError> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RecordError::InvalidFlag(other)),
    }
}

/// An unspecified local address of the same family as `peer`, on an ephemeral port.
pub fn ephemeral_bind_addr(peer: &net::SocketAddr) -> net::SocketAddr {
    match peer {
        net::SocketAddr::V4(_) => (net::Ipv4Addr::UNSPECIFIED, 0).into(),
        net::SocketAddr::V6(_) => (net::Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}
