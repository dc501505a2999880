use std::ffi::OsString;
use std::fs;
use std::io;
use std::net;
use std::path::{Path, PathBuf};
use std::time;

use rand::seq::SliceRandom;

use crate::arq::{Delivery, ReliableSender, StrayData};
use crate::connection::{Scheduler, SendConnection};
use crate::error::{Error, Result};
use crate::packet::serial::FrameError;
use crate::packet::{is_damaged, Bounds, DataPacket, Packet, PacketId};
use crate::payload;
use crate::socket::{Link, Socket};
use crate::source::LineSource;
use crate::window::{Placement, ReceiveWindow};

const RESULT_WAIT_FACTOR_DEFAULT: u32 = 10;

/// Order in which data packets leave the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendOrder {
    /// Each packet is generated just before it is sent, from a file chosen uniformly among those
    /// not yet finished.
    #[default]
    Random,
    /// Every packet is generated up front and the whole set is sent in shuffled order.
    Shuffled,
}

/// Configuration for a [`Client`] object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Per-file line limit of the receiving server. Files longer than this are refused before
    /// anything is sent.
    ///
    /// Minimum value: 1 \
    /// Default value: 100
    pub max_lines: u32,

    /// Retransmissions permitted per packet.
    ///
    /// Default value: 5
    pub retry_limit: u32,

    /// Time to wait for each acknowledgement, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 1,000
    pub ack_timeout_ms: u64,

    /// How many acknowledgement timeouts to wait for the server to start, and keep, returning the
    /// concatenated result.
    ///
    /// Minimum value: 1 \
    /// Default value: 10
    pub result_wait_factor: u32,

    pub send_order: SendOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_lines: crate::MAX_LINES_DEFAULT,
            retry_limit: crate::RETRY_LIMIT_DEFAULT,
            ack_timeout_ms: crate::ACK_TIMEOUT_DEFAULT_MS,
            result_wait_factor: RESULT_WAIT_FACTOR_DEFAULT,
            send_order: SendOrder::Random,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_lines == 0 {
            return Err(Error::Config("max_lines == 0".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(Error::Config("ack_timeout_ms == 0".into()));
        }
        if self.result_wait_factor == 0 {
            return Err(Error::Config("result_wait_factor == 0".into()));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn result_wait(&self) -> time::Duration {
        self.ack_timeout() * self.result_wait_factor
    }
}

/// Outcome of sending every file.
#[derive(Debug, Default)]
pub struct Sent {
    /// Distinct data packets sent.
    pub packets: u32,
    /// Datagrams sent, retransmissions included.
    pub transmissions: u32,
    // First result packet, if the server started replying before our last ACK arrived
    preempted: Option<DataPacket>,
}

/// Outcome of a full transfer.
#[derive(Debug)]
pub struct Report {
    pub packets: u32,
    pub transmissions: u32,
    /// Lines in the concatenated result.
    pub result_lines: u32,
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Sends a set of files to a server and receives their concatenation.
pub struct Client {
    config: Config,
    socket: Socket,
    server_addr: net::SocketAddr,
    sender: ReliableSender,
}

impl Client {
    /// Equivalent to calling [`Client::bind_with_config`] with default configuration.
    pub fn bind<A>(bind_addr: A, server_addr: net::SocketAddr) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::bind_with_config(bind_addr, server_addr, Default::default())
    }

    /// Binds a UDP socket at `bind_addr` for talking to `server_addr`.
    pub fn bind_with_config<A>(
        bind_addr: A,
        server_addr: net::SocketAddr,
        config: Config,
    ) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        config.validate()?;

        let socket = Socket::bind(bind_addr)?;

        let sender = ReliableSender::new(config.retry_limit, config.ack_timeout())
            .with_stray_data(StrayData::Accept);

        Ok(Self {
            config,
            socket,
            server_addr,
            sender,
        })
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.socket.local_addr()
    }

    pub fn server_addr(&self) -> net::SocketAddr {
        self.server_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sends every file of `source`, then writes the server's concatenated result to `out`.
    pub fn transfer<S, W>(&mut self, source: &S, out: &mut W) -> Result<Report>
    where
        S: LineSource,
        W: io::Write,
    {
        let sent = self.send_files(source)?;

        let bounds = Bounds {
            file_count: 1,
            max_lines: self.config.max_lines.saturating_mul(source.file_count()),
        };

        let result_lines = self.receive_result(out, bounds, sent.preempted)?;

        Ok(Report {
            packets: sent.packets,
            transmissions: sent.transmissions,
            result_lines,
        })
    }

    /// Like [`Client::transfer`], but saves the result at `path`.
    ///
    /// Any previous file at `path` is removed first. The result is written to `<path>.part` and
    /// renamed into place once complete; if the transfer fails, neither file is left behind.
    pub fn transfer_to_path<S>(&mut self, source: &S, path: &Path) -> Result<Report>
    where
        S: LineSource,
    {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(Error::Storage(e)),
            _ => (),
        }

        let part_path = part_path(path);

        match self.transfer_to_file(source, &part_path) {
            Ok(report) => {
                fs::rename(&part_path, path).map_err(Error::Storage)?;
                Ok(report)
            }
            Err(e) => {
                let _ = fs::remove_file(&part_path);
                Err(e)
            }
        }
    }

    fn transfer_to_file<S>(&mut self, source: &S, path: &Path) -> Result<Report>
    where
        S: LineSource,
    {
        let file = fs::File::create(path).map_err(Error::Storage)?;
        let mut out = io::BufWriter::new(file);

        let report = self.transfer(source, &mut out)?;

        out.into_inner()
            .map_err(|e| e.into_error())
            .and_then(|file| file.sync_all())
            .map_err(Error::Storage)?;

        Ok(report)
    }

    /// Sends every line of every file in `source`, each packet acknowledged before the next.
    pub fn send_files<S>(&mut self, source: &S) -> Result<Sent>
    where
        S: LineSource,
    {
        self.check_source(source)?;

        tracing::info!(
            server_addr = %self.server_addr,
            file_count = source.file_count(),
            order = ?self.config.send_order,
            "sending files"
        );

        let mut rng = rand::thread_rng();
        let mut sent = Sent::default();

        match self.config.send_order {
            SendOrder::Random => {
                let mut scheduler = Scheduler::new(source.file_count());

                while let Some(conn) = scheduler.pick(source, &mut rng) {
                    let packet = payload::generate(conn, source, &mut rng)?;

                    if self.send_one(&packet, &mut sent)? {
                        break;
                    }
                }
            }
            SendOrder::Shuffled => {
                let mut packets = Vec::new();

                for file_id in 0..source.file_count() {
                    let mut conn = SendConnection::new(file_id, source.total_lines(file_id));
                    while !conn.finished {
                        packets.push(payload::generate(&mut conn, source, &mut rng)?);
                    }
                }

                packets.shuffle(&mut rng);

                for packet in packets.iter() {
                    if self.send_one(packet, &mut sent)? {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            packets = sent.packets,
            transmissions = sent.transmissions,
            "all files sent"
        );

        Ok(sent)
    }

    fn check_source<S>(&self, source: &S) -> Result<()>
    where
        S: LineSource,
    {
        let file_count = source.file_count();

        if file_count == 0 || file_count > crate::MAX_FILES {
            return Err(Error::Config(format!(
                "file count must be in 1..={}, got {}",
                crate::MAX_FILES,
                file_count
            )));
        }

        for file_id in 0..file_count {
            let lines = source.total_lines(file_id);

            if lines == 0 {
                return Err(Error::EmptyFile { file_id });
            }
            if lines > self.config.max_lines {
                return Err(Error::TooManyLines {
                    file_id,
                    lines,
                    max_lines: self.config.max_lines,
                });
            }
        }

        Ok(())
    }

    // Returns true if the server has moved on to returning the result
    fn send_one(&mut self, packet: &DataPacket, sent: &mut Sent) -> Result<bool> {
        let delivery = self.sender.send(&mut self.socket, &self.server_addr, packet)?;

        sent.packets += 1;
        sent.transmissions += delivery.attempts();

        match delivery {
            Delivery::Acked { .. } => Ok(false),
            Delivery::Preempted { packet, .. } => {
                sent.preempted = Some(packet);
                Ok(true)
            }
        }
    }

    fn next_datagram(
        &mut self,
        deadline: time::Instant,
    ) -> Result<Option<std::result::Result<Packet, FrameError>>> {
        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());

            if remaining.is_zero() {
                return Ok(None);
            }

            match self.socket.wait_for_frame(Some(remaining))? {
                Some((frame_bytes, sender_addr)) if sender_addr == self.server_addr => {
                    return Ok(Some(Packet::decode(frame_bytes)));
                }
                Some((_, sender_addr)) => {
                    tracing::trace!(%sender_addr, "ignoring datagram from unexpected address");
                }
                None => (),
            }
        }
    }

    fn send_control(&mut self, packet: Packet) -> Result<()> {
        self.socket.send_to(&packet.encode(), &self.server_addr)?;
        Ok(())
    }

    /// Reassembles the server's result into `out`. Returns the number of lines received.
    fn receive_result<W>(
        &mut self,
        out: &mut W,
        bounds: Bounds,
        mut first: Option<DataPacket>,
    ) -> Result<u32>
    where
        W: io::Write,
    {
        let mut window = ReceiveWindow::new(bounds.max_lines);
        let mut nacks = 0;

        while !window.is_complete() {
            let decoded = match first.take() {
                Some(packet) => Ok(Packet::Data(packet)),
                None => {
                    let deadline = time::Instant::now() + self.config.result_wait();
                    match self.next_datagram(deadline)? {
                        Some(decoded) => decoded,
                        None => return Err(Error::ResultTimedOut),
                    }
                }
            };

            let packet = match decoded {
                Ok(Packet::Data(packet)) if !is_damaged(&packet, &bounds) => packet,
                Ok(Packet::Ack(_)) | Ok(Packet::Nack(_)) => continue,
                damaged => {
                    let id = match damaged {
                        Ok(Packet::Data(packet)) => packet.id(),
                        _ => PacketId::default(),
                    };

                    nacks += 1;

                    tracing::warn!(nacks, ?id, "damaged result packet, sending NACK");

                    if nacks > self.config.retry_limit {
                        return Err(Error::RetryExhausted {
                            file_id: 0,
                            start_line: window.next_expected(),
                            end_line: window.next_expected(),
                            attempts: nacks,
                        });
                    }

                    self.send_control(Packet::Nack(id))?;
                    continue;
                }
            };

            nacks = 0;
            self.send_control(Packet::Ack(packet.id()))?;

            let placement = window
                .receive(packet, |p| out.write_all(&p.payload))
                .map_err(Error::Storage)?;

            tracing::debug!(?placement, next_line = window.next_expected(), "result packet");

            if let Placement::Delivered { completed: true } = placement {
                out.flush().map_err(Error::Storage)?;
            }
        }

        tracing::info!(lines = window.next_expected(), "result received");

        self.linger()?;

        Ok(window.next_expected())
    }

    // Re-acknowledges retransmissions whose ACK was lost, for one acknowledgement timeout
    fn linger(&mut self) -> Result<()> {
        let deadline = time::Instant::now() + self.config.ack_timeout();

        while let Some(decoded) = self.next_datagram(deadline)? {
            if let Ok(Packet::Data(packet)) = decoded {
                let id = packet.id();
                tracing::debug!(?id, "re-acknowledging retransmitted result packet");
                self.send_control(Packet::Ack(id))?;
            }
        }

        Ok(())
    }
}
