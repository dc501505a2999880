mod fault;
mod session;

use std::net;
use std::time;

use crate::arq::{ReliableSender, StrayData};
use crate::connection::SendConnection;
use crate::error::{Error, Result};
use crate::packet::serial::FrameError;
use crate::packet::{is_damaged, Bounds, Packet, PacketId};
use crate::payload;
use crate::socket::{Link, Socket};
use crate::source::{LineFiles, LineSource};
use crate::store::ChunkSink;

pub use fault::{Fault, FaultPolicy, NoFaults, RandomFaults, SIMULATED_FAULT_RATE};
pub use session::Session;

const IDLE_TIMEOUT_DEFAULT_MS: u64 = 30_000;

/// Configuration for a [`Server`] object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of logical files making up one transmission cycle.
    ///
    /// Minimum value: 1 \
    /// Maximum value: [`MAX_FILES`](crate::MAX_FILES) \
    /// Default value: 10
    pub file_count: u32,

    /// Highest line count accepted for a single file. Packets starting at or beyond this line are
    /// treated as damaged.
    ///
    /// Minimum value: 1 \
    /// Default value: 100
    pub max_lines: u32,

    /// Retransmissions permitted per packet while returning the concatenated result.
    ///
    /// Default value: 5
    pub retry_limit: u32,

    /// Time to wait for the client to acknowledge a result packet, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 1,000
    pub ack_timeout_ms: u64,

    /// How long a cycle may go without a datagram before it is abandoned, in milliseconds.
    /// Abandoning discards whatever the cycle had stored.
    ///
    /// Minimum value: 1 \
    /// Default value: 30,000
    pub idle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_count: crate::MAX_FILES,
            max_lines: crate::MAX_LINES_DEFAULT,
            retry_limit: crate::RETRY_LIMIT_DEFAULT,
            ack_timeout_ms: crate::ACK_TIMEOUT_DEFAULT_MS,
            idle_timeout_ms: IDLE_TIMEOUT_DEFAULT_MS,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.file_count == 0 || self.file_count > crate::MAX_FILES {
            return Err(Error::Config(format!(
                "file_count must be in 1..={}, got {}",
                crate::MAX_FILES,
                self.file_count
            )));
        }
        if self.max_lines == 0 {
            return Err(Error::Config("max_lines == 0".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(Error::Config("ack_timeout_ms == 0".into()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(Error::Config("idle_timeout_ms == 0".into()));
        }
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            file_count: self.file_count,
            max_lines: self.max_lines,
        }
    }

    pub fn ack_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn idle_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Summary of a finished transmission cycle.
#[derive(Debug)]
pub struct Cycle {
    /// Address the concatenated result was returned to.
    pub peer: net::SocketAddr,
    pub concatenated: Vec<u8>,
    /// Whether the client acknowledged the whole result.
    pub returned: bool,
}

/// Receives files from one client at a time and returns their concatenation.
pub struct Server<S> {
    config: Config,
    socket: Socket,
    session: Session,
    sink: S,
    faults: Box<dyn FaultPolicy + Send>,
    result_sender: ReliableSender,
    // Stored files are kept until the next cycle's first packet
    clear_pending: bool,
    // Client whose data the current cycle holds
    cycle_peer: Option<net::SocketAddr>,
}

impl<S> Server<S>
where
    S: ChunkSink,
{
    /// Equivalent to calling [`Server::bind_with_config`] with default configuration.
    pub fn bind<A>(bind_addr: A, sink: S) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::bind_with_config(bind_addr, Default::default(), sink)
    }

    /// Binds a UDP socket at the provided address and clears `sink` for the first cycle.
    pub fn bind_with_config<A>(bind_addr: A, config: Config, mut sink: S) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        config.validate()?;

        let socket = Socket::bind(bind_addr)?;

        sink.clear(config.file_count).map_err(Error::Storage)?;

        let result_sender = ReliableSender::new(config.retry_limit, config.ack_timeout())
            .with_stray_data(StrayData::Reacknowledge);

        tracing::info!(local_addr = %socket.local_addr(), "server bound");

        Ok(Self {
            session: Session::new(config.file_count, config.max_lines),
            config,
            socket,
            sink,
            faults: Box::new(NoFaults),
            result_sender,
            clear_pending: false,
            cycle_peer: None,
        })
    }

    /// Replaces the fault policy applied to incoming data packets.
    pub fn with_faults<F>(mut self, faults: F) -> Self
    where
        F: FaultPolicy + Send + 'static,
    {
        self.faults = Box::new(faults);
        self
    }

    /// Returns the local address of the internal UDP socket.
    pub fn local_addr(&self) -> net::SocketAddr {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Serves cycles until a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.serve_cycle()?;
        }
    }

    /// Handles datagrams until every file is complete and the result has been returned.
    ///
    /// A cycle that stays idle for the configured idle timeout is abandoned and the wait starts
    /// over.
    pub fn serve_cycle(&mut self) -> Result<Cycle> {
        let idle_timeout = self.config.idle_timeout();

        loop {
            if let Some(cycle) = self.serve_cycle_timeout(idle_timeout)? {
                return Ok(cycle);
            }
        }
    }

    /// Like [`Server::serve_cycle`], but returns `None` if no datagram arrives for
    /// `idle_timeout`. The stalled cycle is abandoned first, so the next client starts from
    /// nothing.
    pub fn serve_cycle_timeout(&mut self, idle_timeout: time::Duration) -> Result<Option<Cycle>> {
        loop {
            let Some((decoded, sender_addr)) = self.receive(idle_timeout)? else {
                self.abandon_cycle("idle timeout")?;
                return Ok(None);
            };

            if let Some(cycle) = self.handle_packet(decoded, sender_addr)? {
                return Ok(Some(cycle));
            }
        }
    }

    fn receive(
        &mut self,
        timeout: time::Duration,
    ) -> Result<Option<(std::result::Result<Packet, FrameError>, net::SocketAddr)>> {
        match self.socket.wait_for_frame(Some(timeout))? {
            Some((frame_bytes, sender_addr)) => {
                Ok(Some((Packet::decode(frame_bytes), sender_addr)))
            }
            None => Ok(None),
        }
    }

    fn send_control(&mut self, packet: Packet, peer: &net::SocketAddr) -> Result<()> {
        self.socket.send_to(&packet.encode(), peer)?;
        Ok(())
    }

    // Drops a partial cycle along with everything it stored
    fn abandon_cycle(&mut self, reason: &str) -> Result<()> {
        self.cycle_peer = None;

        if !self.session.is_started() {
            return Ok(());
        }

        tracing::warn!(
            reason,
            completed_files = self.session.completed_files(),
            "abandoning incomplete cycle"
        );

        self.session.reset();
        self.sink
            .clear(self.config.file_count)
            .map_err(Error::Storage)?;
        self.clear_pending = false;

        Ok(())
    }

    fn handle_packet(
        &mut self,
        decoded: std::result::Result<Packet, FrameError>,
        sender_addr: net::SocketAddr,
    ) -> Result<Option<Cycle>> {
        let packet = match decoded {
            Ok(Packet::Data(packet)) => packet,
            Ok(control) => {
                tracing::debug!(%sender_addr, ?control, "ignoring stray control packet");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(%sender_addr, error = %e, "undecodable datagram, sending NACK");
                self.send_control(Packet::Nack(PacketId::default()), &sender_addr)?;
                return Ok(None);
            }
        };

        if is_damaged(&packet, &self.config.bounds()) {
            tracing::warn!(
                %sender_addr,
                file_id = packet.file_id,
                start_line = packet.start_line,
                "damaged packet, sending NACK"
            );
            self.send_control(Packet::Nack(packet.id()), &sender_addr)?;
            return Ok(None);
        }

        // One client per cycle; a newcomer means the previous one gave up
        if self.cycle_peer.is_some_and(|peer| peer != sender_addr) {
            self.abandon_cycle("data from a different client")?;
        }
        self.cycle_peer = Some(sender_addr);

        // Stored files stay inspectable until data for the next cycle arrives
        if self.clear_pending {
            self.sink
                .clear(self.config.file_count)
                .map_err(Error::Storage)?;
            self.clear_pending = false;
            tracing::debug!("cleared stored files for new cycle");
        }

        let fault = self.faults.on_data();

        match fault {
            Fault::Damage => {
                tracing::warn!(
                    file_id = packet.file_id,
                    start_line = packet.start_line,
                    "simulated damage, sending NACK"
                );
                self.send_control(Packet::Nack(packet.id()), &sender_addr)?;
                return Ok(None);
            }
            Fault::DropPacket => {
                tracing::warn!(
                    file_id = packet.file_id,
                    start_line = packet.start_line,
                    "simulated packet loss"
                );
                return Ok(None);
            }
            Fault::DropAck => {
                tracing::warn!(
                    file_id = packet.file_id,
                    start_line = packet.start_line,
                    "simulated ACK loss"
                );
            }
            Fault::None => {
                self.send_control(Packet::Ack(packet.id()), &sender_addr)?;
            }
        }

        tracing::debug!(
            %sender_addr,
            file_id = packet.file_id,
            start_line = packet.start_line,
            end_line = packet.end_line,
            lines = packet.line_count(),
            "accepted data packet"
        );

        self.session
            .accept(packet, &mut self.sink)
            .map_err(Error::Storage)?;

        if !self.session.is_complete() {
            return Ok(None);
        }

        tracing::info!(peer = %sender_addr, "all files received");

        let concatenated = self
            .sink
            .concatenate(self.config.file_count)
            .map_err(Error::Storage)?;

        let returned = match self.return_result(&sender_addr, &concatenated) {
            Ok(()) => {
                tracing::info!(peer = %sender_addr, bytes = concatenated.len(), "result returned");
                true
            }
            Err(e) => {
                tracing::warn!(peer = %sender_addr, error = %e, "failed to return result");
                false
            }
        };

        self.session.reset();
        self.clear_pending = true;
        self.cycle_peer = None;

        Ok(Some(Cycle {
            peer: sender_addr,
            concatenated,
            returned,
        }))
    }

    /// Sends `concatenated` to `peer` as file 0, line by line, through the retransmission loop.
    fn return_result(&mut self, peer: &net::SocketAddr, concatenated: &[u8]) -> Result<()> {
        let result = LineFiles::from_texts([concatenated])?;
        let mut conn = SendConnection::new(0, result.total_lines(0));
        let mut rng = rand::thread_rng();

        while !conn.finished {
            let packet = payload::generate(&mut conn, &result, &mut rng)?;
            self.result_sender.send(&mut self.socket, peer, &packet)?;
        }

        Ok(())
    }
}
