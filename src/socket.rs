use std::io;
use std::net;
use std::time;

use crate::packet::serial::FRAME_SIZE_MAX;

const SOCKET_POLLING_KEY: usize = 0;

/// Datagram transport consumed by the ARQ loops.
///
/// Implemented by [`Socket`] for real traffic; tests substitute scripted links.
pub trait Link {
    /// Sends one datagram to `addr`. Failures are transport errors and are not retried.
    fn send_to(&mut self, datagram: &[u8], addr: &net::SocketAddr) -> io::Result<()>;

    /// Blocks for up to `timeout` for an incoming datagram. Returns `Ok(None)` if nothing arrived
    /// in time, or if polling woke spuriously.
    fn wait_for_frame(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(&[u8], net::SocketAddr)>>;
}

/// A non-blocking UDP socket with a poller for timed waits.
pub struct Socket {
    socket: net::UdpSocket,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    // Polling objects
    poller: polling::Poller,
    poller_events: polling::Events,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
}

impl Socket {
    /// Binds a socket at `bind_address`, able to receive frames up to the protocol maximum.
    pub fn bind<A>(bind_address: A) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::bind_with_frame_size(bind_address, FRAME_SIZE_MAX)
    }

    pub fn bind_with_frame_size<A>(bind_address: A, frame_size_max: usize) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let socket = net::UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        Ok(Self {
            socket,
            local_addr,
            poller,
            poller_events: polling::Events::new(),
            recv_buffer: vec![0; frame_size_max].into_boxed_slice(),
        })
    }

    /// Permits sending to broadcast addresses.
    pub fn set_broadcast(&self, enable: bool) -> io::Result<()> {
        self.socket.set_broadcast(enable)
    }

    /// If a frame can be read from the socket, returns the frame. Returns Ok(None) otherwise.
    pub fn try_read_frame(&mut self) -> io::Result<Option<(&[u8], net::SocketAddr)>> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((frame_len, sender_addr)) => {
                let frame_bytes = &self.recv_buffer[..frame_len];
                Ok(Some((frame_bytes, sender_addr)))
            }
            Err(err) => match err.kind() {
                // The only acceptable error is WouldBlock, indicating no packet
                io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }
}

impl Link for Socket {
    fn send_to(&mut self, datagram: &[u8], addr: &net::SocketAddr) -> io::Result<()> {
        self.socket.send_to(datagram, addr)?;
        Ok(())
    }

    fn wait_for_frame(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(&[u8], net::SocketAddr)>> {
        // Wait for a readable event (must be done prior to each wait() call)
        self.poller
            .modify(&self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            // The socket is readable - read in confidence
            self.try_read_frame()
        } else {
            Ok(None)
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.poller.delete(&self.socket);
    }
}
