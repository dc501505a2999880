//! Stop-and-wait retransmission: one packet in flight, resent until acknowledged.
//!
//! ```text
//!          +------+   sent    +-----------+   ACK    +-------+
//!   ------>| SEND |---------->| AWAIT_ACK |--------->| ACKED |
//!          +------+           +-----------+          +-------+
//!             ^                 |       |
//!             |  NACK/timeout,  |       | NACK/timeout,
//!             |  retries left   |       | no retries left
//!             +-----------------+       v
//!                                   +---------+
//!                                   | ABORTED |
//!                                   +---------+
//! ```

use std::net;
use std::time;

use crate::error::{Error, Result};
use crate::packet::{checksum, DataPacket, Packet, PacketId};
use crate::socket::Link;

/// Result of waiting for a single control packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Nacked,
    TimedOut,
    /// The peer started sending data of its own; see [`StrayData::Accept`].
    Preempted(DataPacket),
}

/// How a packet left the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Acked { attempts: u32 },
    /// The peer answered with data instead of an acknowledgement. The packet is handed back to
    /// the caller unexamined.
    Preempted { attempts: u32, packet: DataPacket },
}

impl Delivery {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Acked { attempts } | Self::Preempted { attempts, .. } => *attempts,
        }
    }
}

/// How a sender treats a data packet from its peer while it waits for an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrayData {
    /// The data packet is a protocol violation.
    Reject,
    /// The peer is retransmitting because our earlier ACK was lost. Acknowledge it again and
    /// keep waiting.
    Reacknowledge,
    /// The peer has everything it needs and moved on to its reply. The data packet stands in for
    /// the acknowledgement and is returned to the caller.
    Accept,
}

/// Drives each packet through SEND, AWAIT_ACK and RETRY until it is acknowledged or the retry
/// ceiling is reached.
#[derive(Clone, Debug)]
pub struct ReliableSender {
    retry_limit: u32,
    ack_timeout: time::Duration,
    stray_data: StrayData,
}

impl ReliableSender {
    pub fn new(retry_limit: u32, ack_timeout: time::Duration) -> Self {
        Self {
            retry_limit,
            ack_timeout,
            stray_data: StrayData::Reject,
        }
    }

    pub fn with_stray_data(mut self, stray_data: StrayData) -> Self {
        self.stray_data = stray_data;
        self
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn ack_timeout(&self) -> time::Duration {
        self.ack_timeout
    }

    /// Sends `packet` to `peer` until it is acknowledged.
    ///
    /// Fails with [`Error::RetryExhausted`] after `retry_limit + 1` unacknowledged transmissions.
    pub fn send<L>(
        &self,
        link: &mut L,
        peer: &net::SocketAddr,
        packet: &DataPacket,
    ) -> Result<Delivery>
    where
        L: Link,
    {
        let datagram = packet.encode();
        let mut attempts = 0;

        loop {
            attempts += 1;

            link.send_to(&datagram, peer)?;

            tracing::debug!(
                file_id = packet.file_id,
                start_line = packet.start_line,
                end_line = packet.end_line,
                attempt = attempts,
                "sent data packet"
            );

            match await_ack(link, peer, &packet.id(), self.ack_timeout, self.stray_data)? {
                AckOutcome::Acked => return Ok(Delivery::Acked { attempts }),
                AckOutcome::Preempted(reply) => {
                    tracing::debug!(
                        file_id = packet.file_id,
                        start_line = packet.start_line,
                        "peer replied with data, treating as acknowledged"
                    );
                    return Ok(Delivery::Preempted {
                        attempts,
                        packet: reply,
                    });
                }
                AckOutcome::Nacked => {
                    tracing::warn!(
                        file_id = packet.file_id,
                        start_line = packet.start_line,
                        attempt = attempts,
                        "peer reported damage, retransmitting"
                    );
                }
                AckOutcome::TimedOut => {
                    tracing::warn!(
                        file_id = packet.file_id,
                        start_line = packet.start_line,
                        attempt = attempts,
                        "acknowledgement timed out, retransmitting"
                    );
                }
            }

            if attempts > self.retry_limit {
                return Err(Error::RetryExhausted {
                    file_id: packet.file_id,
                    start_line: packet.start_line,
                    end_line: packet.end_line,
                    attempts,
                });
            }
        }
    }
}

/// Waits up to `timeout` for an ACK of `expected`, or a NACK, from `peer`.
///
/// ACKs naming another packet are late or duplicated and are skipped. Any NACK counts, since
/// a damaged header cannot be trusted to name the packet and retransmitting is always safe.
/// Datagrams from other addresses are ignored. A malformed reply, or a data packet under
/// [`StrayData::Reject`], is a protocol violation.
pub fn await_ack<L>(
    link: &mut L,
    peer: &net::SocketAddr,
    expected: &PacketId,
    timeout: time::Duration,
    stray_data: StrayData,
) -> Result<AckOutcome>
where
    L: Link,
{
    let deadline = time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());

        if remaining.is_zero() {
            return Ok(AckOutcome::TimedOut);
        }

        let (reply, sender_addr) = match link.wait_for_frame(Some(remaining))? {
            Some((frame_bytes, sender_addr)) => (Packet::decode(frame_bytes), sender_addr),
            None => continue,
        };

        if sender_addr != *peer {
            tracing::trace!(%sender_addr, "ignoring datagram from unexpected address");
            continue;
        }

        match reply {
            Ok(Packet::Ack(id)) if id == *expected => return Ok(AckOutcome::Acked),
            Ok(Packet::Ack(id)) => {
                tracing::debug!(?id, ?expected, "ignoring stale acknowledgement");
            }
            Ok(Packet::Nack(_)) => return Ok(AckOutcome::Nacked),
            Ok(Packet::Data(data)) => match stray_data {
                StrayData::Reject => {
                    return Err(Error::ProtocolViolation(format!(
                        "data packet for file {} lines {}-{} received while awaiting acknowledgement",
                        data.file_id, data.start_line, data.end_line
                    )));
                }
                StrayData::Reacknowledge => {
                    let reply = if checksum(&data.payload) == data.checksum {
                        Packet::Ack(data.id())
                    } else {
                        Packet::Nack(data.id())
                    };

                    tracing::debug!(
                        file_id = data.file_id,
                        start_line = data.start_line,
                        ?reply,
                        "answering retransmitted data packet"
                    );

                    link.send_to(&reply.encode(), peer)?;
                }
                StrayData::Accept => return Ok(AckOutcome::Preempted(data)),
            },
            Err(e) => {
                return Err(Error::ProtocolViolation(format!(
                    "malformed acknowledgement: {e}"
                )));
            }
        }
    }
}
