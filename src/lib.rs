/*

# Overview

Linewise moves a fixed set of line-oriented text files from a client to a server over UDP, and
returns the server's concatenation of those files to the client. The network may drop, corrupt or
reorder any datagram; every file must still arrive intact.

# Packets

Every data packet carries a run of 1-3 consecutive lines of one file, identified by file id and an
inclusive line range, along with the file's total line count and a 16-bit checksum. The checksum is
the byte sum of the payload modulo 2^16. It detects most single-bit errors but not reordered bytes;
nothing stronger is attempted.

Control packets are ACK or NACK. They carry no payload, only the file id and line range of the
packet they answer. A sender ignores an ACK naming some other packet: it is a late or duplicated
answer to an earlier one, and taking it would skip a packet that may have been lost. A NACK is
always honored, since a damaged header names nothing reliably and retransmitting is harmless.

A receiver treats a packet as damaged if the checksum does not match, or if it names a file or
starting line outside the configured limits. Damaged packets are answered with a NACK and otherwise
ignored.

# Stop-and-wait

A sender has exactly one packet in flight:

  SEND -> AWAIT_ACK -> ACKED
                    -> RETRY   (NACK or timeout, retries left) -> SEND
                    -> ABORTED (NACK or timeout, no retries left)

With a retry limit of R, a packet is transmitted at most R + 1 times. A malformed reply is a
protocol violation and aborts immediately; retrying would not fix a confused peer.

# Scheduling

The client keeps a cursor per file and, before every packet, picks uniformly among the files it has
not finished. Each pick packs 1-3 lines (chosen uniformly, clamped at end of file). The server thus
sees files interleaved at random, and lines of a file in order unless a retransmission overtakes
something.

Alternatively every packet is generated up front and the whole set is sent shuffled, which
exercises the receive window much harder.

# Reassembly

The server keeps a window per file: the next line it expects, and a map of packets that arrived
early, keyed by starting line. A packet starting at the expected line is written immediately, after
which any buffered packets that have become contiguous are written too. A packet starting earlier
has already been written; it is acknowledged but not written again. This is what happens when an
ACK is lost and the client retransmits.

A file is complete once its final line has been written. Completion is counted once per file per
cycle.

# Cycles

When the last file completes, the server concatenates the files in id order and sends the result
back to the client as a single file, one packet at a time, through the same stop-and-wait loop.
Then it resets its windows and waits for the next client. Stored files are left in place until the
first data packet of the next cycle, so they can be inspected in between.

The end of a cycle has two races, both caused by a lost ACK for the client's final packet:

  - The client retransmits its final packet while the server is already sending the result. The
    server acknowledges it again and keeps waiting for the client's ACK.

  - The client receives the first result packet while still waiting for its ACK. The result could
    only have been sent if the server had every file, so the client takes it as the ACK and starts
    receiving the result.

After receiving the whole result the client lingers for one ACK timeout, acknowledging any
retransmission whose ACK went missing. The result goes to a side file that is renamed into place
only once complete.

A server serves one client per cycle. If the cycle goes idle for the idle timeout, or data arrives
from a different client, the partial cycle is abandoned: windows are reset and whatever was
stored is discarded, so a stalled client can never leak lines into the next one's files.

# Finding the server

A server may advertise its address with a beacon sent every few seconds to the discovery port, or
register it with a registry server that clients query. Both use a small fixed-size record separate
from the data plane.

*/

pub mod arq;
pub mod client;
pub mod connection;
pub mod discovery;
mod error;
pub mod packet;
pub mod payload;
pub mod server;
pub mod socket;
pub mod source;
pub mod store;
pub mod window;

pub use error::{Error, Result};

pub type Client = client::Client;
pub type Server<S> = server::Server<S>;

/// Data plane port.
pub const DATA_PORT: u16 = 4950;
/// Port beacons are sent to.
pub const DISCOVERY_PORT: u16 = 4951;
/// Registry server port.
pub const REGISTRY_PORT: u16 = 4952;

/// Most files a single cycle may carry.
pub const MAX_FILES: u32 = 10;

pub const MAX_LINES_DEFAULT: u32 = 100;
pub const RETRY_LIMIT_DEFAULT: u32 = 5;
pub const ACK_TIMEOUT_DEFAULT_MS: u64 = 1_000;
