use std::io;

/// Errors surfaced by a transmission run.
///
/// Corruption and reordering are recovered inside the receive path and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying socket failed to send or receive.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    /// A packet went unacknowledged through every permitted retransmission.
    #[error(
        "no acknowledgement for file {file_id} lines {start_line}-{end_line} after {attempts} attempts"
    )]
    RetryExhausted {
        file_id: u32,
        start_line: u32,
        end_line: u32,
        attempts: u32,
    },

    /// The peer answered with something other than an ACK or NACK.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A single source line does not fit in one packet payload.
    #[error("line {line} of file {file_id} is {len} bytes, exceeding the payload capacity")]
    LineTooLong { file_id: u32, line: u32, len: usize },

    /// A source file has no lines to send.
    #[error("file {file_id} is empty")]
    EmptyFile { file_id: u32 },

    /// A source file has more lines than the receiver accepts.
    #[error("file {file_id} has {lines} lines, more than the limit of {max_lines}")]
    TooManyLines {
        file_id: u32,
        lines: u32,
        max_lines: u32,
    },

    /// Reading source files or writing reassembled output failed.
    #[error("storage failure: {0}")]
    Storage(#[source] io::Error),

    /// The server never started sending the concatenated result.
    #[error("timed out waiting for the concatenated result")]
    ResultTimedOut,

    /// Discovery or the registry did not produce a usable service address.
    #[error("no service address available: {0}")]
    NoService(String),

    /// A configuration value is outside its permitted range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
