use rand::Rng;

use crate::connection::SendConnection;
use crate::error::{Error, Result};
use crate::packet::{DataPacket, MAX_PAYLOAD};
use crate::source::LineSource;

/// Most lines a single packet may carry.
pub const LINES_PER_PACKET_MAX: u32 = 3;

/// Packs the next 1-3 lines of `conn`'s file into a data packet and advances the connection.
///
/// The number of extra lines is drawn uniformly from `0..LINES_PER_PACKET_MAX` and clamped to the
/// end of the file. If appending a line would overflow the payload, the run stops before it.
pub fn generate<S, R>(conn: &mut SendConnection, source: &S, rng: &mut R) -> Result<DataPacket>
where
    S: LineSource,
    R: Rng,
{
    debug_assert!(!conn.finished);

    let extra = rng.gen_range(0..LINES_PER_PACKET_MAX);
    generate_with_extra(conn, source, extra)
}

fn generate_with_extra<S>(conn: &mut SendConnection, source: &S, extra: u32) -> Result<DataPacket>
where
    S: LineSource,
{
    let start_line = conn.next_line;
    let last_line = conn.total_lines.saturating_sub(1);
    let wanted_end = start_line.saturating_add(extra).min(last_line);

    let mut payload = Vec::new();
    let mut end_line = start_line;

    for line in start_line..=wanted_end {
        let bytes = source.line(conn.file_id, line).ok_or_else(|| {
            Error::Storage(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file {} has no line {}", conn.file_id, line),
            ))
        })?;

        if bytes.len() > MAX_PAYLOAD {
            return Err(Error::LineTooLong {
                file_id: conn.file_id,
                line,
                len: bytes.len(),
            });
        }

        if payload.len() + bytes.len() > MAX_PAYLOAD {
            break;
        }

        payload.extend_from_slice(bytes);
        end_line = line;
    }

    conn.advance(end_line);

    Ok(DataPacket::new(
        conn.file_id,
        start_line,
        end_line,
        conn.total_lines,
        payload,
    ))
}
