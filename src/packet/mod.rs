pub mod serial;

/// Hard upper bound on the payload of a single data packet. Both peers must agree on this value.
pub const MAX_PAYLOAD: usize = 8192;

/// A datagram exchanged on the data plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    /// Acknowledges the data packet named by the id.
    Ack(PacketId),
    /// Reports damage. The id is whatever could be read from the damaged packet, or zero if
    /// nothing could.
    Nack(PacketId),
}

/// Names a data packet by file and line range. Control packets echo it back to the sender.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PacketId {
    pub file_id: u32,
    pub start_line: u32,
    pub end_line: u32,
}

/// A run of 1-3 consecutive lines from one logical file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPacket {
    pub file_id: u32,
    // Inclusive line range carried by this packet
    pub start_line: u32,
    pub end_line: u32,
    // Line count of the whole logical file
    pub total_lines: u32,
    pub checksum: u16,
    pub payload: Vec<u8>,
}

/// Limits a receiver applies when judging whether a packet is damaged.
#[derive(Clone, Copy, Debug)]
pub struct Bounds {
    pub file_count: u32,
    pub max_lines: u32,
}

impl DataPacket {
    /// Builds a data packet, computing the checksum over `payload`.
    pub fn new(
        file_id: u32,
        start_line: u32,
        end_line: u32,
        total_lines: u32,
        payload: Vec<u8>,
    ) -> Self {
        debug_assert!(end_line >= start_line);
        debug_assert!(payload.len() <= MAX_PAYLOAD);

        let checksum = checksum(&payload);

        Self {
            file_id,
            start_line,
            end_line,
            total_lines,
            checksum,
            payload,
        }
    }

    pub fn id(&self) -> PacketId {
        PacketId {
            file_id: self.file_id,
            start_line: self.start_line,
            end_line: self.end_line,
        }
    }

    /// True if this packet carries the final line of its file.
    pub fn is_terminal(&self) -> bool {
        self.end_line.saturating_add(1) >= self.total_lines
    }

    /// Number of lines carried.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// Sums payload bytes modulo 2^16.
///
/// The sum nominally spans the full `MAX_PAYLOAD` buffer, zero padding included. Padding adds
/// nothing to the sum, so only the occupied bytes are visited.
pub fn checksum(payload: &[u8]) -> u16 {
    let capacity = payload.len().min(MAX_PAYLOAD);

    let sum = payload[..capacity]
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(b as u32));

    (sum & 0xFFFF) as u16
}

/// Returns true if the packet fails its checksum or names a file or line outside `bounds`.
pub fn is_damaged(packet: &DataPacket, bounds: &Bounds) -> bool {
    if checksum(&packet.payload) != packet.checksum {
        return true;
    }

    packet.file_id >= bounds.file_count || packet.start_line >= bounds.max_lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: Bounds = Bounds {
        file_count: 10,
        max_lines: 100,
    };

    #[test]
    fn checksum_sums_bytes() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[0xFF; 4]), 0x3FC);
    }

    #[test]
    fn checksum_wraps_at_16_bits() {
        // 0xFF * 300 = 76500 = 0x12AD4
        let payload = vec![0xFFu8; 300];
        assert_eq!(checksum(&payload), 0x2AD4);
    }

    #[test]
    fn checksum_ignores_zero_padding() {
        let mut padded = b"hello\n".to_vec();
        let plain = checksum(&padded);
        padded.resize(MAX_PAYLOAD, 0);
        assert_eq!(checksum(&padded), plain);
    }

    #[test]
    fn fresh_packet_is_not_damaged() {
        let packet = DataPacket::new(3, 4, 6, 9, b"a\nb\nc\n".to_vec());
        assert!(!is_damaged(&packet, &BOUNDS));
    }

    #[test]
    fn flipped_checksum_bit_is_damaged() {
        let mut packet = DataPacket::new(0, 0, 0, 1, b"line\n".to_vec());
        for bit in 0..16 {
            packet.checksum ^= 1 << bit;
            assert!(is_damaged(&packet, &BOUNDS));
            packet.checksum ^= 1 << bit;
        }
        assert!(!is_damaged(&packet, &BOUNDS));
    }

    #[test]
    fn flipped_payload_bit_is_damaged() {
        let mut packet = DataPacket::new(0, 0, 1, 2, b"one\ntwo\n".to_vec());
        packet.payload[2] ^= 0x10;
        assert!(is_damaged(&packet, &BOUNDS));
    }

    #[test]
    fn out_of_range_file_is_damaged() {
        let packet = DataPacket::new(10, 0, 0, 1, b"x\n".to_vec());
        assert!(is_damaged(&packet, &BOUNDS));
    }

    #[test]
    fn out_of_range_line_is_damaged() {
        let packet = DataPacket::new(0, 100, 100, 101, b"x\n".to_vec());
        assert!(is_damaged(&packet, &BOUNDS));
    }

    #[test]
    fn terminal_detection() {
        assert!(!DataPacket::new(0, 0, 2, 9, Vec::new()).is_terminal());
        assert!(DataPacket::new(0, 6, 8, 9, Vec::new()).is_terminal());
        assert!(DataPacket::new(0, 0, 0, 1, Vec::new()).is_terminal());
    }
}
