//! Wire layout of data-plane packets.
//!
//! All integers are big-endian.
//!
//! ```text
//! offset  size  field
//!      0     4  file_id      (i32)
//!      4     4  start_line   (i32)
//!      8     4  end_line     (i32)
//!     12     4  total_lines  (i32)
//!     16     2  checksum     (u16)
//!     18     1  ack flag
//!     19     1  nack flag
//!     20     2  payload_len  (u16, <= MAX_PAYLOAD)
//!     22     n  payload
//! ```
//!
//! Control packets use the same header with a zero-length payload and exactly one flag set. Their
//! first three fields echo the id of the data packet being answered; `total_lines` and `checksum`
//! are zero.

use super::{DataPacket, Packet, PacketId, MAX_PAYLOAD};

pub const HEADER_SIZE: usize = 22;
pub const FRAME_SIZE_MAX: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Reasons a datagram could not be decoded as a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("datagram of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("payload length field says {declared} bytes but {actual} follow the header")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("payload of {0} bytes exceeds the maximum")]
    PayloadTooLarge(usize),
    #[error("negative value in an index field")]
    NegativeField,
    #[error("end line {end} precedes start line {start}")]
    InvertedRange { start: u32, end: u32 },
    #[error("both ack and nack flags are set")]
    ConflictingFlags,
    #[error("control packet carries a payload")]
    ControlWithPayload,
}

pub struct Reader<'a> {
    buffer: &'a [u8],
    bytes_read: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.bytes_read.checked_add(N)?;
        let bytes = self.buffer.get(self.bytes_read..end)?;
        self.bytes_read = end;
        bytes.try_into().ok()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.take::<4>().map(i32::from_be_bytes)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buffer[self.bytes_read..]
    }
}

pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

fn index_field(value: i32) -> Result<u32, FrameError> {
    u32::try_from(value).map_err(|_| FrameError::NegativeField)
}

impl DataPacket {
    /// Serializes this packet into a newly allocated datagram.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD);

        let mut wr = Writer::with_capacity(HEADER_SIZE + self.payload.len());

        wr.write_u32(self.file_id);
        wr.write_u32(self.start_line);
        wr.write_u32(self.end_line);
        wr.write_u32(self.total_lines);
        wr.write_u16(self.checksum);
        wr.write_u8(0);
        wr.write_u8(0);
        wr.write_u16(self.payload.len() as u16);
        wr.write_slice(&self.payload);

        wr.finish()
    }
}

impl Packet {
    /// Serializes this packet into a newly allocated datagram.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Data(data) => data.encode(),
            Packet::Ack(id) => encode_control(id, true, false),
            Packet::Nack(id) => encode_control(id, false, true),
        }
    }

    /// Parses a datagram. The checksum is carried through unverified; see [`super::is_damaged`].
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort(bytes.len()));
        }

        let mut rd = Reader::new(bytes);

        let header = (|| {
            Some((
                rd.read_i32()?,
                rd.read_i32()?,
                rd.read_i32()?,
                rd.read_i32()?,
                rd.read_u16()?,
                rd.read_u8()?,
                rd.read_u8()?,
                rd.read_u16()?,
            ))
        })();

        let (file_id, start_line, end_line, total_lines, checksum, ack, nack, payload_len) =
            header.ok_or(FrameError::TooShort(bytes.len()))?;

        debug_assert_eq!(rd.bytes_read(), HEADER_SIZE);

        let payload_len = payload_len as usize;
        let payload = rd.remaining();

        if payload_len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload_len));
        }
        if payload.len() != payload_len {
            return Err(FrameError::LengthMismatch {
                declared: payload_len,
                actual: payload.len(),
            });
        }

        match (ack != 0, nack != 0) {
            (true, true) => Err(FrameError::ConflictingFlags),
            (true, false) | (false, true) => {
                if payload_len != 0 {
                    return Err(FrameError::ControlWithPayload);
                }

                let id = PacketId {
                    file_id: index_field(file_id)?,
                    start_line: index_field(start_line)?,
                    end_line: index_field(end_line)?,
                };

                Ok(if ack != 0 {
                    Packet::Ack(id)
                } else {
                    Packet::Nack(id)
                })
            }
            (false, false) => {
                let file_id = index_field(file_id)?;
                let start_line = index_field(start_line)?;
                let end_line = index_field(end_line)?;
                let total_lines = index_field(total_lines)?;

                if end_line < start_line {
                    return Err(FrameError::InvertedRange {
                        start: start_line,
                        end: end_line,
                    });
                }

                Ok(Packet::Data(DataPacket {
                    file_id,
                    start_line,
                    end_line,
                    total_lines,
                    checksum,
                    payload: payload.to_vec(),
                }))
            }
        }
    }
}

fn encode_control(id: &PacketId, ack: bool, nack: bool) -> Vec<u8> {
    let mut wr = Writer::with_capacity(HEADER_SIZE);

    wr.write_u32(id.file_id);
    wr.write_u32(id.start_line);
    wr.write_u32(id.end_line);
    wr.write_u32(0);
    wr.write_u16(0);
    wr.write_u8(ack as u8);
    wr.write_u8(nack as u8);
    wr.write_u16(0);

    wr.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::checksum;

    fn data() -> DataPacket {
        DataPacket::new(7, 3, 5, 12, b"third\nfourth\nfifth\n".to_vec())
    }

    #[test]
    fn data_layout() {
        let bytes = Packet::Data(data()).encode();

        assert_eq!(bytes.len(), HEADER_SIZE + 19);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 7]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 3]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 5]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 12]);
        assert_eq!(bytes[18], 0);
        assert_eq!(bytes[19], 0);
        assert_eq!(&bytes[20..22], &[0, 19]);
        assert_eq!(&bytes[22..], b"third\nfourth\nfifth\n");
    }

    #[test]
    fn data_decodes() {
        let packet = Packet::Data(data());
        assert_eq!(Packet::decode(&packet.encode()), Ok(packet));
    }

    #[test]
    fn control_packets_decode() {
        let ack = Packet::Ack(data().id());
        let nack = Packet::Nack(PacketId::default());

        assert_eq!(Packet::decode(&ack.encode()), Ok(ack.clone()));
        assert_eq!(Packet::decode(&nack.encode()), Ok(nack));
        assert_eq!(ack.encode().len(), HEADER_SIZE);
    }

    #[test]
    fn control_echoes_id() {
        let bytes = Packet::Ack(data().id()).encode();

        assert_eq!(&bytes[0..4], &[0, 0, 0, 7]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 3]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 5]);
        assert_eq!(&bytes[12..18], &[0; 6]);
        assert_eq!(bytes[18], 1);
        assert_eq!(bytes[19], 0);
    }

    #[test]
    fn corrupted_payload_still_decodes() {
        // Decoding is structural; checksum failures are judged by is_damaged
        let mut bytes = Packet::Data(data()).encode();
        bytes[HEADER_SIZE] ^= 0x01;

        match Packet::decode(&bytes) {
            Ok(Packet::Data(packet)) => assert_ne!(checksum(&packet.payload), packet.checksum),
            other => panic!("unexpected decode result {:?}", other),
        }
    }

    #[test]
    fn short_datagram() {
        assert_eq!(Packet::decode(&[]), Err(FrameError::TooShort(0)));
        assert_eq!(
            Packet::decode(&[0; HEADER_SIZE - 1]),
            Err(FrameError::TooShort(HEADER_SIZE - 1))
        );
    }

    #[test]
    fn truncated_payload() {
        let mut bytes = Packet::Data(data()).encode();
        bytes.pop();
        assert_eq!(
            Packet::decode(&bytes),
            Err(FrameError::LengthMismatch {
                declared: 19,
                actual: 18
            })
        );
    }

    #[test]
    fn both_flags_rejected() {
        let mut bytes = Packet::Ack(PacketId::default()).encode();
        bytes[19] = 1;
        assert_eq!(Packet::decode(&bytes), Err(FrameError::ConflictingFlags));
    }

    #[test]
    fn control_with_payload_rejected() {
        let mut bytes = Packet::Nack(PacketId::default()).encode();
        bytes[21] = 1;
        bytes.push(b'x');
        assert_eq!(Packet::decode(&bytes), Err(FrameError::ControlWithPayload));
    }

    #[test]
    fn negative_fields_rejected() {
        let mut bytes = Packet::Data(data()).encode();
        bytes[0] = 0xFF;
        assert_eq!(Packet::decode(&bytes), Err(FrameError::NegativeField));
    }

    #[test]
    fn inverted_range_rejected() {
        let packet = DataPacket {
            end_line: 2,
            ..data()
        };
        assert_eq!(
            Packet::decode(&Packet::Data(packet).encode()),
            Err(FrameError::InvertedRange { start: 3, end: 2 })
        );
    }

    #[test]
    fn oversize_payload_rejected() {
        let mut bytes = Packet::Ack(PacketId::default()).encode();
        bytes[18] = 0;
        bytes[20..22].copy_from_slice(&((MAX_PAYLOAD + 1) as u16).to_be_bytes());
        bytes.resize(HEADER_SIZE + MAX_PAYLOAD + 1, 0);
        assert_eq!(
            Packet::decode(&bytes),
            Err(FrameError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }
}
