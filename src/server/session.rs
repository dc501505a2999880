use std::io;

use crate::packet::DataPacket;
use crate::store::ChunkSink;
use crate::window::{Placement, ReceiveWindow};

/// Receive state for one transmission cycle: a window per file and the number of files
/// completed so far.
#[derive(Debug)]
pub struct Session {
    windows: Vec<ReceiveWindow>,
    completed_files: u32,
}

impl Session {
    pub fn new(file_count: u32, max_lines: u32) -> Self {
        Self {
            windows: (0..file_count)
                .map(|_| ReceiveWindow::new(max_lines))
                .collect(),
            completed_files: 0,
        }
    }

    pub fn file_count(&self) -> u32 {
        self.windows.len() as u32
    }

    pub fn completed_files(&self) -> u32 {
        self.completed_files
    }

    /// True once any packet of this cycle has been written or buffered.
    pub fn is_started(&self) -> bool {
        self.windows
            .iter()
            .any(|window| window.next_expected() > 0 || window.pending_len() > 0)
    }

    /// True once every file has been fully written.
    pub fn is_complete(&self) -> bool {
        self.completed_files == self.file_count()
    }

    /// Feeds an undamaged packet to its file's window, appending whatever becomes contiguous to
    /// `sink`.
    pub fn accept<S>(&mut self, packet: DataPacket, sink: &mut S) -> io::Result<Placement>
    where
        S: ChunkSink + ?Sized,
    {
        let file_id = packet.file_id;

        let window = self.windows.get_mut(file_id as usize).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no window for file {file_id}"),
            )
        })?;

        let placement = window.receive(packet, |p| {
            sink.append(p.file_id, p.start_line, &p.payload)
        })?;

        match placement {
            Placement::Delivered { completed } => {
                if completed {
                    self.completed_files += 1;
                    tracing::info!(
                        file_id,
                        completed_files = self.completed_files,
                        "file complete"
                    );
                }
            }
            Placement::Buffered => {
                tracing::debug!(file_id, "packet buffered out of order");
            }
            Placement::Duplicate => {
                tracing::debug!(file_id, "duplicate packet, not rewritten");
            }
        }

        Ok(placement)
    }

    pub fn reset(&mut self) {
        for window in self.windows.iter_mut() {
            window.reset();
        }
        self.completed_files = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::seq::SliceRandom;

    use crate::connection::SendConnection;
    use crate::payload;
    use crate::source::{LineFiles, LineSource};
    use crate::store::MemoryStore;

    fn text(file_id: u32, lines: u32) -> String {
        (0..lines)
            .map(|line| format!("file {file_id} line {line}\n"))
            .collect()
    }

    fn packets_for(source: &LineFiles) -> Vec<DataPacket> {
        let mut rng = rand::thread_rng();
        let mut packets = Vec::new();

        for file_id in 0..source.file_count() {
            let mut conn = SendConnection::new(file_id, source.total_lines(file_id));
            while !conn.finished {
                packets.push(payload::generate(&mut conn, source, &mut rng).unwrap());
            }
        }

        packets
    }

    #[test]
    fn ten_files_any_order() {
        let sizes = [9, 9, 10, 9, 8, 12, 12, 8, 7, 11];
        let texts = sizes
            .iter()
            .enumerate()
            .map(|(file_id, &lines)| text(file_id as u32, lines))
            .collect::<Vec<_>>();
        let source = LineFiles::from_texts(&texts).unwrap();
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let mut packets = packets_for(&source);
            packets.shuffle(&mut rng);

            let mut session = Session::new(10, 100);
            let mut store = MemoryStore::new();

            let last = packets.len() - 1;
            for (i, packet) in packets.into_iter().enumerate() {
                session.accept(packet, &mut store).unwrap();
                assert_eq!(session.is_complete(), i == last);
            }

            for (file_id, text) in texts.iter().enumerate() {
                assert_eq!(store.file(file_id as u32), Some(text.as_bytes()));
            }

            assert_eq!(store.concatenate(10).unwrap(), texts.concat().into_bytes());
        }
    }

    #[test]
    fn lost_ack_retransmission_written_once() {
        let source = LineFiles::from_texts([text(0, 4), text(1, 2)]).unwrap();
        let packets = packets_for(&source);

        let mut session = Session::new(2, 100);
        let mut store = MemoryStore::new();

        // Every packet arrives twice, as if each ACK had been lost
        for packet in packets.iter() {
            session.accept(packet.clone(), &mut store).unwrap();
            assert_eq!(
                session.accept(packet.clone(), &mut store).unwrap(),
                Placement::Duplicate
            );
        }

        assert!(session.is_complete());
        assert_eq!(session.completed_files(), 2);
        assert_eq!(store.file(0), Some(text(0, 4).as_bytes()));
        assert_eq!(store.file(1), Some(text(1, 2).as_bytes()));
    }

    #[test]
    fn unknown_file_rejected() {
        let mut session = Session::new(1, 100);
        let mut store = MemoryStore::new();

        let packet = DataPacket::new(1, 0, 0, 1, b"x\n".to_vec());
        assert!(session.accept(packet, &mut store).is_err());
    }

    #[test]
    fn reset_starts_new_cycle() {
        let mut session = Session::new(1, 100);
        let mut store = MemoryStore::new();

        session
            .accept(DataPacket::new(0, 0, 0, 1, b"x\n".to_vec()), &mut store)
            .unwrap();
        assert!(session.is_complete());

        session.reset();
        assert!(!session.is_complete());
        assert!(!session.is_started());
        assert_eq!(session.completed_files(), 0);

        let placement = session
            .accept(DataPacket::new(0, 0, 0, 1, b"y\n".to_vec()), &mut store)
            .unwrap();
        assert_eq!(placement, Placement::Delivered { completed: true });
    }

    #[test]
    fn buffered_packet_starts_cycle() {
        let mut session = Session::new(2, 100);
        let mut store = MemoryStore::new();
        assert!(!session.is_started());

        let placement = session
            .accept(DataPacket::new(1, 2, 2, 3, b"z\n".to_vec()), &mut store)
            .unwrap();
        assert_eq!(placement, Placement::Buffered);
        assert!(session.is_started());
        assert_eq!(store.file(1), None);
    }
}
