use rand::Rng;

use crate::source::LineSource;

/// Sender-side progress through one logical file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendConnection {
    pub file_id: u32,
    pub total_lines: u32,
    // First line not yet placed in a packet
    pub next_line: u32,
    pub finished: bool,
}

impl SendConnection {
    pub fn new(file_id: u32, total_lines: u32) -> Self {
        Self {
            file_id,
            total_lines,
            next_line: 0,
            finished: total_lines == 0,
        }
    }

    /// Records that lines up to and including `end_line` have been packed.
    pub fn advance(&mut self, end_line: u32) {
        self.next_line = end_line + 1;

        if end_line.saturating_add(1) >= self.total_lines {
            self.finished = true;
        }
    }
}

/// Chooses which file to service next: uniformly at random among files that are not finished.
///
/// Connections are created lazily the first time their file is picked.
pub struct Scheduler {
    connections: Vec<Option<SendConnection>>,
}

impl Scheduler {
    pub fn new(file_count: u32) -> Self {
        Self {
            connections: vec![None; file_count as usize],
        }
    }

    fn is_finished(&self, file_id: usize) -> bool {
        self.connections[file_id]
            .as_ref()
            .map_or(false, |conn| conn.finished)
    }

    /// True once every file has been fully packed.
    pub fn all_finished(&self) -> bool {
        (0..self.connections.len()).all(|file_id| self.is_finished(file_id))
    }

    /// Returns the connection for a uniformly chosen unfinished file, creating it if this is the
    /// file's first turn. Returns `None` when all files are finished.
    pub fn pick<S, R>(&mut self, source: &S, rng: &mut R) -> Option<&mut SendConnection>
    where
        S: LineSource,
        R: Rng,
    {
        let unfinished = (0..self.connections.len())
            .filter(|&file_id| !self.is_finished(file_id))
            .collect::<Vec<_>>();

        if unfinished.is_empty() {
            return None;
        }

        let file_id = unfinished[rng.gen_range(0..unfinished.len())];

        let conn = self.connections[file_id].get_or_insert_with(|| {
            let file_id = file_id as u32;
            tracing::debug!(file_id, "opening send connection");
            SendConnection::new(file_id, source.total_lines(file_id))
        });

        Some(conn)
    }
}
