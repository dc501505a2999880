use std::collections::BTreeMap;

use crate::packet::DataPacket;

/// Where [`ReceiveWindow::receive`] placed an incoming packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Written, along with any buffered packets it made contiguous. `completed` is true if this
    /// call wrote the file's final line for the first time.
    Delivered { completed: bool },
    /// Held until the lines before it arrive.
    Buffered,
    /// Already written; nothing was rewritten.
    Duplicate,
}

/// Out-of-order reassembly for one logical file.
///
/// Packets are delivered strictly in line order. A packet starting past the next expected line is
/// parked until the gap closes.
#[derive(Debug)]
pub struct ReceiveWindow {
    next_expected: u32,
    pending: BTreeMap<u32, DataPacket>,
    max_lines: u32,
    complete: bool,
}

impl ReceiveWindow {
    pub fn new(max_lines: u32) -> Self {
        Self {
            next_expected: 0,
            pending: BTreeMap::new(),
            max_lines,
            complete: false,
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn reset(&mut self) {
        self.next_expected = 0;
        self.pending.clear();
        self.complete = false;
    }

    /// Places `packet`, invoking `deliver` for each packet written, in line order.
    ///
    /// If `deliver` fails, the packet it was given stays undelivered and the error is returned.
    pub fn receive<F, E>(&mut self, packet: DataPacket, mut deliver: F) -> Result<Placement, E>
    where
        F: FnMut(&DataPacket) -> Result<(), E>,
    {
        if packet.start_line < self.next_expected {
            return Ok(Placement::Duplicate);
        }

        if packet.start_line > self.next_expected {
            // Overwrites a stale copy of the same range, if any
            self.pending.insert(packet.start_line, packet);
            return Ok(Placement::Buffered);
        }

        let mut completed = self.write(&packet, &mut deliver)?;

        while self.next_expected < self.max_lines {
            let Some(entry) = self.pending.first_entry() else {
                break;
            };

            if *entry.key() > self.next_expected {
                break;
            }

            let buffered = entry.remove();

            if buffered.start_line < self.next_expected {
                // Overlaps lines already written
                continue;
            }

            match self.write(&buffered, &mut deliver) {
                Ok(done) => completed |= done,
                Err(e) => {
                    self.pending.insert(buffered.start_line, buffered);
                    return Err(e);
                }
            }
        }

        Ok(Placement::Delivered { completed })
    }

    fn write<F, E>(&mut self, packet: &DataPacket, deliver: &mut F) -> Result<bool, E>
    where
        F: FnMut(&DataPacket) -> Result<(), E>,
    {
        deliver(packet)?;

        self.next_expected = packet.end_line + 1;

        if packet.is_terminal() && !self.complete {
            self.complete = true;
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    fn packet(start_line: u32, end_line: u32, total_lines: u32) -> DataPacket {
        let payload = (start_line..=end_line)
            .map(|line| format!("{line}\n"))
            .collect::<String>()
            .into_bytes();
        DataPacket::new(0, start_line, end_line, total_lines, payload)
    }

    fn receive_into(
        window: &mut ReceiveWindow,
        output: &mut Vec<u8>,
        packet: DataPacket,
    ) -> Placement {
        window
            .receive(packet, |p| {
                output.extend_from_slice(&p.payload);
                Ok::<(), Infallible>(())
            })
            .unwrap()
    }

    #[test]
    fn three_packets_out_of_order() {
        let mut window = ReceiveWindow::new(100);
        let mut output = Vec::new();

        assert_eq!(
            receive_into(&mut window, &mut output, packet(3, 5, 9)),
            Placement::Buffered
        );
        assert!(output.is_empty());

        assert_eq!(
            receive_into(&mut window, &mut output, packet(0, 2, 9)),
            Placement::Delivered { completed: false }
        );
        assert_eq!(output, b"0\n1\n2\n3\n4\n5\n");
        assert_eq!(window.next_expected(), 6);
        assert_eq!(window.pending_len(), 0);

        assert_eq!(
            receive_into(&mut window, &mut output, packet(6, 8, 9)),
            Placement::Delivered { completed: true }
        );
        assert_eq!(output, b"0\n1\n2\n3\n4\n5\n6\n7\n8\n");
        assert!(window.is_complete());
    }

    #[test]
    fn completion_reported_by_drain() {
        let mut window = ReceiveWindow::new(100);
        let mut output = Vec::new();

        receive_into(&mut window, &mut output, packet(6, 8, 9));
        receive_into(&mut window, &mut output, packet(3, 5, 9));

        assert_eq!(
            receive_into(&mut window, &mut output, packet(0, 2, 9)),
            Placement::Delivered { completed: true }
        );
        assert_eq!(output, b"0\n1\n2\n3\n4\n5\n6\n7\n8\n");
    }

    #[test]
    fn duplicates_are_not_rewritten() {
        let mut window = ReceiveWindow::new(100);
        let mut output = Vec::new();

        receive_into(&mut window, &mut output, packet(0, 1, 3));
        assert_eq!(
            receive_into(&mut window, &mut output, packet(0, 1, 3)),
            Placement::Duplicate
        );
        assert_eq!(
            receive_into(&mut window, &mut output, packet(2, 2, 3)),
            Placement::Delivered { completed: true }
        );

        // Retransmission of the final packet after completion
        assert_eq!(
            receive_into(&mut window, &mut output, packet(2, 2, 3)),
            Placement::Duplicate
        );
        assert_eq!(output, b"0\n1\n2\n");
    }

    #[test]
    fn buffered_duplicate_overwrites_in_place() {
        let mut window = ReceiveWindow::new(100);
        let mut output = Vec::new();

        receive_into(&mut window, &mut output, packet(2, 3, 4));
        receive_into(&mut window, &mut output, packet(2, 3, 4));
        assert_eq!(window.pending_len(), 1);

        receive_into(&mut window, &mut output, packet(0, 1, 4));
        assert_eq!(output, b"0\n1\n2\n3\n");
    }

    #[test]
    fn every_arrival_order_reconstructs_file() {
        let packets = [packet(0, 0, 6), packet(1, 3, 6), packet(4, 4, 6), packet(5, 5, 6)];
        let expected = b"0\n1\n2\n3\n4\n5\n";

        // All 24 permutations of four packets
        let mut order = [0usize, 1, 2, 3];
        let mut permutations = Vec::new();
        permute(&mut order, 0, &mut permutations);
        assert_eq!(permutations.len(), 24);

        for order in permutations {
            let mut window = ReceiveWindow::new(100);
            let mut output = Vec::new();
            let mut completions = 0;

            for &i in order.iter() {
                if let Placement::Delivered { completed: true } =
                    receive_into(&mut window, &mut output, packets[i].clone())
                {
                    completions += 1;
                }
            }

            assert_eq!(output, expected, "order {:?}", order);
            assert_eq!(completions, 1);
        }
    }

    fn permute(items: &mut [usize; 4], k: usize, out: &mut Vec<[usize; 4]>) {
        if k == items.len() {
            out.push(*items);
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permute(items, k + 1, out);
            items.swap(k, i);
        }
    }

    #[test]
    fn failed_delivery_leaves_packet_undelivered() {
        let mut window = ReceiveWindow::new(100);

        let result = window.receive(packet(0, 0, 2), |_| Err("disk full"));
        assert_eq!(result, Err("disk full"));
        assert_eq!(window.next_expected(), 0);

        let mut output = Vec::new();
        receive_into(&mut window, &mut output, packet(1, 1, 2));

        let mut calls = 0;
        let result = window.receive(packet(0, 0, 2), |_| {
            calls += 1;
            if calls == 1 {
                Ok(())
            } else {
                Err("disk full")
            }
        });
        assert_eq!(result, Err("disk full"));
        assert_eq!(window.next_expected(), 1);
        assert_eq!(window.pending_len(), 1);

        assert_eq!(
            receive_into(&mut window, &mut output, packet(0, 0, 2)),
            Placement::Duplicate
        );
    }

    #[test]
    fn reset_clears_progress() {
        let mut window = ReceiveWindow::new(100);
        let mut output = Vec::new();

        receive_into(&mut window, &mut output, packet(0, 0, 1));
        receive_into(&mut window, &mut output, packet(5, 5, 9));
        window.reset();

        assert_eq!(window.next_expected(), 0);
        assert_eq!(window.pending_len(), 0);
        assert!(!window.is_complete());
    }
}
