//! Receiver-side reorder window.

use std::collections::BTreeSet;

use aether_wire::{Data, RECEIVE_WINDOW_SIZE, SEQ_COUNT};

/// Collects one session's DATA packets, accepting sequence numbers within
/// a sliding window and rejecting everything else.
///
/// `awaited` always holds the next `window` sequence numbers after
/// `last_seq_received`; `first_acceptable_index` is the slot where the
/// first awaited sequence lands.
#[derive(Debug)]
pub struct DataReceiver {
    packets: Vec<Option<Data>>,
    awaited: BTreeSet<u8>,
    first_acceptable_index: usize,
    last_seq_received: u8,
    largest_acceptable_seq: u8,
    window: u8,
}

impl DataReceiver {
    pub fn new(packet_count: usize) -> Self {
        Self::with_window(packet_count, RECEIVE_WINDOW_SIZE)
    }

    pub fn with_window(packet_count: usize, window: u8) -> Self {
        let last_seq_received = SEQ_COUNT - 1;
        Self {
            packets: (0..packet_count).map(|_| None).collect(),
            awaited: (0..window).collect(),
            first_acceptable_index: 0,
            last_seq_received,
            largest_acceptable_seq: (last_seq_received + window) % SEQ_COUNT,
            window,
        }
    }

    /// Accept a packet if its sequence falls inside the window and inside
    /// the session length. Accepting the first awaited sequence slides the
    /// window over every contiguously received successor.
    pub fn receive_packet(&mut self, packet: Data) -> bool {
        let gap = (packet.sequence + SEQ_COUNT - self.last_seq_received - 1) % SEQ_COUNT;
        if gap >= self.window {
            return false;
        }
        let index = self.first_acceptable_index + gap as usize;
        if index >= self.packets.len() {
            // The handshake promised fewer packets than are arriving.
            return false;
        }

        let sequence = packet.sequence;
        self.packets[index] = Some(packet);
        self.awaited.remove(&sequence);

        if sequence == (self.last_seq_received + 1) % SEQ_COUNT {
            while self.last_seq_received != self.largest_acceptable_seq {
                let next = (self.last_seq_received + 1) % SEQ_COUNT;
                if self.awaited.contains(&next) {
                    break;
                }
                self.last_seq_received = next;
                self.awaited.insert((next + self.window) % SEQ_COUNT);
                self.first_acceptable_index += 1;
            }
            self.largest_acceptable_seq = (self.last_seq_received + self.window) % SEQ_COUNT;
        }

        true
    }

    pub fn has_all_packets(&self) -> bool {
        self.packets.iter().all(Option::is_some)
    }

    /// The session's packets in sequence order. Call once
    /// [`has_all_packets`](Self::has_all_packets) reports true; missing
    /// slots are skipped otherwise.
    pub fn into_packets(self) -> Vec<Data> {
        self.packets.into_iter().flatten().collect()
    }
}
