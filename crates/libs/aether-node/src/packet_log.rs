//! Time-stamped record of every frame this node heard or emitted.
//!
//! The log answers two questions for the reliable-send machinery: which of
//! the expected receivers have not acknowledged a packet inside a time
//! window, and whether this node put anything on the air recently. Entries
//! are append-only; consumers filter by window, nothing is evicted within
//! a process lifetime.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use aether_wire::{NodeId, Packet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Received,
    Sent,
}

#[derive(Debug)]
struct LogEntry {
    packet: Packet,
    at: Instant,
    direction: Direction,
}

/// Append-only, internally synchronized packet record.
#[derive(Debug, Default)]
pub struct PacketLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl PacketLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, packet: &Packet) {
        self.record(packet, Direction::Received);
    }

    pub fn record_sent(&self, packet: &Packet) {
        self.record(packet, Direction::Sent);
    }

    fn record(&self, packet: &Packet, direction: Direction) {
        let mut entries = self.entries.lock().unwrap();
        entries.push(LogEntry { packet: packet.clone(), at: Instant::now(), direction });
    }

    /// The subset of `expected` that has not acknowledged `original`
    /// within the last `window`.
    pub fn missing_acks(
        &self,
        original: &Packet,
        expected: &BTreeSet<NodeId>,
        window: Duration,
    ) -> BTreeSet<NodeId> {
        let entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let mut missing = expected.clone();
        for entry in entries.iter().rev() {
            if now.duration_since(entry.at) > window {
                break;
            }
            if entry.direction != Direction::Received {
                continue;
            }
            if !is_ack_of(original, &entry.packet) {
                continue;
            }
            if let Some(sender) = entry.packet.sender_id() {
                missing.remove(&sender);
            }
        }
        missing
    }

    /// Did this node emit anything within the last `window`?
    pub fn has_traffic_within(&self, window: Duration) -> bool {
        let entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries
            .iter()
            .rev()
            .take_while(|entry| now.duration_since(entry.at) <= window)
            .any(|entry| entry.direction == Direction::Sent)
    }
}

/// Does `candidate` acknowledge `original`? The relation is defined by the
/// original's kind:
///
/// - LINK_STATE_UPDATE — another update for the same (source, sequence)
///   counts as implicit flood confirmation
/// - LINK_STATE_REQUEST — an update for the requested source sent by the
///   node the request was addressed to
/// - SESSION_UPDATE — any echo for the same source
/// - DATA — a DATA_ACK matching source and sequence
/// - REQUEST_ID — an ISSUE_ID from the node that was asked
/// - PING_PONG — any packet at all (liveness only)
pub fn is_ack_of(original: &Packet, candidate: &Packet) -> bool {
    match original {
        Packet::LinkStateUpdate(update) => matches!(
            candidate,
            Packet::LinkStateUpdate(other)
                if other.source == update.source && other.sequence == update.sequence
        ),
        Packet::LinkStateRequest(request) => matches!(
            candidate,
            Packet::LinkStateUpdate(other)
                if other.source == request.source && other.sender == request.destination
        ),
        Packet::SessionUpdate(update) => matches!(
            candidate,
            Packet::SessionUpdate(other) if other.source == update.source
        ),
        Packet::Data(data) => matches!(
            candidate,
            Packet::DataAck(ack)
                if ack.source == data.source && ack.sequence == data.sequence
        ),
        Packet::RequestId(request) => matches!(
            candidate,
            Packet::IssueId(issue) if issue.source == request.destination
        ),
        Packet::PingPong(_) => true,
        Packet::DataAck(_) | Packet::IssueId(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_wire::{
        Data, DataAck, IssueId, LinkStateRequest, LinkStateUpdate, PingPong, RequestId,
        SessionUpdate, PAYLOAD_SIZE,
    };

    fn node(raw: u8) -> NodeId {
        NodeId::new(raw).expect("valid id")
    }

    fn data(source: u8, sequence: u8) -> Packet {
        Packet::Data(Data {
            sender: node(source),
            source: node(source),
            destination: NodeId::UNKNOWN,
            sequence,
            payload: [0u8; PAYLOAD_SIZE],
        })
    }

    fn ack(sender: u8, source: u8, sequence: u8) -> Packet {
        Packet::DataAck(DataAck { sender: node(sender), source: node(source), sequence })
    }

    #[test]
    fn data_ack_relation_matches_source_and_sequence() {
        let original = data(2, 5);
        assert!(is_ack_of(&original, &ack(7, 2, 5)));
        assert!(!is_ack_of(&original, &ack(7, 3, 5)));
        assert!(!is_ack_of(&original, &ack(7, 2, 6)));
    }

    #[test]
    fn link_state_request_relation() {
        let original = Packet::LinkStateRequest(LinkStateRequest {
            destination: node(4),
            source: node(9),
        });
        let served = Packet::LinkStateUpdate(LinkStateUpdate {
            sender: node(4),
            source: node(9),
            sequence: 3,
            ttl: 1,
            neighbors: BTreeSet::new(),
        });
        assert!(is_ack_of(&original, &served));

        let wrong_server = Packet::LinkStateUpdate(LinkStateUpdate {
            sender: node(5),
            source: node(9),
            sequence: 3,
            ttl: 1,
            neighbors: BTreeSet::new(),
        });
        assert!(!is_ack_of(&original, &wrong_server));
    }

    #[test]
    fn request_id_relation_matches_issuer() {
        let original =
            Packet::RequestId(RequestId { destination: node(4), timestamp: 0x112233 });
        let issue = Packet::IssueId(IssueId {
            source: node(4),
            suggested: node(5),
            timestamp: 0x112233,
            taken: BTreeSet::new(),
        });
        assert!(is_ack_of(&original, &issue));
    }

    #[test]
    fn ping_counts_any_packet() {
        let original = Packet::PingPong(PingPong { pong: false, sender: node(1) });
        assert!(is_ack_of(&original, &data(2, 0)));
        assert!(is_ack_of(
            &original,
            &Packet::SessionUpdate(SessionUpdate {
                packet_count: 1,
                sender: node(3),
                source: node(3)
            })
        ));
    }

    #[test]
    fn missing_acks_shrinks_with_received_acks() {
        let log = PacketLog::new();
        let original = data(2, 0);
        let expected = BTreeSet::from([node(5), node(6)]);

        log.record_received(&ack(5, 2, 0));
        let missing = log.missing_acks(&original, &expected, Duration::from_secs(10));
        assert_eq!(missing, BTreeSet::from([node(6)]));

        log.record_received(&ack(6, 2, 0));
        let missing = log.missing_acks(&original, &expected, Duration::from_secs(10));
        assert!(missing.is_empty());
    }

    #[test]
    fn missing_acks_ignores_sent_entries() {
        let log = PacketLog::new();
        let original = data(2, 0);
        let expected = BTreeSet::from([node(5)]);

        log.record_sent(&ack(5, 2, 0));
        let missing = log.missing_acks(&original, &expected, Duration::from_secs(10));
        assert_eq!(missing, expected);
    }

    #[test]
    fn traffic_window_sees_only_sent_frames() {
        let log = PacketLog::new();
        assert!(!log.has_traffic_within(Duration::from_secs(1)));

        log.record_received(&data(2, 0));
        assert!(!log.has_traffic_within(Duration::from_secs(1)));

        log.record_sent(&data(2, 0));
        assert!(log.has_traffic_within(Duration::from_secs(1)));
    }
}
