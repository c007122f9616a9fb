//! The node controller: inbound dispatch, the join state machine, and the
//! user-facing handle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use aether_wire::text::chunk_text;
use aether_wire::{Frame, NodeId, Packet, PingPong, WireError, TIMESTAMP_MASK};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::addressing::{self, AddressingState};
use crate::arbiter::ChannelArbiter;
use crate::constants::{
    CHAT_QUEUE_CAPACITY, DISCOVERY_PING_REPEATS, DISCOVERY_PING_SPACING, DISCOVERY_WINDOW,
};
use crate::error::NodeError;
use crate::iface::MediumLink;
use crate::link_state::{self, LinkStateState};
use crate::packet_log::PacketLog;
use crate::planner;
use crate::session::{self, SessionState};
use crate::topology::{LinkState, Topology};

/// Join progress of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FindingNeighbors,
    AssigningId,
    PullingTopology,
    ReadyToSend,
}

/// A chat message delivered to this node.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub text: String,
    pub sender: NodeId,
    pub timestamp: SystemTime,
}

/// Protocol state guarded by the controller mutex.
pub(crate) struct NodeHandler {
    pub addressing: AddressingState,
    pub link_state: LinkStateState,
    pub session: SessionState,
}

/// Everything the subsystems share. Protocol state sits behind the
/// controller mutex; the topology, log, and arbiter synchronize
/// internally.
pub(crate) struct NodeShared {
    pub topology: Topology,
    pub log: Arc<PacketLog>,
    pub arbiter: ChannelArbiter,
    pub handler: Mutex<NodeHandler>,
    pub phase: watch::Sender<Phase>,
    pub session_acks: Notify,
    pub chat_tx: mpsc::Sender<ChatMessage>,
    pub cancel: CancellationToken,
}

impl NodeShared {
    pub(crate) fn new(
        outbound: mpsc::Sender<Frame>,
        chat_tx: mpsc::Sender<ChatMessage>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let log = Arc::new(PacketLog::new());
        let (phase, _) = watch::channel(Phase::FindingNeighbors);
        Arc::new(Self {
            topology: Topology::new(),
            log: log.clone(),
            arbiter: ChannelArbiter::new(outbound, log),
            handler: Mutex::new(NodeHandler {
                addressing: AddressingState::new(wire_timestamp()),
                link_state: LinkStateState::default(),
                session: SessionState::default(),
            }),
            phase,
            session_acks: Notify::new(),
            chat_tx,
            cancel,
        })
    }

    pub(crate) fn phase_now(&self) -> Phase {
        *self.phase.borrow()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        if self.phase.send_replace(phase) != phase {
            log::info!("node: entering {phase:?}");
        }
    }
}

/// Low 24 bits of the wall clock in milliseconds: the join timestamp
/// format carried by REQUEST_ID / ISSUE_ID.
pub(crate) fn wire_timestamp() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32;
    millis & TIMESTAMP_MASK
}

/// Classify one inbound packet and hand it to its protocol. Runs on the
/// controller task; the handler mutex serializes against user sends and
/// the periodic tasks.
pub(crate) async fn dispatch(shared: &Arc<NodeShared>, packet: Packet) {
    shared.log.record_received(&packet);
    link_state::note_activity(shared, &packet).await;

    match packet {
        Packet::PingPong(ping) => link_state::handle_ping(shared, ping),
        Packet::LinkStateUpdate(update) => link_state::handle_update(shared, update).await,
        Packet::LinkStateRequest(request) => link_state::handle_request(shared, request).await,
        Packet::RequestId(request) => addressing::handle_request_id(shared, request).await,
        Packet::IssueId(issue) => addressing::handle_issue_id(shared, issue).await,
        Packet::SessionUpdate(update) => session::handle_session_update(shared, update).await,
        Packet::Data(data) => session::handle_data(shared, data).await,
        Packet::DataAck(ack) => session::handle_data_ack(shared, ack).await,
    }
}

/// The join sequence, started on the medium's HELLO: hail for neighbors,
/// negotiate an id, pull the topology, then go live.
async fn run_join(shared: Arc<NodeShared>) {
    shared.set_phase(Phase::FindingNeighbors);
    let hail = Packet::PingPong(PingPong { pong: false, sender: shared.topology.own_id() });
    shared.arbiter.repeat_send(hail, DISCOVERY_PING_SPACING, DISCOVERY_PING_REPEATS);
    tokio::time::sleep(DISCOVERY_WINDOW).await;

    shared.set_phase(Phase::AssigningId);
    if addressing::start_addressing(&shared).await {
        shared.set_phase(Phase::PullingTopology);
        link_state::send_update(&shared).await;
        link_state::pull_topology(&shared).await;
        shared.set_phase(Phase::ReadyToSend);
    } else {
        // Alone on the air: the addressing fallback already made us ready.
        link_state::send_update(&shared).await;
    }
    log::info!("node: live as {}", shared.topology.own_id());
    link_state::spawn_liveness(&shared);
}

/// Consume frames from the medium: channel notifications go to the
/// arbiter, packets are decoded and dispatched, malformed ones dropped.
async fn run_controller(shared: Arc<NodeShared>, mut inbound: mpsc::Receiver<Frame>) {
    let mut greeted = false;
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            frame = inbound.recv() => match frame {
                Some(frame) => frame,
                None => {
                    log::warn!("node: medium stream ended");
                    return;
                }
            },
        };

        match frame {
            Frame::Hello => {
                if !greeted {
                    greeted = true;
                    log::info!("node: medium greeted us, joining");
                    tokio::spawn(run_join(shared.clone()));
                }
            }
            Frame::Busy => shared.arbiter.set_network_state(true),
            Frame::Free => shared.arbiter.set_network_state(false),
            Frame::Sending => {}
            Frame::DoneSending => shared.arbiter.finish_sending(),
            Frame::End => {
                log::info!("node: medium closed the session");
                shared.cancel.cancel();
                return;
            }
            Frame::Data(_) | Frame::DataShort(_) => {
                let Some(bytes) = frame.packet_bytes() else { continue };
                match Packet::decode(bytes) {
                    Ok(packet) => {
                        let own = shared.topology.own_id();
                        if !own.is_unknown() && packet.sender_id() == Some(own) {
                            continue;
                        }
                        dispatch(&shared, packet).await;
                    }
                    Err(err) => log::debug!("node: dropping malformed packet: {err}"),
                }
            }
        }
    }
}

/// The assembled node. [`Node::start`] wires a medium link to the engine
/// and returns the user handle plus the delivered-message queue.
pub struct Node;

impl Node {
    pub fn start(link: MediumLink) -> (NodeHandle, mpsc::Receiver<ChatMessage>) {
        let (chat_tx, chat_rx) = mpsc::channel(CHAT_QUEUE_CAPACITY);
        let shared = NodeShared::new(link.outbound, chat_tx, link.cancel);
        let phase_rx = shared.phase.subscribe();
        tokio::spawn(run_controller(shared.clone(), link.inbound));
        (NodeHandle { shared, phase_rx }, chat_rx)
    }
}

/// User surface of a running node.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<NodeShared>,
    phase_rx: watch::Receiver<Phase>,
}

impl NodeHandle {
    /// Queue a chat message for the whole network. Returns `Ok(false)`
    /// when the text does not fit a session (more than 16 DATA packets)
    /// or is empty.
    pub fn send_chat_message(&self, text: &str) -> Result<bool, NodeError> {
        if self.phase() != Phase::ReadyToSend {
            return Err(NodeError::NotReady);
        }
        let own = self.shared.topology.own_id();
        let packets = match chunk_text(text, own, own, NodeId::UNKNOWN) {
            Ok(packets) => packets,
            Err(WireError::MessageTooLong { .. } | WireError::EmptyMessage) => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let transmitters =
            planner::get_transmitters(&self.shared.topology.link_states(), own);
        let receivers = transmitters.get(&own).cloned().unwrap_or_default();
        session::send_packets(&self.shared, packets, receivers, true);
        Ok(true)
    }

    /// Block until the node has joined the network.
    pub async fn await_ready_to_send(&self) {
        let mut phase_rx = self.phase_rx.clone();
        let _ = phase_rx.wait_for(|phase| *phase == Phase::ReadyToSend).await;
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    pub fn node_id(&self) -> NodeId {
        self.shared.topology.own_id()
    }

    pub fn taken_ids(&self) -> BTreeSet<NodeId> {
        self.shared.topology.taken_ids()
    }

    pub fn link_states(&self) -> HashMap<NodeId, LinkState> {
        self.shared.topology.link_states()
    }

    /// Abrupt shutdown; sessions in flight are abandoned.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

/// A bare [`NodeShared`] plus the queues around it, for protocol tests.
#[cfg(test)]
pub(crate) fn test_shared() -> (
    Arc<NodeShared>,
    mpsc::Receiver<Frame>,
    mpsc::Receiver<ChatMessage>,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (chat_tx, chat_rx) = mpsc::channel(CHAT_QUEUE_CAPACITY);
    let shared = NodeShared::new(outbound_tx, chat_tx, CancellationToken::new());
    (shared, outbound_rx, chat_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_wire::{Data, SessionUpdate, PAYLOAD_SIZE};

    fn node(raw: u8) -> NodeId {
        NodeId::new(raw).expect("valid id")
    }

    #[test]
    fn wire_timestamp_fits_24_bits() {
        assert_eq!(wire_timestamp() & !TIMESTAMP_MASK, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_records_and_learns_neighbors() {
        let (shared, _outbound, _chat) = test_shared();
        shared.topology.set_own_id(node(1));

        let update = Packet::SessionUpdate(SessionUpdate {
            packet_count: 1,
            sender: node(7),
            source: node(7),
        });
        dispatch(&shared, update).await;

        assert!(shared.topology.neighbors().contains(&node(7)));
        assert!(shared.topology.taken_ids().contains(&node(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn controller_ignores_our_own_echoes() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (handle, _messages) = Node::start(MediumLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });
        handle.shared.topology.set_own_id(node(3));

        let echo = Packet::Data(Data {
            sender: node(3),
            source: node(3),
            destination: NodeId::UNKNOWN,
            sequence: 0,
            payload: [0u8; PAYLOAD_SIZE],
        });
        let frame = Frame::from_packet_bytes(&echo.encode()).expect("frame");
        inbound_tx.send(frame).await.expect("send");

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!handle.shared.topology.neighbors().contains(&node(3)));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn end_frame_cancels_the_node() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (handle, _messages) = Node::start(MediumLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });

        inbound_tx.send(Frame::End).await.expect("send");
        cancel.cancelled().await;
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn sending_before_ready_is_an_error() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let (_inbound_tx, inbound_rx) = mpsc::channel(16);
        let (handle, _messages) = Node::start(MediumLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
            cancel: CancellationToken::new(),
        });

        assert!(matches!(
            handle.send_chat_message("hello"),
            Err(NodeError::NotReady)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_and_empty_messages_return_false() {
        let (shared, _outbound, _chat) = test_shared();
        shared.topology.set_own_id(node(1));
        shared.set_phase(Phase::ReadyToSend);
        let handle = NodeHandle { phase_rx: shared.phase.subscribe(), shared };

        let too_long = "a".repeat(17 * PAYLOAD_SIZE);
        assert!(!handle.send_chat_message(&too_long).expect("dispatch"));
        assert!(!handle.send_chat_message("").expect("dispatch"));

        let fits = "a".repeat(16 * PAYLOAD_SIZE);
        assert!(handle.send_chat_message(&fits).expect("dispatch"));
    }
}
