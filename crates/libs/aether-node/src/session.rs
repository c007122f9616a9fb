//! Session protocol: one logical chat message end to end.
//!
//! A session opens with a SESSION_UPDATE handshake announcing how many
//! DATA packets follow, runs them through the sliding-window transmitter,
//! and closes when the acks drain (or the grace timeouts give up). A node
//! carries at most one outgoing session; further messages queue FIFO.
//! Incoming sessions are keyed by their original source all the way down
//! the relay chain; a forwarder rewrites only the sender.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use aether_wire::text::assemble_text;
use aether_wire::{Data, DataAck, NodeId, Packet, SessionUpdate};
use tokio::time::Instant;

use crate::constants::{
    ACK_STAGGER, RECEIVE_SESSION_TTL, RELAY_ECHO_TIMEOUT, RELAY_WAKE_DELAY, REPLY_DELAY_MS,
    SESSION_ACK_GRACE, SESSION_ATTEMPTS, SESSION_TIMEOUT,
};
use crate::node::{ChatMessage, NodeShared};
use crate::planner;
use crate::window::{DataReceiver, DataTransmitter};

/// A message waiting for the outgoing-session slot.
#[derive(Debug)]
pub struct QueuedSend {
    pub packets: Vec<Data>,
    pub receivers: BTreeSet<NodeId>,
    pub from_user: bool,
}

/// An open incoming session.
#[derive(Debug)]
pub struct ReceiveSession {
    pub window: DataReceiver,
    pub opened_at: Instant,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub in_session: bool,
    /// Neighbors that echoed our current handshake.
    pub session_acks: BTreeSet<NodeId>,
    pub queue: VecDeque<QueuedSend>,
    /// Incoming sessions by original source.
    pub receivers: HashMap<NodeId, ReceiveSession>,
    /// The active outgoing transmitter and the session source it serves.
    pub transmitter: Option<(NodeId, Arc<DataTransmitter>)>,
}

/// Start (or queue) an outgoing session carrying `packets` to the
/// planner-assigned `receivers`.
pub(crate) fn send_packets(
    shared: &Arc<NodeShared>,
    packets: Vec<Data>,
    receivers: BTreeSet<NodeId>,
    from_user: bool,
) {
    let shared = shared.clone();
    let send = QueuedSend { packets, receivers, from_user };
    tokio::spawn(async move {
        {
            let mut handler = shared.handler.lock().await;
            if handler.session.in_session {
                log::debug!("session: slot busy, queueing message");
                handler.session.queue.push_back(send);
                return;
            }
            handler.session.in_session = true;
            handler.session.session_acks.clear();
        }
        run_sessions(shared, send).await;
    });
}

/// Drive the current session to completion, then drain the queue.
async fn run_sessions(shared: Arc<NodeShared>, mut send: QueuedSend) {
    loop {
        execute_session(&shared, send).await;

        let next = {
            let mut handler = shared.handler.lock().await;
            handler.session.transmitter = None;
            match handler.session.queue.pop_front() {
                Some(next) => {
                    handler.session.session_acks.clear();
                    Some(next)
                }
                None => {
                    handler.session.in_session = false;
                    None
                }
            }
        };
        match next {
            Some(queued) => send = queued,
            None => return,
        }
    }
}

async fn execute_session(shared: &Arc<NodeShared>, send: QueuedSend) {
    let Some(first) = send.packets.first() else { return };
    let own = shared.topology.own_id();
    let source = first.source;
    let kind = if send.from_user { "message" } else { "relay" };
    log::info!(
        "session: opening {kind} of {} packets to {:?}",
        send.packets.len(),
        send.receivers
    );

    let update = Packet::SessionUpdate(SessionUpdate {
        packet_count: (send.packets.len() & 0x0F) as u8,
        sender: own,
        source,
    });
    let _ = shared
        .arbiter
        .send_reliable(
            update,
            REPLY_DELAY_MS,
            SESSION_ATTEMPTS,
            SESSION_TIMEOUT,
            send.receivers.clone(),
        )
        .await;

    // Best effort: transmit anyway when not every neighbor woke up.
    let _ = tokio::time::timeout(SESSION_ACK_GRACE, wait_session_acks(shared)).await;
    tokio::time::sleep(RELAY_WAKE_DELAY).await;

    let transmitter = Arc::new(DataTransmitter::new(send.packets, send.receivers));
    {
        let mut handler = shared.handler.lock().await;
        handler.session.transmitter = Some((source, transmitter.clone()));
    }
    if let Err(err) = transmitter.run(&shared.arbiter).await {
        log::warn!("session: transmission aborted, message lost: {err}");
    } else {
        log::info!("session: closed");
    }
}

async fn wait_session_acks(shared: &Arc<NodeShared>) {
    loop {
        let notified = shared.session_acks.notified();
        {
            let handler = shared.handler.lock().await;
            let neighbors = shared.topology.neighbors();
            if neighbors.is_subset(&handler.session.session_acks) {
                return;
            }
        }
        notified.await;
    }
}

/// Handshake demux: echoes of our own handshake feed the session-ack
/// condition; foreign handshakes open a receive window and are relayed
/// along the planner's cover.
pub(crate) async fn handle_session_update(shared: &Arc<NodeShared>, update: SessionUpdate) {
    let own = shared.topology.own_id();

    if update.source == own {
        let mut handler = shared.handler.lock().await;
        if handler.session.in_session {
            handler.session.session_acks.insert(update.sender);
            drop(handler);
            shared.session_acks.notify_waiters();
        }
        return;
    }

    {
        let mut handler = shared.handler.lock().await;
        let session = &mut handler.session;
        session
            .receivers
            .retain(|_, open| open.opened_at.elapsed() < RECEIVE_SESSION_TTL);
        session.receivers.entry(update.source).or_insert_with(|| {
            log::info!(
                "session: incoming from {}, {} packets",
                update.source,
                update.session_len()
            );
            ReceiveSession {
                window: DataReceiver::new(update.session_len()),
                opened_at: Instant::now(),
            }
        });
    }

    relay_session_update(shared, update).await;
}

/// A handshake is re-broadcast only by the nodes its sender was covering;
/// designated forwarders do so reliably toward their own receivers.
async fn relay_session_update(shared: &Arc<NodeShared>, update: SessionUpdate) {
    let own = shared.topology.own_id();
    let transmitters = planner::get_transmitters(&shared.topology.link_states(), update.source);
    let Some(assigned) = transmitters.get(&update.sender) else { return };
    if !assigned.contains(&own) {
        return;
    }

    let echo = Packet::SessionUpdate(SessionUpdate { sender: own, ..update });
    match transmitters.get(&own) {
        Some(receivers) if !receivers.is_empty() => {
            let shared = shared.clone();
            let receivers = receivers.clone();
            tokio::spawn(async move {
                let _ = shared
                    .arbiter
                    .send_reliable(
                        echo,
                        REPLY_DELAY_MS,
                        SESSION_ATTEMPTS,
                        RELAY_ECHO_TIMEOUT,
                        receivers,
                    )
                    .await;
            });
        }
        _ => shared.arbiter.schedule(echo, REPLY_DELAY_MS),
    }
}

/// A DATA packet for an open receive session: ack it (staggered among the
/// peers sharing our upstream), and on completion relay the stream onward
/// and hand the text to the chat queue.
pub(crate) async fn handle_data(shared: &Arc<NodeShared>, data: Data) {
    let own = shared.topology.own_id();
    let source = data.source;
    let sender = data.sender;
    let sequence = data.sequence;

    let completed = {
        let mut handler = shared.handler.lock().await;
        let Some(open) = handler.session.receivers.get_mut(&source) else {
            log::debug!("session: data from {source} without a session, dropping");
            return;
        };
        if !open.window.receive_packet(data) {
            return;
        }

        let transmitters = planner::get_transmitters(&shared.topology.link_states(), source);
        let order = transmitters
            .get(&sender)
            .map_or(0, |assigned| assigned.iter().filter(|&&peer| peer < own).count());
        let ack = Packet::DataAck(DataAck { sender: own, source, sequence });
        let arbiter = shared.arbiter.clone();
        let delay = ACK_STAGGER * order as u32;
        tokio::spawn(async move { arbiter.send_safe(ack, delay).await });

        if handler
            .session
            .receivers
            .get(&source)
            .is_some_and(|open| open.window.has_all_packets())
        {
            handler.session.receivers.remove(&source).map(|open| {
                let forward = transmitters.get(&own).cloned().unwrap_or_default();
                (open.window.into_packets(), forward)
            })
        } else {
            None
        }
    };

    let Some((packets, forward)) = completed else { return };

    if !forward.is_empty() {
        let relayed: Vec<Data> = packets
            .iter()
            .map(|packet| Data { sender: own, ..packet.clone() })
            .collect();
        send_packets(shared, relayed, forward, false);
    }

    match assemble_text(&packets) {
        Ok(text) => {
            let message = ChatMessage { text, sender: source, timestamp: SystemTime::now() };
            if shared.chat_tx.try_send(message).is_err() {
                log::warn!("session: chat queue full, dropping message from {source}");
            }
        }
        Err(err) => log::warn!("session: undecodable message from {source}: {err}"),
    }
}

/// Acks for the session we are transmitting feed the send window.
pub(crate) async fn handle_data_ack(shared: &Arc<NodeShared>, ack: DataAck) {
    let transmitter = {
        let handler = shared.handler.lock().await;
        match &handler.session.transmitter {
            Some((source, transmitter)) if *source == ack.source => Some(transmitter.clone()),
            _ => None,
        }
    };
    if let Some(transmitter) = transmitter {
        transmitter.on_data_ack(ack.sender, ack.sequence);
    }
}
