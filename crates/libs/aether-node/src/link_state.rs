//! Link-state routing: flooding, gap-fill, and neighbor liveness.
//!
//! Every node floods its one-hop report with a TTL and a per-source
//! sequence number; duplicates are suppressed by the store's adoption
//! rule. Holes left by lost floods are filled with direct requests
//! during the PULLING_TOPOLOGY phase, and quiet neighbors are aged out
//! by a periodic sweep.

use std::collections::BTreeSet;
use std::sync::Arc;

use aether_wire::{LinkStateRequest, LinkStateUpdate, Packet, PingPong, FLOOD_TTL};

use crate::constants::{
    FLOOD_ATTEMPTS, FLOOD_TIMEOUT, GAP_FILL_ATTEMPTS, GAP_FILL_DELAY_PER_ID,
    KEEPALIVE_INTERVAL, REPLY_DELAY_MS, SWEEP_INTERVAL, UPDATE_DELAY_MS,
};
use crate::node::{NodeShared, Phase};

/// Per-node flood state: the sequence stamped on self-originated updates.
#[derive(Debug, Default)]
pub struct LinkStateState {
    pub sequence: u8,
}

/// Flood our own link state: bump the sequence, store it, and put an
/// update with a fresh TTL on the air. A node with no neighbors sends
/// with TTL 1 since there is nobody to relay anyway.
pub(crate) async fn send_update(shared: &Arc<NodeShared>) {
    let own = shared.topology.own_id();
    if own.is_unknown() {
        return;
    }

    let sequence = {
        let mut handler = shared.handler.lock().await;
        handler.link_state.sequence = handler.link_state.sequence.wrapping_add(1);
        handler.link_state.sequence
    };
    shared.topology.store_own_link_state(sequence);

    let neighbors = shared.topology.neighbors();
    let ttl = if neighbors.is_empty() { 1 } else { FLOOD_TTL };
    let update = Packet::LinkStateUpdate(LinkStateUpdate {
        sender: own,
        source: own,
        sequence,
        ttl,
        neighbors,
    });
    log::debug!("linkstate: flooding own state, seq {sequence}");
    shared.arbiter.schedule(update, UPDATE_DELAY_MS);
}

/// Any packet from a node we did not know to be adjacent makes it a
/// neighbor. A neighbor we already knew as occupied re-appearing while
/// we are READY_TO_SEND changes our own link state, so it gets flooded.
pub(crate) async fn note_activity(shared: &Arc<NodeShared>, packet: &Packet) {
    let Some(sender) = packet.sender_id() else { return };
    let own = shared.topology.own_id();
    if sender.is_unknown() || sender == own {
        return;
    }
    if shared.topology.add_neighbor(sender) {
        log::debug!("linkstate: new neighbor {sender}");
        let newly_taken = shared.topology.add_taken(sender);
        if !newly_taken && shared.phase_now() == Phase::ReadyToSend {
            send_update(shared).await;
        }
    }
}

/// Adopt a flooded report and, while READY_TO_SEND, relay it to the
/// neighbors the source cannot reach itself.
pub(crate) async fn handle_update(shared: &Arc<NodeShared>, update: LinkStateUpdate) {
    let own = shared.topology.own_id();
    if update.source == own {
        return;
    }

    shared.topology.add_taken(update.source);
    for neighbor in &update.neighbors {
        if !neighbor.is_unknown() {
            shared.topology.add_taken(*neighbor);
        }
    }

    let Some(adopted) = shared.topology.adopt_link_state(&update) else { return };
    log::debug!("linkstate: adopted {} seq {}", update.source, update.sequence);

    if shared.phase_now() != Phase::ReadyToSend || update.ttl <= 1 {
        return;
    }

    // The adopted set decides who still needs the flood; the packet
    // itself carries the source's report untouched, only sender and ttl
    // are rewritten.
    let mut receivers = shared.topology.neighbors();
    for covered in &adopted {
        receivers.remove(covered);
    }
    receivers.remove(&update.source);
    receivers.remove(&update.sender);
    if receivers.is_empty() {
        return;
    }

    let forward = Packet::LinkStateUpdate(LinkStateUpdate {
        sender: own,
        source: update.source,
        sequence: update.sequence,
        ttl: update.ttl - 1,
        neighbors: update.neighbors.clone(),
    });
    let shared = shared.clone();
    tokio::spawn(async move {
        let _ = shared
            .arbiter
            .send_reliable(forward, UPDATE_DELAY_MS, FLOOD_ATTEMPTS, FLOOD_TIMEOUT, receivers)
            .await;
    });
}

/// Serve a stored link state to a node that asked us directly. The reply
/// goes out with TTL 1: gap fixes stay local.
pub(crate) async fn handle_request(shared: &Arc<NodeShared>, request: LinkStateRequest) {
    let own = shared.topology.own_id();
    if request.destination != own {
        return;
    }
    let Some(state) = shared.topology.link_state(request.source) else {
        log::debug!("linkstate: no stored state for {} to serve", request.source);
        return;
    };

    let reply = Packet::LinkStateUpdate(LinkStateUpdate {
        sender: own,
        source: request.source,
        sequence: state.sequence,
        ttl: 1,
        neighbors: state.neighbors,
    });
    shared.arbiter.schedule(reply, REPLY_DELAY_MS);
}

/// Pings with the pong flag clear ask for an answer; the reply carries
/// our id so the pinger learns its neighborhood.
pub(crate) fn handle_ping(shared: &Arc<NodeShared>, ping: PingPong) {
    if ping.pong {
        return;
    }
    let own = shared.topology.own_id();
    if own.is_unknown() {
        return;
    }
    let pong = Packet::PingPong(PingPong { pong: true, sender: own });
    shared.arbiter.schedule(pong, REPLY_DELAY_MS);
}

/// The PULLING_TOPOLOGY pass: wait proportionally to the number of known
/// ids, then reliably request every link state the flood has not brought
/// us. Holes that survive the attempts are left to future flooding.
pub(crate) async fn pull_topology(shared: &Arc<NodeShared>) {
    let taken = shared.topology.taken_ids();
    tokio::time::sleep(GAP_FILL_DELAY_PER_ID * taken.len() as u32).await;

    let provider = shared.handler.lock().await.addressing.id_provider;
    let Some(provider) = provider else { return };
    let own = shared.topology.own_id();

    for id in shared.topology.taken_ids() {
        if id == own || shared.topology.link_state(id).is_some() {
            continue;
        }
        log::info!("linkstate: requesting state of {id} from {provider}");
        let request =
            Packet::LinkStateRequest(LinkStateRequest { destination: provider, source: id });
        let missing = shared
            .arbiter
            .send_reliable(
                request,
                REPLY_DELAY_MS,
                GAP_FILL_ATTEMPTS,
                FLOOD_TIMEOUT,
                BTreeSet::from([provider]),
            )
            .await;
        if !missing.is_empty() {
            log::warn!("linkstate: no state for {id}; leaving the hole to future floods");
        }
    }
}

/// Start the READY_TO_SEND background tasks: the keepalive pinger and the
/// quiet-neighbor sweeper.
pub(crate) fn spawn_liveness(shared: &Arc<NodeShared>) {
    tokio::spawn(run_keepalive(shared.clone()));
    tokio::spawn(run_sweeper(shared.clone()));
}

async fn run_keepalive(shared: Arc<NodeShared>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {}
        }
        if shared.log.has_traffic_within(KEEPALIVE_INTERVAL) {
            continue;
        }
        let own = shared.topology.own_id();
        if own.is_unknown() {
            continue;
        }
        let pong = Packet::PingPong(PingPong { pong: true, sender: own });
        shared.arbiter.schedule(pong, REPLY_DELAY_MS);
    }
}

async fn run_sweeper(shared: Arc<NodeShared>) {
    loop {
        let snapshot = shared.topology.neighbors();
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
        if snapshot.is_empty() {
            continue;
        }
        let own = shared.topology.own_id();
        let probe = Packet::PingPong(PingPong { pong: true, sender: own });
        let missing = shared.log.missing_acks(&probe, &snapshot, SWEEP_INTERVAL);
        if missing.is_empty() {
            continue;
        }
        for id in &missing {
            log::info!("linkstate: neighbor {id} went quiet, dropping");
            shared.topology.remove_neighbor(*id);
        }
        send_update(&shared).await;
    }
}
