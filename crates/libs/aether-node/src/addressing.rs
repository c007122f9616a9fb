//! Collision-free short-id allocation.
//!
//! A joining node asks its highest-id neighbor for an id; the issuer
//! suggests `max(known occupied) + 1` and records the suggestion against
//! the requester's 24-bit timestamp, so a retransmitted request gets the
//! same answer. Every node that overhears a grant remembers it, which
//! keeps two nearby issuers from granting the same id to different
//! requesters.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use aether_wire::{IssueId, NodeId, Packet, RequestId};

use crate::constants::{ID_REQUEST_ATTEMPTS, ID_REQUEST_TIMEOUT, REPLY_DELAY_MS};
use crate::node::{NodeShared, Phase};

#[derive(Debug)]
pub struct AddressingState {
    /// Did a matching ISSUE_ID arrive?
    pub confirmed: bool,
    /// Our join timestamp, echoed back by the issuer.
    pub timestamp: u32,
    /// The neighbor we asked for an id.
    pub id_provider: Option<NodeId>,
    /// Grants outstanding or overheard, by requester timestamp.
    pub provisional: HashMap<u32, NodeId>,
}

impl AddressingState {
    pub fn new(timestamp: u32) -> Self {
        Self { confirmed: false, timestamp, id_provider: None, provisional: HashMap::new() }
    }
}

/// Run the joining side of the handshake. With no neighbors on the air
/// the node self-assigns id 1 and is immediately ready; that path
/// returns false. Otherwise the highest-id neighbor is asked
/// [`ID_REQUEST_ATTEMPTS`] times, with a fallback to id 1 if it never
/// answers.
pub(crate) async fn start_addressing(shared: &Arc<NodeShared>) -> bool {
    let neighbors = shared.topology.neighbors();
    let Some(provider) = neighbors.iter().max().copied() else {
        let first = NodeId::from_nibble(1);
        shared.topology.set_own_id(first);
        shared.topology.add_taken(first);
        log::info!("addressing: nobody on the air, self-assigned id {first}");
        shared.set_phase(Phase::ReadyToSend);
        return false;
    };

    let timestamp = {
        let mut handler = shared.handler.lock().await;
        handler.addressing.id_provider = Some(provider);
        handler.addressing.timestamp
    };

    log::info!("addressing: requesting an id from {provider}");
    let request = Packet::RequestId(RequestId { destination: provider, timestamp });
    let _ = shared
        .arbiter
        .send_reliable(
            request,
            REPLY_DELAY_MS,
            ID_REQUEST_ATTEMPTS,
            ID_REQUEST_TIMEOUT,
            BTreeSet::from([provider]),
        )
        .await;

    if !shared.handler.lock().await.addressing.confirmed {
        let first = NodeId::from_nibble(1);
        log::warn!("addressing: {provider} never answered, falling back to id {first}");
        shared.topology.set_own_id(first);
        shared.topology.add_taken(first);
    }
    true
}

/// Issuer side: answer a REQUEST_ID addressed to us, reusing the
/// provisional suggestion when the timestamp was seen before.
pub(crate) async fn handle_request_id(shared: &Arc<NodeShared>, request: RequestId) {
    let own = shared.topology.own_id();
    if own.is_unknown() || request.destination != own {
        return;
    }

    let suggested = {
        let mut handler = shared.handler.lock().await;
        match handler.addressing.provisional.get(&request.timestamp) {
            Some(&existing) => existing,
            None => {
                let taken_high = shared
                    .topology
                    .taken_ids()
                    .iter()
                    .map(|id| id.get())
                    .max()
                    .unwrap_or(0);
                let provisional_high = handler
                    .addressing
                    .provisional
                    .values()
                    .map(|id| id.get())
                    .max()
                    .unwrap_or(0);
                let next = taken_high.max(provisional_high).max(own.get()) + 1;
                match NodeId::new(next) {
                    Ok(id) => {
                        handler.addressing.provisional.insert(request.timestamp, id);
                        id
                    }
                    Err(_) => {
                        log::warn!("addressing: id space exhausted, ignoring request");
                        return;
                    }
                }
            }
        }
    };

    // A granted id counts as occupied from here on.
    shared.topology.add_taken(suggested);

    log::info!("addressing: issuing id {suggested}");
    let issue = Packet::IssueId(IssueId {
        source: own,
        suggested,
        timestamp: request.timestamp,
        taken: shared.topology.taken_ids(),
    });
    shared.arbiter.schedule(issue, REPLY_DELAY_MS);
}

/// Every grant on the air is bookkept, ours or not. A grant matching our
/// own join timestamp from our provider completes the handshake.
pub(crate) async fn handle_issue_id(shared: &Arc<NodeShared>, issue: IssueId) {
    let own = shared.topology.own_id();
    shared.topology.add_taken(issue.suggested);
    for taken in &issue.taken {
        if !taken.is_unknown() {
            shared.topology.add_taken(*taken);
        }
    }

    let mut handler = shared.handler.lock().await;
    handler.addressing.provisional.insert(issue.timestamp, issue.suggested);

    let state = &mut handler.addressing;
    if !state.confirmed
        && state.id_provider == Some(issue.source)
        && state.timestamp == issue.timestamp
    {
        state.confirmed = true;
        shared.topology.set_own_id(issue.suggested);
        log::info!("addressing: {} assigned us id {}", issue.source, issue.suggested);
    } else if state.confirmed && state.timestamp == issue.timestamp && issue.suggested != own {
        // Two joiners inside the same millisecond share a timestamp; the
        // issuer's provisional table cannot tell them apart.
        log::warn!(
            "addressing: grant for our join timestamp names {}, we hold {own}",
            issue.suggested
        );
    }
}
