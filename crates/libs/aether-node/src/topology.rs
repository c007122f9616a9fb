//! Process-wide view of the network: own id, one-hop neighbors, occupied
//! ids, and the link states learned from the flood.
//!
//! All writes happen on the controller's dispatch path; the link-state map
//! sits behind an `RwLock` so the planner and accessors read concurrently.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};

use aether_wire::{LinkStateUpdate, NodeId};

/// One node's reported neighborhood, stamped with its flood sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    pub node_id: NodeId,
    pub sequence: u8,
    pub neighbors: BTreeSet<NodeId>,
}

/// Sequence comparison in the 8-bit wrapping space: `a` is newer than `b`
/// when it lies within the forward half-window.
pub fn sequence_newer(a: u8, b: u8) -> bool {
    a != b && a.wrapping_sub(b) < 128
}

#[derive(Debug, Default)]
pub struct Topology {
    own_id: AtomicU8,
    neighbors: Mutex<BTreeSet<NodeId>>,
    taken: Mutex<BTreeSet<NodeId>>,
    link_states: RwLock<HashMap<NodeId, LinkState>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn own_id(&self) -> NodeId {
        NodeId::from_nibble(self.own_id.load(Ordering::Acquire))
    }

    /// Set once when the addressing handshake resolves.
    pub fn set_own_id(&self, id: NodeId) {
        self.own_id.store(id.get(), Ordering::Release);
    }

    pub fn neighbors(&self) -> BTreeSet<NodeId> {
        self.neighbors.lock().unwrap().clone()
    }

    /// Returns true when the id was not a neighbor before.
    pub fn add_neighbor(&self, id: NodeId) -> bool {
        self.neighbors.lock().unwrap().insert(id)
    }

    pub fn remove_neighbor(&self, id: NodeId) -> bool {
        self.neighbors.lock().unwrap().remove(&id)
    }

    pub fn taken_ids(&self) -> BTreeSet<NodeId> {
        self.taken.lock().unwrap().clone()
    }

    /// Returns true when the id was not known taken before.
    pub fn add_taken(&self, id: NodeId) -> bool {
        self.taken.lock().unwrap().insert(id)
    }

    pub fn link_state(&self, id: NodeId) -> Option<LinkState> {
        self.link_states.read().unwrap().get(&id).cloned()
    }

    pub fn link_states(&self) -> HashMap<NodeId, LinkState> {
        self.link_states.read().unwrap().clone()
    }

    /// Store this node's own link state unconditionally.
    pub fn store_own_link_state(&self, sequence: u8) {
        let own = self.own_id();
        let neighbors = self.neighbors();
        self.link_states
            .write()
            .unwrap()
            .insert(own, LinkState { node_id: own, sequence, neighbors });
    }

    /// Adopt a flooded link state if it is news: nothing stored yet, or a
    /// strictly newer sequence carrying a different neighbor set. On
    /// adoption the neighbor graph is kept symmetric: the source is added
    /// to the set of every stored node it now reports, and removed from
    /// every node it no longer does. Returns the adopted neighbor set, or
    /// `None` when the update was suppressed.
    pub fn adopt_link_state(&self, incoming: &LinkStateUpdate) -> Option<BTreeSet<NodeId>> {
        let own = self.own_id();
        let mut neighbors = incoming.neighbors.clone();
        if !own.is_unknown() && self.neighbors.lock().unwrap().contains(&incoming.source) {
            neighbors.insert(own);
        }

        let mut map = self.link_states.write().unwrap();
        if let Some(existing) = map.get(&incoming.source) {
            if !sequence_newer(incoming.sequence, existing.sequence)
                || existing.neighbors == neighbors
            {
                return None;
            }
        }

        for (id, state) in map.iter_mut() {
            if *id == incoming.source {
                continue;
            }
            if neighbors.contains(id) {
                state.neighbors.insert(incoming.source);
            } else {
                state.neighbors.remove(&incoming.source);
            }
        }

        map.insert(
            incoming.source,
            LinkState {
                node_id: incoming.source,
                sequence: incoming.sequence,
                neighbors: neighbors.clone(),
            },
        );
        Some(neighbors)
    }
}
