//! Broadcast forwarding planner.
//!
//! Given the known link states and a broadcast source, assign to each
//! forwarder the subset of receivers it is responsible for, by greedy
//! set cover over one-hop neighborhoods. The output is deterministic for
//! a given input; the cover is small in practice but not guaranteed
//! minimal.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use aether_wire::NodeId;

use crate::topology::LinkState;

/// Map each chosen forwarder to the receivers it must cover.
///
/// Starting from the source, repeatedly pick the candidate whose
/// neighborhood covers the most still-uncovered nodes (ties go to the
/// higher id), charge it with those receivers, and add its neighbors to
/// the candidate pool. Nodes without a stored link state contribute no
/// coverage; the loop ends when everything is covered or no candidate
/// makes progress.
pub fn get_transmitters(
    link_states: &HashMap<NodeId, LinkState>,
    source: NodeId,
) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
    let mut left: BTreeSet<NodeId> =
        link_states.keys().copied().filter(|&id| id != source).collect();
    let mut candidates = BTreeSet::from([source]);
    let mut transmitters: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();

    while !left.is_empty() {
        let mut best: Option<(usize, NodeId)> = None;
        for &candidate in &candidates {
            let coverage = link_states
                .get(&candidate)
                .map_or(0, |state| state.neighbors.intersection(&left).count());
            let better = match best {
                None => true,
                Some((size, id)) => coverage > size || (coverage == size && candidate > id),
            };
            if better {
                best = Some((coverage, candidate));
            }
        }

        let Some((coverage, winner)) = best else { break };
        if coverage == 0 {
            // The remaining nodes are unreachable from the candidate set.
            break;
        }
        let Some(winner_state) = link_states.get(&winner) else {
            candidates.remove(&winner);
            continue;
        };

        let receivers: BTreeSet<NodeId> =
            winner_state.neighbors.intersection(&left).copied().collect();
        for receiver in &receivers {
            left.remove(receiver);
        }
        candidates.remove(&winner);
        transmitters.insert(winner, receivers);
        for &neighbor in &winner_state.neighbors {
            if !transmitters.contains_key(&neighbor) {
                candidates.insert(neighbor);
            }
        }
    }

    transmitters
}
