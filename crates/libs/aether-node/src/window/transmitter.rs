//! Sender-side ack-driven window.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use aether_wire::{Data, NodeId, Packet, SEND_WINDOW_SIZE, SEQ_COUNT};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::constants::{FINAL_ACK_GRACE, WINDOW_STALL_TIMEOUT};
use crate::error::NodeError;

/// The send path the transmitter pushes packets through. The returned set
/// holds receivers that never acknowledged within the outlet's retry
/// budget.
pub trait ReliableOutlet: Send + Sync + 'static {
    fn send_reliable(
        &self,
        packet: Packet,
        expected: BTreeSet<NodeId>,
    ) -> impl Future<Output = BTreeSet<NodeId>> + Send;
}

impl<T: ReliableOutlet> ReliableOutlet for Arc<T> {
    fn send_reliable(
        &self,
        packet: Packet,
        expected: BTreeSet<NodeId>,
    ) -> impl Future<Output = BTreeSet<NodeId>> + Send {
        T::send_reliable(self, packet, expected)
    }
}

#[derive(Debug)]
struct TransmitterInner {
    pending: VecDeque<Data>,
    awaited_acks: BTreeMap<u8, BTreeSet<NodeId>>,
    left_receivers: BTreeSet<NodeId>,
    last_seq_sent: u8,
    last_ack_received: u8,
    sent_all: bool,
}

/// Drives one session's DATA packets out, at most [`SEND_WINDOW_SIZE`]
/// sequences in flight, advancing on acknowledgements and force-acking
/// receivers that the reliable path reports lost.
#[derive(Debug)]
pub struct DataTransmitter {
    inner: Mutex<TransmitterInner>,
    free_window: Notify,
    all_acked: Notify,
}

impl DataTransmitter {
    pub fn new(packets: Vec<Data>, receivers: BTreeSet<NodeId>) -> Self {
        Self {
            inner: Mutex::new(TransmitterInner {
                pending: packets.into(),
                awaited_acks: BTreeMap::new(),
                left_receivers: receivers,
                last_seq_sent: SEQ_COUNT - 1,
                last_ack_received: SEQ_COUNT - 1,
                sent_all: false,
            }),
            free_window: Notify::new(),
            all_acked: Notify::new(),
        }
    }

    /// Receivers still participating in the session.
    pub fn left_receivers(&self) -> BTreeSet<NodeId> {
        self.inner.lock().unwrap().left_receivers.clone()
    }

    /// Transmit everything. Each packet goes out on a background task via
    /// the outlet; the loop itself only paces the window. Returns
    /// [`NodeError::WindowStalled`] when no ack arrives for
    /// [`WINDOW_STALL_TIMEOUT`].
    pub async fn run<O: ReliableOutlet + Clone>(
        self: &Arc<Self>,
        outlet: &O,
    ) -> Result<(), NodeError> {
        loop {
            if !self.await_free_window(WINDOW_STALL_TIMEOUT).await {
                return Err(NodeError::WindowStalled);
            }

            let next = {
                let mut inner = self.inner.lock().unwrap();
                if inner.left_receivers.is_empty() {
                    inner.pending.clear();
                    inner.sent_all = true;
                    None
                } else if let Some(packet) = inner.pending.pop_front() {
                    let expected = inner.left_receivers.clone();
                    inner.awaited_acks.insert(packet.sequence, expected.clone());
                    inner.last_seq_sent = packet.sequence;
                    Some((packet, expected))
                } else {
                    inner.sent_all = true;
                    None
                }
            };

            let Some((packet, expected)) = next else { break };

            let this = self.clone();
            let outlet = outlet.clone();
            tokio::spawn(async move {
                let lost = outlet.send_reliable(Packet::Data(packet), expected).await;
                if !lost.is_empty() {
                    this.drop_receivers(&lost);
                }
            });
        }

        let _ = tokio::time::timeout(FINAL_ACK_GRACE, self.wait_all_acked()).await;
        Ok(())
    }

    /// Feed one DATA_ACK into the window.
    pub fn on_data_ack(&self, sender: NodeId, sequence: u8) {
        let mut inner = self.inner.lock().unwrap();
        let emptied = match inner.awaited_acks.get_mut(&sequence) {
            Some(waiting) => {
                waiting.remove(&sender);
                waiting.is_empty()
            }
            None => false,
        };
        if emptied {
            self.handle_ack(&mut inner, sequence);
        }
    }

    /// Strip receivers the reliable path gave up on; sequences they were
    /// the last holdout for are force-acked.
    pub fn drop_receivers(&self, lost: &BTreeSet<NodeId>) {
        let mut inner = self.inner.lock().unwrap();
        for receiver in lost {
            inner.left_receivers.remove(receiver);
        }
        let sequences: Vec<u8> = inner.awaited_acks.keys().copied().collect();
        for sequence in sequences {
            let emptied = match inner.awaited_acks.get_mut(&sequence) {
                Some(waiting) => {
                    for receiver in lost {
                        waiting.remove(receiver);
                    }
                    waiting.is_empty()
                }
                None => false,
            };
            if emptied {
                self.handle_ack(&mut inner, sequence);
            }
        }
    }

    fn handle_ack(&self, inner: &mut TransmitterInner, sequence: u8) {
        inner.awaited_acks.remove(&sequence);

        if inner.sent_all && inner.awaited_acks.is_empty() {
            self.all_acked.notify_waiters();
            return;
        }

        if sequence == (inner.last_ack_received + 1) % SEQ_COUNT {
            inner.last_ack_received = sequence;
            while inner.last_ack_received != inner.last_seq_sent {
                let next = (inner.last_ack_received + 1) % SEQ_COUNT;
                if inner.awaited_acks.contains_key(&next) {
                    break;
                }
                // `next` was sent and has already been fully acked.
                inner.last_ack_received = next;
            }
            self.free_window.notify_waiters();
        }
    }

    async fn await_free_window(&self, cap: std::time::Duration) -> bool {
        let deadline = Instant::now() + cap;
        loop {
            let notified = self.free_window.notified();
            {
                let inner = self.inner.lock().unwrap();
                let in_flight =
                    (inner.last_seq_sent + SEQ_COUNT - inner.last_ack_received) % SEQ_COUNT;
                if in_flight < SEND_WINDOW_SIZE {
                    return true;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    async fn wait_all_acked(&self) {
        loop {
            let notified = self.all_acked.notified();
            {
                let inner = self.inner.lock().unwrap();
                if inner.sent_all && inner.awaited_acks.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}
