//! Channel arbiter: the only path onto the shared medium.
//!
//! The arbiter owns the transport's send queue exclusively. Every outgoing
//! packet goes through a carrier-sense deferral before its frame is
//! enqueued: wait for the channel to be free, sleep a randomized delay,
//! and re-check that no transmission slipped into the gap. On top of that
//! sits a reliable-send loop that watches the packet log for missing
//! acknowledgements and retransmits within a caller-supplied budget.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aether_wire::{Frame, NodeId, Packet};
use rand::Rng;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

use crate::constants::{
    DATA_ATTEMPTS, DATA_DELAY_MS, DATA_TIMEOUT_PER_RECEIVER, FINISHED_SENDING_CAP,
    REPEAT_FIRST_DELAY,
};
use crate::packet_log::PacketLog;
use crate::window::ReliableOutlet;

#[derive(Debug, Default)]
struct ArbiterInner {
    last_busy_start: Option<Instant>,
    last_busy_end: Option<Instant>,
    buffer: VecDeque<(Packet, Duration)>,
}

struct ArbiterShared {
    busy: watch::Sender<bool>,
    inner: Mutex<ArbiterInner>,
    finished_sending: Notify,
    frame_tx: mpsc::Sender<Frame>,
    log: Arc<PacketLog>,
}

/// Cheaply cloneable handle to the medium send path.
#[derive(Clone)]
pub struct ChannelArbiter {
    shared: Arc<ArbiterShared>,
}

impl ChannelArbiter {
    pub fn new(frame_tx: mpsc::Sender<Frame>, log: Arc<PacketLog>) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            shared: Arc::new(ArbiterShared {
                busy,
                inner: Mutex::new(ArbiterInner::default()),
                finished_sending: Notify::new(),
                frame_tx,
                log,
            }),
        }
    }

    /// Track BUSY / FREE notifications from the medium.
    pub fn set_network_state(&self, busy: bool) {
        let changed = *self.shared.busy.borrow() != busy;
        if changed {
            let mut inner = self.shared.inner.lock().unwrap();
            if busy {
                inner.last_busy_start = Some(Instant::now());
            } else {
                inner.last_busy_end = Some(Instant::now());
            }
        }
        self.shared.busy.send_replace(busy);
    }

    /// Our own transmission cleared the medium. Wakes reliable senders
    /// and moves the next buffered repeat onto the air. The emit time
    /// itself is on record in the packet log.
    pub fn finish_sending(&self) {
        let next = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.buffer.pop_front()
        };
        self.shared.finished_sending.notify_waiters();
        if let Some((packet, delay)) = next {
            let this = self.clone();
            tokio::spawn(async move { this.send_safe(packet, delay).await });
        }
    }

    pub async fn wait_channel_free(&self) {
        let mut rx = self.shared.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Carrier-sense send: wait for a free channel, defer, and start over
    /// whenever a foreign transmission passed through the deferral gap or
    /// the channel is taken at the moment of the put.
    pub async fn send_safe(&self, packet: Packet, delay: Duration) {
        loop {
            self.wait_channel_free().await;
            tokio::time::sleep(delay).await;

            if self.interrupted_within(delay) {
                continue;
            }
            if *self.shared.busy.borrow() {
                continue;
            }

            let frame = match Frame::from_packet_bytes(&packet.encode()) {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("arbiter: unframeable packet dropped: {err}");
                    return;
                }
            };
            if self.shared.frame_tx.send(frame).await.is_err() {
                log::debug!("arbiter: medium queue closed, dropping frame");
                return;
            }
            self.shared.log.record_sent(&packet);
            return;
        }
    }

    /// Fire-and-forget [`send_safe`](Self::send_safe) with a uniformly
    /// random deferral out of `delay_ms = (from, to)`.
    pub fn schedule(&self, packet: Packet, delay_ms: (u64, u64)) {
        let delay = Duration::from_millis(rand::thread_rng().gen_range(delay_ms.0..delay_ms.1));
        let this = self.clone();
        tokio::spawn(async move { this.send_safe(packet, delay).await });
    }

    /// Emit `packet` once right away, then `count - 1` more copies spaced
    /// by `spacing`, each dispatched when the previous one clears the
    /// medium.
    pub fn repeat_send(&self, packet: Packet, spacing: Duration, count: usize) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            for _ in 1..count {
                inner.buffer.push_back((packet.clone(), spacing));
            }
        }
        let this = self.clone();
        tokio::spawn(async move { this.send_safe(packet, REPEAT_FIRST_DELAY).await });
    }

    /// Send until every expected receiver acknowledged or the attempt
    /// budget runs out. Returns the receivers still missing; an empty set
    /// means full coverage. Each attempt waits for the transmission to
    /// clear the medium (capped), sleeps the ack `timeout`, and then
    /// consults the packet log.
    pub async fn send_reliable(
        &self,
        packet: Packet,
        delay_ms: (u64, u64),
        attempts: u32,
        timeout: Duration,
        expected: BTreeSet<NodeId>,
    ) -> BTreeSet<NodeId> {
        let mut expected = expected;
        let mut attempts = attempts;
        loop {
            if expected.is_empty() {
                return expected;
            }

            let finished = self.shared.finished_sending.notified();
            self.schedule(packet.clone(), delay_ms);
            let _ = tokio::time::timeout(FINISHED_SENDING_CAP, finished).await;
            tokio::time::sleep(timeout).await;
            self.wait_channel_free().await;

            let missing = self.shared.log.missing_acks(&packet, &expected, timeout);
            if missing.is_empty() || attempts <= 1 {
                if !missing.is_empty() {
                    log::debug!("arbiter: giving up on receivers {missing:?}");
                }
                return missing;
            }
            attempts -= 1;
            expected = missing;
        }
    }

    /// Did a foreign transmission both start and end within the last
    /// `window`? That means a collision window passed while we slept.
    fn interrupted_within(&self, window: Duration) -> bool {
        let inner = self.shared.inner.lock().unwrap();
        let now = Instant::now();
        match (inner.last_busy_start, inner.last_busy_end) {
            (Some(start), Some(end)) => {
                now.duration_since(start) <= window && now.duration_since(end) <= window
            }
            _ => false,
        }
    }
}

impl ReliableOutlet for ChannelArbiter {
    async fn send_reliable(
        &self,
        packet: Packet,
        expected: BTreeSet<NodeId>,
    ) -> BTreeSet<NodeId> {
        let timeout = DATA_TIMEOUT_PER_RECEIVER * expected.len().max(1) as u32;
        ChannelArbiter::send_reliable(self, packet, DATA_DELAY_MS, DATA_ATTEMPTS, timeout, expected)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_wire::{DataAck, PingPong};

    fn node(raw: u8) -> NodeId {
        NodeId::new(raw).expect("valid id")
    }

    fn ping(sender: u8) -> Packet {
        Packet::PingPong(PingPong { pong: false, sender: node(sender) })
    }

    fn setup() -> (ChannelArbiter, mpsc::Receiver<Frame>, Arc<PacketLog>) {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let log = Arc::new(PacketLog::new());
        (ChannelArbiter::new(frame_tx, log.clone()), frame_rx, log)
    }

    #[tokio::test(start_paused = true)]
    async fn send_waits_for_free_channel() {
        let (arbiter, mut frame_rx, _log) = setup();
        arbiter.set_network_state(true);

        let sender = arbiter.clone();
        tokio::spawn(async move { sender.send_safe(ping(1), Duration::ZERO).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(frame_rx.try_recv().is_err(), "sent while busy");

        arbiter.set_network_state(false);
        let frame = frame_rx.recv().await.expect("frame after free");
        assert!(matches!(frame, Frame::DataShort(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn sent_frames_are_logged() {
        let (arbiter, mut frame_rx, log) = setup();
        arbiter.send_safe(ping(1), Duration::ZERO).await;
        assert!(frame_rx.recv().await.is_some());
        assert!(log.has_traffic_within(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn reliable_send_stops_on_ack() {
        let (arbiter, mut frame_rx, log) = setup();
        let packet = Packet::Data(aether_wire::Data {
            sender: node(1),
            source: node(1),
            destination: NodeId::UNKNOWN,
            sequence: 0,
            payload: [0u8; aether_wire::PAYLOAD_SIZE],
        });

        let task = {
            let arbiter = arbiter.clone();
            let packet = packet.clone();
            tokio::spawn(async move {
                arbiter
                    .send_reliable(
                        packet,
                        (0, 1),
                        3,
                        Duration::from_millis(100),
                        BTreeSet::from([node(2)]),
                    )
                    .await
            })
        };

        assert!(frame_rx.recv().await.is_some());
        // The ack lands while the sender sleeps its timeout.
        log.record_received(&Packet::DataAck(DataAck {
            sender: node(2),
            source: node(1),
            sequence: 0,
        }));
        arbiter.finish_sending();

        let missing = task.await.expect("task");
        assert!(missing.is_empty());
        assert!(frame_rx.try_recv().is_err(), "no retransmission after ack");
    }

    #[tokio::test(start_paused = true)]
    async fn reliable_send_retries_then_reports_missing() {
        let (arbiter, mut frame_rx, _log) = setup();

        let task = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                arbiter
                    .send_reliable(
                        ping(1),
                        (0, 1),
                        2,
                        Duration::from_millis(100),
                        BTreeSet::from([node(2)]),
                    )
                    .await
            })
        };

        for _ in 0..2 {
            assert!(frame_rx.recv().await.is_some());
            arbiter.finish_sending();
        }

        let missing = task.await.expect("task");
        assert_eq!(missing, BTreeSet::from([node(2)]));
        assert!(frame_rx.try_recv().is_err(), "attempt budget exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_send_spaces_copies_through_the_buffer() {
        let (arbiter, mut frame_rx, _log) = setup();
        arbiter.repeat_send(ping(1), Duration::from_millis(50), 3);

        for _ in 0..3 {
            assert!(frame_rx.recv().await.is_some());
            arbiter.finish_sending();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(frame_rx.try_recv().is_err(), "more copies than requested");
    }

    #[tokio::test(start_paused = true)]
    async fn busy_pulse_during_deferral_counts_as_interruption() {
        let (arbiter, _frame_rx, _log) = setup();
        arbiter.set_network_state(true);
        arbiter.set_network_state(false);
        assert!(arbiter.interrupted_within(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!arbiter.interrupted_within(Duration::from_secs(1)));
    }
}
