//! Two nodes over an in-memory medium: the second joiner discovers the
//! first, is issued id 2, pulls the topology, and a chat message crosses
//! the link.

use aether_node::iface::MediumLink;
use aether_node::Node;
use aether_wire::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Half-duplex medium emulation: every frame a node transmits is walled
/// in by BUSY/FREE on the other side and SENDING/DONE_SENDING on its own.
async fn run_medium(
    mut a_out: mpsc::Receiver<Frame>,
    a_in: mpsc::Sender<Frame>,
    mut b_out: mpsc::Receiver<Frame>,
    b_in: mpsc::Sender<Frame>,
) {
    loop {
        tokio::select! {
            frame = a_out.recv() => match frame {
                Some(frame) => relay(frame, &a_in, &b_in).await,
                None => return,
            },
            frame = b_out.recv() => match frame {
                Some(frame) => relay(frame, &b_in, &a_in).await,
                None => return,
            },
        }
    }
}

async fn relay(frame: Frame, sender_in: &mpsc::Sender<Frame>, other_in: &mpsc::Sender<Frame>) {
    let _ = other_in.send(Frame::Busy).await;
    let _ = sender_in.send(Frame::Sending).await;
    let _ = other_in.send(frame).await;
    let _ = sender_in.send(Frame::DoneSending).await;
    let _ = other_in.send(Frame::Free).await;
}

#[tokio::test(start_paused = true)]
async fn second_joiner_is_issued_an_id_and_chat_crosses_the_link() {
    let cancel = CancellationToken::new();

    let (a_outbound_tx, a_outbound_rx) = mpsc::channel(256);
    let (a_inbound_tx, a_inbound_rx) = mpsc::channel(256);
    let (node_a, mut messages_a) = Node::start(MediumLink {
        inbound: a_inbound_rx,
        outbound: a_outbound_tx,
        cancel: cancel.clone(),
    });

    let (b_outbound_tx, b_outbound_rx) = mpsc::channel(256);
    let (b_inbound_tx, b_inbound_rx) = mpsc::channel(256);
    let (node_b, _messages_b) = Node::start(MediumLink {
        inbound: b_inbound_rx,
        outbound: b_outbound_tx,
        cancel: cancel.clone(),
    });

    tokio::spawn(run_medium(
        a_outbound_rx,
        a_inbound_tx.clone(),
        b_outbound_rx,
        b_inbound_tx.clone(),
    ));

    // A joins an empty network.
    a_inbound_tx.send(Frame::Hello).await.expect("hello a");
    node_a.await_ready_to_send().await;
    assert_eq!(node_a.node_id().get(), 1);

    // B joins with A on the air and is granted the next id.
    b_inbound_tx.send(Frame::Hello).await.expect("hello b");
    node_b.await_ready_to_send().await;
    assert_eq!(node_b.node_id().get(), 2);

    // Both ends agree on the occupied id space.
    assert!(node_b.taken_ids().iter().any(|id| id.get() == 1));
    assert!(node_b.taken_ids().iter().any(|id| id.get() == 2));

    // B learned A's link state during PULLING_TOPOLOGY.
    assert!(node_b
        .link_states()
        .keys()
        .any(|id| id.get() == 1));

    // A chat message makes it across and names its originator.
    assert!(node_b.send_chat_message("hello over the air").expect("send"));
    let delivered = messages_a.recv().await.expect("delivery");
    assert_eq!(delivered.text, "hello over the air");
    assert_eq!(delivered.sender.get(), 2);

    cancel.cancel();
}
