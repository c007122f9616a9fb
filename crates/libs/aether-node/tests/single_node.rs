//! A node alone on the air: no neighbors answer the hail, so it
//! self-assigns id 1 and goes live without any exchange.

use aether_node::iface::MediumLink;
use aether_node::{Node, Phase};
use aether_wire::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn lone_node_self_assigns_and_goes_ready() {
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let (node, _messages) = Node::start(MediumLink {
        inbound: inbound_rx,
        outbound: outbound_tx,
        cancel: cancel.clone(),
    });

    inbound_tx.send(Frame::Hello).await.expect("hello");
    node.await_ready_to_send().await;

    assert_eq!(node.phase(), Phase::ReadyToSend);
    assert_eq!(node.node_id().get(), 1);
    assert!(node.taken_ids().iter().any(|id| id.get() == 1));

    // The discovery hail went out as a short frame.
    let first = outbound_rx.recv().await.expect("hail");
    assert!(matches!(first, Frame::DataShort(_)));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn lone_node_accepts_its_own_message_send() {
    let (outbound_tx, _outbound_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let (node, _messages) = Node::start(MediumLink {
        inbound: inbound_rx,
        outbound: outbound_tx,
        cancel: cancel.clone(),
    });

    inbound_tx.send(Frame::Hello).await.expect("hello");
    node.await_ready_to_send().await;

    // Nobody is listening, but the send is accepted and completes.
    assert!(node.send_chat_message("anyone out there?").expect("send"));
    cancel.cancel();
}
