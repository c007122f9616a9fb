//! TCP connection to the audio-medium emulator.
//!
//! The connector owns the socket and exposes two queues: decoded inbound
//! frames for the controller, and the outbound queue that only the
//! channel arbiter writes to. Connection loss is retried with a fixed
//! backoff; the stream decoder state is dropped with the connection, so
//! every attempt starts clean.

use std::sync::Arc;

use aether_wire::{Frame, FrameDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::{INBOUND_QUEUE_CAPACITY, OUTBOUND_QUEUE_CAPACITY, RECONNECT_BACKOFF};

const READ_BUFFER_SIZE: usize = 2048;

/// The two ends of a medium connection, plus its cancellation token.
pub struct MediumLink {
    pub inbound: mpsc::Receiver<Frame>,
    pub outbound: mpsc::Sender<Frame>,
    pub cancel: CancellationToken,
}

/// Spawn the connector and hand back its queues. `addr` is the emulator's
/// `host:port`.
pub fn connect(addr: String, cancel: CancellationToken) -> MediumLink {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    tokio::spawn(run_connection(addr, inbound_tx, outbound_rx, cancel.clone()));
    MediumLink { inbound: inbound_rx, outbound: outbound_tx, cancel }
}

async fn run_connection(
    addr: String,
    inbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    let outbound_rx = Arc::new(tokio::sync::Mutex::new(outbound_rx));

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(err) => {
                log::info!("iface: couldn't connect to <{addr}>: {err}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue,
                }
            }
        };

        log::info!("iface: connected to <{addr}>");
        let (read_stream, write_stream) = stream.into_split();
        let stop = CancellationToken::new();

        let rx_task = {
            let cancel = cancel.clone();
            let stop = stop.clone();
            let inbound_tx = inbound_tx.clone();
            let mut stream = read_stream;

            tokio::spawn(async move {
                let mut decoder = FrameDecoder::new();
                let mut buffer = [0u8; READ_BUFFER_SIZE];

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = stop.cancelled() => break,
                        result = stream.read(&mut buffer[..]) => match result {
                            Ok(0) => {
                                log::warn!("iface: connection closed");
                                stop.cancel();
                                break;
                            }
                            Ok(n) => {
                                decoder.push(&buffer[..n]);
                                loop {
                                    match decoder.next_frame() {
                                        Ok(Some(frame)) => {
                                            if inbound_tx.send(frame).await.is_err() {
                                                stop.cancel();
                                                break;
                                            }
                                        }
                                        Ok(None) => break,
                                        Err(err) => {
                                            // The stream is out of sync;
                                            // reconnect from scratch.
                                            log::warn!("iface: {err}, resynchronizing");
                                            stop.cancel();
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                log::warn!("iface: read error: {err}");
                                stop.cancel();
                                break;
                            }
                        },
                    }
                }
            })
        };

        let tx_task = {
            let cancel = cancel.clone();
            let stop = stop.clone();
            let outbound_rx = outbound_rx.clone();
            let mut stream = write_stream;

            tokio::spawn(async move {
                let mut outbound_rx = outbound_rx.lock().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = stop.cancelled() => break,
                        maybe = outbound_rx.recv() => {
                            let Some(frame) = maybe else { break };
                            let bytes = frame.encode();
                            if let Err(err) = stream.write_all(&bytes).await {
                                log::warn!("iface: write failed: {err}");
                                stop.cancel();
                                break;
                            }
                            if let Err(err) = stream.flush().await {
                                log::warn!("iface: flush failed: {err}");
                                stop.cancel();
                                break;
                            }
                        }
                    }
                }
            })
        };

        let _ = tx_task.await;
        let _ = rx_task.await;

        if cancel.is_cancelled() {
            return;
        }
        log::info!("iface: disconnected from <{addr}>, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_wire::{Packet, PingPong};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let cancel = CancellationToken::new();
        let mut link = connect(addr, cancel.clone());

        let (mut peer, _) = listener.accept().await.expect("accept");

        // Emulator-side HELLO reaches the node...
        peer.write_all(&Frame::Hello.encode()).await.expect("write");
        assert_eq!(link.inbound.recv().await, Some(Frame::Hello));

        // ...and a node-side packet reaches the emulator.
        let ping = Packet::PingPong(PingPong {
            pong: false,
            sender: aether_wire::NodeId::UNKNOWN,
        });
        let frame = Frame::from_packet_bytes(&ping.encode()).expect("frame");
        link.outbound.send(frame.clone()).await.expect("send");

        let mut buffer = vec![0u8; frame.encode().len()];
        peer.read_exact(&mut buffer).await.expect("read");
        assert_eq!(buffer, frame.encode());

        cancel.cancel();
    }

    #[tokio::test]
    async fn split_reads_reassemble() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let cancel = CancellationToken::new();
        let mut link = connect(addr, cancel.clone());
        let (mut peer, _) = listener.accept().await.expect("accept");

        let frame = Frame::Data([0x5A; aether_wire::LONG_PACKET_LEN]);
        let bytes = frame.encode();
        peer.write_all(&bytes[..7]).await.expect("write");
        peer.flush().await.expect("flush");
        peer.write_all(&bytes[7..]).await.expect("write");

        assert_eq!(link.inbound.recv().await, Some(frame));
        cancel.cancel();
    }
}
