//! Chat text to DATA packets and back.

use crate::error::WireError;
use crate::packet::{Data, NodeId};
use crate::{MAX_SESSION_PACKETS, PAYLOAD_SIZE, SEQ_COUNT};

/// Largest chat message, in UTF-8 bytes, that fits one session.
pub const MAX_TEXT_BYTES: usize = MAX_SESSION_PACKETS * PAYLOAD_SIZE;

/// Split `text` into DATA packets of [`PAYLOAD_SIZE`] bytes. The last
/// packet is zero-padded on the right; sequence numbers count up from 0.
pub fn chunk_text(
    text: &str,
    sender: NodeId,
    source: NodeId,
    destination: NodeId,
) -> Result<Vec<Data>, WireError> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return Err(WireError::EmptyMessage);
    }
    if bytes.len() > MAX_TEXT_BYTES {
        return Err(WireError::MessageTooLong { bytes: bytes.len(), max: MAX_TEXT_BYTES });
    }

    let packets = bytes
        .chunks(PAYLOAD_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let mut payload = [0u8; PAYLOAD_SIZE];
            payload[..chunk.len()].copy_from_slice(chunk);
            Data {
                sender,
                source,
                destination,
                sequence: (index % SEQ_COUNT as usize) as u8,
                payload,
            }
        })
        .collect();

    Ok(packets)
}

/// Reassemble the chat text from a complete, in-order packet run.
/// Zero padding is stripped from the final packet only; interior packets
/// contribute all [`PAYLOAD_SIZE`] bytes.
pub fn assemble_text(packets: &[Data]) -> Result<String, WireError> {
    let mut bytes = Vec::with_capacity(packets.len() * PAYLOAD_SIZE);
    for (index, packet) in packets.iter().enumerate() {
        if index + 1 == packets.len() {
            let used = packet
                .payload
                .iter()
                .rposition(|&byte| byte != 0)
                .map_or(0, |position| position + 1);
            bytes.extend_from_slice(&packet.payload[..used]);
        } else {
            bytes.extend_from_slice(&packet.payload);
        }
    }
    Ok(String::from_utf8(bytes)?)
}
