//! Byte frames exchanged with the audio-medium emulator.
//!
//! Each frame is one kind byte followed by a payload whose size is fixed
//! by the kind. The TCP stream can split or merge frames arbitrarily, so
//! decoding is incremental: bytes accumulate in a [`FrameDecoder`] and
//! complete frames are drained off the front.

use crate::error::WireError;
use crate::{LONG_PACKET_LEN, SHORT_PACKET_LEN};

const KIND_HELLO: u8 = 0x00;
const KIND_DATA: u8 = 0x01;
const KIND_DATA_SHORT: u8 = 0x02;
const KIND_FREE: u8 = 0x03;
const KIND_BUSY: u8 = 0x04;
const KIND_SENDING: u8 = 0x05;
const KIND_DONE_SENDING: u8 = 0x06;
const KIND_END: u8 = 0x07;

/// One frame on the emulator connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Greeting from the emulator once the connection is up.
    Hello,
    /// A 32-byte packet heard on (or sent to) the medium.
    Data([u8; LONG_PACKET_LEN]),
    /// A 2-byte packet heard on (or sent to) the medium.
    DataShort([u8; SHORT_PACKET_LEN]),
    /// The medium went quiet.
    Free,
    /// Another node is transmitting.
    Busy,
    /// Our own transmission started.
    Sending,
    /// Our own transmission finished.
    DoneSending,
    /// The emulator is closing the connection.
    End,
}

impl Frame {
    fn kind_byte(&self) -> u8 {
        match self {
            Frame::Hello => KIND_HELLO,
            Frame::Data(_) => KIND_DATA,
            Frame::DataShort(_) => KIND_DATA_SHORT,
            Frame::Free => KIND_FREE,
            Frame::Busy => KIND_BUSY,
            Frame::Sending => KIND_SENDING,
            Frame::DoneSending => KIND_DONE_SENDING,
            Frame::End => KIND_END,
        }
    }

    fn payload_len(kind: u8) -> Result<usize, WireError> {
        match kind {
            KIND_DATA => Ok(LONG_PACKET_LEN),
            KIND_DATA_SHORT => Ok(SHORT_PACKET_LEN),
            KIND_HELLO | KIND_FREE | KIND_BUSY | KIND_SENDING | KIND_DONE_SENDING | KIND_END => {
                Ok(0)
            }
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }

    /// Wrap an encoded packet in the frame kind matching its size.
    pub fn from_packet_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        match bytes.len() {
            LONG_PACKET_LEN => {
                let mut payload = [0u8; LONG_PACKET_LEN];
                payload.copy_from_slice(bytes);
                Ok(Frame::Data(payload))
            }
            SHORT_PACKET_LEN => {
                let mut payload = [0u8; SHORT_PACKET_LEN];
                payload.copy_from_slice(bytes);
                Ok(Frame::DataShort(payload))
            }
            other => Err(WireError::TooShort(other)),
        }
    }

    /// The packet bytes carried by DATA / DATA_SHORT frames.
    pub fn packet_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Data(payload) => Some(payload),
            Frame::DataShort(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + LONG_PACKET_LEN);
        buf.push(self.kind_byte());
        if let Some(payload) = self.packet_bytes() {
            buf.extend_from_slice(payload);
        }
        buf
    }
}

/// Incremental decoder over the emulator byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, or `None` until more bytes arrive.
    /// An unknown kind byte poisons the stream and is returned as an
    /// error so the connection can be torn down.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        let Some(&kind) = self.buffer.first() else {
            return Ok(None);
        };

        let payload_len = Frame::payload_len(kind)?;
        if self.buffer.len() < 1 + payload_len {
            return Ok(None);
        }

        let frame = match kind {
            KIND_HELLO => Frame::Hello,
            KIND_FREE => Frame::Free,
            KIND_BUSY => Frame::Busy,
            KIND_SENDING => Frame::Sending,
            KIND_DONE_SENDING => Frame::DoneSending,
            KIND_END => Frame::End,
            KIND_DATA => {
                let mut payload = [0u8; LONG_PACKET_LEN];
                payload.copy_from_slice(&self.buffer[1..1 + LONG_PACKET_LEN]);
                Frame::Data(payload)
            }
            KIND_DATA_SHORT => {
                let mut payload = [0u8; SHORT_PACKET_LEN];
                payload.copy_from_slice(&self.buffer[1..1 + SHORT_PACKET_LEN]);
                Frame::DataShort(payload)
            }
            other => return Err(WireError::UnknownFrameKind(other)),
        };

        self.buffer.drain(..1 + payload_len);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_control_frames() {
        for frame in [
            Frame::Hello,
            Frame::Free,
            Frame::Busy,
            Frame::Sending,
            Frame::DoneSending,
            Frame::End,
        ] {
            let mut decoder = FrameDecoder::new();
            decoder.push(&frame.encode());
            assert_eq!(decoder.next_frame().expect("decode"), Some(frame));
            assert_eq!(decoder.next_frame().expect("decode"), None);
        }
    }

    #[test]
    fn roundtrip_data_frames() {
        let long = Frame::Data([0xAB; LONG_PACKET_LEN]);
        let short = Frame::DataShort([0x51, 0x20]);

        let mut decoder = FrameDecoder::new();
        decoder.push(&long.encode());
        decoder.push(&short.encode());
        assert_eq!(decoder.next_frame().expect("decode"), Some(long));
        assert_eq!(decoder.next_frame().expect("decode"), Some(short));
        assert_eq!(decoder.next_frame().expect("decode"), None);
    }

    #[test]
    fn decodes_across_split_reads() {
        let frame = Frame::Data([0x42; LONG_PACKET_LEN]);
        let encoded = frame.encode();

        let mut decoder = FrameDecoder::new();
        decoder.push(&encoded[..10]);
        assert_eq!(decoder.next_frame().expect("decode"), None);
        decoder.push(&encoded[10..20]);
        assert_eq!(decoder.next_frame().expect("decode"), None);
        decoder.push(&encoded[20..]);
        assert_eq!(decoder.next_frame().expect("decode"), Some(frame));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0xEE]);
        assert!(matches!(decoder.next_frame(), Err(WireError::UnknownFrameKind(0xEE))));
    }

    #[test]
    fn from_packet_bytes_picks_framing_by_size() {
        assert!(matches!(
            Frame::from_packet_bytes(&[0u8; LONG_PACKET_LEN]),
            Ok(Frame::Data(_))
        ));
        assert!(matches!(
            Frame::from_packet_bytes(&[0u8; SHORT_PACKET_LEN]),
            Ok(Frame::DataShort(_))
        ));
        assert!(Frame::from_packet_bytes(&[0u8; 7]).is_err());
    }
}
