//! # aether-wire
//!
//! Wire formats for the aether ad-hoc chat network.
//!
//! Two framing layers live here:
//!
//! - [`frame`] — the byte frames exchanged with the audio-medium emulator
//!   over TCP (`DATA`, `DATA_SHORT` and the zero-payload channel
//!   notifications).
//! - [`packet`] — the eight aether packet kinds carried inside `DATA` /
//!   `DATA_SHORT` frames, nibble-packed into 32-byte and 2-byte payloads.
//!
//! [`text`] chunks a chat message into `DATA` payloads and reassembles it
//! on the receiving side.
//!
//! ## Packet layout
//!
//! ```text
//! byte 0:  [tag:4][flags:4]     tag selects the kind, flags are per-kind
//! byte 1+: nibble-packed ids / counters / payload, left nibble first
//! ```

pub mod error;
pub mod frame;
pub mod packet;
pub mod text;

pub use error::WireError;
pub use frame::{Frame, FrameDecoder};
pub use packet::{
    Data, DataAck, IssueId, LinkStateRequest, LinkStateUpdate, NodeId, Packet, PingPong,
    RequestId, SessionUpdate,
};

/// Number of distinct DATA sequence numbers.
pub const SEQ_COUNT: u8 = 16;

/// Receiver-side reorder window, in sequence numbers.
pub const RECEIVE_WINDOW_SIZE: u8 = 4;

/// Sender-side in-flight window, in sequence numbers.
pub const SEND_WINDOW_SIZE: u8 = 4;

/// Payload bytes carried by one DATA packet.
pub const PAYLOAD_SIZE: usize = 29;

/// Upper bound on DATA packets per session.
pub const MAX_SESSION_PACKETS: usize = 16;

/// Initial TTL of a self-originated link-state flood.
pub const FLOOD_TTL: u8 = 3;

/// Wire size of the long packet kinds and the `DATA` frame payload.
pub const LONG_PACKET_LEN: usize = 32;

/// Wire size of the short packet kinds and the `DATA_SHORT` frame payload.
pub const SHORT_PACKET_LEN: usize = 2;

/// Millisecond timestamps on the wire keep only their low 24 bits.
pub const TIMESTAMP_MASK: u32 = 0x00FF_FFFF;
