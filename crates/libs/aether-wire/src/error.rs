use thiserror::Error;

/// Errors from wire encode/decode operations.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("buffer too short: {0} bytes")]
    TooShort(usize),

    #[error("unknown packet tag: 0x{0:x}")]
    UnknownTag(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("node id out of range: {0} (valid range 1..=15)")]
    InvalidNodeId(u8),

    #[error("message is empty")]
    EmptyMessage,

    #[error("message too long: {bytes} bytes exceeds {max} bytes")]
    MessageTooLong { bytes: usize, max: usize },

    #[error("reassembled payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
