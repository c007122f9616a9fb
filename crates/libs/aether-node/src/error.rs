use thiserror::Error;

use aether_wire::WireError;

/// Errors surfaced by the node engine. Medium-level trouble never shows
/// up here: the connector retries its connection forever and the arbiter
/// degrades receiver sets instead of failing sends.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("node has not finished joining the network")]
    NotReady,

    #[error("send window made no progress within the stall timeout")]
    WindowStalled,
}
