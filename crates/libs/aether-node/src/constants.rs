//! Protocol timing and retry parameters.

use std::time::Duration;

/// How long a joining node listens for neighbors after HELLO.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Discovery pings put on the air while listening.
pub const DISCOVERY_PING_REPEATS: usize = 3;

/// Spacing between repeated discovery pings.
pub const DISCOVERY_PING_SPACING: Duration = Duration::from_millis(400);

/// Reliable-send attempts for a REQUEST_ID.
pub const ID_REQUEST_ATTEMPTS: u32 = 3;

/// Per-attempt ack wait for a REQUEST_ID.
pub const ID_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Randomized deferral window for self-originated link-state floods.
pub const UPDATE_DELAY_MS: (u64, u64) = (600, 1000);

/// Randomized deferral window for direct replies (pongs, served link
/// states, id grants, session echoes).
pub const REPLY_DELAY_MS: (u64, u64) = (200, 500);

/// Randomized deferral window for outgoing DATA.
pub const DATA_DELAY_MS: (u64, u64) = (100, 300);

/// Reliable-send attempts for flood forwards and gap-fill requests.
pub const FLOOD_ATTEMPTS: u32 = 2;

/// Per-attempt ack wait for flood forwards and gap-fill requests.
pub const FLOOD_TIMEOUT: Duration = Duration::from_secs(3);

/// Gap-fill requests per missing link state.
pub const GAP_FILL_ATTEMPTS: u32 = 3;

/// Gap-fill start delay, per known taken id.
pub const GAP_FILL_DELAY_PER_ID: Duration = Duration::from_secs(3);

/// Keepalive check period; a pong goes out when the node was silent for
/// the whole period.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(4);

/// Neighbor sweep period and ack-observation window.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Reliable-send attempts for a SESSION_UPDATE handshake.
pub const SESSION_ATTEMPTS: u32 = 2;

/// Per-attempt ack wait for the handshake (two attempts inside 5 s).
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(2500);

/// How long the sender waits for neighbors to echo the handshake before
/// transmitting anyway.
pub const SESSION_ACK_GRACE: Duration = Duration::from_secs(5);

/// Pause between handshake completion and the first DATA, letting relays
/// set up their receive windows.
pub const RELAY_WAKE_DELAY: Duration = Duration::from_millis(500);

/// Ack wait per attempt when reliably echoing a relayed handshake.
pub const RELAY_ECHO_TIMEOUT: Duration = Duration::from_secs(1);

/// Reliable-send attempts per DATA packet.
pub const DATA_ATTEMPTS: u32 = 2;

/// Ack wait per DATA packet, per expected receiver.
pub const DATA_TIMEOUT_PER_RECEIVER: Duration = Duration::from_secs(1);

/// Ack stagger step between peers assigned to the same upstream sender.
pub const ACK_STAGGER: Duration = Duration::from_millis(100);

/// A send window making no progress for this long aborts the session.
pub const WINDOW_STALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Grace wait for the last acks after the final DATA went out.
pub const FINAL_ACK_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on waiting for our own transmission to clear the medium.
pub const FINISHED_SENDING_CAP: Duration = Duration::from_secs(10);

/// Deferral applied to the immediate copy of a repeated send.
pub const REPEAT_FIRST_DELAY: Duration = Duration::from_millis(200);

/// Receive sessions idle longer than this are dropped.
pub const RECEIVE_SESSION_TTL: Duration = Duration::from_secs(60);

/// Reconnect backoff for the medium connection.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Capacity of the inbound frame queue.
pub const INBOUND_QUEUE_CAPACITY: usize = 128;

/// Capacity of the outbound frame queue owned by the arbiter.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// Capacity of the delivered chat-message queue.
pub const CHAT_QUEUE_CAPACITY: usize = 64;
