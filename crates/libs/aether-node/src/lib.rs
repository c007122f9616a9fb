//! # aether-node
//!
//! A fully distributed, multi-hop ad-hoc chat node. Each node talks to its
//! peers over a shared half-duplex broadcast channel (an emulated wireless
//! audio link), discovers its one-hop neighbors, negotiates a unique 4-bit
//! id, floods link states to assemble the network topology, plans
//! minimum-redundancy broadcast forwarding, and moves chat messages with a
//! sliding-window session protocol.
//!
//! The entry point is [`node::Node`], which wires the subsystems together
//! and exposes the user surface through [`node::NodeHandle`]. Individual
//! subsystems are usable on their own:
//!
//! - [`arbiter::ChannelArbiter`] — collision-avoidance access to the medium
//! - [`packet_log::PacketLog`] — frame record and ack-miss queries
//! - [`topology::Topology`] — id / neighbor / link-state store
//! - [`planner`] — greedy broadcast-forwarding cover
//! - [`window`] — sliding-window receiver and transmitter
//!
//! The connection to the medium emulator lives in [`iface`].

pub mod addressing;
pub mod arbiter;
pub mod constants;
pub mod error;
pub mod iface;
pub mod link_state;
pub mod node;
pub mod packet_log;
pub mod planner;
pub mod session;
pub mod topology;
pub mod window;

pub use error::NodeError;
pub use node::{ChatMessage, Node, NodeHandle, Phase};
pub use topology::{LinkState, Topology};
