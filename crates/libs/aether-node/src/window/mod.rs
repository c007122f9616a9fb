//! Sliding-window transport over the 4-bit DATA sequence space.
//!
//! [`DataReceiver`] reorders arriving packets into session order;
//! [`DataTransmitter`] paces outgoing packets against acknowledgements.

mod receiver;
mod transmitter;

pub use receiver::DataReceiver;
pub use transmitter::{DataTransmitter, ReliableOutlet};
