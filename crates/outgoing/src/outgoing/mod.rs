//! The outgoing message
//!
//! [`OutgoingMessage`] owns the header collection, commits the header block, frames body
//! writes and feeds them to its output queue. [`OutgoingOptions`] carries the settings fixed at
//! construction.

mod message;
mod options;
mod scheduler;
mod sink;

pub use message::OutgoingMessage;
pub use options::OutgoingOptions;
