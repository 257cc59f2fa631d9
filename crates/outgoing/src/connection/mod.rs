//! Transport side of an outgoing message
//!
//! - [`MessageWriter`]: pulls the bytes a message delivered out of its output queue and writes
//!   them to any [`tokio::io::AsyncWrite`]

mod message_writer;

pub use message_writer::MessageWriter;
