//! The outgoing half of an HTTP/1.1 message stream
//!
//! This crate turns header mutations and body writes into correctly framed HTTP/1.1 bytes.
//! It decides the body framing (`Content-Length` or chunked transfer-encoding) and whether the
//! connection persists, enforces declared lengths, and queues output with corking and
//! backpressure. Moving the bytes onto a socket is left to the caller, or to
//! [`connection::MessageWriter`] for any tokio `AsyncWrite`.
//!
//! # Example
//!
//! ```no_run
//! use http::StatusCode;
//! use micro_outgoing::connection::MessageWriter;
//! use micro_outgoing::outgoing::OutgoingMessage;
//!
//! # async fn send() -> Result<(), micro_outgoing::protocol::SendError> {
//! let mut response = OutgoingMessage::response(StatusCode::OK);
//! response.set_header("Content-Type", "text/plain")?;
//! response.write("hello ")?;
//! response.end_chunk("world")?;
//!
//! let mut writer = MessageWriter::new(tokio::io::stdout());
//! writer.send(&mut response).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`header`]: the header collection and the header block assembly, where framing and
//!   persistence are decided
//! - [`outgoing`]: the message state machine, write path and `end`
//! - [`buffer`]: the ordered, corkable output queue
//! - [`codec`]: chunked transfer-encoding
//! - [`protocol`]: chunks, heads, events and errors
//! - [`connection`]: writing delivered bytes to a transport
//!
//! # Execution model
//!
//! A message is driven by one task. Write callbacks, `finish` and deferred errors never run
//! inside the call that caused them; they run when the owner calls
//! [`OutgoingMessage::run_pending`](outgoing::OutgoingMessage::run_pending). Writes issued in
//! the same turn are flushed together.

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod header;
pub mod outgoing;
pub mod protocol;

mod utils;
