//! Protocol types shared by the outgoing message, its header model and its output queue.
//!
//! - **Message data** ([`message`]): body chunks, encodings and pending write payloads
//!   - [`Chunk`]: what callers write
//!   - [`Payload`]: what a pending write record carries
//!
//! - **Heads** ([`head`]): first-line rendering
//!   - [`MessageHead`]: the implicit-header hook
//!   - [`ResponseHead`], [`RequestHead`]
//!
//! - **Events** ([`event`]): notifications produced for transport collaborators
//!   - [`OutgoingEvent`], [`SentHead`]
//!
//! - **Error Handling** ([`error`])
//!   - [`OutgoingError`]: errors of the message itself
//!   - [`SendError`]: errors of moving framed bytes onto a transport

mod message;
pub use message::Chunk;
pub use message::Encoding;
pub use message::Payload;

mod head;
pub use head::MessageHead;
pub use head::RequestHead;
pub use head::ResponseHead;

mod event;
pub use event::OutgoingEvent;
pub use event::SentHead;

mod error;
pub use error::OutgoingError;
pub use error::SendError;
