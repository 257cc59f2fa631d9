//! Body framing for outgoing messages.
//!
//! - [`ChunkedEncoder`]: chunked transfer-encoding framing of pending write payloads
//!
//! Content-length framed bodies need no framing: the bytes go out as written and the declared
//! length is enforced by the write path.

mod chunked_encoder;

pub use chunked_encoder::ChunkedEncoder;
pub(crate) use chunked_encoder::CRLF;
