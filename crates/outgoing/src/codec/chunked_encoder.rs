use crate::protocol::Payload;
use bytes::{BufMut, Bytes, BytesMut};

/// Marks the end of a chunk payload and of the chunk-size line.
pub(crate) const CRLF: &str = "\r\n";

/// The terminal zero-length chunk, trailers are not supported.
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Chunked transfer-encoding framer.
///
/// Frames every non-empty chunk as `<HEX-SIZE>\r\n<data>\r\n` and the end of the body as the
/// zero-length chunk. Nothing is framed after the terminal chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    eof: bool,
    send_size: usize,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }

    /// Total body bytes framed so far, framing overhead excluded.
    pub fn send_size(&self) -> usize {
        self.send_size
    }

    /// Frames one pending write payload.
    ///
    /// Text stays text so it can still share a flush unit with the header block; the size line
    /// and the CRLF are ascii and encode identically under every [`Encoding`](crate::protocol::Encoding).
    pub fn frame(&mut self, payload: Payload) -> Payload {
        if self.eof {
            return Payload::Eof;
        }

        match payload {
            Payload::Text(text, encoding) => {
                let len = encoding.byte_length(&text);
                if len == 0 {
                    return Payload::Text(text, encoding);
                }
                self.send_size += len;
                Payload::Text(format!("{len:X}{CRLF}{text}{CRLF}"), encoding)
            }
            Payload::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Payload::Bytes(bytes);
                }
                let mut dst = BytesMut::new();
                self.put_chunk(&bytes[..], &mut dst);
                Payload::Bytes(dst.freeze())
            }
            Payload::Eof => {
                self.eof = true;
                Payload::Bytes(Bytes::from_static(LAST_CHUNK))
            }
        }
    }

    /// The size line opening a chunk whose data is sent as several pending writes.
    pub fn size_line(&mut self, len: usize) -> String {
        self.send_size += len;
        format!("{len:X}{CRLF}")
    }

    fn put_chunk(&mut self, data: &[u8], dst: &mut BytesMut) {
        self.send_size += data.len();
        let size_line = format!("{:X}{CRLF}", data.len());
        dst.reserve(size_line.len() + data.len() + CRLF.len());
        dst.put_slice(size_line.as_bytes());
        dst.put_slice(data);
        dst.put_slice(CRLF.as_bytes());
    }
}
