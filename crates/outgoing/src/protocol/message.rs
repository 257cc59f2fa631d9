use bytes::{BufMut, Bytes, BytesMut};

/// Character encoding used to turn a text [`Chunk`] into wire bytes.
///
/// `Latin1` maps every char to its low byte, so the byte length of a latin-1 text equals its
/// char count. Header blocks are always serialized as latin-1 compatible bytes.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    /// Returns the number of bytes `text` occupies once encoded.
    #[inline]
    pub fn byte_length(self, text: &str) -> usize {
        match self {
            Encoding::Utf8 => text.len(),
            Encoding::Latin1 => text.chars().count(),
        }
    }

    /// Appends the encoded form of `text` to `dst`.
    #[allow(clippy::cast_possible_truncation, reason = "latin-1 keeps the low byte of each char")]
    pub fn encode_into(self, text: &str, dst: &mut BytesMut) {
        match self {
            Encoding::Utf8 => dst.put_slice(text.as_bytes()),
            Encoding::Latin1 => {
                dst.reserve(text.len());
                for c in text.chars() {
                    dst.put_u8(u32::from(c) as u8);
                }
            }
        }
    }
}

/// A body chunk handed to [`OutgoingMessage::write`](crate::outgoing::OutgoingMessage::write).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Bytes(Bytes),
}

impl Chunk {
    #[inline]
    pub fn is_empty(&self) -> bool {
        match self {
            Chunk::Text(text) => text.is_empty(),
            Chunk::Bytes(bytes) => bytes.is_empty(),
        }
    }

    /// Returns the number of body bytes this chunk contributes once encoded.
    #[inline]
    pub fn byte_length(&self, encoding: Encoding) -> usize {
        match self {
            Chunk::Text(text) => encoding.byte_length(text),
            Chunk::Bytes(bytes) => bytes.len(),
        }
    }

    pub(crate) fn into_payload(self, encoding: Encoding) -> Payload {
        match self {
            Chunk::Text(text) => Payload::Text(text, encoding),
            Chunk::Bytes(bytes) => Payload::Bytes(bytes),
        }
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::Text(text.to_owned())
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Text(text)
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(bytes: &'static [u8]) -> Self {
        Chunk::Bytes(Bytes::from_static(bytes))
    }
}

/// The data carried by a pending write record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text, encoded with the attached encoding when it leaves the queue
    Text(String, Encoding),
    /// Raw bytes
    Bytes(Bytes),
    /// End-of-stream sentinel, contributes no bytes
    Eof,
}

impl Payload {
    /// Returns the encoded length of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text, encoding) => encoding.byte_length(text),
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Eof => 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the payload is text that can share a flush unit with a latin-1 header block.
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Payload::Text(..))
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Payload::Eof)
    }

    /// Appends the wire bytes of the payload to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Payload::Text(text, encoding) => encoding.encode_into(text, dst),
            Payload::Bytes(bytes) => dst.put_slice(bytes),
            Payload::Eof => {}
        }
    }
}
