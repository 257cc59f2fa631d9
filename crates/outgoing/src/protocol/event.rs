use crate::protocol::OutgoingError;
use tracing::warn;

/// Notifications produced by an outgoing message.
///
/// Events are delivered in the order the operations that caused them happened, through the
/// channel returned by [`OutgoingMessage::events`](crate::outgoing::OutgoingMessage::events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingEvent {
    /// The committed header block was handed to the output queue
    HeadersSent(SentHead),
    /// A pending write left the output queue
    DataWritten { index: usize, len: usize },
    /// The queued bytes fell back under the watermark after a write reported backpressure
    Drain,
    /// `end` completed and nothing is pending in front of the output queue
    Prefinish,
    /// The terminating write left the output queue
    Finish,
    /// A deferred write failure
    Error(OutgoingError),
}

/// The header block as it was handed to the transport.
///
/// Collaborators that need to observe the exact wire framing get the first line, the parsed
/// status for responses, and the header pairs in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SentHead {
    first_line: String,
    status_code: Option<u16>,
    status_message: Option<String>,
    headers: Vec<(String, String)>,
}

impl SentHead {
    pub fn first_line(&self) -> &str {
        &self.first_line
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Parses a committed header block (first line, header lines and the blank terminator).
    pub(crate) fn parse(block: &[u8]) -> Self {
        let line_end = block.windows(2).position(|w| w == b"\r\n").unwrap_or(block.len());
        let first_line = String::from_utf8_lossy(&block[..line_end]).into_owned();

        let line_count = block.windows(2).filter(|w| *w == b"\r\n").count();
        let mut headers = vec![httparse::EMPTY_HEADER; line_count.saturating_sub(1).max(1)];

        let mut head = SentHead { first_line, ..Default::default() };

        let parsed = if block.starts_with(b"HTTP/") {
            let mut response = httparse::Response::new(&mut headers);
            let status = response.parse(block);
            head.status_code = response.code;
            head.status_message = response.reason.map(str::to_owned);
            status.map(|s| (s, response.headers.len()))
        } else {
            let mut request = httparse::Request::new(&mut headers);
            let status = request.parse(block);
            status.map(|s| (s, request.headers.len()))
        };

        match parsed {
            Ok((httparse::Status::Complete(_), count)) => {
                head.headers = headers[..count]
                    .iter()
                    .map(|h| (h.name.to_owned(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
            }
            Ok((httparse::Status::Partial, _)) => {
                warn!(first_line = %head.first_line, "header block is incomplete, no header pairs reported");
            }
            Err(e) => {
                warn!(cause = %e, first_line = %head.first_line, "can't parse committed header block");
            }
        }

        head
    }
}
