use std::io;
use thiserror::Error;

/// Errors raised by an [`OutgoingMessage`](crate::outgoing::OutgoingMessage).
///
/// Protocol misuse and length accounting errors are returned synchronously from the
/// offending call. Write-after-end and destroyed-stream errors are delivered later to the
/// write's callback, so the type is `Clone`: the same error may also be surfaced as an
/// [`OutgoingEvent::Error`](crate::protocol::OutgoingEvent::Error).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutgoingError {
    #[error("cannot {action} headers after they are sent to the client")]
    HeadersSent { action: &'static str },

    #[error("header name must be a valid http token: [{name}]")]
    InvalidHeaderName { name: String },

    #[error("invalid value for header: [{name}]")]
    InvalidHeaderValue { name: String },

    #[error("invalid argument value: {reason}")]
    InvalidArgValue { reason: String },

    #[error("trailers are invalid with this transfer encoding")]
    TrailerInvalid,

    #[error("response body's content-length of {actual} byte(s) does not match the content-length of {expected} byte(s) set in header")]
    ContentLengthMismatch { actual: u64, expected: u64 },

    #[error("adding content for this request method or response status is not allowed")]
    BodyNotAllowed,

    #[error("write after end")]
    WriteAfterEnd,

    #[error("cannot call {op} after a stream was destroyed")]
    Destroyed { op: &'static str },

    #[error("cannot call {op} after a stream was finished")]
    AlreadyFinished { op: &'static str },

    #[error("message aborted: {reason}")]
    Aborted { reason: String },
}

impl OutgoingError {
    pub fn headers_sent(action: &'static str) -> Self {
        Self::HeadersSent { action }
    }

    pub fn invalid_header_name<S: ToString>(name: S) -> Self {
        Self::InvalidHeaderName { name: name.to_string() }
    }

    pub fn invalid_header_value<S: ToString>(name: S) -> Self {
        Self::InvalidHeaderValue { name: name.to_string() }
    }

    pub fn invalid_arg_value<S: ToString>(reason: S) -> Self {
        Self::InvalidArgValue { reason: reason.to_string() }
    }

    pub fn content_length_mismatch(actual: u64, expected: u64) -> Self {
        Self::ContentLengthMismatch { actual, expected }
    }

    pub fn destroyed(op: &'static str) -> Self {
        Self::Destroyed { op }
    }

    pub fn already_finished(op: &'static str) -> Self {
        Self::AlreadyFinished { op }
    }

    pub fn aborted<S: ToString>(reason: S) -> Self {
        Self::Aborted { reason: reason.to_string() }
    }

    /// A stable identifier for the error kind, suitable for logs and for matching across
    /// process boundaries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HeadersSent { .. } => "ERR_HTTP_HEADERS_SENT",
            Self::InvalidHeaderName { .. } => "ERR_INVALID_HTTP_TOKEN",
            Self::InvalidHeaderValue { .. } => "ERR_INVALID_CHAR",
            Self::InvalidArgValue { .. } => "ERR_INVALID_ARG_VALUE",
            Self::TrailerInvalid => "ERR_HTTP_TRAILER_INVALID",
            Self::ContentLengthMismatch { .. } => "ERR_HTTP_CONTENT_LENGTH_MISMATCH",
            Self::BodyNotAllowed => "ERR_HTTP_BODY_NOT_ALLOWED",
            Self::WriteAfterEnd => "ERR_STREAM_WRITE_AFTER_END",
            Self::Destroyed { .. } => "ERR_STREAM_DESTROYED",
            Self::AlreadyFinished { .. } => "ERR_STREAM_ALREADY_FINISHED",
            Self::Aborted { .. } => "ERR_STREAM_ABORTED",
        }
    }

    /// Protocol misuse: the caller must not have made this call at all.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Self::HeadersSent { .. }
                | Self::InvalidHeaderName { .. }
                | Self::InvalidHeaderValue { .. }
                | Self::InvalidArgValue { .. }
                | Self::TrailerInvalid
                | Self::BodyNotAllowed
        )
    }
}

/// Errors raised while moving framed bytes onto a transport.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("outgoing message error: {source}")]
    Outgoing {
        #[from]
        source: OutgoingError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
