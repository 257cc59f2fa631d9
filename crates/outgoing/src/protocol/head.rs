//! First-line rendering for outgoing messages.
//!
//! The first line is the only part of the header block that the header collection does not
//! produce. A [`MessageHead`] renders it when the message commits its headers implicitly,
//! and tells the protocol-decision engine whether the message is a response whose status
//! forbids a body.

use http::{Method, StatusCode};

/// Renders the first line of an outgoing message.
///
/// This is the hook an [`OutgoingMessage`](crate::outgoing::OutgoingMessage) calls for an
/// implicit header commit, i.e. when the first body write or `end` happens before the caller
/// committed the headers explicitly.
pub trait MessageHead {
    /// The first line without the trailing CRLF, e.g. `HTTP/1.1 200 OK`.
    fn first_line(&self) -> String;

    /// The response status, `None` for requests.
    fn status(&self) -> Option<StatusCode> {
        None
    }

    /// Returns true if the status forbids a message body (204 No Content, 304 Not Modified).
    fn forbids_body(&self) -> bool {
        matches!(self.status(), Some(StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED))
    }
}

/// The head of an HTTP/1.1 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: StatusCode,
    reason: Option<String>,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self { status, reason: None }
    }

    /// Overrides the canonical reason phrase.
    ///
    /// A reason with control characters fails the header commit.
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().or_else(|| self.status.canonical_reason()).unwrap_or("unknown")
    }
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl MessageHead for ResponseHead {
    fn first_line(&self) -> String {
        format!("HTTP/1.1 {} {}", self.status.as_str(), self.reason())
    }

    fn status(&self) -> Option<StatusCode> {
        Some(self.status)
    }
}

/// The head of an HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    method: Method,
    target: String,
}

impl RequestHead {
    pub fn new<S: Into<String>>(method: Method, target: S) -> Self {
        Self { method, target: target.into() }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl MessageHead for RequestHead {
    fn first_line(&self) -> String {
        format!("{} {} HTTP/1.1", self.method, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_first_line() {
        assert_eq!(ResponseHead::default().first_line(), "HTTP/1.1 200 OK");
        assert_eq!(ResponseHead::new(StatusCode::NOT_FOUND).with_reason("Nope").first_line(), "HTTP/1.1 404 Nope");
        assert_eq!(ResponseHead::new(StatusCode::from_u16(599).unwrap()).first_line(), "HTTP/1.1 599 unknown");
    }

    #[test]
    fn bodyless_statuses() {
        assert!(ResponseHead::new(StatusCode::NO_CONTENT).forbids_body());
        assert!(ResponseHead::new(StatusCode::NOT_MODIFIED).forbids_body());
        assert!(!ResponseHead::new(StatusCode::OK).forbids_body());
        assert!(!RequestHead::new(Method::GET, "/").forbids_body());
    }

    #[test]
    fn request_first_line() {
        let head = RequestHead::new(Method::POST, "/upload?id=1");
        assert_eq!(head.first_line(), "POST /upload?id=1 HTTP/1.1");
        assert_eq!(head.status(), None);
    }
}
