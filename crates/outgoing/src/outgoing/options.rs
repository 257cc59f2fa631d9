use crate::buffer::DEFAULT_HIGH_WATER_MARK;
use std::collections::HashSet;
use std::time::Duration;

/// Construction-time settings of an [`OutgoingMessage`](crate::outgoing::OutgoingMessage).
#[derive(Debug, Clone)]
pub struct OutgoingOptions {
    pub(crate) high_water_mark: usize,
    pub(crate) reject_non_standard_body_writes: bool,
    pub(crate) unique_headers: HashSet<String>,
    pub(crate) keep_alive_timeout: Duration,
    pub(crate) max_requests_per_socket: Option<u32>,
}

impl Default for OutgoingOptions {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            reject_non_standard_body_writes: false,
            unique_headers: HashSet::new(),
            keep_alive_timeout: Duration::ZERO,
            max_requests_per_socket: None,
        }
    }
}

impl OutgoingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued-byte threshold above which writes report backpressure.
    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Fail body writes on bodyless messages instead of silently dropping them.
    pub fn reject_non_standard_body_writes(mut self, reject: bool) -> Self {
        self.reject_non_standard_body_writes = reject;
        self
    }

    /// Registers header names whose list values are joined into one line. Names are case-folded.
    pub fn unique_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unique_headers.extend(names.into_iter().map(|name| name.as_ref().to_ascii_lowercase()));
        self
    }

    /// Advertised in a `Keep-Alive` header when the connection persists. Zero disables the header.
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn max_requests_per_socket(mut self, max: u32) -> Self {
        self.max_requests_per_socket = Some(max);
        self
    }

    pub fn get_high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub fn is_unique_header(&self, name: &str) -> bool {
        self.unique_headers.contains(&name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_headers_are_case_folded() {
        let options = OutgoingOptions::new().unique_headers(["X-Trace", "warning"]).unique_headers(vec![String::from("VIA")]);

        assert!(options.is_unique_header("x-trace"));
        assert!(options.is_unique_header("Warning"));
        assert!(options.is_unique_header("via"));
        assert!(!options.is_unique_header("set-cookie"));
    }

    #[test]
    fn defaults() {
        let options = OutgoingOptions::default();
        assert_eq!(options.get_high_water_mark(), 64 * 1024);
        assert!(!options.reject_non_standard_body_writes);
        assert!(options.keep_alive_timeout.is_zero());
        assert_eq!(options.max_requests_per_socket, None);
    }
}
