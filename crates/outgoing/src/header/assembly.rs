//! Header block assembly and the protocol decisions taken while committing headers.
//!
//! Committing serializes the first line and every header field, records which well-known
//! fields the caller declared, and then settles, in this order:
//!
//! 1. the `Date` header,
//! 2. body suppression for statuses that forbid a body,
//! 3. connection persistence,
//! 4. body-length disclosure (`Content-Length` or chunked `Transfer-Encoding`),
//! 5. trailer legality.
//!
//! The result is an immutable header block terminated by an empty line.

use crate::header::collection::{validate_header_name, validate_header_value};
use crate::header::{FieldValue, OutgoingHeaders};
use crate::protocol::OutgoingError;
use crate::utils::{contains_token, ensure};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace};

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

/// Where the header fields of a commit come from.
#[derive(Debug, Clone, Copy)]
pub enum HeaderSource<'a> {
    /// The message's own header collection, already validated when it was filled
    Stored,
    /// A flat `[name, value, name, value, ..]` list, validated while committing
    Flat(&'a [&'a str]),
    /// A list of `(name, value)` pairs, validated while committing
    Pairs(&'a [(&'a str, &'a str)]),
}

/// Message flags the decision engine reads and rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Framing {
    pub(crate) chunked_encoding: bool,
    pub(crate) should_keep_alive: bool,
    pub(crate) use_chunked_encoding_by_default: bool,
    pub(crate) send_date: bool,
    pub(crate) has_body: bool,
    pub(crate) last: bool,
    pub(crate) content_length: Option<u64>,
    pub(crate) removed_connection: bool,
    pub(crate) removed_cont_len: bool,
    pub(crate) removed_te: bool,
    pub(crate) default_keep_alive: bool,
    pub(crate) max_requests_on_connection_reached: bool,
    pub(crate) reuse_context: bool,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            chunked_encoding: false,
            should_keep_alive: true,
            use_chunked_encoding_by_default: true,
            send_date: false,
            has_body: true,
            last: false,
            content_length: None,
            removed_connection: false,
            removed_cont_len: false,
            removed_te: false,
            default_keep_alive: true,
            max_requests_on_connection_reached: false,
            reuse_context: false,
        }
    }
}

/// Per-message inputs of the decision engine that the commit itself never changes.
#[derive(Debug)]
pub(crate) struct AssemblyContext<'a> {
    pub(crate) unique_headers: &'a HashSet<String>,
    pub(crate) forbids_body: bool,
    pub(crate) keep_alive_timeout: Duration,
    pub(crate) max_requests_per_socket: Option<u32>,
}

/// The outcome of a successful commit.
#[derive(Debug)]
pub(crate) struct CommittedHead {
    pub(crate) block: Bytes,
    pub(crate) expect: bool,
}

#[derive(Debug, Default)]
struct HeaderState {
    connection: bool,
    cont_len: bool,
    te: bool,
    date: bool,
    expect: bool,
    trailer: bool,
}

struct Assembler<'a, 'c> {
    framing: &'a mut Framing,
    ctx: &'a AssemblyContext<'c>,
    state: HeaderState,
    dst: BytesMut,
}

/// Builds the header block for `first_line` (given without its CRLF) from `source`.
pub(crate) fn assemble(
    first_line: &str,
    source: HeaderSource<'_>,
    stored: &OutgoingHeaders,
    framing: &mut Framing,
    ctx: &AssemblyContext<'_>,
) -> Result<CommittedHead, OutgoingError> {
    let mut dst = BytesMut::with_capacity(INIT_HEADER_SIZE);
    dst.put_slice(first_line.as_bytes());
    dst.put_slice(b"\r\n");

    let mut assembler = Assembler { framing, ctx, state: HeaderState::default(), dst };

    match source {
        HeaderSource::Stored => {
            for (name, value) in stored.iter() {
                assembler.process_header(name, value.clone(), false)?;
            }
        }
        HeaderSource::Flat(fields) => {
            ensure!(
                fields.len() % 2 == 0,
                OutgoingError::invalid_arg_value(format!("headers must hold name/value pairs, got {} items", fields.len()))
            );
            for pair in fields.chunks_exact(2) {
                assembler.process_header(pair[0], FieldValue::from(pair[1]), true)?;
            }
        }
        HeaderSource::Pairs(pairs) => {
            for (name, value) in pairs {
                assembler.process_header(name, FieldValue::from(*value), true)?;
            }
        }
    }

    assembler.decide()?;

    let Assembler { state, mut dst, .. } = assembler;
    dst.put_slice(b"\r\n");
    trace!(len = dst.len(), "header block committed");

    Ok(CommittedHead { block: dst.freeze(), expect: state.expect })
}

impl Assembler<'_, '_> {
    fn process_header(&mut self, name: &str, value: FieldValue, validate: bool) -> Result<(), OutgoingError> {
        if validate {
            validate_header_name(name)?;
        }

        // rfc 6266 section 4.3: with a declared length the value must serialize byte for byte
        let latin1 = name.eq_ignore_ascii_case("content-disposition") && self.framing.content_length.is_some_and(|n| n > 0);

        if let FieldValue::Multi(values) = &value {
            let joined = (values.len() >= 2 && name.eq_ignore_ascii_case("cookie"))
                || self.ctx.unique_headers.contains(&name.to_ascii_lowercase());
            if !joined {
                for value in values {
                    self.store_header(name, value, latin1, validate)?;
                }
                return Ok(());
            }
            return self.store_header(name, &values.join("; "), latin1, validate);
        }

        let value = value.as_str().unwrap_or_default();
        self.store_header(name, value, latin1, validate)
    }

    fn store_header(&mut self, name: &str, value: &str, latin1: bool, validate: bool) -> Result<(), OutgoingError> {
        if validate {
            validate_header_value(name, value)?;
        }

        self.dst.put_slice(name.as_bytes());
        self.dst.put_slice(b": ");
        put_value(&mut self.dst, value, latin1);
        self.dst.put_slice(b"\r\n");

        self.match_header(name, value);
        Ok(())
    }

    fn match_header(&mut self, name: &str, value: &str) {
        if name.len() < 4 || name.len() > 17 {
            return;
        }

        match name.to_ascii_lowercase().as_str() {
            "connection" => {
                self.state.connection = true;
                self.framing.removed_connection = false;
                if contains_token(value, "close") {
                    self.framing.last = true;
                } else {
                    self.framing.should_keep_alive = true;
                }
            }
            "transfer-encoding" => {
                self.state.te = true;
                self.framing.removed_te = false;
                if contains_token(value, "chunked") {
                    self.framing.chunked_encoding = true;
                }
            }
            "content-length" => {
                self.state.cont_len = true;
                self.framing.content_length = value.trim().parse().ok();
                self.framing.removed_cont_len = false;
            }
            "date" => self.state.date = true,
            "expect" => self.state.expect = true,
            "trailer" => self.state.trailer = true,
            "keep-alive" => self.framing.default_keep_alive = false,
            _ => {}
        }
    }

    fn decide(&mut self) -> Result<(), OutgoingError> {
        if self.framing.send_date && !self.state.date {
            let mut date = faf_http_date::get_date_buff_no_key();
            faf_http_date::get_date_no_key(&mut date);
            self.put_line("Date", &date[..]);
        }

        // a zero chunk after a bodyless status confuses proxies, so no chunk and no reuse
        if self.framing.chunked_encoding && self.ctx.forbids_body {
            debug!("chunked framing requested for a status without body, closing connection instead");
            self.framing.chunked_encoding = false;
            self.framing.should_keep_alive = false;
        }

        self.decide_persistence();
        self.decide_length();

        ensure!(!self.state.trailer || self.framing.chunked_encoding, OutgoingError::TrailerInvalid);
        Ok(())
    }

    fn decide_persistence(&mut self) {
        if self.framing.removed_connection {
            self.framing.last = !self.framing.should_keep_alive;
            return;
        }
        if self.state.connection {
            return;
        }

        let send_keep_alive = self.framing.should_keep_alive
            && (self.state.cont_len || self.framing.use_chunked_encoding_by_default || self.framing.reuse_context);

        if send_keep_alive && self.framing.max_requests_on_connection_reached {
            debug!("connection reached its request cap, announcing close");
            self.framing.last = true;
            self.put_line("Connection", b"close");
        } else if send_keep_alive {
            self.put_line("Connection", b"keep-alive");
            let timeout = self.ctx.keep_alive_timeout;
            if !timeout.is_zero() && self.framing.default_keep_alive {
                let advisory = match self.ctx.max_requests_per_socket {
                    Some(max) if max > 0 => format!("timeout={}, max={max}", timeout.as_secs()),
                    _ => format!("timeout={}", timeout.as_secs()),
                };
                self.put_line("Keep-Alive", advisory.as_bytes());
            }
        } else {
            self.framing.last = true;
            self.put_line("Connection", b"close");
        }
    }

    fn decide_length(&mut self) {
        if self.state.cont_len || self.state.te {
            return;
        }

        if !self.framing.has_body {
            self.framing.chunked_encoding = false;
        } else if !self.framing.use_chunked_encoding_by_default {
            self.framing.last = true;
        } else if let (false, false, Some(length)) =
            (self.state.trailer, self.framing.removed_cont_len, self.framing.content_length)
        {
            self.put_line("Content-Length", length.to_string().as_bytes());
        } else if !self.framing.removed_te {
            self.put_line("Transfer-Encoding", b"chunked");
            self.framing.chunked_encoding = true;
        } else {
            // no length and no chunks: only closing the connection can end the body
            self.framing.last = true;
        }
    }

    fn put_line(&mut self, name: &str, value: &[u8]) {
        self.dst.put_slice(name.as_bytes());
        self.dst.put_slice(b": ");
        self.dst.put_slice(value);
        self.dst.put_slice(b"\r\n");
    }
}

/// Writes a header value, one byte per char when latin-1 serialization was asked for and the
/// value fits in latin-1, as utf-8 otherwise.
#[allow(clippy::cast_possible_truncation, reason = "guarded by the latin-1 range check")]
fn put_value(dst: &mut BytesMut, value: &str, latin1: bool) {
    if latin1 && value.chars().all(|c| u32::from(c) <= 0xFF) {
        for c in value.chars() {
            dst.put_u8(u32::from(c) as u8);
        }
    } else {
        dst.put_slice(value.as_bytes());
    }
}
