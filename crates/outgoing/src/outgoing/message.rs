use crate::buffer::{Completion, OutputQueue, PendingWrite, WriteCallback};
use crate::codec::{CRLF, ChunkedEncoder};
use crate::header::{AssemblyContext, FieldValue, Framing, HeaderSource, OutgoingHeaders, assemble, coalesce_header_map};
use crate::outgoing::OutgoingOptions;
use crate::outgoing::scheduler::{Scheduler, Task};
use crate::outgoing::sink::{Emitter, WireSink};
use crate::protocol::{Chunk, Encoding, MessageHead, OutgoingError, OutgoingEvent, Payload, ResponseHead, SentHead};
use crate::utils::{ensure, is_valid_first_line};
use bytes::{BufMut, Bytes, BytesMut};
use futures::channel::mpsc::{self, UnboundedReceiver};
use http::{HeaderMap, StatusCode};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, error, trace, warn};

struct HeldWrite {
    payload: Payload,
    callback: Option<WriteCallback>,
}

/// The outgoing half of one HTTP/1.1 message.
///
/// Headers accumulate in a mutable collection until they are committed, either explicitly with
/// [`commit_headers`](Self::commit_headers) or implicitly by the first write or by `end`. The
/// commit settles body framing and connection persistence once and for all. Body writes are
/// framed accordingly and queued on an ordered, corkable output queue whose delivered bytes the
/// transport collects with [`take_wire`](Self::take_wire).
///
/// Completion callbacks and notifications never run inside the call that caused them: they are
/// queued and run on the next turn, see [`run_pending`](Self::run_pending).
pub struct OutgoingMessage<H = ResponseHead> {
    head: H,
    options: OutgoingOptions,
    headers: OutgoingHeaders,
    framing: Framing,
    strict_content_length: bool,

    header: Option<Bytes>,
    header_sent: bool,
    written_header_bytes: usize,
    bytes_written: u64,

    finished: bool,
    writable_finished: bool,
    prefinished: bool,
    destroyed: bool,
    errored: Option<OutgoingError>,
    need_drain: bool,

    corked: usize,
    held: Vec<HeldWrite>,
    held_length: usize,
    output_data: VecDeque<PendingWrite>,
    output_size: usize,

    chunked_encoder: ChunkedEncoder,
    queue: OutputQueue<WireSink>,
    scheduler: Scheduler,
    finish_listeners: Vec<WriteCallback>,
    events: Emitter,
}

impl OutgoingMessage<ResponseHead> {
    /// Creates a response with the canonical reason phrase of `status`.
    pub fn response(status: StatusCode) -> Self {
        Self::new(ResponseHead::new(status))
    }
}

impl<H: MessageHead> OutgoingMessage<H> {
    pub fn new(head: H) -> Self {
        Self::with_options(head, OutgoingOptions::default())
    }

    pub fn with_options(head: H, options: OutgoingOptions) -> Self {
        let queue = OutputQueue::with_high_water_mark(WireSink::default(), options.high_water_mark);
        Self {
            head,
            options,
            headers: OutgoingHeaders::new(),
            framing: Framing::default(),
            strict_content_length: false,
            header: None,
            header_sent: false,
            written_header_bytes: 0,
            bytes_written: 0,
            finished: false,
            writable_finished: false,
            prefinished: false,
            destroyed: false,
            errored: None,
            need_drain: false,
            corked: 0,
            held: Vec::new(),
            held_length: 0,
            output_data: VecDeque::new(),
            output_size: 0,
            chunked_encoder: ChunkedEncoder::new(),
            queue,
            scheduler: Scheduler::default(),
            finish_listeners: Vec::new(),
            events: Emitter::default(),
        }
    }

    pub fn head(&self) -> &H {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut H {
        &mut self.head
    }

    /// Returns the receiver of this message's notifications.
    ///
    /// Only events produced after the call are delivered. Calling it again replaces the
    /// previous receiver.
    pub fn events(&mut self) -> UnboundedReceiver<OutgoingEvent> {
        let (sender, receiver) = mpsc::unbounded();
        self.events = Emitter::new(sender.clone());
        self.queue.sink_mut().events = Emitter::new(sender);
        receiver
    }

    pub fn set_header<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> Result<(), OutgoingError> {
        ensure!(self.header.is_none(), OutgoingError::headers_sent("set"));
        self.headers.set(name, value)
    }

    /// Sets every field of `headers`. All `set-cookie` values end up in one list.
    pub fn set_headers(&mut self, headers: &HeaderMap) -> Result<(), OutgoingError> {
        ensure!(self.header.is_none(), OutgoingError::headers_sent("set"));
        for (name, value) in coalesce_header_map(headers) {
            self.headers.set(&name, value)?;
        }
        Ok(())
    }

    pub fn append_header<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> Result<(), OutgoingError> {
        ensure!(self.header.is_none(), OutgoingError::headers_sent("append"));
        self.headers.append(name, value)
    }

    /// Removes a header. Removing `connection`, `content-length` or `transfer-encoding` also
    /// stops the commit from adding that header by itself, removing `date` disables the
    /// automatic date.
    pub fn remove_header(&mut self, name: &str) -> Result<(), OutgoingError> {
        ensure!(self.header.is_none(), OutgoingError::headers_sent("remove"));

        match name.to_ascii_lowercase().as_str() {
            "connection" => self.framing.removed_connection = true,
            "content-length" => self.framing.removed_cont_len = true,
            "transfer-encoding" => self.framing.removed_te = true,
            "date" => self.framing.send_date = false,
            _ => {}
        }
        self.headers.remove(name);
        Ok(())
    }

    pub fn get_header(&self, name: &str) -> Option<&FieldValue> {
        self.headers.get(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn get_header_names(&self) -> Vec<String> {
        self.headers.names()
    }

    pub fn get_raw_header_names(&self) -> Vec<String> {
        self.headers.raw_names()
    }

    /// All headers keyed by lowercased name.
    pub fn get_headers(&self) -> Vec<(String, FieldValue)> {
        self.headers.names().into_iter().zip(self.headers.iter().map(|(_, value)| value.clone())).collect()
    }

    /// All headers keyed by the name they were set with. Fails once headers are committed.
    pub fn render_headers(&self) -> Result<Vec<(String, FieldValue)>, OutgoingError> {
        ensure!(self.header.is_none(), OutgoingError::headers_sent("render"));
        Ok(self.headers.iter().map(|(name, value)| (name.to_owned(), value.clone())).collect())
    }

    /// Commits the header block: `first_line` (without CRLF) followed by the fields of `source`.
    ///
    /// Runs at most once per message.
    pub fn commit_headers(&mut self, first_line: &str, source: HeaderSource<'_>) -> Result<(), OutgoingError> {
        ensure!(self.header.is_none(), OutgoingError::headers_sent("commit"));
        ensure!(
            is_valid_first_line(first_line),
            OutgoingError::invalid_arg_value("first line contains control characters")
        );

        let forbids_body = self.head.forbids_body();
        if forbids_body {
            self.framing.has_body = false;
        }

        let ctx = AssemblyContext {
            unique_headers: &self.options.unique_headers,
            forbids_body,
            keep_alive_timeout: self.options.keep_alive_timeout,
            max_requests_per_socket: self.options.max_requests_per_socket,
        };
        let committed = assemble(first_line, source, &self.headers, &mut self.framing, &ctx)?;
        debug!(
            first_line,
            chunked = self.framing.chunked_encoding,
            last = self.framing.last,
            content_length = ?self.framing.content_length,
            "headers committed"
        );

        self.header = Some(committed.block);
        self.header_sent = false;

        // an interim response may be due before any body byte
        if committed.expect {
            self.send(Payload::Text(String::new(), Encoding::Latin1), None);
        }
        Ok(())
    }

    fn implicit_header(&mut self) -> Result<(), OutgoingError> {
        let first_line = self.head.first_line();
        self.commit_headers(&first_line, HeaderSource::Stored)
    }

    /// Commits the headers if needed and queues them without waiting for the first body write.
    pub fn flush_headers(&mut self) -> Result<(), OutgoingError> {
        if self.header.is_none() {
            self.implicit_header()?;
        }
        self.send(Payload::Text(String::new(), Encoding::Latin1), None);
        Ok(())
    }

    /// Writes a body chunk as utf-8.
    ///
    /// Returns `Ok(false)` when the queued bytes reached the watermark: the caller should wait
    /// for [`OutgoingEvent::Drain`] before writing more.
    pub fn write<C: Into<Chunk>>(&mut self, chunk: C) -> Result<bool, OutgoingError> {
        self.write_chunk(chunk.into(), Encoding::Utf8, None, false)
    }

    /// Writes a body chunk, `callback` runs once the chunk left the output queue or failed.
    pub fn write_with<C, F>(&mut self, chunk: C, encoding: Encoding, callback: F) -> Result<bool, OutgoingError>
    where
        C: Into<Chunk>,
        F: FnOnce(Option<&OutgoingError>) + Send + 'static,
    {
        self.write_chunk(chunk.into(), encoding, Some(Box::new(callback)), false)
    }

    fn write_chunk(
        &mut self,
        chunk: Chunk,
        encoding: Encoding,
        callback: Option<WriteCallback>,
        from_end: bool,
    ) -> Result<bool, OutgoingError> {
        if self.finished || self.destroyed {
            let err = if self.finished { OutgoingError::WriteAfterEnd } else { OutgoingError::destroyed("write") };
            warn!(%err, "write rejected");
            self.fail_write(err, callback);
            return Ok(false);
        }

        let len = chunk.byte_length(encoding);

        if self.header.is_none() {
            if from_end && self.framing.content_length.is_none() {
                self.framing.content_length = Some(len as u64);
            }
            self.implicit_header()?;
        }

        if self.strict_content_length_applies() {
            let expected = self.framing.content_length.unwrap_or_default();
            let total = self.bytes_written + len as u64;
            let mismatch = if from_end { total != expected } else { total > expected };
            if mismatch {
                error!(actual = total, expected, "body exceeds declared content-length");
                return Err(OutgoingError::content_length_mismatch(total, expected));
            }
        }
        self.bytes_written += len as u64;

        if !self.framing.has_body {
            ensure!(!self.options.reject_non_standard_body_writes, OutgoingError::BodyNotAllowed);
            debug!(len, "dropping body write on a message without body");
            if let Some(callback) = callback {
                self.scheduler.schedule(Task::Complete(callback, None));
            }
            return Ok(true);
        }

        // batch everything written in this turn
        if !from_end && !self.queue.is_corked() {
            self.queue.cork();
            self.scheduler.schedule(Task::UncorkQueue);
        }

        let payload = chunk.into_payload(encoding);
        let ret = if self.framing.chunked_encoding && len != 0 {
            if self.corked > 0 && self.header_sent {
                self.held.push(HeldWrite { payload, callback });
                self.held_length += len;
                self.writable_length() < self.writable_high_water_mark()
            } else {
                let framed = self.chunked_encoder.frame(payload);
                self.send(framed, callback.map(Completion::Callback))
            }
        } else {
            self.send(payload, callback.map(Completion::Callback))
        };

        if !ret {
            trace!(queued = self.writable_length(), "write reached the watermark");
            self.need_drain = true;
        }
        Ok(ret)
    }

    fn strict_content_length_applies(&self) -> bool {
        self.strict_content_length
            && self.framing.content_length.is_some()
            && self.framing.has_body
            && !self.framing.removed_cont_len
            && !self.framing.chunked_encoding
            && !self.headers.contains("transfer-encoding")
    }

    fn fail_write(&mut self, err: OutgoingError, callback: Option<WriteCallback>) {
        if self.destroyed {
            if let Some(callback) = callback {
                self.scheduler.schedule(Task::Complete(callback, Some(err)));
            }
        } else {
            self.scheduler.schedule(Task::FailWrite(callback, err));
        }
    }

    /// Queues a payload, the committed header block goes first if it was not sent yet.
    fn send(&mut self, mut payload: Payload, callback: Option<Completion>) -> bool {
        if !self.header_sent
            && let Some(block) = self.header.clone()
        {
            if payload.is_text() {
                let mut merged = BytesMut::with_capacity(block.len() + payload.len());
                merged.put_slice(&block);
                payload.encode_into(&mut merged);
                payload = Payload::Bytes(merged.freeze());
            } else {
                self.output_size += block.len();
                self.output_data.push_front(PendingWrite::new(Payload::Bytes(block.clone()), None));
            }

            self.header_sent = true;
            self.written_header_bytes = block.len();

            let head = SentHead::parse(&block);
            trace!(status = ?head.status_code(), headers = head.headers().len(), "headers sent");
            self.events.emit(OutgoingEvent::HeadersSent(head));
        }
        self.write_raw(payload, callback)
    }

    fn write_raw(&mut self, payload: Payload, callback: Option<Completion>) -> bool {
        if self.destroyed {
            return false;
        }

        self.flush_output();
        self.queue.write(payload, callback);
        self.collect_completions();
        self.writable_length() < self.writable_high_water_mark()
    }

    fn flush_output(&mut self) -> Option<bool> {
        if self.output_data.is_empty() {
            return None;
        }

        self.queue.cork();
        for write in std::mem::take(&mut self.output_data) {
            let (payload, callback) = write.into_parts();
            self.queue.write(payload, callback);
        }
        self.output_size = 0;
        self.queue_uncork();

        Some(self.writable_length() < self.writable_high_water_mark())
    }

    fn queue_uncork(&mut self) {
        self.queue.uncork();
        self.collect_completions();
    }

    fn collect_completions(&mut self) {
        for completion in std::mem::take(&mut self.queue.sink_mut().completed) {
            let task = match completion {
                Completion::Callback(callback) => Task::Complete(callback, None),
                Completion::Finish => Task::Finish,
            };
            self.scheduler.schedule(task);
        }
    }

    pub fn cork(&mut self) {
        self.corked += 1;
        self.queue.cork();
    }

    /// Releases one cork level. At depth zero the chunks held back while corked go out as a
    /// single chunk, in the order they were written.
    pub fn uncork(&mut self) {
        if self.corked == 0 {
            return;
        }
        self.corked -= 1;
        self.queue_uncork();

        if self.corked == 0 {
            self.flush_held();
        }
    }

    fn release_corks(&mut self) {
        while self.corked > 0 {
            self.corked -= 1;
            self.queue_uncork();
        }
        self.flush_held();
    }

    fn flush_held(&mut self) {
        if self.held.is_empty() {
            return;
        }

        let held = std::mem::take(&mut self.held);
        let len = std::mem::take(&mut self.held_length);
        trace!(writes = held.len(), len, "flushing held writes as one chunk");

        self.queue.cork();
        let size_line = self.chunked_encoder.size_line(len);
        self.send(Payload::Text(size_line, Encoding::Latin1), None);
        for write in held {
            self.send(write.payload, write.callback.map(Completion::Callback));
        }
        self.send(Payload::Text(CRLF.to_owned(), Encoding::Latin1), None);
        self.queue_uncork();
    }

    pub fn end(&mut self) -> Result<(), OutgoingError> {
        self.end_with(None, Encoding::Utf8, None)
    }

    /// Writes a last utf-8 chunk and ends the message.
    pub fn end_chunk<C: Into<Chunk>>(&mut self, chunk: C) -> Result<(), OutgoingError> {
        self.end_with(Some(chunk.into()), Encoding::Utf8, None)
    }

    /// Ends the message, optionally writing a last chunk first.
    ///
    /// `callback` runs when the message finished. Ending an ended message only registers the
    /// callback, or reports [`OutgoingError::AlreadyFinished`] to it once the message finished.
    pub fn end_with(
        &mut self,
        chunk: Option<Chunk>,
        encoding: Encoding,
        callback: Option<WriteCallback>,
    ) -> Result<(), OutgoingError> {
        // an empty buffer still counts as a last chunk, empty text does not
        let chunk = chunk.filter(|chunk| !matches!(chunk, Chunk::Text(text) if text.is_empty()));

        if self.destroyed {
            if let Some(callback) = callback {
                self.scheduler.schedule(Task::Complete(callback, Some(OutgoingError::destroyed("end"))));
            }
            return Ok(());
        }

        if self.finished {
            if chunk.is_some() {
                warn!("end called with data after the message ended");
                self.fail_write(OutgoingError::WriteAfterEnd, callback);
            } else if let Some(callback) = callback {
                if self.writable_finished {
                    self.scheduler.schedule(Task::Complete(callback, Some(OutgoingError::already_finished("end"))));
                } else {
                    self.finish_listeners.push(callback);
                }
            }
            return Ok(());
        }

        self.queue.cork();
        let terminated = self.terminate(chunk, encoding, callback);
        self.queue_uncork();
        terminated?;

        self.finished = true;
        if self.output_data.is_empty() {
            self.prefinish();
        }
        Ok(())
    }

    fn terminate(&mut self, chunk: Option<Chunk>, encoding: Encoding, callback: Option<WriteCallback>) -> Result<(), OutgoingError> {
        let had_chunk = chunk.is_some();
        match chunk {
            Some(chunk) => {
                self.write_chunk(chunk, encoding, None, true)?;
            }
            None if self.header.is_none() => {
                self.framing.content_length = Some(0);
                self.implicit_header()?;
            }
            None => {}
        }

        if self.strict_content_length_applies() {
            let expected = self.framing.content_length.unwrap_or_default();
            if self.bytes_written != expected {
                error!(actual = self.bytes_written, expected, "body shorter than declared content-length");
                return Err(OutgoingError::content_length_mismatch(self.bytes_written, expected));
            }
        }

        if let Some(callback) = callback {
            self.finish_listeners.push(callback);
        }

        // held chunks must precede the last chunk
        self.release_corks();

        if self.framing.has_body && self.framing.chunked_encoding {
            let last_chunk = self.chunked_encoder.frame(Payload::Eof);
            self.send(last_chunk, Some(Completion::Finish));
        } else if !self.header_sent || self.writable_length() > 0 || had_chunk {
            self.send(Payload::Text(String::new(), Encoding::Latin1), Some(Completion::Finish));
        } else {
            self.scheduler.schedule(Task::Finish);
        }
        Ok(())
    }

    fn prefinish(&mut self) {
        if !self.prefinished {
            self.prefinished = true;
            self.events.emit(OutgoingEvent::Prefinish);
        }
    }

    fn finish(&mut self) {
        if self.writable_finished {
            return;
        }
        self.writable_finished = true;
        trace!(bytes = self.bytes_written, "message finished");

        self.events.emit(OutgoingEvent::Finish);
        for listener in std::mem::take(&mut self.finish_listeners) {
            listener(None);
        }
    }

    /// Hands pending output to the output queue.
    pub fn flush(&mut self) {
        let ret = self.flush_output();
        if self.finished {
            self.prefinish();
        } else if ret == Some(true) && self.need_drain && !self.destroyed {
            self.need_drain = false;
            self.events.emit(OutgoingEvent::Drain);
        }
    }

    /// Takes the bytes that left the output queue so far.
    ///
    /// The transport owns them from now on, so they no longer count towards
    /// [`writable_length`](Self::writable_length). Emits [`OutgoingEvent::Drain`] if a write
    /// reported backpressure and the queue is back under the watermark.
    pub fn take_wire(&mut self) -> Bytes {
        let wire = self.queue.sink_mut().wire.split().freeze();
        self.queue.release();

        if self.need_drain && !self.finished && !self.destroyed && self.writable_length() < self.writable_high_water_mark() {
            self.need_drain = false;
            trace!("drain");
            self.events.emit(OutgoingEvent::Drain);
        }
        wire
    }

    /// Runs the tasks deferred so far and returns how many ran.
    ///
    /// Tasks deferred while running wait for the next call.
    pub fn run_pending(&mut self) -> usize {
        let tasks = self.scheduler.take_turn();
        let count = tasks.len();
        for task in tasks {
            self.run_task(task);
        }
        count
    }

    /// Runs deferred tasks until none is left.
    pub fn run_until_idle(&mut self) {
        while self.run_pending() > 0 {}
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Complete(callback, err) => callback(err.as_ref()),
            Task::FailWrite(callback, err) => {
                if let Some(callback) = callback {
                    callback(Some(&err));
                }
                if !self.destroyed {
                    self.events.emit(OutgoingEvent::Error(err));
                }
            }
            Task::UncorkQueue => self.queue_uncork(),
            Task::Finish => self.finish(),
        }
    }

    /// Puts the message in its terminal state. Later writes fail and nothing more is queued.
    pub fn destroy(&mut self, error: Option<OutgoingError>) {
        if self.destroyed {
            return;
        }
        match &error {
            Some(err) => debug!(%err, "message destroyed"),
            None => debug!("message destroyed"),
        }
        self.destroyed = true;
        self.errored = error;
    }

    pub fn headers_sent(&self) -> bool {
        self.header.is_some()
    }

    /// The committed header block, if any.
    pub fn header_block(&self) -> Option<&Bytes> {
        self.header.as_ref()
    }

    pub fn written_header_bytes(&self) -> usize {
        self.written_header_bytes
    }

    /// Body bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Queued bytes: pending output, held chunks, queued writes and bytes the transport did not take yet.
    pub fn writable_length(&self) -> usize {
        self.output_size + self.held_length + self.queue.queued_length()
    }

    pub fn writable_corked(&self) -> usize {
        self.corked
    }

    pub fn writable_high_water_mark(&self) -> usize {
        self.queue.writable_high_water_mark()
    }

    pub fn writable_need_drain(&self) -> bool {
        !self.destroyed && !self.finished && self.need_drain
    }

    pub fn writable_ended(&self) -> bool {
        self.finished
    }

    pub fn writable_finished(&self) -> bool {
        self.writable_finished
    }

    pub fn errored(&self) -> Option<&OutgoingError> {
        self.errored.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn chunked_encoding(&self) -> bool {
        self.framing.chunked_encoding
    }

    pub fn content_length(&self) -> Option<u64> {
        self.framing.content_length
    }

    /// Returns true if the connection closes after this message.
    pub fn is_last(&self) -> bool {
        self.framing.last
    }

    pub fn should_keep_alive(&self) -> bool {
        self.framing.should_keep_alive
    }

    pub fn has_body(&self) -> bool {
        self.framing.has_body
    }

    pub fn strict_content_length(&self) -> bool {
        self.strict_content_length
    }

    pub fn set_send_date(&mut self, send_date: bool) {
        self.framing.send_date = send_date;
    }

    pub fn set_should_keep_alive(&mut self, keep_alive: bool) {
        self.framing.should_keep_alive = keep_alive;
    }

    /// Enforces the declared content-length on the body.
    pub fn set_strict_content_length(&mut self, strict: bool) {
        self.strict_content_length = strict;
    }

    pub fn set_use_chunked_encoding_by_default(&mut self, chunked: bool) {
        self.framing.use_chunked_encoding_by_default = chunked;
    }

    pub fn set_max_requests_on_connection_reached(&mut self, reached: bool) {
        self.framing.max_requests_on_connection_reached = reached;
    }

    pub fn set_has_body(&mut self, has_body: bool) {
        self.framing.has_body = has_body;
    }

    /// Marks an external connection-reuse context as active.
    pub fn set_reuse_context(&mut self, reuse: bool) {
        self.framing.reuse_context = reuse;
    }

    /// Resolves the body length before commit, disclosed unless a header says otherwise.
    pub fn set_content_length(&mut self, length: u64) {
        self.framing.content_length = Some(length);
    }
}

impl<H: fmt::Debug> fmt::Debug for OutgoingMessage<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("head", &self.head)
            .field("headers", &self.headers)
            .field("framing", &self.framing)
            .field("header_sent", &self.header_sent)
            .field("bytes_written", &self.bytes_written)
            .field("finished", &self.finished)
            .field("destroyed", &self.destroyed)
            .field("corked", &self.corked)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestHead;
    use futures::{FutureExt, StreamExt};
    use http::Method;
    use indoc::indoc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, name: &'static str) -> impl FnOnce(Option<&OutgoingError>) + Send + 'static {
        let log = Arc::clone(log);
        move |err| {
            let entry = match err {
                None => name.to_owned(),
                Some(err) => format!("{name}: {}", err.code()),
            };
            log.lock().unwrap().push(entry);
        }
    }

    fn boxed(log: &Log, name: &'static str) -> Option<WriteCallback> {
        Some(Box::new(record(log, name)))
    }

    fn drain_events(events: &mut UnboundedReceiver<OutgoingEvent>) -> Vec<OutgoingEvent> {
        let mut received = Vec::new();
        while let Some(Some(event)) = events.next().now_or_never() {
            received.push(event);
        }
        received
    }

    fn wire<H: MessageHead>(message: &mut OutgoingMessage<H>) -> String {
        message.run_until_idle();
        String::from_utf8(message.take_wire().to_vec()).unwrap()
    }

    #[test]
    fn end_with_chunk_discloses_length() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_header("Content-Type", "text/plain").unwrap();

        message.end_chunk("hello").unwrap();

        let expected = indoc! {"
            HTTP/1.1 200 OK
            Content-Type: text/plain
            Connection: keep-alive
            Content-Length: 5

            hello"}
        .replace('\n', "\r\n");
        assert_eq!(wire(&mut message), expected);
        assert!(message.writable_finished());
        assert!(!message.is_last());
    }

    #[test]
    fn empty_end_commits_zero_length() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.end().unwrap();

        assert_eq!(wire(&mut message), "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(message.content_length(), Some(0));
    }

    #[test]
    fn writes_without_length_are_chunked() {
        let mut message = OutgoingMessage::response(StatusCode::OK);

        assert!(message.write("hello").unwrap());
        assert!(message.write(Bytes::from_static(b" world")).unwrap());
        message.end().unwrap();

        let expected = concat!(
            "HTTP/1.1 200 OK\r\n",
            "Connection: keep-alive\r\n",
            "Transfer-Encoding: chunked\r\n",
            "\r\n",
            "5\r\nhello\r\n",
            "6\r\n world\r\n",
            "0\r\n\r\n",
        );
        assert_eq!(wire(&mut message), expected);
        assert!(message.chunked_encoding());
        assert_eq!(message.bytes_written(), 11);
    }

    #[test]
    fn header_merges_into_first_text_write() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_header("Content-Length", 2_u64).unwrap();
        let mut events = message.events();

        message.write("ok").unwrap();
        message.run_until_idle();

        let received = drain_events(&mut events);
        let OutgoingEvent::HeadersSent(head) = &received[0] else { panic!("expected headers first: {received:?}") };
        assert_eq!(head.status_code(), Some(200));
        assert_eq!(head.status_message(), Some("OK"));
        assert_eq!(head.headers()[0], ("Content-Length".to_owned(), "2".to_owned()));

        let header_len = message.header_block().unwrap().len();
        assert_eq!(message.written_header_bytes(), header_len);
        assert_eq!(received[1], OutgoingEvent::DataWritten { index: 0, len: header_len + 2 });
        assert_eq!(received.len(), 2);
    }

    #[test]
    fn header_queued_separately_before_bytes() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_header("Content-Length", 3_u64).unwrap();
        let mut events = message.events();

        message.write(vec![1_u8, 2, 3]).unwrap();
        message.run_until_idle();

        let received = drain_events(&mut events);
        let header_len = message.written_header_bytes();
        assert!(matches!(received[0], OutgoingEvent::HeadersSent(_)));
        assert_eq!(received[1], OutgoingEvent::DataWritten { index: 0, len: header_len });
        assert_eq!(received[2], OutgoingEvent::DataWritten { index: 1, len: 3 });
    }

    #[test]
    fn callbacks_are_deferred_and_ordered() {
        let log = Log::default();
        let mut message = OutgoingMessage::response(StatusCode::OK);

        message.write_with("a", Encoding::Utf8, record(&log, "a")).unwrap();
        message.write_with("b", Encoding::Utf8, record(&log, "b")).unwrap();
        message.end_with(None, Encoding::Utf8, boxed(&log, "end")).unwrap();
        assert!(log.lock().unwrap().is_empty());

        message.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "end"]);
    }

    #[test]
    fn writes_in_one_turn_flush_together() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.flush_headers().unwrap();
        message.run_until_idle();
        message.take_wire();

        message.write("a").unwrap();
        message.write("b").unwrap();
        assert!(message.take_wire().is_empty());
        assert_eq!(message.run_pending(), 1);
        assert_eq!(message.take_wire(), Bytes::from_static(b"1\r\na\r\n1\r\nb\r\n"));
    }

    #[test]
    fn corked_chunks_coalesce() {
        let log = Log::default();
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.write("x").unwrap();
        message.run_until_idle();
        message.take_wire();
        let mut events = message.events();

        message.cork();
        message.write_with("a", Encoding::Utf8, record(&log, "a")).unwrap();
        message.write_with("b", Encoding::Utf8, record(&log, "b")).unwrap();
        assert_eq!(message.writable_length(), 2);
        message.uncork();
        message.run_until_idle();

        assert_eq!(message.take_wire(), Bytes::from_static(b"2\r\nab\r\n"));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);

        let written: Vec<_> = drain_events(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                OutgoingEvent::DataWritten { index, len } => Some((index, len)),
                _ => None,
            })
            .collect();
        let first = written[0].0;
        assert_eq!(written, vec![(first, 3), (first + 1, 1), (first + 2, 1), (first + 3, 2)]);
    }

    #[test]
    fn held_chunks_precede_terminator() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.flush_headers().unwrap();
        message.run_until_idle();
        message.take_wire();

        message.cork();
        message.write("late").unwrap();
        message.end().unwrap();

        assert_eq!(wire(&mut message), "4\r\nlate\r\n0\r\n\r\n");
        assert_eq!(message.writable_corked(), 0);
    }

    #[test]
    fn uncork_below_zero_is_ignored() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.uncork();
        assert_eq!(message.writable_corked(), 0);

        message.cork();
        message.cork();
        message.uncork();
        assert_eq!(message.writable_corked(), 1);
    }

    #[test]
    fn keep_alive_advisory_from_options() {
        let options = OutgoingOptions::new().keep_alive_timeout(Duration::from_secs(5)).max_requests_per_socket(10);
        let mut message = OutgoingMessage::with_options(ResponseHead::new(StatusCode::OK), options);

        message.end().unwrap();

        assert!(wire(&mut message).contains("Connection: keep-alive\r\nKeep-Alive: timeout=5, max=10\r\n"));
    }

    #[test]
    fn request_cap_closes_connection() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_max_requests_on_connection_reached(true);
        message.end_chunk("bye").unwrap();

        assert!(wire(&mut message).contains("Connection: close\r\n"));
        assert!(message.is_last());
    }

    #[test]
    fn no_content_with_chunked_requested() {
        let mut message = OutgoingMessage::response(StatusCode::NO_CONTENT);
        message.set_header("Transfer-Encoding", "chunked").unwrap();

        message.end().unwrap();

        assert!(!message.chunked_encoding());
        assert!(message.is_last());
        let out = wire(&mut message);
        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(!out.contains("0\r\n\r\n"));
    }

    #[test]
    fn bodyless_writes_are_swallowed() {
        let log = Log::default();
        let mut message = OutgoingMessage::new(RequestHead::new(Method::GET, "/"));
        message.set_has_body(false);

        assert!(message.write_with("ignored", Encoding::Utf8, record(&log, "w")).unwrap());
        assert_eq!(message.writable_length(), 0);
        message.end().unwrap();
        message.run_until_idle();

        assert_eq!(*log.lock().unwrap(), vec!["w"]);
        assert_eq!(wire(&mut message), "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    }

    #[test]
    fn bodyless_writes_rejected_when_configured() {
        let options = OutgoingOptions::new().reject_non_standard_body_writes(true);
        let mut message = OutgoingMessage::with_options(ResponseHead::new(StatusCode::NOT_MODIFIED), options);

        assert_eq!(message.write("body"), Err(OutgoingError::BodyNotAllowed));
        assert_eq!(message.writable_length(), 0);
    }

    #[test]
    fn strict_length_rejects_overflow() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_strict_content_length(true);
        message.set_header("Content-Length", 5_u64).unwrap();

        assert!(message.write("abc").unwrap());
        assert_eq!(message.write("def"), Err(OutgoingError::content_length_mismatch(6, 5)));
        assert!(message.write("de").unwrap());
        message.end().unwrap();

        assert!(wire(&mut message).ends_with("\r\n\r\nabcde"));
    }

    #[test]
    fn strict_length_rejects_short_body() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_strict_content_length(true);
        message.set_header("Content-Length", 5_u64).unwrap();

        message.write("ab").unwrap();
        assert_eq!(message.end(), Err(OutgoingError::content_length_mismatch(2, 5)));
        assert!(!message.writable_ended());

        assert_eq!(message.end_chunk("cdef"), Err(OutgoingError::content_length_mismatch(6, 5)));
        message.end_chunk("cde").unwrap();
        assert!(message.writable_ended());
    }

    #[test]
    fn strict_length_ignored_when_chunked() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_strict_content_length(true);
        message.set_header("Transfer-Encoding", "chunked").unwrap();

        message.write("anything").unwrap();
        message.end().unwrap();
    }

    #[test]
    fn header_mutation_after_commit_fails() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_header("X-Id", "1").unwrap();
        assert_eq!(message.get_header("x-id"), Some(&FieldValue::from("1")));
        assert_eq!(message.get_header_names(), vec!["x-id".to_owned()]);

        message.flush_headers().unwrap();

        assert!(message.headers_sent());
        assert_eq!(message.set_header("X-Id", "2"), Err(OutgoingError::headers_sent("set")));
        assert_eq!(message.append_header("X-Id", "2"), Err(OutgoingError::headers_sent("append")));
        assert_eq!(message.remove_header("X-Id"), Err(OutgoingError::headers_sent("remove")));
        assert_eq!(message.render_headers(), Err(OutgoingError::headers_sent("render")));
        assert_eq!(message.set_headers(&HeaderMap::new()), Err(OutgoingError::headers_sent("set")));
        assert_eq!(message.commit_headers("HTTP/1.1 200 OK", HeaderSource::Stored), Err(OutgoingError::headers_sent("commit")));
        assert_eq!(message.get_header("X-Id"), Some(&FieldValue::from("1")));
    }

    #[test]
    fn header_reads() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_header("X-Trace", "t").unwrap();
        message.append_header("Vary", "Accept").unwrap();
        message.append_header("vary", "Origin").unwrap();

        assert!(message.has_header("VARY"));
        assert_eq!(message.get_raw_header_names(), vec!["X-Trace".to_owned(), "Vary".to_owned()]);
        assert_eq!(
            message.get_headers(),
            vec![
                ("x-trace".to_owned(), FieldValue::from("t")),
                ("vary".to_owned(), FieldValue::from(["Accept", "Origin"]))
            ]
        );
        assert_eq!(message.render_headers().unwrap()[0], ("X-Trace".to_owned(), FieldValue::from("t")));
    }

    #[test]
    fn set_headers_from_map() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        map.append("content-length", "0".parse().unwrap());

        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_headers(&map).unwrap();
        message.end().unwrap();

        let out = wire(&mut message);
        assert!(out.contains("set-cookie: a=1\r\nset-cookie: b=2\r\n"));
        assert_eq!(out.matches("ontent-").count(), 1);
    }

    #[test]
    fn removed_headers_are_not_added_back() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.set_send_date(true);
        message.remove_header("Date").unwrap();
        message.remove_header("Connection").unwrap();
        message.remove_header("Transfer-Encoding").unwrap();

        message.write("body").unwrap();
        message.end().unwrap();

        let out = wire(&mut message);
        assert_eq!(out, "HTTP/1.1 200 OK\r\n\r\nbody");
        assert!(message.is_last());
    }

    #[test]
    fn explicit_commit_with_pairs() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.commit_headers("HTTP/1.1 201 Created", HeaderSource::Pairs(&[("Content-Length", "2")])).unwrap();
        message.end_chunk("ok").unwrap();

        assert_eq!(wire(&mut message), "HTTP/1.1 201 Created\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok");
    }

    #[test]
    fn expect_header_sends_headers_immediately() {
        let mut message = OutgoingMessage::new(RequestHead::new(Method::PUT, "/upload"));
        message.set_header("Expect", "100-continue").unwrap();
        message.set_header("Content-Length", 4_u64).unwrap();

        message.commit_headers("PUT /upload HTTP/1.1", HeaderSource::Stored).unwrap();

        let out = wire(&mut message);
        assert!(out.starts_with("PUT /upload HTTP/1.1\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn double_end_before_finish_waits() {
        let log = Log::default();
        let mut message = OutgoingMessage::response(StatusCode::OK);

        message.end().unwrap();
        message.end_with(None, Encoding::Utf8, boxed(&log, "second")).unwrap();
        assert!(log.lock().unwrap().is_empty());

        message.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn double_end_after_finish_errors() {
        let log = Log::default();
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.end().unwrap();
        message.run_until_idle();

        message.end_with(None, Encoding::Utf8, boxed(&log, "second")).unwrap();
        assert!(log.lock().unwrap().is_empty());

        message.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["second: ERR_STREAM_ALREADY_FINISHED"]);
    }

    #[test]
    fn write_after_end_fails_later() {
        let log = Log::default();
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.end().unwrap();
        message.run_until_idle();
        let mut events = message.events();

        assert!(!message.write_with("late", Encoding::Utf8, record(&log, "late")).unwrap());
        message.end_with(Some(Chunk::from("later")), Encoding::Utf8, None).unwrap();
        assert!(log.lock().unwrap().is_empty());

        message.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["late: ERR_STREAM_WRITE_AFTER_END"]);
        assert_eq!(
            drain_events(&mut events),
            vec![OutgoingEvent::Error(OutgoingError::WriteAfterEnd), OutgoingEvent::Error(OutgoingError::WriteAfterEnd)]
        );
    }

    #[test]
    fn write_after_destroy_fails_without_event() {
        let log = Log::default();
        let mut message = OutgoingMessage::response(StatusCode::OK);
        let mut events = message.events();

        message.destroy(Some(OutgoingError::aborted("client went away")));
        message.destroy(None);

        assert!(!message.write_with("x", Encoding::Utf8, record(&log, "x")).unwrap());
        message.end_with(None, Encoding::Utf8, boxed(&log, "end")).unwrap();
        message.run_until_idle();

        assert_eq!(*log.lock().unwrap(), vec!["x: ERR_STREAM_DESTROYED", "end: ERR_STREAM_DESTROYED"]);
        assert!(drain_events(&mut events).is_empty());
        assert!(message.is_destroyed());
        assert_eq!(message.errored(), Some(&OutgoingError::aborted("client went away")));
        assert!(message.take_wire().is_empty());
    }

    #[test]
    fn finish_events_in_order() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        let mut events = message.events();

        message.end_chunk("x").unwrap();
        message.run_until_idle();

        let received = drain_events(&mut events);
        let kinds: Vec<_> = received
            .iter()
            .map(|event| match event {
                OutgoingEvent::HeadersSent(_) => "headers",
                OutgoingEvent::DataWritten { .. } => "data",
                OutgoingEvent::Prefinish => "prefinish",
                OutgoingEvent::Finish => "finish",
                OutgoingEvent::Drain => "drain",
                OutgoingEvent::Error(_) => "error",
            })
            .collect();
        assert_eq!(kinds, vec!["headers", "data", "data", "prefinish", "finish"]);
    }

    #[test]
    fn drain_after_backpressure() {
        let options = OutgoingOptions::new().high_water_mark(8);
        let mut message = OutgoingMessage::with_options(ResponseHead::new(StatusCode::OK), options);
        message.set_header("Content-Length", 32_u64).unwrap();
        let mut events = message.events();

        assert!(!message.write("0123456789").unwrap());
        assert!(message.writable_need_drain());
        message.run_until_idle();

        message.take_wire();
        assert!(!message.writable_need_drain());
        assert_eq!(message.writable_length(), 0);

        let drains = drain_events(&mut events).into_iter().filter(|event| *event == OutgoingEvent::Drain).count();
        assert_eq!(drains, 1);

        message.take_wire();
        assert!(drain_events(&mut events).is_empty());
    }

    fn count_drains(events: &mut UnboundedReceiver<OutgoingEvent>) -> usize {
        drain_events(events).into_iter().filter(|event| *event == OutgoingEvent::Drain).count()
    }

    #[test]
    fn no_drain_once_ended() {
        let options = OutgoingOptions::new().high_water_mark(8);
        let mut message = OutgoingMessage::with_options(ResponseHead::new(StatusCode::OK), options);
        let mut events = message.events();

        assert!(!message.write("0123456789").unwrap());
        message.run_until_idle();
        message.end().unwrap();
        message.run_until_idle();
        assert!(!message.writable_need_drain());

        let out = message.take_wire();
        assert!(out.ends_with(b"a\r\n0123456789\r\n0\r\n\r\n"));
        assert!(!message.writable_need_drain());
        assert_eq!(count_drains(&mut events), 0);
    }

    #[test]
    fn no_drain_once_destroyed() {
        let options = OutgoingOptions::new().high_water_mark(8);
        let mut message = OutgoingMessage::with_options(ResponseHead::new(StatusCode::OK), options);
        let mut events = message.events();

        assert!(!message.write("0123456789").unwrap());
        message.run_until_idle();
        message.destroy(None);
        assert!(!message.writable_need_drain());

        message.take_wire();
        message.flush();
        assert!(!message.writable_need_drain());
        assert_eq!(count_drains(&mut events), 0);
    }

    #[test]
    fn injected_reason_is_rejected() {
        let head = ResponseHead::new(StatusCode::OK).with_reason("OK\r\nSet-Cookie: evil=1");
        let mut message = OutgoingMessage::new(head);

        let err = message.end_chunk("hi").unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_ARG_VALUE");
        assert!(!message.headers_sent());

        message.run_until_idle();
        assert!(message.take_wire().is_empty());
    }

    #[test]
    fn injected_request_target_is_rejected() {
        let mut message = OutgoingMessage::new(RequestHead::new(Method::GET, "/\r\nHost: evil"));
        assert!(message.flush_headers().is_err());
        assert!(!message.headers_sent());

        let err = message.commit_headers("HTTP/1.1 200 OK\n", HeaderSource::Stored).unwrap_err();
        assert!(matches!(err, OutgoingError::InvalidArgValue { .. }));
    }

    #[test]
    fn empty_buffer_is_a_last_chunk() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.end_with(Some(Chunk::from(Bytes::new())), Encoding::Utf8, None).unwrap();
        assert_eq!(wire(&mut message), "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n");
        assert!(message.writable_finished());

        let log = Log::default();
        message.end_with(Some(Chunk::from("")), Encoding::Utf8, None).unwrap();
        message.end_with(Some(Chunk::from(Bytes::new())), Encoding::Utf8, boxed(&log, "empty")).unwrap();
        message.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["empty: ERR_STREAM_WRITE_AFTER_END"]);
    }

    #[test]
    fn latin1_chunk_length() {
        let mut message = OutgoingMessage::response(StatusCode::OK);
        message.end_with(Some(Chunk::from("café")), Encoding::Latin1, None).unwrap();

        message.run_until_idle();
        let out = message.take_wire();
        assert!(out.ends_with(b"Content-Length: 4\r\n\r\ncaf\xE9"));
    }
}
