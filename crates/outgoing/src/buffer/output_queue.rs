use crate::protocol::{Encoding, OutgoingError, Payload};
use std::collections::VecDeque;
use std::fmt;

/// Default queued-byte threshold reported as backpressure, 64 KiB.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

/// Completion callback of a single write, receives the error if the write failed.
pub type WriteCallback = Box<dyn FnOnce(Option<&OutgoingError>) + Send>;

/// What happens once a pending write has left the queue.
pub enum Completion {
    /// Run the caller's write callback
    Callback(WriteCallback),
    /// The terminating write of the message left the queue
    Finish,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Callback(_) => f.write_str("Completion::Callback(..)"),
            Completion::Finish => f.write_str("Completion::Finish"),
        }
    }
}

/// A pending write record.
pub struct PendingWrite {
    payload: Payload,
    callback: Option<Completion>,
    length: usize,
    written: bool,
}

impl PendingWrite {
    pub fn new(payload: Payload, callback: Option<Completion>) -> Self {
        let length = payload.len();
        Self { payload, callback, length, written: false }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The encoding hint of text payloads.
    pub fn encoding(&self) -> Option<Encoding> {
        match &self.payload {
            Payload::Text(_, encoding) => Some(*encoding),
            Payload::Bytes(_) | Payload::Eof => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn is_written(&self) -> bool {
        self.written
    }

    pub(crate) fn into_parts(self) -> (Payload, Option<Completion>) {
        (self.payload, self.callback)
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite")
            .field("payload", &self.payload)
            .field("callback", &self.callback)
            .field("length", &self.length)
            .field("written", &self.written)
            .finish()
    }
}

/// Receives writes as they leave an [`OutputQueue`].
pub trait DeliverySink {
    /// Observes a write leaving the queue. `index` counts writes in delivery order.
    fn deliver(&mut self, index: usize, write: &PendingWrite);

    /// Runs the completion of a delivered write, right after [`deliver`](Self::deliver).
    fn complete(&mut self, completion: Completion) {
        if let Completion::Callback(callback) = completion {
            callback(None);
        }
    }
}

/// An ordered, corkable FIFO of pending writes.
///
/// Writes are flushed in arrival order, each exactly once, and only while the cork depth is
/// zero. Corking delays flushes but never reorders them. Bytes that were flushed stay counted
/// in [`writable_length`](Self::writable_length) until [`release`](Self::release) reports that
/// the transport consumed them.
#[derive(Debug)]
pub struct OutputQueue<S> {
    corked: usize,
    entries: VecDeque<PendingWrite>,
    pending: usize,
    next_index: usize,
    retained: usize,
    high_water_mark: usize,
    sink: S,
}

impl<S: DeliverySink> OutputQueue<S> {
    pub fn new(sink: S) -> Self {
        Self::with_high_water_mark(sink, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(sink: S, high_water_mark: usize) -> Self {
        Self { corked: 0, entries: VecDeque::new(), pending: 0, next_index: 0, retained: 0, high_water_mark, sink }
    }

    /// Enqueues a write and flushes if the queue is not corked.
    ///
    /// Returns whether the queued bytes stayed under the watermark.
    pub fn write(&mut self, payload: Payload, callback: Option<Completion>) -> bool {
        let write = PendingWrite::new(payload, callback);
        self.pending += write.length;
        self.entries.push_back(write);
        self.flush();
        self.queued_length() < self.high_water_mark
    }

    pub fn cork(&mut self) {
        self.corked += 1;
    }

    /// Releases one cork level; flushes once the depth reaches zero. Uncorking an uncorked
    /// queue only flushes.
    pub fn uncork(&mut self) {
        self.corked = self.corked.saturating_sub(1);
        self.flush();
    }

    fn flush(&mut self) {
        if self.corked > 0 {
            return;
        }

        while let Some(mut entry) = self.entries.pop_front() {
            entry.written = true;
            let index = self.next_index;
            self.next_index += 1;
            self.pending -= entry.length;
            self.retained += entry.length;

            self.sink.deliver(index, &entry);
            if let Some(completion) = entry.callback.take() {
                self.sink.complete(completion);
            }
        }
    }

    /// Forgets the retained bytes, the transport consumed them.
    pub fn release(&mut self) {
        self.retained = 0;
    }

    /// Bytes flushed and not yet released.
    #[inline]
    pub fn writable_length(&self) -> usize {
        self.retained
    }

    /// Bytes waiting for the queue to be uncorked plus the retained bytes.
    #[inline]
    pub fn queued_length(&self) -> usize {
        self.pending + self.retained
    }

    #[inline]
    pub fn writable_corked(&self) -> usize {
        self.corked
    }

    #[inline]
    pub fn is_corked(&self) -> bool {
        self.corked > 0
    }

    #[inline]
    pub fn writable_high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Writes waiting for the queue to be uncorked.
    #[inline]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
