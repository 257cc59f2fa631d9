use crate::buffer::{Completion, DeliverySink, PendingWrite};
use crate::protocol::OutgoingEvent;
use bytes::BytesMut;
use futures::channel::mpsc::UnboundedSender;
use tracing::trace;

/// Sends events to the receiver handed out by `events()`, if any.
#[derive(Debug, Clone, Default)]
pub(crate) struct Emitter {
    sender: Option<UnboundedSender<OutgoingEvent>>,
}

impl Emitter {
    pub(crate) fn new(sender: UnboundedSender<OutgoingEvent>) -> Self {
        Self { sender: Some(sender) }
    }

    pub(crate) fn emit(&self, event: OutgoingEvent) {
        if let Some(sender) = &self.sender
            && sender.unbounded_send(event).is_err()
        {
            trace!("event receiver dropped");
        }
    }
}

/// The delivery side of a message's output queue.
///
/// Encodes every write that leaves the queue into the wire buffer and keeps completions for
/// the message to run on its next turn.
#[derive(Debug, Default)]
pub(crate) struct WireSink {
    pub(crate) wire: BytesMut,
    pub(crate) events: Emitter,
    pub(crate) completed: Vec<Completion>,
}

impl DeliverySink for WireSink {
    fn deliver(&mut self, index: usize, write: &PendingWrite) {
        write.payload().encode_into(&mut self.wire);
        self.events.emit(OutgoingEvent::DataWritten { index, len: write.len() });
    }

    fn complete(&mut self, completion: Completion) {
        self.completed.push(completion);
    }
}
