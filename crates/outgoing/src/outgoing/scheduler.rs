use crate::buffer::WriteCallback;
use crate::protocol::OutgoingError;
use std::collections::VecDeque;
use std::fmt;

/// Work a message postpones to the next turn.
pub(crate) enum Task {
    /// Run a write callback with an optional error
    Complete(WriteCallback, Option<OutgoingError>),
    /// Report a failed write to its callback, then as a message error unless destroyed
    FailWrite(Option<WriteCallback>, OutgoingError),
    /// Release the cork a write took on the output queue
    UncorkQueue,
    /// Signal the end of the message
    Finish,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Complete(_, err) => f.debug_tuple("Complete").field(err).finish(),
            Task::FailWrite(_, err) => f.debug_tuple("FailWrite").field(err).finish(),
            Task::UncorkQueue => f.write_str("UncorkQueue"),
            Task::Finish => f.write_str("Finish"),
        }
    }
}

/// FIFO of deferred tasks.
///
/// A turn runs the tasks queued before it started; tasks scheduled while a turn runs wait for
/// the next one.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    tasks: VecDeque<Task>,
}

impl Scheduler {
    pub(crate) fn schedule(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub(crate) fn take_turn(&mut self) -> VecDeque<Task> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }
}
