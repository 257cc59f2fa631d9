//! The buffered output queue.
//!
//! Decouples "logically written" from "physically flushed": writes are queued in order,
//! flushed when the queue is not corked, observed by a [`DeliverySink`] as they leave, and
//! counted until the transport reports it consumed them.

mod output_queue;

pub use output_queue::Completion;
pub use output_queue::DEFAULT_HIGH_WATER_MARK;
pub use output_queue::DeliverySink;
pub use output_queue::OutputQueue;
pub use output_queue::PendingWrite;
pub use output_queue::WriteCallback;
