use crate::outgoing::OutgoingMessage;
use crate::protocol::{MessageHead, SendError};
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Moves the bytes that left a message's output queue onto an async transport.
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer, buffer: BytesMut::new() }
    }

    pub fn with_capacity(writer: W, buffer_size: usize) -> Self {
        Self { writer, buffer: BytesMut::with_capacity(buffer_size) }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Collects the bytes `message` delivered so far without writing them yet.
    ///
    /// Fails with the message's error if it was destroyed with one.
    pub fn collect<H: MessageHead>(&mut self, message: &mut OutgoingMessage<H>) -> Result<usize, SendError> {
        if let Some(err) = message.errored() {
            return Err(err.clone().into());
        }

        let wire = message.take_wire();
        self.buffer.extend_from_slice(&wire);
        Ok(wire.len())
    }

    /// Runs the message's deferred work, then writes everything it delivered.
    pub async fn send<H: MessageHead>(&mut self, message: &mut OutgoingMessage<H>) -> Result<usize, SendError> {
        message.run_until_idle();
        let len = self.collect(message)?;
        self.flush().await?;
        trace!(len, "message bytes written");
        Ok(len)
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<(), SendError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.writer.write_all(self.buffer.as_ref()).await?;
        self.buffer.clear();
        Ok(self.writer.flush().await?)
    }
}
