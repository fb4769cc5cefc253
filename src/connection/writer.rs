//! The write queue.
//!
//! One task owns the write half of the transport and drains an unbounded
//! queue in order, so at most one transport write is in flight and frames
//! of different messages never interleave. Extension encoding also happens
//! here because compression contexts depend on message order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::codec::FrameCodec;
use crate::error::{Error, Result};
use crate::extensions::ExtensionChain;
use crate::message::Message;
use crate::protocol::{Frame, MessageFragmenter};

use super::shared::Shared;

/// One queued message.
pub(crate) struct WriteRequest {
    pub(crate) message: Message,
    /// Completion signal; `None` for frames the engine sends on its own.
    pub(crate) done: Option<oneshot::Sender<Result<()>>>,
    pub(crate) cancel: Arc<AtomicBool>,
}

impl WriteRequest {
    /// A frame sent by the engine itself (pong replies, close echo, pings).
    pub(crate) fn internal(message: Message) -> Self {
        Self {
            message,
            done: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn complete(self, result: Result<()>) {
        complete(self.done, result);
    }
}

fn complete(done: Option<oneshot::Sender<Result<()>>>, result: Result<()>) {
    if let Some(done) = done {
        // the caller may have stopped waiting
        let _ = done.send(result);
    }
}

pub(crate) type WriteQueue = mpsc::UnboundedSender<WriteRequest>;

pub(crate) struct Writer<W> {
    io: W,
    shared: Arc<Shared>,
    codec: FrameCodec,
    extensions: ExtensionChain,
    fragment_size: usize,
    buf: Vec<u8>,
    rx: mpsc::UnboundedReceiver<WriteRequest>,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub(crate) fn new(
        io: W,
        shared: Arc<Shared>,
        codec: FrameCodec,
        extensions: ExtensionChain,
        fragment_size: usize,
        rx: mpsc::UnboundedReceiver<WriteRequest>,
    ) -> Self {
        Self {
            io,
            shared,
            codec,
            extensions,
            fragment_size: fragment_size.max(1),
            buf: Vec::new(),
            rx,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            if request.cancel.load(Ordering::Acquire) {
                request.complete(Err(Error::Cancelled));
                continue;
            }
            if self.shared.close_sent() {
                request.complete(Err(Error::ConnectionClosed));
                continue;
            }

            let WriteRequest { message, done, .. } = request;
            let is_close = matches!(message, Message::Close(_));
            match self.write_message(message).await {
                Ok(()) if is_close => {
                    self.shared.mark_close_sent();
                    if let Err(err) = self.io.shutdown().await {
                        trace!(session = %self.shared.session, error = %err, "shutdown after close failed");
                    }
                    complete(done, Ok(()));
                    break;
                }
                Ok(()) => complete(done, Ok(())),
                Err(err @ Error::Transport(_)) => {
                    warn!(session = %self.shared.session, error = %err, "transport write failed");
                    self.shared.set_write_failure(err.clone());
                    complete(done, Err(err));
                    break;
                }
                Err(err) => {
                    debug!(session = %self.shared.session, error = %err, "message rejected by writer");
                    complete(done, Err(err));
                    continue;
                }
            }
        }
        // nothing more will be written; fail whatever is still queued
        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            request.complete(Err(Error::ConnectionClosed));
        }
    }

    async fn write_message(&mut self, message: Message) -> Result<()> {
        let kind = message.kind();
        let len = message.len();
        let mut frame = message_frame(message);
        self.extensions.encode(&mut frame)?;

        self.buf.clear();
        for fragment in MessageFragmenter::new(frame, self.fragment_size) {
            self.codec.encode(&fragment, &mut self.buf)?;
        }
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        self.shared.record_sent(kind, len);
        Ok(())
    }
}

fn message_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::text(text),
        Message::Binary(data) => Frame::binary(data),
        Message::Ping(data) => Frame::ping(data),
        Message::Pong(data) => Frame::pong(data),
        Message::Close(close) => Frame::close(close.as_ref()),
    }
}
