//! Cloneable send handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::debug;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::events::SessionId;
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::MAX_CONTROL_FRAME_PAYLOAD;

use super::shared::Shared;
use super::state::ConnectionState;
use super::writer::{WriteQueue, WriteRequest};

/// Sends messages on a connection.
///
/// Any number of clones may send concurrently from any task or thread;
/// messages are written whole and in the order they were queued.
/// Backpressure comes from awaiting each send; see
/// [`send_async`](Self::send_async).
#[derive(Clone)]
pub struct Sender {
    queue: WriteQueue,
    shared: Arc<Shared>,
    limits: Limits,
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("session", &self.shared.session)
            .field("state", &self.shared.state.load())
            .finish()
    }
}

impl Sender {
    pub(crate) fn new(queue: WriteQueue, shared: Arc<Shared>, limits: Limits) -> Self {
        Self {
            queue,
            shared,
            limits,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.shared.session
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Queue `message` and return a handle that resolves once it has been
    /// written to the transport.
    ///
    /// Never blocks. Errors detected at queue time (wrong state, oversized
    /// message, invalid close code) resolve the handle immediately.
    ///
    /// The queue is unbounded: nothing here slows a producer down when the
    /// peer stops reading. Callers that produce faster than the transport
    /// drains should await the returned handles (or use [`send`](Self::send))
    /// to bound how much is in flight. Whatever is still queued when the
    /// session ends resolves to `Error::ConnectionClosed`.
    pub fn send_async(&self, message: Message) -> SendHandle {
        match self.prepare(&message) {
            Ok(()) => self.enqueue(message),
            Err(err) => SendHandle::failed(err),
        }
    }

    /// Send `message` and wait until it has been written.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosing` once the closing handshake has begun
    /// - `Error::ConnectionClosed` after the session ended
    /// - `Error::MessageTooLarge` above the configured message size
    /// - `Error::Transport` if the write failed
    pub async fn send(&self, message: Message) -> Result<()> {
        self.send_async(message).await
    }

    /// Blocking variant of [`send`](Self::send) for threads outside the
    /// async runtime.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_blocking(&self, message: Message) -> Result<()> {
        self.send_async(message).wait()
    }

    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into())).await
    }

    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into())).await
    }

    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` for a payload above 125 bytes,
    /// otherwise the same as [`send`](Self::send).
    pub async fn send_ping(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Ping(data.into())).await
    }

    /// Send an unsolicited pong, usable as a unidirectional heartbeat.
    ///
    /// # Errors
    ///
    /// Same as [`send_ping`](Self::send_ping).
    pub async fn send_pong(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Pong(data.into())).await
    }

    /// Start the closing handshake. Resolves once the close frame has been
    /// written; the connection completes the handshake when the peer
    /// answers or the close timeout expires.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for a code that may not be sent
    /// - `Error::ConnectionClosing` if closing already began
    /// - `Error::ConnectionClosed` after the session ended
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.send(Message::Close(Some(CloseFrame::new(code, reason))))
            .await
    }

    fn prepare(&self, message: &Message) -> Result<()> {
        match message {
            Message::Text(_) | Message::Binary(_) => {
                self.shared.check_sendable()?;
                self.limits.check_message_size(message.len())?;
            }
            Message::Ping(data) | Message::Pong(data) => {
                self.shared.check_sendable()?;
                if data.len() > MAX_CONTROL_FRAME_PAYLOAD {
                    return Err(Error::protocol(format!(
                        "control frame payload of {} bytes exceeds {MAX_CONTROL_FRAME_PAYLOAD}",
                        data.len()
                    )));
                }
            }
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    if !frame.code.is_valid() {
                        return Err(Error::InvalidCloseCode(frame.code.as_u16()));
                    }
                }
                self.shared.check_sendable()?;
                if !self.shared.begin_closing() {
                    // lost a race with another closer
                    return self.shared.check_sendable();
                }
                debug!(
                    session = %self.shared.session,
                    code = frame.as_ref().map_or(1005, |f| f.code.as_u16()),
                    "closing handshake started locally"
                );
            }
        }
        Ok(())
    }

    fn enqueue(&self, message: Message) -> SendHandle {
        let (done, rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let request = WriteRequest {
            message,
            done: Some(done),
            cancel: Arc::clone(&cancel),
        };
        if self.queue.send(request).is_err() {
            return SendHandle::failed(Error::ConnectionClosed);
        }
        SendHandle { rx, cancel }
    }

    /// Queue a frame the engine sends on its own behalf, bypassing the
    /// state checks applied to application sends.
    pub(crate) fn enqueue_internal(&self, message: Message) -> oneshot::Receiver<Result<()>> {
        let (done, rx) = oneshot::channel();
        let mut request = WriteRequest::internal(message);
        request.done = Some(done);
        // a closed queue drops the request, which the receiver observes
        let _ = self.queue.send(request);
        rx
    }
}

/// Completion of one queued send.
///
/// Resolves to `Ok(())` once the message has been written, or to the error
/// that prevented it. Dropping the handle does not withdraw the message;
/// call [`cancel`](Self::cancel) for that.
#[derive(Debug)]
#[must_use = "a send handle does nothing unless awaited or cancelled"]
pub struct SendHandle {
    rx: oneshot::Receiver<Result<()>>,
    cancel: Arc<AtomicBool>,
}

impl SendHandle {
    fn failed(err: Error) -> Self {
        let (done, rx) = oneshot::channel();
        let _ = done.send(Err(err));
        Self {
            rx,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Withdraw the message if the writer has not picked it up yet. The
    /// handle then resolves to `Error::Cancelled`; a message already being
    /// written is unaffected.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn wait(self) -> Result<()> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(Error::ConnectionClosed))
    }
}

impl Future for SendHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::ConnectionClosed)))
    }
}
