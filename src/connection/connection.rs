use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::codec::{Decoded, FrameCodec};
use crate::config::{Config, Timeouts};
use crate::error::{Error, Result};
use crate::events::SessionId;
use crate::extensions::{AgreedExtension, ExtensionChain};
use crate::message::{CloseCode, CloseFrame, Message, MessageKind};
use crate::protocol::assembler::finalize;
use crate::protocol::{Assembled, Frame, MessageAssembler, OpCode, Role};
use crate::stats::SessionStatistics;

use super::handler::Handler;
use super::sender::{SendHandle, Sender};
use super::shared::Shared;
use super::state::ConnectionState;
use super::writer::Writer;

/// Outcome of an opening handshake, applied when a connection is created.
#[derive(Debug, Clone, Default)]
pub struct Negotiation {
    /// Selected subprotocol.
    pub protocol: Option<String>,
    /// Agreed extensions in the order they apply.
    pub extensions: Vec<AgreedExtension>,
    /// Bytes read past the handshake; they start the frame stream.
    pub buffered: Vec<u8>,
}

/// What the reader produced.
enum Event {
    Message(Message),
    Pong(Vec<u8>),
    Closed {
        frame: CloseFrame,
        error: Option<Error>,
    },
}

enum Step {
    Read(std::io::Result<usize>),
    Timer,
    Wake,
}

/// A WebSocket session over an async byte stream.
///
/// The connection owns the read half and is driven either by pulling with
/// [`recv`](Self::recv) or by handing it a [`Handler`] with
/// [`run`](Self::run). Writes go through a background task fed by
/// [`Sender`] handles, so sending never needs `&mut self` and may happen
/// from any task while the connection is reading.
///
/// Control frames are handled internally: pings are answered, pongs feed
/// the keepalive state, and close frames drive the closing handshake.
///
/// ## Example
///
/// ```rust,ignore
/// use wsline::{CloseCode, Config, Connection, Message, Role};
///
/// let mut conn = Connection::new(stream, Role::Client, Config::client());
/// conn.send(Message::text("Hello")).await?;
/// while let Some(msg) = conn.recv().await? {
///     if matches!(msg, Message::Close(_)) { break; }
///     println!("Received: {:?}", msg);
/// }
/// ```
pub struct Connection<S> {
    shared: Arc<Shared>,
    sender: Sender,
    reader: ReadHalf<S>,
    codec: FrameCodec,
    assembler: MessageAssembler,
    extensions: ExtensionChain,
    extension_names: Vec<String>,
    protocol: Option<String>,
    buf: BytesMut,
    read_buffer_size: usize,
    timeouts: Timeouts,
    writer: JoinHandle<()>,
    close_deadline: Option<Instant>,
    ping_due: Option<Instant>,
    last_activity: Instant,
    last_pong: Option<Instant>,
    /// Local error reported once the closing handshake it started ends.
    pending_error: Option<Error>,
    /// Framing was lost; input is dropped until EOF or the close timeout.
    discard: bool,
    outcome: Option<CloseFrame>,
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.shared.session)
            .field("role", &self.shared.role)
            .field("state", &self.shared.state.load())
            .field("protocol", &self.protocol)
            .field("extensions", &self.extension_names)
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a stream whose opening handshake already completed without
    /// extensions.
    ///
    /// Spawns the writer task, so this must be called within a Tokio runtime.
    pub fn new(io: S, role: Role, config: Config) -> Self {
        Self::assemble(
            io,
            role,
            &config,
            None,
            ExtensionChain::empty(),
            ExtensionChain::empty(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Wrap a stream and apply a handshake outcome.
    ///
    /// Spawns the writer task, so this must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Extension` if the agreed extensions cannot be
    /// instantiated together.
    pub fn with_negotiation(
        io: S,
        role: Role,
        config: Config,
        negotiation: Negotiation,
    ) -> Result<Self> {
        let inbound = ExtensionChain::build(&negotiation.extensions, role, &config.limits)?;
        let outbound = ExtensionChain::build(&negotiation.extensions, role, &config.limits)?;
        let names = negotiation
            .extensions
            .iter()
            .map(|e| e.params.name.clone())
            .collect();
        Ok(Self::assemble(
            io,
            role,
            &config,
            negotiation.protocol,
            inbound,
            outbound,
            names,
            negotiation.buffered,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        io: S,
        role: Role,
        config: &Config,
        protocol: Option<String>,
        inbound: ExtensionChain,
        outbound: ExtensionChain,
        extension_names: Vec<String>,
        buffered: Vec<u8>,
    ) -> Self {
        let session = SessionId::generate();
        let shared = Arc::new(Shared::new(session, role, config.listener.clone()));
        let (reader, write_half) = tokio::io::split(io);

        let mut codec = FrameCodec::new(role, config);
        codec.set_allowed_rsv(inbound.rsv_bits());

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Writer::new(
            write_half,
            Arc::clone(&shared),
            FrameCodec::new(role, config),
            outbound,
            config.fragment_size,
            rx,
        );
        let writer = tokio::spawn(writer.run());
        let sender = Sender::new(tx, Arc::clone(&shared), config.limits.clone());

        let now = Instant::now();
        let mut buf = BytesMut::with_capacity(config.read_buffer_size.max(buffered.len()));
        buf.extend_from_slice(&buffered);

        debug!(
            session = %session,
            %role,
            protocol = protocol.as_deref().unwrap_or("none"),
            extensions = ?extension_names,
            "session opened"
        );
        shared.open();

        Self {
            shared,
            sender,
            reader,
            codec,
            assembler: MessageAssembler::new(config.limits.clone()),
            extensions: inbound,
            extension_names,
            protocol,
            buf,
            read_buffer_size: config.read_buffer_size.max(1),
            timeouts: config.timeouts.clone(),
            writer,
            close_deadline: None,
            ping_due: config.timeouts.ping_interval.map(|interval| now + interval),
            last_activity: now,
            last_pong: None,
            pending_error: None,
            discard: false,
            outcome: None,
        }
    }
}

impl<S> Connection<S> {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.shared.session
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A handle for sending on this connection from any task.
    #[must_use]
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Negotiated subprotocol.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Names of the negotiated extensions in the order they apply.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extension_names
    }

    #[must_use]
    pub fn statistics(&self) -> &SessionStatistics {
        &self.shared.stats
    }

    /// When the last pong arrived.
    #[must_use]
    pub fn last_pong(&self) -> Option<std::time::Instant> {
        self.last_pong.map(Instant::into_std)
    }

    /// The code and reason reported for the session once it ended.
    #[must_use]
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        self.outcome.as_ref()
    }

    /// Queue `message`; see [`Sender::send_async`].
    pub fn send_async(&self, message: Message) -> SendHandle {
        self.sender.send_async(message)
    }

    /// Send `message` and wait until it has been written.
    ///
    /// # Errors
    ///
    /// See [`Sender::send`].
    pub async fn send(&self, message: Message) -> Result<()> {
        self.sender.send(message).await
    }

    /// Start the closing handshake. Keep calling [`recv`](Self::recv) (or
    /// let [`run`](Self::run) continue) to see it complete.
    ///
    /// # Errors
    ///
    /// See [`Sender::close`].
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.sender.close(code, reason).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Receive the next complete data message.
    ///
    /// Pings are answered and pongs recorded without surfacing here. When
    /// the session ends normally the reported close frame is returned once
    /// as `Message::Close`; after that `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session, after the closing
    /// handshake it triggered has finished.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        while let Some(event) = self.next_event().await {
            match event {
                Event::Message(message) => return Ok(Some(message)),
                Event::Pong(_) => {}
                Event::Closed {
                    error: Some(err), ..
                } => return Err(err),
                Event::Closed { frame, error: None } => {
                    return Ok(Some(Message::Close(Some(frame))));
                }
            }
        }
        Ok(None)
    }

    /// Drive the session to completion, delivering events to `handler`.
    ///
    /// Returns the close frame reported for the session.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session (after
    /// [`Handler::on_error`] and [`Handler::on_close`] ran), or
    /// `Error::ConnectionClosed` if the session had already ended.
    pub async fn run<H: Handler>(mut self, handler: &mut H) -> Result<CloseFrame> {
        if self.outcome.is_some() {
            return Err(Error::ConnectionClosed);
        }
        handler.on_open(&self.sender).await;
        while let Some(event) = self.next_event().await {
            match event {
                Event::Message(message) => handler.on_message(&self.sender, message).await,
                Event::Pong(payload) => handler.on_pong(payload).await,
                Event::Closed { frame, error } => {
                    if let Some(err) = &error {
                        handler.on_error(err).await;
                    }
                    handler.on_close(&frame).await;
                    return match error {
                        Some(err) => Err(err),
                        None => Ok(frame),
                    };
                }
            }
        }
        Err(Error::ConnectionClosed)
    }

    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if self.outcome.is_some() {
                return None;
            }
            if let Some(err) = self.shared.take_write_failure() {
                return Some(self.finish_failed(err));
            }
            self.arm_close_timer();

            if self.discard {
                self.buf.clear();
            } else {
                match self.codec.decode(&self.buf) {
                    Ok(Decoded::Frame { frame, consumed }) => {
                        self.buf.advance(consumed);
                        self.last_activity = Instant::now();
                        match self.on_frame(frame).await {
                            Ok(Some(event)) => return Some(event),
                            Ok(None) => {}
                            Err(err) => {
                                if let Some(event) = self.fail(err) {
                                    return Some(event);
                                }
                            }
                        }
                        continue;
                    }
                    Ok(Decoded::NeedMoreData) => {}
                    Err(err) => {
                        self.discard = true;
                        self.buf.clear();
                        if let Some(event) = self.fail(err) {
                            return Some(event);
                        }
                        continue;
                    }
                }
            }

            let deadline = self.next_deadline();
            self.buf.reserve(self.read_buffer_size);
            let step = tokio::select! {
                read = self.reader.read_buf(&mut self.buf) => Step::Read(read),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Step::Timer,
                () = self.shared.wake.notified() => Step::Wake,
            };
            match step {
                Step::Read(Ok(0)) => return Some(self.on_eof()),
                Step::Read(Ok(n)) => trace!(session = %self.shared.session, bytes = n, "read"),
                Step::Read(Err(err)) => return Some(self.finish_failed(err.into())),
                Step::Timer => {
                    if let Some(event) = self.on_timer() {
                        return Some(event);
                    }
                }
                Step::Wake => {}
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Option<Event>> {
        trace!(
            session = %self.shared.session,
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload.len(),
            "frame received"
        );
        match frame.opcode {
            OpCode::Ping => {
                self.shared
                    .record_received(MessageKind::Control, frame.payload.len());
                if self.pending_error.is_none() && self.state() == ConnectionState::Open {
                    drop(
                        self.sender
                            .enqueue_internal(Message::Pong(frame.into_payload())),
                    );
                }
                Ok(None)
            }
            OpCode::Pong => {
                self.shared
                    .record_received(MessageKind::Control, frame.payload.len());
                self.last_pong = Some(Instant::now());
                if self.pending_error.is_some() {
                    return Ok(None);
                }
                Ok(Some(Event::Pong(frame.into_payload())))
            }
            OpCode::Close => Ok(Some(self.on_close_frame(frame.into_payload()).await)),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if self.pending_error.is_some() {
                    return Ok(None);
                }
                let Assembled::Complete(assembled) = self.assembler.push(frame)? else {
                    return Ok(None);
                };
                let mut frame = assembled.into_frame();
                self.extensions.decode(&mut frame)?;
                let message = finalize(frame.opcode, frame.into_payload())?;
                self.shared.record_received(message.kind(), message.len());
                Ok(Some(Event::Message(message)))
            }
        }
    }

    async fn on_close_frame(&mut self, payload: Vec<u8>) -> Event {
        self.shared
            .record_received(MessageKind::Control, payload.len());

        if let Some(err) = self.pending_error.take() {
            // the peer's answer to the close our error triggered
            let code = err.close_code().unwrap_or(CloseCode::ProtocolError);
            return self.finish(ConnectionState::Closed, CloseFrame::new(code, ""), Some(err));
        }

        let (echo, reported, error) = match CloseFrame::parse(&payload) {
            Ok(Some(frame)) => (CloseFrame::new(frame.code, ""), frame, None),
            Ok(None) => (
                CloseFrame::new(CloseCode::Normal, ""),
                CloseFrame::new(CloseCode::NoStatusReceived, ""),
                None,
            ),
            Err(err) => {
                let code = err.close_code().unwrap_or(CloseCode::ProtocolError);
                warn!(session = %self.shared.session, error = %err, "malformed close frame");
                (
                    CloseFrame::new(code, err.to_string()),
                    CloseFrame::new(code, ""),
                    Some(err),
                )
            }
        };

        if self.shared.begin_closing() {
            debug!(
                session = %self.shared.session,
                code = reported.code.as_u16(),
                "peer started closing handshake"
            );
            let written = self.sender.enqueue_internal(Message::Close(Some(echo)));
            if tokio::time::timeout(self.timeouts.close, written).await.is_err() {
                warn!(session = %self.shared.session, "close reply not written in time");
            }
        }
        self.finish(ConnectionState::Closed, reported, error)
    }

    /// Begin closing after a local error. Returns an event only when the
    /// session ends immediately.
    fn fail(&mut self, err: Error) -> Option<Event> {
        let Some(code) = err.close_code() else {
            return Some(self.finish_failed(err));
        };
        self.assembler.reset();
        if self.pending_error.is_some() {
            return None;
        }
        warn!(
            session = %self.shared.session,
            error = %err,
            code = code.as_u16(),
            "closing session after local error"
        );
        if self.shared.begin_closing() {
            drop(
                self.sender
                    .enqueue_internal(Message::Close(Some(CloseFrame::new(code, err.to_string())))),
            );
        }
        self.pending_error = Some(err);
        None
    }

    fn on_eof(&mut self) -> Event {
        if let Some(err) = self.pending_error.take() {
            let code = err.close_code().unwrap_or(CloseCode::Abnormal);
            return self.finish(ConnectionState::Closed, CloseFrame::new(code, ""), Some(err));
        }
        if self.state() == ConnectionState::Closing {
            return self.finish(
                ConnectionState::Closed,
                CloseFrame::new(CloseCode::Abnormal, ""),
                None,
            );
        }
        self.finish_failed(Error::Transport(
            "peer closed the transport without a close frame".into(),
        ))
    }

    fn on_timer(&mut self) -> Option<Event> {
        let now = Instant::now();
        if self.close_deadline.is_some_and(|deadline| now >= deadline) {
            warn!(session = %self.shared.session, "closing handshake timed out");
            let error = self.pending_error.take();
            return Some(self.finish(
                ConnectionState::Closed,
                CloseFrame::new(CloseCode::Abnormal, ""),
                error,
            ));
        }
        if self.state() != ConnectionState::Open {
            return None;
        }
        if let Some(idle) = self.timeouts.idle {
            if now >= self.last_activity + idle {
                return self.fail(Error::Timeout("peer activity"));
            }
        }
        if let (Some(due), Some(interval)) = (self.ping_due, self.timeouts.ping_interval) {
            if now >= due {
                trace!(session = %self.shared.session, "keepalive ping");
                drop(self.sender.enqueue_internal(Message::Ping(Vec::new())));
                self.ping_due = Some(now + interval);
            }
        }
        None
    }

    fn arm_close_timer(&mut self) {
        if self.close_deadline.is_none() && self.state() == ConnectionState::Closing {
            self.close_deadline = Some(Instant::now() + self.timeouts.close);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut deadline = self.close_deadline;
        if self.state() == ConnectionState::Open {
            let idle = self.timeouts.idle.map(|idle| self.last_activity + idle);
            for candidate in [idle, self.ping_due].into_iter().flatten() {
                deadline = Some(deadline.map_or(candidate, |d| d.min(candidate)));
            }
        }
        deadline
    }

    fn finish_failed(&mut self, err: Error) -> Event {
        warn!(session = %self.shared.session, error = %err, "transport failed");
        self.finish(
            ConnectionState::Failed,
            CloseFrame::new(CloseCode::Abnormal, ""),
            Some(err),
        )
    }

    fn finish(
        &mut self,
        terminal: ConnectionState,
        frame: CloseFrame,
        error: Option<Error>,
    ) -> Event {
        let state = self.shared.state.finish(terminal);
        // the close frame is written or given up on; dropping the queue
        // resolves every pending send to `ConnectionClosed`
        self.writer.abort();
        self.assembler.reset();
        debug!(
            session = %self.shared.session,
            %state,
            code = frame.code.as_u16(),
            "session ended"
        );
        self.shared.notify_closed(frame.code, error.as_ref());
        self.outcome = Some(frame.clone());
        Event::Closed { frame, error }
    }
}
