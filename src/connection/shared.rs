//! State shared by the reader, the writer task and every sender handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

use crate::error::Error;
use crate::events::{EventListener, SessionId};
use crate::message::{CloseCode, MessageKind};
use crate::protocol::Role;
use crate::stats::SessionStatistics;

use super::state::{AtomicState, ConnectionState};

pub(crate) struct Shared {
    pub(crate) session: SessionId,
    pub(crate) role: Role,
    pub(crate) state: AtomicState,
    pub(crate) stats: SessionStatistics,
    listener: Option<Arc<dyn EventListener>>,
    close_sent: AtomicBool,
    /// Wakes the reader when another task changed something it must act
    /// on: closing began or the writer hit a transport error.
    pub(crate) wake: Notify,
    write_failure: Mutex<Option<Error>>,
}

impl Shared {
    pub(crate) fn new(
        session: SessionId,
        role: Role,
        listener: Option<Arc<dyn EventListener>>,
    ) -> Self {
        Self {
            session,
            role,
            state: AtomicState::new(ConnectionState::Connecting),
            stats: SessionStatistics::default(),
            listener,
            close_sent: AtomicBool::new(false),
            wake: Notify::new(),
            write_failure: Mutex::new(None),
        }
    }

    pub(crate) fn close_sent(&self) -> bool {
        self.close_sent.load(Ordering::Acquire)
    }

    pub(crate) fn mark_close_sent(&self) {
        self.close_sent.store(true, Ordering::Release);
    }

    /// Enter `Closing` if still open and let the reader arm its close timer.
    pub(crate) fn begin_closing(&self) -> bool {
        let began = self.state.begin_closing();
        if began {
            self.wake.notify_one();
        }
        began
    }

    /// Error for an application send attempted in the current state.
    pub(crate) fn check_sendable(&self) -> Result<(), Error> {
        match self.state.load() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closing => Err(Error::ConnectionClosing),
            _ => Err(Error::ConnectionClosed),
        }
    }

    pub(crate) fn set_write_failure(&self, err: Error) {
        let mut slot = self
            .write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
        drop(slot);
        self.wake.notify_one();
    }

    pub(crate) fn take_write_failure(&self) -> Option<Error> {
        self.write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn record_sent(&self, kind: MessageKind, len: usize) {
        self.stats.sent.record(kind, len);
        trace!(session = %self.session, %kind, len, "message sent");
        if let Some(listener) = &self.listener {
            listener.on_message_sent(self.session, kind, len);
        }
    }

    pub(crate) fn record_received(&self, kind: MessageKind, len: usize) {
        self.stats.received.record(kind, len);
        trace!(session = %self.session, %kind, len, "message received");
        if let Some(listener) = &self.listener {
            listener.on_message_received(self.session, kind, len);
        }
    }

    /// Apply the end of the opening handshake: `Connecting` becomes `Open`.
    pub(crate) fn open(&self) {
        if self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Open)
        {
            self.notify_opened();
        }
    }

    fn notify_opened(&self) {
        if let Some(listener) = &self.listener {
            listener.on_session_opened(self.session);
        }
    }

    pub(crate) fn notify_closed(&self, code: CloseCode, error: Option<&Error>) {
        if let Some(listener) = &self.listener {
            if let Some(err) = error {
                listener.on_error(self.session, err);
            }
            listener.on_session_closed(self.session, code);
        }
    }
}
