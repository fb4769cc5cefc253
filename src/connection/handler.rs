use async_trait::async_trait;

use crate::error::Error;
use crate::message::{CloseFrame, Message};

use super::sender::Sender;

/// Application callbacks driven by [`Connection::run`](super::Connection::run).
///
/// Callbacks run on the reader task, one at a time and in arrival order.
/// Replies go through the provided [`Sender`]; a long-running reply should
/// use [`Sender::send_async`] or a spawned task so reading is not held up.
#[async_trait]
pub trait Handler: Send {
    /// The session is open.
    async fn on_open(&mut self, _sender: &Sender) {}

    /// A complete text or binary message arrived.
    async fn on_message(&mut self, sender: &Sender, message: Message);

    /// A pong arrived, solicited or not.
    async fn on_pong(&mut self, _payload: Vec<u8>) {}

    /// A local error ended the session. Called before
    /// [`on_close`](Self::on_close).
    async fn on_error(&mut self, _error: &Error) {}

    /// The session ended. `frame` holds the code reported for the session:
    /// the peer's code, or 1005, 1006 or a local error code.
    async fn on_close(&mut self, _frame: &CloseFrame) {}
}
