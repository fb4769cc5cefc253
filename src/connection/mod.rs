//! WebSocket connection management and state machine.
//!
//! A [`Connection`] owns the read side of an upgraded stream and runs the
//! protocol: it reassembles messages, answers pings, drives the closing
//! handshake and enforces the close, idle and keepalive timers. Outbound
//! traffic goes through [`Sender`] handles into a single writer task, which
//! keeps frames of different messages from interleaving.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - Initial state after successful handshake
//! 2. **Closing** - Close frame sent or received, handshake in progress
//! 3. **Closed** - Closing handshake finished or timed out
//! 4. **Failed** - The transport broke; no handshake took place

mod state;

pub use state::{AtomicState, ConnectionState};

#[cfg(feature = "async-tokio")]
#[allow(clippy::module_inception)]
mod connection;
#[cfg(feature = "async-tokio")]
mod handler;
#[cfg(feature = "async-tokio")]
mod sender;
#[cfg(feature = "async-tokio")]
mod shared;
#[cfg(feature = "async-tokio")]
mod writer;

#[cfg(feature = "async-tokio")]
pub use connection::{Connection, Negotiation};
#[cfg(feature = "async-tokio")]
pub use handler::Handler;
#[cfg(feature = "async-tokio")]
pub use sender::{SendHandle, Sender};
