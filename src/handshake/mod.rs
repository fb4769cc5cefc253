//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The negotiation itself is transport-free: [`ServerNegotiator`] turns a
//! [`HandshakeRequest`] into a response plus the agreed subprotocol and
//! extensions, and [`ClientHandshake`] builds a request and verifies the
//! answer. With the `async-tokio` feature, [`accept`] and [`connect`] run
//! the exchange over a stream and return an open [`Connection`].
//!
//! [`Connection`]: crate::connection::Connection

mod headers;
mod negotiator;
mod request;
mod response;
mod trace;

#[cfg(feature = "async-tokio")]
mod io;

pub use headers::{HeaderMap, find_head_end};
pub use negotiator::{
    ClientHandshake, ClientNegotiated, Negotiated, Rejection, ServerNegotiator, WS_GUID,
    WS_VERSION, compute_accept_key, generate_key,
};
pub use request::HandshakeRequest;
pub use response::HandshakeResponse;
pub use trace::UpgradeTrace;

#[cfg(feature = "async-tokio")]
pub use io::{accept, connect};
