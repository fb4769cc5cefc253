//! # wsline - WebSocket protocol engine
//!
//! `wsline` implements the core of RFC 6455: the frame codec, message
//! reassembly and fragmentation, opening-handshake negotiation, and the
//! connection state machine that runs the closing handshake and serializes
//! concurrent writes.
//!
//! ## Features
//!
//! - **Incremental frame decoding** that validates headers before buffering payloads
//! - **Runtime-agnostic core**: codec, reassembler and negotiator need no async runtime
//! - **Pluggable extensions** applied in negotiation order, with permessage-deflate
//!   behind the `compression` feature
//! - **Tokio connection layer** (`async-tokio`, default) with a pull API, callback
//!   handlers and cancellable sends
//! - **Per-session statistics and event hooks** without global state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsline::handshake::{ClientHandshake, connect};
//! use wsline::{Config, Message};
//!
//! let stream = tokio::net::TcpStream::connect("example.com:80").await?;
//! let client = ClientHandshake::new("example.com", "/chat").with_protocols(["chat"]);
//! let mut conn = connect(stream, &client, Config::client()).await?;
//! conn.send(Message::text("Hello")).await?;
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod extensions;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod stats;

pub use codec::{Decoded, FrameCodec};
pub use config::{Config, Limits, Timeouts};
pub use connection::ConnectionState;
#[cfg(feature = "async-tokio")]
pub use connection::{Connection, Handler, Negotiation, SendHandle, Sender};
pub use error::{Error, Result};
pub use events::{EventListener, SessionId};
pub use handshake::{
    ClientHandshake, HandshakeRequest, HandshakeResponse, ServerNegotiator, WS_GUID,
    compute_accept_key,
};
pub use message::{CloseCode, CloseFrame, Message, MessageKind};
pub use protocol::{Frame, OpCode, Role};
pub use stats::SessionStatistics;
