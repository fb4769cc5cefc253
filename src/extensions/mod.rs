//! Extension framework (RFC 6455 Section 9).
//!
//! Negotiation and transformation are separate concerns:
//!
//! - An [`ExtensionProvider`] takes part in the opening handshake. On the
//!   server it decides whether a client offer is agreeable
//!   ([`ExtensionProvider::offer`]); on the client it produces the request
//!   and checks the server's answer.
//! - Once agreed, the provider builds [`Extension`] instances that transform
//!   whole messages. A connection owns an [`ExtensionChain`] for each
//!   direction, applied in negotiation order on both paths.
//!
//! Extensions operate on complete messages, presented as a single frame
//! with fin set. Reserved bits set by `encode` travel on the first wire
//! frame of the message only.

#[cfg(feature = "compression")]
pub mod deflate;

use std::fmt;
use std::sync::Arc;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Frame, Role, RsvBits};

/// A single extension parameter: `name` or `name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    pub name: String,
    /// `None` for flag parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `param=value`, `param="value"` or `param`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.split_once('=') {
            Some((name, value)) => Self::new(name.trim(), value.trim().trim_matches('"')),
            None => Self::flag(s),
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// One element of a `Sec-WebSocket-Extensions` header.
///
/// Used for client offers, server responses and agreed configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, param: ExtensionParam) -> Self {
        self.params.push(param);
        self
    }

    /// Parse `extension-name; param1=value1; param2`.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the name is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(Error::handshake(format!("empty extension name in {s:?}")));
        }
        Ok(Self {
            name: name.to_string(),
            params: parts
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ExtensionParam::parse)
                .collect(),
        })
    }

    /// Parse a comma-separated header value, preserving order.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if any element is malformed.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        header
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Render a list of offers as a header value.
    #[must_use]
    pub fn header_value(offers: &[Self]) -> String {
        offers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in &self.params {
            write!(f, "; {param}")?;
        }
        Ok(())
    }
}

/// A negotiated message transformation bound to one connection direction.
///
/// Instances are owned by a single task; no synchronization is needed for
/// order-dependent state such as a compression context.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Reserved bits this extension may set on the first frame of a message.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Transform an outgoing data message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Extension` if the transformation fails.
    fn encode(&mut self, frame: &mut Frame) -> Result<()>;

    /// Reverse the transformation on an incoming data message and clear the
    /// reserved bits it consumed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Extension` if the payload cannot be decoded, or
    /// `Error::MessageTooLarge` if the decoded payload exceeds the limit.
    fn decode(&mut self, frame: &mut Frame) -> Result<()>;
}

/// Handshake-time capability for one extension.
///
/// Providers are shared, read-only configuration; they may be used by any
/// number of handshakes at once.
pub trait ExtensionProvider: Send + Sync {
    /// Registered extension token, e.g. `permessage-deflate`.
    fn name(&self) -> &str;

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Client side: the offer to send.
    fn request(&self) -> ExtensionOffer;

    /// Server side: the accepted configuration for a client offer, or `None`
    /// to decline it.
    fn offer(&self, requested: &ExtensionOffer) -> Option<ExtensionOffer>;

    /// Client side: check the server's accepted configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the response is not one the
    /// client can honor.
    fn accept_response(&self, response: &ExtensionOffer) -> Result<()>;

    /// Build the transformation for one direction of a connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Extension` if `agreed` cannot be instantiated.
    fn build(&self, role: Role, agreed: &ExtensionOffer, limits: &Limits)
    -> Result<Box<dyn Extension>>;
}

impl fmt::Debug for dyn ExtensionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtensionProvider({})", self.name())
    }
}

/// An extension both peers agreed on, with the parameters in force.
#[derive(Clone, Debug)]
pub struct AgreedExtension {
    pub provider: Arc<dyn ExtensionProvider>,
    pub params: ExtensionOffer,
}

impl AgreedExtension {
    #[must_use]
    pub fn new(provider: Arc<dyn ExtensionProvider>, params: ExtensionOffer) -> Self {
        Self { provider, params }
    }
}

/// Negotiated extensions for one connection direction, in negotiation order.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: Vec<Box<dyn Extension>>,
    rsv: RsvBits,
}

impl fmt::Debug for ExtensionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionChain")
            .field("extensions", &self.names())
            .field("rsv", &self.rsv)
            .finish()
    }
}

impl ExtensionChain {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Instantiate every agreed extension for `role`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Extension` if two extensions claim the same reserved
    /// bit or a provider fails to build.
    pub fn build(agreed: &[AgreedExtension], role: Role, limits: &Limits) -> Result<Self> {
        let mut chain = Self::default();
        for ext in agreed {
            let rsv = ext.provider.rsv_bits();
            if chain.rsv.conflicts_with(rsv) {
                return Err(Error::Extension(format!(
                    "'{}' claims reserved bits {rsv} already in use",
                    ext.provider.name()
                )));
            }
            chain.rsv = chain.rsv.union(rsv);
            chain
                .extensions
                .push(ext.provider.build(role, &ext.params, limits)?);
        }
        Ok(chain)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Union of the reserved bits claimed by the chain.
    #[must_use]
    pub fn rsv_bits(&self) -> RsvBits {
        self.rsv
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// Run every extension's `encode` on an outgoing data message.
    ///
    /// # Errors
    ///
    /// Propagates the first extension failure.
    pub fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() {
            return Ok(());
        }
        for ext in &mut self.extensions {
            ext.encode(frame)?;
        }
        Ok(())
    }

    /// Run every extension's `decode` on an incoming data message.
    ///
    /// # Errors
    ///
    /// Propagates the first extension failure, and reports reserved bits
    /// left set after every extension has run.
    pub fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() {
            return Ok(());
        }
        for ext in &mut self.extensions {
            ext.decode(frame)?;
        }
        if !frame.rsv.is_empty() {
            return Err(Error::protocol(format!(
                "reserved bits {} not consumed by any extension",
                frame.rsv
            )));
        }
        Ok(())
    }
}
