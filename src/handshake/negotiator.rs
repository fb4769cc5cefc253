//! Opening-handshake negotiation for both roles.
//!
//! The server side validates an upgrade request and selects a subprotocol
//! and extensions; the client side builds the request and verifies the
//! answer. Neither touches a transport.

use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{Error, Result};
use crate::extensions::{AgreedExtension, ExtensionOffer, ExtensionProvider};
use crate::protocol::{MaskGenerator, RsvBits};

use super::request::HandshakeRequest;
use super::response::HandshakeResponse;
use super::trace::UpgradeTrace;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this engine speaks.
pub const WS_VERSION: &str = "13";

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsline::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh random 16-byte client key, base64-encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    if getrandom::getrandom(&mut nonce).is_err() {
        let mut masks = MaskGenerator::new();
        for chunk in nonce.chunks_mut(4) {
            chunk.copy_from_slice(&masks.next_mask());
        }
    }
    BASE64.encode(nonce)
}

fn is_valid_key(key: &str) -> bool {
    BASE64.decode(key).is_ok_and(|decoded| decoded.len() == 16)
}

/// Successful server-side negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// The `101 Switching Protocols` answer to send.
    pub response: HandshakeResponse,
    pub protocol: Option<String>,
    /// Accepted extensions in the order they apply.
    pub extensions: Vec<AgreedExtension>,
    pub trace: UpgradeTrace,
}

/// A refused upgrade: the HTTP error to send and why.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub response: HandshakeResponse,
    pub error: Error,
    pub trace: UpgradeTrace,
}

impl Rejection {
    fn new(status: u16, reason: &str, detail: String, mut trace: UpgradeTrace) -> Self {
        trace.record(format!("rejected with {status}: {detail}"));
        Self {
            response: HandshakeResponse::error(status, reason),
            error: Error::HandshakeFailure(detail),
            trace,
        }
    }

    fn bad_request(detail: impl Into<String>, trace: UpgradeTrace) -> Self {
        Self::new(400, "Bad Request", detail.into(), trace)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.response.status)
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        rejection.error
    }
}

/// Server-side negotiation policy.
///
/// Shared read-only across connections; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ServerNegotiator {
    protocols: Vec<String>,
    require_protocol: bool,
    providers: Vec<Arc<dyn ExtensionProvider>>,
    allowed_origins: Vec<String>,
}

impl ServerNegotiator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subprotocols the application supports.
    #[must_use]
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Refuse upgrades that agree on no subprotocol.
    #[must_use]
    pub fn require_protocol(mut self, required: bool) -> Self {
        self.require_protocol = required;
        self
    }

    /// Add an extension provider. Providers are consulted in insertion order.
    #[must_use]
    pub fn with_extension(mut self, provider: Arc<dyn ExtensionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Restrict the accepted `Origin` values. An empty list accepts any.
    #[must_use]
    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins.extend(origins.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Validate `req` and choose what the session will use.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] carrying `400 Bad Request` for a malformed
    /// upgrade, `426 Upgrade Required` for an unsupported version and
    /// `403 Forbidden` for a disallowed origin.
    pub fn negotiate(&self, req: &HandshakeRequest) -> std::result::Result<Negotiated, Rejection> {
        let mut trace = UpgradeTrace::new();

        if !req.method.eq_ignore_ascii_case("GET") {
            return Err(Rejection::bad_request(
                format!("method {} is not GET", req.method),
                trace,
            ));
        }
        if req.version != "HTTP/1.1" {
            return Err(Rejection::bad_request(
                format!("unsupported HTTP version {}", req.version),
                trace,
            ));
        }
        if !req.headers.has_token("Upgrade", "websocket") {
            return Err(Rejection::bad_request("missing Upgrade: websocket", trace));
        }
        if !req.headers.has_token("Connection", "upgrade") {
            return Err(Rejection::bad_request("missing Connection: Upgrade", trace));
        }
        if req.host().is_none_or(str::is_empty) {
            return Err(Rejection::bad_request("missing Host header", trace));
        }
        if req.ws_version() != Some(WS_VERSION) {
            let mut rejection = Rejection::new(
                426,
                "Upgrade Required",
                format!(
                    "unsupported Sec-WebSocket-Version {}",
                    req.ws_version().unwrap_or("(none)")
                ),
                trace,
            );
            rejection
                .response
                .headers
                .insert("Sec-WebSocket-Version", WS_VERSION);
            return Err(rejection);
        }
        let Some(key) = req.key() else {
            return Err(Rejection::bad_request(
                "expected exactly one Sec-WebSocket-Key header",
                trace,
            ));
        };
        if !is_valid_key(key) {
            return Err(Rejection::bad_request(
                "Sec-WebSocket-Key is not a base64 16-byte nonce",
                trace,
            ));
        }
        if !self.origin_allowed(req.origin()) {
            let detail = format!("origin {} not allowed", req.origin().unwrap_or("(none)"));
            return Err(Rejection::new(403, "Forbidden", detail, trace));
        }

        let protocol = self.select_protocol(&req.protocols());
        match &protocol {
            Some(p) => trace.record(format!("subprotocol: {p}")),
            None if self.require_protocol => {
                return Err(Rejection::bad_request("no compatible subprotocol", trace));
            }
            None => trace.record("subprotocol: none"),
        }

        let offers = match req.extensions() {
            Ok(offers) => offers,
            Err(err) => return Err(Rejection::bad_request(err.to_string(), trace)),
        };
        let extensions = self.select_extensions(&offers, &mut trace);

        let mut response = HandshakeResponse::switching_protocols(&compute_accept_key(key));
        if let Some(p) = &protocol {
            response.headers.insert("Sec-WebSocket-Protocol", p.as_str());
        }
        if !extensions.is_empty() {
            let accepted: Vec<ExtensionOffer> =
                extensions.iter().map(|e| e.params.clone()).collect();
            response
                .headers
                .insert("Sec-WebSocket-Extensions", ExtensionOffer::header_value(&accepted));
        }

        Ok(Negotiated {
            response,
            protocol,
            extensions,
            trace,
        })
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|o| self.allowed_origins.iter().any(|a| a == o))
    }

    /// First client-requested value the server supports.
    fn select_protocol(&self, requested: &[String]) -> Option<String> {
        requested
            .iter()
            .find(|r| self.protocols.iter().any(|p| p == *r))
            .cloned()
    }

    /// Walk the client's offers in order. Each offer goes to the first
    /// provider that agrees to it; later offers of an already accepted
    /// extension are alternatives and are skipped.
    fn select_extensions(
        &self,
        offers: &[ExtensionOffer],
        trace: &mut UpgradeTrace,
    ) -> Vec<AgreedExtension> {
        let mut agreed: Vec<AgreedExtension> = Vec::new();
        let mut claimed = RsvBits::NONE;
        for offer in offers {
            if agreed.iter().any(|a| a.params.name == offer.name) {
                continue;
            }
            let accepted = self
                .providers
                .iter()
                .filter(|p| p.name() == offer.name)
                .filter(|p| !claimed.conflicts_with(p.rsv_bits()))
                .find_map(|p| p.offer(offer).map(|params| (Arc::clone(p), params)));
            match accepted {
                Some((provider, params)) => {
                    trace.record(format!("extension accepted: {params}"));
                    claimed = claimed.union(provider.rsv_bits());
                    agreed.push(AgreedExtension::new(provider, params));
                }
                None => trace.record(format!("extension declined: {offer}")),
            }
        }
        agreed
    }
}

/// What the client and server agreed on, from the client's side.
#[derive(Debug, Clone)]
pub struct ClientNegotiated {
    pub protocol: Option<String>,
    pub extensions: Vec<AgreedExtension>,
}

/// Client side of the opening handshake.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    host: String,
    path: String,
    key: String,
    protocols: Vec<String>,
    providers: Vec<Arc<dyn ExtensionProvider>>,
    origin: Option<String>,
    headers: Vec<(String, String)>,
}

impl ClientHandshake {
    /// A handshake for `path` on `host`, with a freshly generated key.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            key: generate_key(),
            protocols: Vec::new(),
            providers: Vec::new(),
            origin: None,
            headers: Vec::new(),
        }
    }

    /// Subprotocols to request, most preferred first.
    #[must_use]
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_extension(mut self, provider: Arc<dyn ExtensionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Extra header sent with the request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The upgrade request to send.
    #[must_use]
    pub fn request(&self) -> HandshakeRequest {
        let mut req = HandshakeRequest::new(&self.path);
        req.headers.insert("Host", self.host.as_str());
        req.headers.insert("Upgrade", "websocket");
        req.headers.insert("Connection", "Upgrade");
        req.headers.insert("Sec-WebSocket-Key", self.key.as_str());
        req.headers.insert("Sec-WebSocket-Version", WS_VERSION);
        if !self.protocols.is_empty() {
            req.headers
                .insert("Sec-WebSocket-Protocol", self.protocols.join(", "));
        }
        if !self.providers.is_empty() {
            let offers: Vec<ExtensionOffer> = self.providers.iter().map(|p| p.request()).collect();
            req.headers
                .insert("Sec-WebSocket-Extensions", ExtensionOffer::header_value(&offers));
        }
        if let Some(origin) = &self.origin {
            req.headers.insert("Origin", origin.as_str());
        }
        for (name, value) in &self.headers {
            req.headers.append(name.as_str(), value.as_str());
        }
        req
    }

    /// Check the server's answer against what was requested.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the status is not 101, the
    /// upgrade headers or the accept value are wrong, or the server chose a
    /// subprotocol or extension the client never offered.
    pub fn verify(&self, resp: &HandshakeResponse) -> Result<ClientNegotiated> {
        if !resp.is_switching_protocols() {
            return Err(Error::handshake(format!(
                "server answered {} {}",
                resp.status, resp.reason
            )));
        }
        if !resp.headers.has_token("Upgrade", "websocket") {
            return Err(Error::handshake("response lacks Upgrade: websocket"));
        }
        if !resp.headers.has_token("Connection", "upgrade") {
            return Err(Error::handshake("response lacks Connection: Upgrade"));
        }
        let expected = compute_accept_key(&self.key);
        if resp.accept() != Some(expected.as_str()) {
            return Err(Error::handshake("Sec-WebSocket-Accept mismatch"));
        }

        let protocol = match resp.headers.get_all("Sec-WebSocket-Protocol") {
            [] => None,
            [p] if self.protocols.iter().any(|r| r == p) => Some(p.clone()),
            [p] => {
                return Err(Error::handshake(format!(
                    "server selected unrequested subprotocol {p}"
                )));
            }
            _ => return Err(Error::handshake("server selected several subprotocols")),
        };

        let mut extensions: Vec<AgreedExtension> = Vec::new();
        let mut claimed = RsvBits::NONE;
        for accepted in resp.extensions()? {
            if extensions.iter().any(|e| e.params.name == accepted.name) {
                return Err(Error::handshake(format!(
                    "extension {} accepted twice",
                    accepted.name
                )));
            }
            let provider = self
                .providers
                .iter()
                .find(|p| p.name() == accepted.name)
                .ok_or_else(|| {
                    Error::handshake(format!("server accepted unoffered extension {}", accepted.name))
                })?;
            provider.accept_response(&accepted)?;
            if claimed.conflicts_with(provider.rsv_bits()) {
                return Err(Error::handshake(format!(
                    "extension {} reuses reserved bits",
                    accepted.name
                )));
            }
            claimed = claimed.union(provider.rsv_bits());
            extensions.push(AgreedExtension::new(Arc::clone(provider), accepted));
        }

        debug!(
            protocol = protocol.as_deref().unwrap_or("none"),
            extensions = extensions.len(),
            "client handshake verified"
        );
        Ok(ClientNegotiated {
            protocol,
            extensions,
        })
    }
}
