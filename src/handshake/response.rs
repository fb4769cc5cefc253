//! The server's HTTP answer to an upgrade request.

use crate::error::{Error, Result};
use crate::extensions::ExtensionOffer;

use super::headers::{HeaderMap, parse_head};

/// Parsed or constructed upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

impl HandshakeResponse {
    /// `101 Switching Protocols` carrying the computed accept value.
    #[must_use]
    pub fn switching_protocols(accept: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Upgrade", "websocket");
        headers.insert("Connection", "Upgrade");
        headers.insert("Sec-WebSocket-Accept", accept);
        Self {
            status: 101,
            reason: "Switching Protocols".to_string(),
            headers,
        }
    }

    /// An error response that ends the upgrade attempt.
    #[must_use]
    pub fn error(status: u16, reason: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Connection", "close");
        headers.insert("Content-Length", "0");
        Self {
            status,
            reason: reason.to_string(),
            headers,
        }
    }

    #[must_use]
    pub fn is_switching_protocols(&self) -> bool {
        self.status == 101
    }

    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the status line or a header line
    /// is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (start, headers) = parse_head(data)?;
        let mut parts = start.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status = parts.next().and_then(|s| s.parse::<u16>().ok());
        let reason = parts.next().unwrap_or_default();
        match status {
            Some(status) if version.starts_with("HTTP/") && (100..=599).contains(&status) => {
                Ok(Self {
                    status,
                    reason: reason.to_string(),
                    headers,
                })
            }
            _ => Err(Error::handshake(format!("invalid status line {start:?}"))),
        }
    }

    #[must_use]
    pub fn accept(&self) -> Option<&str> {
        self.headers.get("Sec-WebSocket-Accept")
    }

    /// Selected subprotocol, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.headers.get("Sec-WebSocket-Protocol")
    }

    /// Selected extensions in the order the server applied them.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if a header value is malformed.
    pub fn extensions(&self) -> Result<Vec<ExtensionOffer>> {
        let mut offers = Vec::new();
        for value in self.headers.get_all("Sec-WebSocket-Extensions") {
            offers.extend(ExtensionOffer::parse_header(value)?);
        }
        Ok(offers)
    }

    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the reason or a header would
    /// break the message framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.reason.contains(['\r', '\n']) {
            return Err(Error::handshake("reason phrase contains CR or LF"));
        }
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        self.headers.write_to(&mut out)?;
        out.push_str("\r\n");
        Ok(out.into_bytes())
    }
}
