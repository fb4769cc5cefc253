//! The client's HTTP upgrade request.

use crate::error::{Error, Result};
use crate::extensions::ExtensionOffer;

use super::headers::{HeaderMap, parse_head};

/// Parsed or constructed WebSocket upgrade request.
///
/// Parsing only checks HTTP framing. WebSocket-specific validation
/// (key, version, upgrade tokens) belongs to the negotiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    /// Target path without the query string.
    pub path: String,
    /// Query parameters in order of appearance, not percent-decoded.
    pub query: Vec<(String, String)>,
    /// HTTP version token, e.g. `HTTP/1.1`.
    pub version: String,
    pub headers: HeaderMap,
}

impl HandshakeRequest {
    /// A `GET` request for `target`, which may carry a query string.
    #[must_use]
    pub fn new(target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method: "GET".to_string(),
            path,
            query,
            version: "HTTP/1.1".to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Parse a complete request head (through the blank line).
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the request line or a header line
    /// is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (start, headers) = parse_head(data)?;
        let mut parts = start.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::handshake(format!("invalid request line {start:?}")));
        };
        if method.is_empty() || target.is_empty() || !version.starts_with("HTTP/") {
            return Err(Error::handshake(format!("invalid request line {start:?}")));
        }

        let (path, query) = split_target(target);
        Ok(Self {
            method: method.to_string(),
            path,
            query,
            version: version.to_string(),
            headers,
        })
    }

    /// Request target as sent on the wire, path plus query.
    #[must_use]
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }

    /// First value of query parameter `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.headers.get("Host")
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.headers.get("Origin")
    }

    /// The `Sec-WebSocket-Key` value, if exactly one was sent.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self.headers.get_all("Sec-WebSocket-Key") {
            [key] => Some(key.as_str()),
            _ => None,
        }
    }

    /// The `Sec-WebSocket-Version` value.
    #[must_use]
    pub fn ws_version(&self) -> Option<&str> {
        self.headers.get("Sec-WebSocket-Version")
    }

    /// Requested subprotocols in preference order.
    #[must_use]
    pub fn protocols(&self) -> Vec<String> {
        self.headers.tokens("Sec-WebSocket-Protocol")
    }

    /// Requested extensions in preference order.
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

    /// Serialize the request head.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if the target or a header would
    /// break the message framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let target = self.target();
        if target.contains(|c: char| c.is_whitespace() || c.is_control()) {
            return Err(Error::handshake(format!("invalid request target {target:?}")));
        }
        let mut out = format!("{} {} {}\r\n", self.method, target, self.version);
        self.headers.write_to(&mut out)?;
        out.push_str("\r\n");
        Ok(out.into_bytes())
    }
}

fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    let Some((path, query)) = target.split_once('?') else {
        return (target.to_string(), Vec::new());
    };
    let params = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect();
    (path.to_string(), params)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat?room=lobby&debug HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Protocol: chat, superchat\r\n\
        Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n\
        Sec-WebSocket-Extensions: x-custom\r\n\
        Origin: http://example.com\r\n\
        \r\n";

    #[test]
    fn test_parse_request() {
        let req = HandshakeRequest::parse(REQUEST).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.query_param("room"), Some("lobby"));
        assert_eq!(req.query_param("debug"), Some(""));
        assert_eq!(req.host(), Some("example.com"));
        assert_eq!(req.key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
        assert_eq!(req.ws_version(), Some("13"));
        assert_eq!(req.protocols(), ["chat", "superchat"]);
        assert_eq!(req.origin(), Some("http://example.com"));

        let exts = req.extensions().unwrap();
        assert_eq!(exts.len(), 2);
        assert_eq!(exts[0].name, "permessage-deflate");
        assert!(exts[0].has_param("client_max_window_bits"));
        assert_eq!(exts[1].name, "x-custom");
    }

    #[test]
    fn test_duplicate_key_is_not_usable() {
        let req = HandshakeRequest::parse(
            b"GET / HTTP/1.1\r\nSec-WebSocket-Key: a\r\nSec-WebSocket-Key: b\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.key(), None);
    }

    #[test]
    fn test_invalid_request_line() {
        assert!(HandshakeRequest::parse(b"GET /\r\n\r\n").is_err());
        assert!(HandshakeRequest::parse(b"GET / HTTP/1.1 extra\r\n\r\n").is_err());
        assert!(HandshakeRequest::parse(b"GET / FTP/1.0\r\n\r\n").is_err());
    }

    #[test]
    fn test_to_bytes_parses_back() {
        let mut req = HandshakeRequest::new("/feed?since=5");
        req.headers.insert("Host", "localhost");
        req.headers.insert("Sec-WebSocket-Key", "abc");
        let bytes = req.to_bytes().unwrap();
        assert!(bytes.starts_with(b"GET /feed?since=5 HTTP/1.1\r\n"));
        assert!(bytes.ends_with(b"\r\n\r\n"));

        let parsed = HandshakeRequest::parse(&bytes).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_to_bytes_rejects_bad_target() {
        let req = HandshakeRequest::new("/a b");
        assert!(req.to_bytes().is_err());
    }
}
