//! HTTP header mapping and message-head parsing for the upgrade exchange.

use crate::error::{Error, Result};

/// Ordered header map with case-insensitive names.
///
/// Each name appears once; repeated fields accumulate their values in
/// arrival order. The spelling of the first occurrence is kept for output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Replace all values of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Add a value to `name`, keeping existing values.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values of `name`, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map_or(&[][..], |i| self.entries[i].1.as_slice())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Comma-separated list elements across every value of `name`.
    #[must_use]
    pub fn tokens(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether `name` lists `token`, compared case-insensitively.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(n, vs)| vs.iter().map(move |v| (n.as_str(), v.as_str())))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize as `Name: value\r\n` lines.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailure` if a name or value would break the
    /// message framing.
    pub fn write_to(&self, dst: &mut String) -> Result<()> {
        for (name, value) in self.iter() {
            if name.is_empty() || name.contains(|c: char| c == ':' || c.is_whitespace()) {
                return Err(Error::handshake(format!("invalid header name {name:?}")));
            }
            if value.contains(['\r', '\n']) {
                return Err(Error::handshake(format!(
                    "header {name} contains CR or LF"
                )));
            }
            dst.push_str(name);
            dst.push_str(": ");
            dst.push_str(value);
            dst.push_str("\r\n");
        }
        Ok(())
    }
}

/// Index just past the `\r\n\r\n` that ends a message head, if present.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Split a message head into its start line and headers.
///
/// # Errors
///
/// Returns `Error::HandshakeFailure` for non-UTF-8 input, a missing start
/// line, or a header line without a colon.
pub(crate) fn parse_head(data: &[u8]) -> Result<(String, HeaderMap)> {
    let text =
        std::str::from_utf8(data).map_err(|_| Error::handshake("message head is not UTF-8"))?;
    let mut lines = text.split("\r\n");
    let start = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::handshake("empty message head"))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::handshake(format!("malformed header line {line:?}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::handshake("header with empty name"));
        }
        headers.append(name, value.trim());
    }
    Ok((start.to_string(), headers))
}
