//! Debug context collected while negotiating an upgrade.
//!
//! Decisions are buffered because the session id does not exist until the
//! upgrade succeeds. Once it does, the buffer is flushed under that id;
//! a failed upgrade is flushed under a generated context id instead.

use tracing::debug;

use crate::events::SessionId;

/// Ordered record of negotiation decisions for one upgrade attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeTrace {
    entries: Vec<String>,
}

impl UpgradeTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emit every entry under the session that the upgrade produced.
    pub fn flush(&self, session: SessionId) {
        for entry in &self.entries {
            debug!(session = %session, "upgrade: {entry}");
        }
    }

    /// Emit every entry for an upgrade that never produced a session.
    /// Returns the generated context id the entries were logged under.
    pub fn flush_failed(&self) -> SessionId {
        let context = SessionId::generate();
        for entry in &self.entries {
            debug!(context = %context, "failed upgrade: {entry}");
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_order() {
        let mut trace = UpgradeTrace::new();
        assert!(trace.is_empty());
        trace.record("subprotocol: chat");
        trace.record("extension declined: x-foo");
        assert_eq!(trace.entries(), ["subprotocol: chat", "extension declined: x-foo"]);
        trace.flush(SessionId::from_u64(7));
    }

    #[test]
    fn test_flush_failed_generates_context() {
        let mut trace = UpgradeTrace::new();
        trace.record("rejected: missing key");
        let a = trace.flush_failed();
        let b = trace.flush_failed();
        assert_ne!(a, b);
    }
}
