//! Per-connection message statistics.
//!
//! Counters are plain atomics: the reader and writer tasks update them
//! concurrently and any thread may take a snapshot at any time.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::MessageKind;

/// Count, total, minimum and maximum size of a stream of messages.
#[derive(Debug)]
pub struct MessageStatistics {
    count: AtomicU64,
    total: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for MessageStatistics {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of a [`MessageStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageSnapshot {
    pub count: u64,
    pub total_bytes: u64,
    /// Zero when no message has been recorded.
    pub min_size: u64,
    pub max_size: u64,
}

impl MessageSnapshot {
    #[must_use]
    pub fn average_size(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_bytes / self.count
        }
    }

    fn merge(self, other: Self) -> Self {
        let min_size = match (self.count, other.count) {
            (0, _) => other.min_size,
            (_, 0) => self.min_size,
            _ => self.min_size.min(other.min_size),
        };
        Self {
            count: self.count + other.count,
            total_bytes: self.total_bytes + other.total_bytes,
            min_size,
            max_size: self.max_size.max(other.max_size),
        }
    }
}

impl MessageStatistics {
    pub fn record(&self, size: usize) {
        let size = size as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(size, Ordering::Relaxed);
        self.min.fetch_min(size, Ordering::Relaxed);
        self.max.fetch_max(size, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MessageSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);
        MessageSnapshot {
            count,
            total_bytes: self.total.load(Ordering::Relaxed),
            min_size: if count == 0 || min == u64::MAX { 0 } else { min },
            max_size: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for one direction, split by message kind.
#[derive(Debug, Default)]
pub struct DirectionStatistics {
    pub text: MessageStatistics,
    pub binary: MessageStatistics,
    pub control: MessageStatistics,
}

impl DirectionStatistics {
    pub fn record(&self, kind: MessageKind, size: usize) {
        match kind {
            MessageKind::Text => self.text.record(size),
            MessageKind::Binary => self.binary.record(size),
            MessageKind::Control => self.control.record(size),
        }
    }

    /// All kinds combined.
    #[must_use]
    pub fn total(&self) -> MessageSnapshot {
        self.text
            .snapshot()
            .merge(self.binary.snapshot())
            .merge(self.control.snapshot())
    }
}

/// Sent and received statistics of one session.
#[derive(Debug, Default)]
pub struct SessionStatistics {
    pub sent: DirectionStatistics,
    pub received: DirectionStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_snapshot() {
        let stats = MessageStatistics::default();
        assert_eq!(stats.snapshot(), MessageSnapshot::default());
        assert_eq!(stats.snapshot().average_size(), 0);
    }

    #[test]
    fn test_record_tracks_min_max() {
        let stats = MessageStatistics::default();
        stats.record(10);
        stats.record(2);
        stats.record(30);
        let snap = stats.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.total_bytes, 42);
        assert_eq!(snap.min_size, 2);
        assert_eq!(snap.max_size, 30);
        assert_eq!(snap.average_size(), 14);
    }

    #[test]
    fn test_direction_total_merges_kinds() {
        let stats = DirectionStatistics::default();
        stats.record(MessageKind::Text, 5);
        stats.record(MessageKind::Binary, 100);
        let total = stats.total();
        assert_eq!(total.count, 2);
        assert_eq!(total.min_size, 5);
        assert_eq!(total.max_size, 100);
        assert_eq!(stats.control.snapshot().count, 0);
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(MessageStatistics::default());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        stats.record(t * 1000 + i + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.count, 4000);
        assert_eq!(snap.min_size, 1);
        assert_eq!(snap.max_size, 4000);
    }
}
