use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    RwLock,
};

/// Poll coordinator metrics with atomic counters for lock-free updates.
///
/// Per-message faults are counted here rather than escalated; every fault
/// degrades at worst to "this device is absent this cycle".
#[derive(Debug)]
pub struct PollerMetrics {
    /// Cycles committed to the results log (normal and force-settled)
    pub cycles_committed: AtomicU64,
    /// Cycles force-settled at the scheduling boundary
    pub cycles_forced: AtomicU64,
    /// Novel readings accepted
    pub novel_readings: AtomicU64,
    /// Duplicate deliveries re-acknowledged
    pub duplicate_readings: AtomicU64,
    /// Payloads rejected by the reading codec
    pub malformed_messages: AtomicU64,
    /// Messages on topics matching no roster device
    pub unknown_devices: AtomicU64,
    /// Novel-looking messages for devices already settled this cycle
    pub late_settlements: AtomicU64,
    /// Novel messages with no cycle open
    pub unsolicited_readings: AtomicU64,
    /// Re-poll commands sent by the retry scheduler
    pub repolls_sent: AtomicU64,
    /// Devices settled absent (budget exhausted or force-settled)
    pub absences: AtomicU64,
    /// Commands the transport refused to enqueue
    pub publish_failures: AtomicU64,
    /// Last successful commit timestamp (requires lock for DateTime)
    pub last_commit: RwLock<Option<DateTime<Utc>>>,
}

impl Default for PollerMetrics {
    fn default() -> Self {
        Self {
            cycles_committed: AtomicU64::new(0),
            cycles_forced: AtomicU64::new(0),
            novel_readings: AtomicU64::new(0),
            duplicate_readings: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            unknown_devices: AtomicU64::new(0),
            late_settlements: AtomicU64::new(0),
            unsolicited_readings: AtomicU64::new(0),
            repolls_sent: AtomicU64::new(0),
            absences: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            last_commit: RwLock::new(None),
        }
    }
}

impl PollerMetrics {
    #[inline]
    pub fn record_commit(&self, at: DateTime<Utc>, forced: bool) {
        self.cycles_committed.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.cycles_forced.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut last_commit) = self.last_commit.write() {
            *last_commit = Some(at);
        }
    }

    #[inline]
    pub fn increment_novel(&self) {
        self.novel_readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_duplicate(&self) {
        self.duplicate_readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_unknown_device(&self) {
        self.unknown_devices.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_late_settlement(&self) {
        self.late_settlements.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_unsolicited(&self) {
        self.unsolicited_readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_repoll(&self) {
        self.repolls_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_absence(&self) {
        self.absences.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a consistent snapshot of all counters.
    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            cycles_committed: self.cycles_committed.load(Ordering::Relaxed),
            cycles_forced: self.cycles_forced.load(Ordering::Relaxed),
            novel_readings: self.novel_readings.load(Ordering::Relaxed),
            duplicate_readings: self.duplicate_readings.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            unknown_devices: self.unknown_devices.load(Ordering::Relaxed),
            late_settlements: self.late_settlements.load(Ordering::Relaxed),
            unsolicited_readings: self.unsolicited_readings.load(Ordering::Relaxed),
            repolls_sent: self.repolls_sent.load(Ordering::Relaxed),
            absences: self.absences.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            last_commit: self.last_commit.read().ok().and_then(|guard| *guard),
        }
    }
}

/// Serializable snapshot of poller metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerMetricsSnapshot {
    pub cycles_committed: u64,
    pub cycles_forced: u64,
    pub novel_readings: u64,
    pub duplicate_readings: u64,
    pub malformed_messages: u64,
    pub unknown_devices: u64,
    pub late_settlements: u64,
    pub unsolicited_readings: u64,
    pub repolls_sent: u64,
    pub absences: u64,
    pub publish_failures: u64,
    pub last_commit: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counter_updates() {
        let metrics = PollerMetrics::default();
        metrics.increment_novel();
        metrics.increment_novel();
        metrics.increment_duplicate();
        metrics.record_commit(Utc::now(), true);

        let snap = metrics.snapshot();
        assert_eq!(snap.novel_readings, 2);
        assert_eq!(snap.duplicate_readings, 1);
        assert_eq!(snap.cycles_committed, 1);
        assert_eq!(snap.cycles_forced, 1);
        assert!(snap.last_commit.is_some());
        assert_eq!(snap.malformed_messages, 0);
    }
}
