use crate::roster::Roster;
use chrono::{DateTime, Duration, Utc};
use muster_models::{CycleRecord, SensorId};
use std::collections::HashSet;

/// One poll cycle: its window and the set of devices settled so far.
///
/// Membership in `settled` is what counts; arrival order never matters.
#[derive(Debug)]
pub struct PollCycle {
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    settled: HashSet<SensorId>,
}

impl PollCycle {
    fn open(now: DateTime<Utc>, period: Duration) -> Self {
        Self {
            started_at: now,
            deadline: now + period,
            settled: HashSet::new(),
        }
    }

    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    #[inline]
    pub fn is_settled(&self, id: &SensorId) -> bool {
        self.settled.contains(id)
    }

    #[inline]
    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }
}

/// Outcome of a settlement notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    NewlySettled,
    /// Notification was a repeat; nothing changed
    AlreadySettled,
    /// No cycle is open; the notification was dropped
    NoOpenCycle,
}

/// Barrier-synchronized cycle aggregation.
///
/// Collects settlement notifications until the settled set covers the full
/// roster; the driver then builds the record and commits exactly once. The
/// aggregator holds the only open-cycle state in the process.
pub struct CycleAggregator {
    absent_value: String,
    current: Option<PollCycle>,
}

impl CycleAggregator {
    pub fn new(absent_value: String) -> Self {
        Self {
            absent_value,
            current: None,
        }
    }

    #[inline]
    pub fn current(&self) -> Option<&PollCycle> {
        self.current.as_ref()
    }

    /// Open a new cycle window. Any previous cycle must already be closed.
    pub fn open_cycle(&mut self, now: DateTime<Utc>, period: Duration) -> &PollCycle {
        debug_assert!(self.current.is_none(), "cycle opened over an open cycle");
        self.current.insert(PollCycle::open(now, period))
    }

    /// Idempotent settlement notification.
    pub fn mark_settled(&mut self, id: &SensorId) -> SettleOutcome {
        match self.current.as_mut() {
            None => SettleOutcome::NoOpenCycle,
            Some(cycle) => {
                if cycle.settled.insert(id.clone()) {
                    SettleOutcome::NewlySettled
                } else {
                    SettleOutcome::AlreadySettled
                }
            }
        }
    }

    /// Whether the settled set covers the full roster.
    pub fn is_complete(&self, roster_len: usize) -> bool {
        self.current
            .as_ref()
            .is_some_and(|cycle| cycle.settled.len() == roster_len)
    }

    /// Build the commit record: columns by `order_index`, sentinel for
    /// devices without a reading.
    pub fn build_record(&self, roster: &Roster, now: DateTime<Utc>) -> CycleRecord {
        CycleRecord::new(now, roster.column_values(&self.absent_value))
    }

    /// Close the cycle after its record has been committed.
    pub fn close(&mut self) -> Option<PollCycle> {
        self.current.take()
    }
}
