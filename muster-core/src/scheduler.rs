use crate::roster::Roster;
use chrono::{DateTime, Utc};
use muster_models::{settings::PollerConfig, SensorId, SensorState};

/// What one timeout sweep decided for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    /// Budget remains; a re-poll carrying the quiet-period hint goes out
    Repoll { sensor: SensorId, quiet_secs: u64 },
    /// Budget exhausted; the device settled `Absent`
    Exhausted { sensor: SensorId },
}

/// Retry/timeout scheduler for the open cycle.
///
/// The detection timeout is fixed and conservative so a slow-but-alive
/// device is never starved. Only the quiet-period hint adapts to the budget:
/// the time left before the deadline is apportioned evenly across the
/// retries still unspent.
pub struct RetryScheduler {
    sensor_timeout_ms: i64,
}

impl RetryScheduler {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            sensor_timeout_ms: config.sensor_timeout_secs.saturating_mul(1_000) as i64,
        }
    }

    /// Sweep every unsettled device, decrementing budgets and settling
    /// absences. Devices whose timeout has not yet elapsed are untouched.
    pub fn sweep(
        &self,
        roster: &mut Roster,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<SweepAction> {
        let mut actions = Vec::new();
        for sensor in roster.iter_mut() {
            if sensor.state != SensorState::AwaitingResponse {
                continue;
            }
            let Some(last_poll) = sensor.last_poll_time else {
                continue;
            };
            if now.signed_duration_since(last_poll).num_milliseconds() < self.sensor_timeout_ms {
                continue;
            }
            if sensor.retries_remaining > 0 {
                sensor.retries_remaining -= 1;
                let quiet_secs = quiet_period_secs(deadline, now, sensor.retries_remaining);
                sensor.last_poll_time = Some(now);
                actions.push(SweepAction::Repoll {
                    sensor: sensor.id().clone(),
                    quiet_secs,
                });
            } else {
                sensor.mark_absent();
                actions.push(SweepAction::Exhausted {
                    sensor: sensor.id().clone(),
                });
            }
        }
        actions
    }
}

/// `time_remaining / (1 + retries_remaining)`, floored at one second so the
/// hint is always positive. A clock step backwards can only lengthen the
/// hint, never underflow it.
fn quiet_period_secs(deadline: DateTime<Utc>, now: DateTime<Utc>, retries_remaining: u32) -> u64 {
    let remaining = deadline.signed_duration_since(now).num_seconds().max(0) as u64;
    (remaining / (1 + retries_remaining as u64)).max(1)
}
