use chrono::{DateTime, Utc};
use muster_models::{SensorId, SensorSpec, SensorState};
use std::collections::HashMap;

/// Runtime state of one device, owned exclusively by the poll driver.
#[derive(Debug)]
pub struct SensorRuntime {
    pub spec: SensorSpec,
    pub state: SensorState,
    /// Dedup watermark; updated only when a novel delivery is accepted
    pub last_message_id: Option<String>,
    /// Last accepted value; `None` is the no-data sentinel
    pub last_reading: Option<String>,
    pub retries_remaining: u32,
    /// When the most recent poll or re-poll was issued
    pub last_poll_time: Option<DateTime<Utc>>,
}

impl SensorRuntime {
    fn new(spec: SensorSpec) -> Self {
        Self {
            spec,
            state: SensorState::Idle,
            last_message_id: None,
            last_reading: None,
            retries_remaining: 0,
            last_poll_time: None,
        }
    }

    #[inline]
    pub fn id(&self) -> &SensorId {
        &self.spec.id
    }

    /// Reset for a freshly opened cycle: full retry budget, awaiting.
    pub fn begin_cycle(&mut self, now: DateTime<Utc>, max_retries: u32) {
        self.state = SensorState::AwaitingResponse;
        self.retries_remaining = max_retries;
        self.last_poll_time = Some(now);
    }

    /// Accept a novel reading: advance the watermark, restore the budget.
    pub fn accept(&mut self, message_id: String, value: String, max_retries: u32) {
        self.last_message_id = Some(message_id);
        self.last_reading = Some(value);
        self.retries_remaining = max_retries;
        self.state = SensorState::Responded;
    }

    /// Settle absent: the sentinel replaces any stale reading.
    pub fn mark_absent(&mut self) {
        self.state = SensorState::Absent;
        self.last_reading = None;
    }

    /// Return to `Idle` once the cycle's record has been committed.
    pub fn finish_cycle(&mut self) {
        self.state = SensorState::Idle;
    }
}

/// The fixed device roster, ordered by `order_index`.
///
/// Construction sorts the specs once; record columns and poll fan-out both
/// follow that order. Lookups by topic-extracted id strings go through the
/// borrowed-key index.
pub struct Roster {
    sensors: Vec<SensorRuntime>,
    by_id: HashMap<SensorId, usize>,
}

impl Roster {
    pub fn new(mut specs: Vec<SensorSpec>) -> Self {
        specs.sort_by_key(|s| s.order_index);
        let by_id = specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| (spec.id.clone(), idx))
            .collect();
        Self {
            sensors: specs.into_iter().map(SensorRuntime::new).collect(),
            by_id,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SensorRuntime> {
        self.by_id.get(id).map(|&idx| &self.sensors[idx])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SensorRuntime> {
        self.by_id.get(id).map(|&idx| &mut self.sensors[idx])
    }

    /// Devices in column order.
    pub fn iter(&self) -> impl Iterator<Item = &SensorRuntime> {
        self.sensors.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SensorRuntime> {
        self.sensors.iter_mut()
    }

    pub fn ids(&self) -> Vec<SensorId> {
        self.sensors.iter().map(|s| s.spec.id.clone()).collect()
    }

    /// Column values for the current cycle, sentinel for missing readings.
    pub fn column_values(&self, absent_value: &str) -> Vec<String> {
        self.sensors
            .iter()
            .map(|s| {
                s.last_reading
                    .clone()
                    .unwrap_or_else(|| absent_value.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<SensorSpec> {
        vec![
            SensorSpec {
                id: SensorId::new("charlie"),
                order_index: 2,
            },
            SensorSpec {
                id: SensorId::new("alpha"),
                order_index: 0,
            },
            SensorSpec {
                id: SensorId::new("bravo"),
                order_index: 1,
            },
        ]
    }

    #[test]
    fn roster_orders_by_order_index() {
        let roster = Roster::new(specs());
        let ids: Vec<&str> = roster.iter().map(|s| s.id().as_str()).collect();
        assert_eq!(ids, ["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn lookup_by_borrowed_topic_id() {
        let mut roster = Roster::new(specs());
        assert!(roster.get("bravo").is_some());
        assert!(roster.get("delta").is_none());
        roster.get_mut("alpha").unwrap().retries_remaining = 9;
        assert_eq!(roster.get("alpha").unwrap().retries_remaining, 9);
    }

    #[test]
    fn column_values_substitute_sentinel() {
        let mut roster = Roster::new(specs());
        let now = Utc::now();
        for sensor in roster.iter_mut() {
            sensor.begin_cycle(now, 3);
        }
        roster
            .get_mut("bravo")
            .unwrap()
            .accept("m1".into(), "42.0".into(), 3);
        roster.get_mut("alpha").unwrap().mark_absent();

        assert_eq!(roster.column_values("NaN"), ["NaN", "42.0", "NaN"]);
    }

    #[test]
    fn absence_clears_a_stale_reading() {
        let mut roster = Roster::new(specs());
        let now = Utc::now();
        let alpha = roster.get_mut("alpha").unwrap();
        alpha.begin_cycle(now, 3);
        alpha.accept("m1".into(), "1.0".into(), 3);
        assert_eq!(alpha.state, SensorState::Responded);

        alpha.begin_cycle(now, 3);
        alpha.mark_absent();
        assert_eq!(alpha.last_reading, None);
        assert_eq!(alpha.last_message_id.as_deref(), Some("m1"));
    }
}
