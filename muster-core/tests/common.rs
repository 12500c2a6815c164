use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use muster_core::{PollDriver, Roster};
use muster_error::{StorageError, StorageResult, TransportError, TransportResult};
use muster_models::{
    settings::{PollerConfig, TopicsConfig},
    CommandPublisher, CycleRecord, InboundFrame, PollerMetrics, RecordSink, SensorCommand,
    SensorId, SensorSpec,
};
use std::sync::{Arc, Mutex, Once};
use tokio_util::sync::CancellationToken;
use tracing::Level;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Publisher that records every command instead of talking to a broker.
#[derive(Debug, Default)]
pub struct CapturingPublisher {
    sent: Mutex<Vec<(SensorId, SensorCommand)>>,
}

impl CapturingPublisher {
    pub fn commands_for(&self, sensor: &str) -> Vec<SensorCommand> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id.as_str() == sensor)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<(SensorId, SensorCommand)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl CommandPublisher for CapturingPublisher {
    fn try_publish(&self, sensor: &SensorId, command: SensorCommand) -> TransportResult<()> {
        self.sent.lock().unwrap().push((sensor.clone(), command));
        Ok(())
    }
}

/// Publisher that refuses everything, as a disconnected link would.
#[derive(Debug, Default)]
pub struct FailingPublisher;

impl CommandPublisher for FailingPublisher {
    fn try_publish(&self, _sensor: &SensorId, _command: SensorCommand) -> TransportResult<()> {
        Err(TransportError::NotConnected)
    }
}

/// Sink that keeps committed records in memory for assertions.
#[derive(Debug, Default)]
pub struct CapturingSink {
    records: Mutex<Vec<CycleRecord>>,
}

impl CapturingSink {
    pub fn records(&self) -> Vec<CycleRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for CapturingSink {
    async fn append(&self, record: &CycleRecord) -> StorageResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sink whose appends always fail, as a full disk would.
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl RecordSink for FailingSink {
    async fn append(&self, _record: &CycleRecord) -> StorageResult<()> {
        Err(StorageError::Append {
            source: std::io::Error::other("disk full"),
        })
    }
}

pub fn sensor_specs(ids: &[&str]) -> Vec<SensorSpec> {
    ids.iter()
        .enumerate()
        .map(|(idx, id)| SensorSpec {
            id: SensorId::new(*id),
            order_index: idx as u32,
        })
        .collect()
}

pub fn poller_config(period_secs: u64, sensor_timeout_secs: u64, max_retries: u32) -> PollerConfig {
    PollerConfig {
        period_secs,
        sensor_timeout_secs,
        max_retries,
        tick_interval_ms: 250,
        reset_on_start: false,
    }
}

pub fn build_driver(
    ids: &[&str],
    config: PollerConfig,
    publisher: Arc<dyn CommandPublisher>,
    sink: Arc<dyn RecordSink>,
) -> PollDriver {
    PollDriver::new(
        config,
        &TopicsConfig::default(),
        "NaN".to_string(),
        Roster::new(sensor_specs(ids)),
        publisher,
        sink,
        Arc::new(PollerMetrics::default()),
        CancellationToken::new(),
    )
}

/// Reading frame as a device would publish it on `<sensor>/output`.
pub fn frame(sensor: &str, payload: &str) -> InboundFrame {
    InboundFrame {
        topic: format!("{sensor}/output"),
        payload: Bytes::copy_from_slice(payload.as_bytes()),
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap()
}

/// `base_time` shifted by `secs` seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(secs)
}
