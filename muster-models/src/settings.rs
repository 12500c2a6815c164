use crate::{
    constants::{ABSENT_VALUE, COMMAND_TOPIC_SUFFIX, DATA_DIR, READING_TOPIC_SUFFIX},
    retry::RetryPolicy,
    sensor::SensorSpec,
};
use config::{Config, File};
use muster_error::{MusterError, MusterResult};
use serde::{self, Deserialize};
use std::{collections::HashSet, ops::Deref, sync::Arc};

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(config_path: String) -> MusterResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path.as_str()).required(false))
            .add_source(
                config::Environment::with_prefix("MUSTER")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    /// Check roster consistency before any component is wired up.
    ///
    /// The roster is fixed for the process lifetime, so a broken one is a
    /// startup error rather than something to limp along with.
    pub fn validate(&self) -> MusterResult<()> {
        if self.sensors.is_empty() {
            return Err(MusterError::ConfigurationError(
                "sensor roster is empty; at least one [[sensors]] entry is required".to_string(),
            ));
        }
        let mut ids = HashSet::new();
        let mut order_indexes = HashSet::new();
        for spec in &self.sensors {
            if !ids.insert(spec.id.as_str()) {
                return Err(MusterError::ConfigurationError(format!(
                    "duplicate sensor id '{}' in roster",
                    spec.id
                )));
            }
            if !order_indexes.insert(spec.order_index) {
                return Err(MusterError::ConfigurationError(format!(
                    "duplicate order_index {} in roster",
                    spec.order_index
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Fixed device roster; one `[[sensors]]` table per device
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "BrokerConfig::host_default")]
    pub host: String,
    #[serde(default = "BrokerConfig::port_default")]
    pub port: u16,
    /// Optional broker credentials
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Prefix of the generated client id (`<prefix>-<short8>`)
    #[serde(default = "BrokerConfig::client_id_prefix_default")]
    pub client_id_prefix: String,
    #[serde(default = "BrokerConfig::keep_alive_secs_default")]
    pub keep_alive_secs: u64,
    #[serde(default = "BrokerConfig::clean_session_default")]
    pub clean_session: bool,
    /// QoS for subscriptions and outbound commands (0, 1 or 2)
    #[serde(default = "BrokerConfig::qos_default")]
    pub qos: u8,
    /// Bounded queue capacity from the event loop to the poll driver
    #[serde(default = "BrokerConfig::inbound_queue_capacity_default")]
    pub inbound_queue_capacity: usize,
    /// Synchronous start wait timeout for the initial connection (milliseconds)
    #[serde(default = "BrokerConfig::sync_start_timeout_ms_default")]
    pub sync_start_timeout_ms: u64,
    /// Reconnection pacing
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            host: BrokerConfig::host_default(),
            port: BrokerConfig::port_default(),
            username: None,
            password: None,
            client_id_prefix: BrokerConfig::client_id_prefix_default(),
            keep_alive_secs: BrokerConfig::keep_alive_secs_default(),
            clean_session: BrokerConfig::clean_session_default(),
            qos: BrokerConfig::qos_default(),
            inbound_queue_capacity: BrokerConfig::inbound_queue_capacity_default(),
            sync_start_timeout_ms: BrokerConfig::sync_start_timeout_ms_default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BrokerConfig {
    fn host_default() -> String {
        "broker.mqttdashboard.com".into()
    }

    fn port_default() -> u16 {
        1883
    }

    fn client_id_prefix_default() -> String {
        "muster".into()
    }

    fn keep_alive_secs_default() -> u64 {
        30
    }

    fn clean_session_default() -> bool {
        true
    }

    fn qos_default() -> u8 {
        0
    }

    fn inbound_queue_capacity_default() -> usize {
        1024
    }

    fn sync_start_timeout_ms_default() -> u64 {
        10_000
    }
}

/// Topic suffixes of the device protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Suffix of the per-device reading topic
    #[serde(default = "TopicsConfig::reading_suffix_default")]
    pub reading_suffix: String,
    /// Suffix of the per-device command topic
    #[serde(default = "TopicsConfig::command_suffix_default")]
    pub command_suffix: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        TopicsConfig {
            reading_suffix: TopicsConfig::reading_suffix_default(),
            command_suffix: TopicsConfig::command_suffix_default(),
        }
    }
}

impl TopicsConfig {
    fn reading_suffix_default() -> String {
        READING_TOPIC_SUFFIX.into()
    }

    fn command_suffix_default() -> String {
        COMMAND_TOPIC_SUFFIX.into()
    }
}

/// Poll cycle configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PollerConfig {
    /// Cycle period in seconds; a new poll cycle opens on this cadence
    #[serde(default = "PollerConfig::period_secs_default")]
    pub period_secs: u64,
    /// How long to wait for a device's reading before re-polling (seconds)
    #[serde(default = "PollerConfig::sensor_timeout_secs_default")]
    pub sensor_timeout_secs: u64,
    /// Re-poll budget per device per cycle
    #[serde(default = "PollerConfig::max_retries_default")]
    pub max_retries: u32,
    /// Timer tick interval in milliseconds; must be finer than the timeout
    #[serde(default = "PollerConfig::tick_interval_ms_default")]
    pub tick_interval_ms: u64,
    /// Send a roster-wide reset command once the broker connection is up,
    /// so devices re-announce with fresh message ids after a restart
    #[serde(default = "PollerConfig::reset_on_start_default")]
    pub reset_on_start: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            period_secs: PollerConfig::period_secs_default(),
            sensor_timeout_secs: PollerConfig::sensor_timeout_secs_default(),
            max_retries: PollerConfig::max_retries_default(),
            tick_interval_ms: PollerConfig::tick_interval_ms_default(),
            reset_on_start: PollerConfig::reset_on_start_default(),
        }
    }
}

impl PollerConfig {
    fn period_secs_default() -> u64 {
        3_600
    }

    fn sensor_timeout_secs_default() -> u64 {
        10
    }

    fn max_retries_default() -> u32 {
        3
    }

    fn tick_interval_ms_default() -> u64 {
        250
    }

    fn reset_on_start_default() -> bool {
        false
    }
}

/// Results log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Results log file; bare names are resolved under the data directory
    #[serde(default = "StorageConfig::file_default")]
    pub file: String,
    /// fsync after every committed record
    #[serde(default = "StorageConfig::fsync_on_append_default")]
    pub fsync_on_append: bool,
    /// Column value written for absent devices
    #[serde(default = "StorageConfig::absent_value_default")]
    pub absent_value: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            file: StorageConfig::file_default(),
            fsync_on_append: StorageConfig::fsync_on_append_default(),
            absent_value: StorageConfig::absent_value_default(),
        }
    }
}

impl StorageConfig {
    fn file_default() -> String {
        "results".into()
    }

    fn fsync_on_append_default() -> bool {
        false
    }

    fn absent_value_default() -> String {
        ABSENT_VALUE.into()
    }

    /// Resolve the results log path under the data directory.
    ///
    /// # Rules
    /// - If the configured value looks like a path (contains `/` or starts
    ///   with `.`), it is treated as an explicit path and returned as-is.
    /// - Otherwise it is treated as a file name under `DATA_DIR`.
    pub fn results_path_resolved(&self) -> String {
        let v = self.file.trim();
        if v.starts_with('.') || v.contains('/') {
            return v.to_string();
        }
        format!("{}/{}", DATA_DIR, v)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Console and file log level: trace, debug, info, warn or error
    #[serde(default = "LogConfig::level_default")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: LogConfig::level_default(),
        }
    }
}

impl LogConfig {
    fn level_default() -> String {
        "info".into()
    }
}
