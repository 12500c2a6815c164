pub mod constants;
pub mod metrics;
pub mod record;
pub mod retry;
pub mod sensor;
pub mod settings;
pub mod wire;

use async_trait::async_trait;
use muster_error::{StorageResult, TransportResult};

// Re-export commonly used types
pub use metrics::{PollerMetrics, PollerMetricsSnapshot};
pub use record::CycleRecord;
pub use retry::{build_exponential_backoff, RetryPolicy};
pub use sensor::{SensorId, SensorSpec, SensorState};
pub use settings::Settings;
pub use wire::{InboundFrame, Reading, SensorCommand, WireError};

/// Durable sink for committed cycle records.
///
/// `append` is called exactly once per completed or force-settled cycle and
/// must neither reorder nor merge records. A failure here is the one storage
/// fault the coordinator does not absorb; it propagates to the caller.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &CycleRecord) -> StorageResult<()>;
}

/// Non-blocking outbound command channel to the device fleet.
///
/// Publishing is best-effort and fire-and-forget from the coordinator's
/// perspective; a refused command is reported by the caller, never retried
/// at the transport level. Re-polling is the cycle-level recovery path.
pub trait CommandPublisher: Send + Sync {
    fn try_publish(&self, sensor: &SensorId, command: SensorCommand) -> TransportResult<()>;
}
