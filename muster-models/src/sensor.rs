use serde::Deserialize;
use std::{borrow::Borrow, fmt};

/// Identifier of a remote sensing device.
///
/// The id doubles as the root of the device's MQTT topics, so it must not
/// contain wildcard characters. The roster of ids is fixed for the process
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// Allows roster lookups keyed by the id extracted from a topic string.
impl Borrow<str> for SensorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Static per-device configuration, loaded from the `[[sensors]]` roster.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorSpec {
    /// Device id and topic root
    pub id: SensorId,
    /// Column position of this device's value in committed records (ascending)
    pub order_index: u32,
}

/// Per-cycle lifecycle state of a device.
///
/// `Responded` and `Absent` are terminal for the cycle only; every device
/// returns to `AwaitingResponse` with a fresh retry budget when the next
/// cycle opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    /// No cycle open for this device
    Idle,
    /// Poll sent, no accepted reading yet
    AwaitingResponse,
    /// A novel reading was accepted this cycle
    Responded,
    /// Retry budget exhausted with no novel reading this cycle
    Absent,
}

impl SensorState {
    /// Whether the device has reached a cycle-terminal state.
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, SensorState::Responded | SensorState::Absent)
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorState::Idle => "idle",
            SensorState::AwaitingResponse => "awaiting-response",
            SensorState::Responded => "responded",
            SensorState::Absent => "absent",
        };
        f.write_str(s)
    }
}
