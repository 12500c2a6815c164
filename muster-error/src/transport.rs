use thiserror::Error;

/// Classifies MQTT link errors to avoid ad-hoc strings.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Subscription to a reading topic was rejected
    #[error("failed to subscribe to topic '{topic}': {reason}")]
    SubscribeFailed { topic: String, reason: String },
    /// No live client; the supervisor is between connections
    #[error("mqtt client not connected")]
    NotConnected,
    /// Outbound request queue is saturated; the command was not enqueued
    #[error("publish queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
    /// Any other client-side publish failure
    #[error("publish failed: {reason}")]
    Publish { reason: String },
}
