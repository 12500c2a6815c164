use crate::sensor::SensorId;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Codec failures for inbound readings and the command vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Reading payload carries no `:` between dedup token and value
    #[error("reading payload has no ':' separator")]
    MissingSeparator,
    /// Dedup token before the separator is empty
    #[error("reading payload has an empty message id")]
    EmptyMessageId,
    /// Payload bytes are not valid UTF-8
    #[error("payload is not valid utf-8")]
    InvalidUtf8,
    /// Command text does not match the ack/reset/poll vocabulary
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Raw hand-off unit from the MQTT event loop to the poll driver.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub topic: String,
    pub payload: Bytes,
}

/// A parsed device reading: `"<message_id>:<value>"`.
///
/// The payload is split at the first colon only; the value may contain
/// further colons that are carried through verbatim. Surrounding whitespace
/// on the value is not significant and is trimmed; the message id is
/// compared byte-for-byte against the dedup watermark and is never trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub message_id: String,
    pub value: String,
}

impl Reading {
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(payload).map_err(|_| WireError::InvalidUtf8)?;
        let (message_id, value) = text.split_once(':').ok_or(WireError::MissingSeparator)?;
        if message_id.is_empty() {
            return Err(WireError::EmptyMessageId);
        }
        Ok(Self {
            message_id: message_id.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Command vocabulary sent to devices on their command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorCommand {
    /// Acknowledge receipt of a reading so the device stops retransmitting
    Ack,
    /// Request device reinitialization, optionally carrying a reset id
    Reset(Option<String>),
    /// Request a reading, optionally hinting how many seconds the device
    /// should stay quiet before its next unsolicited report
    Poll(Option<u64>),
}

impl SensorCommand {
    /// Render the on-wire form: `ack`, `reset[:<id>]`, `poll[:<secs>]`.
    pub fn format(&self) -> String {
        match self {
            SensorCommand::Ack => "ack".to_string(),
            SensorCommand::Reset(None) => "reset".to_string(),
            SensorCommand::Reset(Some(id)) => format!("reset:{id}"),
            SensorCommand::Poll(None) => "poll".to_string(),
            SensorCommand::Poll(Some(quiet_secs)) => format!("poll:{quiet_secs}"),
        }
    }

    pub fn parse(text: &str) -> Result<Self, WireError> {
        let (verb, arg) = match text.split_once(':') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (text, None),
        };
        match (verb, arg) {
            ("ack", None) => Ok(SensorCommand::Ack),
            ("reset", None) => Ok(SensorCommand::Reset(None)),
            ("reset", Some(id)) if !id.is_empty() => {
                Ok(SensorCommand::Reset(Some(id.to_string())))
            }
            ("poll", None) => Ok(SensorCommand::Poll(None)),
            ("poll", Some(secs)) => {
                let quiet = secs
                    .parse::<u64>()
                    .map_err(|_| WireError::MalformedCommand(text.to_string()))?;
                Ok(SensorCommand::Poll(Some(quiet)))
            }
            _ => Err(WireError::MalformedCommand(text.to_string())),
        }
    }
}

impl fmt::Display for SensorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Build the topic a device publishes readings on.
pub fn reading_topic(sensor: &SensorId, suffix: &str) -> String {
    format!("{}/{}", sensor, suffix)
}

/// Build the topic a device receives commands on.
pub fn command_topic(sensor: &SensorId, suffix: &str) -> String {
    format!("{}/{}", sensor, suffix)
}

/// Extract the sensor id from a reading topic, or `None` if the topic does
/// not end in `/<suffix>`. The returned id still has to be resolved against
/// the roster; ids may themselves contain `/`.
pub fn sensor_for_reading_topic<'a>(topic: &'a str, suffix: &str) -> Option<&'a str> {
    topic
        .strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|id| !id.is_empty())
}
