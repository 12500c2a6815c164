//! Message-id deduplication against the per-device watermark.
//!
//! The transport is at-least-once; devices retransmit until acknowledged, so
//! the same reading can arrive any number of times. Classification is a pure
//! token comparison. What to do with the outcome (state changes, the
//! idempotent re-ack) is the driver's call.

/// Outcome of comparing an inbound message id against the device watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Novelty {
    /// First delivery of this message id
    Novel,
    /// Retransmission of the already-accepted message id
    Duplicate,
}

/// Compare a message id against the watermark of the last accepted delivery.
///
/// Only the most recent accepted id is retained; an id older than the
/// watermark classifies as novel and is caught by the settlement guard
/// instead.
#[inline]
pub fn classify(watermark: Option<&str>, message_id: &str) -> Novelty {
    match watermark {
        Some(w) if w == message_id => Novelty::Duplicate,
        _ => Novelty::Novel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delivery_is_novel() {
        assert_eq!(classify(None, "m1"), Novelty::Novel);
    }

    #[test]
    fn matching_watermark_is_duplicate() {
        assert_eq!(classify(Some("m1"), "m1"), Novelty::Duplicate);
    }

    #[test]
    fn different_id_is_novel_even_with_watermark() {
        assert_eq!(classify(Some("m1"), "m2"), Novelty::Novel);
        assert_eq!(classify(Some("m2"), "m1"), Novelty::Novel);
    }

    #[test]
    fn comparison_is_exact() {
        assert_eq!(classify(Some("m1"), "M1"), Novelty::Novel);
        assert_eq!(classify(Some("m1"), "m1 "), Novelty::Novel);
    }
}
