use chrono::{DateTime, Utc};
use std::fmt;

/// One committed line of the results log.
///
/// Values are ordered by the roster's `order_index` at build time; the
/// record itself is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRecord {
    committed_at: DateTime<Utc>,
    values: Vec<String>,
}

impl CycleRecord {
    pub fn new(committed_at: DateTime<Utc>, values: Vec<String>) -> Self {
        Self {
            committed_at,
            values,
        }
    }

    #[inline]
    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    #[inline]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Render the on-disk line: `YYYY-MM-DD HH:MM:SS, v1, v2, ..., vN`.
    ///
    /// Timestamp is second precision with a space separator, matching the
    /// historical results file layout consumed downstream.
    pub fn to_line(&self) -> String {
        let mut line = self.committed_at.format("%Y-%m-%d %H:%M:%S").to_string();
        for value in &self.values {
            line.push_str(", ");
            line.push_str(value);
        }
        line
    }
}

impl fmt::Display for CycleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_layout_matches_results_format() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap();
        let record = CycleRecord::new(
            ts,
            vec!["21.5".to_string(), "NaN".to_string(), "19.0".to_string()],
        );
        assert_eq!(record.to_line(), "2026-03-14 15:00:00, 21.5, NaN, 19.0");
    }

    #[test]
    fn line_with_no_values_is_just_the_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 7).unwrap();
        let record = CycleRecord::new(ts, Vec::new());
        assert_eq!(record.to_line(), "2026-01-01 00:00:07");
    }
}
