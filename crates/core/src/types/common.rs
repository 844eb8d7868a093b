//! Timestamps and field maps shared across the record model

use chrono::{DateTime, Utc};

/// Server update time, millisecond precision
pub type Timestamp = DateTime<Utc>;

/// Top-level field map of a record
///
/// Values are compared with `==` when diffing; nested objects and arrays are
/// opaque and never diffed field-by-field.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Timestamp constructors
pub mod timestamp {
    use super::Timestamp;
    use chrono::{DateTime, TimeZone, Utc};

    /// Returns the current time truncated to whole milliseconds
    pub fn now() -> Timestamp {
        from_millis(Utc::now().timestamp_millis())
    }

    /// Builds a timestamp from milliseconds since the Unix epoch
    ///
    /// Out-of-range values saturate to the epoch rather than panicking.
    pub fn from_millis(millis: i64) -> Timestamp {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// The Unix epoch, used as the watermark of a collection never pulled
    pub fn epoch() -> Timestamp {
        DateTime::UNIX_EPOCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_millisecond_precision() {
        let now = timestamp::now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_from_millis_roundtrip() {
        let t = timestamp::from_millis(1_234_567_890_123);
        assert_eq!(t.timestamp_millis(), 1_234_567_890_123);
    }

    #[test]
    fn test_epoch_is_before_now() {
        assert!(timestamp::epoch() < timestamp::now());
    }
}
