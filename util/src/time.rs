//! General time utility functions

use chrono::{DateTime, TimeZone, Utc};

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Number of microseconds in a second
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Current UTC time in microseconds since the Unix epoch.
///
/// This is the timestamp used for interlocks and bus events.
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Convert a microsecond Unix timestamp back into a UTC datetime.
pub fn from_us(timestamp_us: i64) -> Option<DateTime<Utc>> {
    let secs = timestamp_us.div_euclid(MICROS_PER_SECOND);
    let nanos = (timestamp_us.rem_euclid(MICROS_PER_SECOND) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(1500)),
            Some(1.5)
        );
    }

    #[test]
    fn test_now_us_round_trip() {
        let now = now_us();
        let dt = from_us(now).unwrap();
        assert_eq!(dt.timestamp_micros(), now);
    }
}
