//! Wire timestamps are unix milliseconds; internally everything is an `OffsetDateTime`.

use time::OffsetDateTime;

pub use time::error::ComponentRange;

pub fn from_unix_ms(ms: i64) -> Result<OffsetDateTime, ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
}

pub fn to_unix_ms(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Column encoding for "unobserved on this axis".
pub fn opt_to_unix_ms(t: Option<OffsetDateTime>) -> i64 {
    t.map(to_unix_ms).unwrap_or(0)
}

pub fn opt_from_unix_ms(ms: i64) -> Result<Option<OffsetDateTime>, ComponentRange> {
    if ms == 0 { Ok(None) } else { from_unix_ms(ms).map(Some) }
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_seconds_and_millis() {
        let t = from_unix_ms(1_500_123).unwrap();
        assert_eq!(t.unix_timestamp(), 1_500);
        assert_eq!(t.nanosecond(), 123_000_000);
        assert_eq!(to_unix_ms(t), 1_500_123);
    }

    #[test]
    fn negative_millis_stay_exact() {
        let t = from_unix_ms(-1_250).unwrap();
        assert_eq!(to_unix_ms(t), -1_250);
    }

    #[test]
    fn range_edges_are_errors_not_panics() {
        // first millisecond before the earliest representable whole second
        assert!(from_unix_ms(-377_705_116_800_001).is_err());
        assert!(from_unix_ms(-377_705_116_800_000).is_ok());
        assert!(from_unix_ms(i64::MAX).is_err());
        assert!(from_unix_ms(i64::MIN).is_err());
    }

    #[test]
    fn zero_means_unobserved() {
        assert_eq!(opt_to_unix_ms(None), 0);
        assert_eq!(opt_from_unix_ms(0).unwrap(), None);
        assert_eq!(opt_from_unix_ms(10).unwrap().map(to_unix_ms), Some(10));
    }
}
