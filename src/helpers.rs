//! Shared helpers for Decimal ↔ f64 conversions and time bucketing.
//!
//! Waypoint coordinates are stored as `rust_decimal::Decimal` for full
//! precision; everything else (risk percentages, severities, durations) is
//! plain f64/i64 and needs no conversion helpers here.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Truncate a timestamp to the start of its wall-clock UTC minute — the key
/// of the per-minute usage counter.
pub(crate) fn minute_bucket(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), dt.time().minute(), 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

/// The UTC calendar day a timestamp falls on, used as the key for the two
/// daily usage counters.
pub(crate) fn usage_day(dt: DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dec_to_f64_normal() {
        let d = Decimal::from_str_exact("8.545").unwrap();
        assert!((dec_to_f64(d) - 8.545).abs() < 1e-10);
    }

    #[test]
    fn test_dec_to_f64_zero() {
        assert_eq!(dec_to_f64(Decimal::ZERO), 0.0);
    }

    #[test]
    fn test_minute_bucket_zeroes_seconds() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 1, 7, 45, 59).unwrap();
        let bucket = minute_bucket(dt);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2026, 3, 1, 7, 45, 0).unwrap());
    }

    #[test]
    fn test_minute_bucket_rollover_distinct() {
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 0, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        assert_ne!(minute_bucket(before), minute_bucket(after));
    }

    #[test]
    fn test_usage_day_is_calendar_date() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        assert_eq!(usage_day(dt), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }
}
