//! Schedule deviation and agency-local time helpers.

use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;

pub const SECS_IN_DAY: i64 = 24 * 3600;
/// Deviations larger than this are taken to have crossed midnight.
pub const WRAP_THRESHOLD_SECS: i64 = 23 * 3600;

/// Seconds since local midnight in `tz` for an epoch timestamp.
///
/// Returns `None` when the timestamp is outside chrono's range.
pub fn local_seconds_since_midnight(timestamp: i64, tz: Tz) -> Option<i64> {
    let local = DateTime::from_timestamp(timestamp, 0)?.with_timezone(&tz);
    Some(i64::from(local.num_seconds_from_midnight()))
}

/// Local day-of-year in `tz` on which `timestamp` falls.
pub fn service_day(timestamp: i64, tz: Tz) -> Option<u32> {
    let local = DateTime::from_timestamp(timestamp, 0)?.with_timezone(&tz);
    Some(local.ordinal())
}

/// Signed delay in seconds; positive means late.
///
/// `reported` and `estimated` are both seconds since local midnight. A raw
/// difference beyond 23h is folded back by a day, so a vehicle reporting at
/// 00:00:10 against an estimate of 23:59:50 is 20s late.
pub fn calculate_delay(reported: i64, estimated: f64) -> i64 {
    let diff = (reported as f64 - estimated).round() as i64;
    if diff.abs() > WRAP_THRESHOLD_SECS {
        if diff > 0 {
            diff - SECS_IN_DAY
        } else {
            diff + SECS_IN_DAY
        }
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_plain() {
        assert_eq!(calculate_delay(1000, 900.0), 100);
        assert_eq!(calculate_delay(900, 1000.0), -100);
        assert_eq!(calculate_delay(905, 904.6), 0);
    }

    #[test]
    fn test_delay_wraps_past_midnight() {
        let estimated = (23 * 3600 + 59 * 60 + 50) as f64;
        assert_eq!(calculate_delay(10, estimated), 20);
    }

    #[test]
    fn test_delay_wraps_before_midnight() {
        // reported 23:59:30 for an estimate of 00:00:20 the next day
        assert_eq!(calculate_delay(86_370, 20.0), -50);
    }

    #[test]
    fn test_delay_post_midnight_schedule() {
        // 25:00:00 in schedule terms, reported at 01:00:30
        assert_eq!(calculate_delay(3630, 90_000.0), 30);
    }

    #[test]
    fn test_delay_at_threshold_is_not_folded() {
        assert_eq!(calculate_delay(WRAP_THRESHOLD_SECS, 0.0), WRAP_THRESHOLD_SECS);
    }

    #[test]
    fn test_local_seconds_respects_timezone() {
        // 2024-01-15T12:00:00Z
        let ts = 1_705_320_000;
        assert_eq!(local_seconds_since_midnight(ts, chrono_tz::UTC), Some(12 * 3600));
        // Sofia is UTC+2 in winter
        assert_eq!(
            local_seconds_since_midnight(ts, chrono_tz::Europe::Sofia),
            Some(14 * 3600)
        );
    }

    #[test]
    fn test_service_day_follows_local_date() {
        // 2024-01-15T23:30:00Z is already the 16th in Sofia
        let ts = 1_705_361_400;
        assert_eq!(service_day(ts, chrono_tz::UTC), Some(15));
        assert_eq!(service_day(ts, chrono_tz::Europe::Sofia), Some(16));
    }
}
