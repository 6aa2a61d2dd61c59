//! Time-related functions.

use std::time::{Duration, SystemTime};

fn since_unix_epoch() -> Duration {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
}

/// Longest duration accepted from configuration.
///
/// Far enough out that deadlines computed from it never overflow a monotonic clock.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Converts a configured number of seconds into a `Duration`.
///
/// Returns `None` if the value is negative, not finite, or longer than [`MAX_CONFIGURED_DURATION`].
pub fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|duration| *duration <= MAX_CONFIGURED_DURATION)
}

/// Converts a configured number of seconds into a non-zero `Duration`.
///
/// Like [`duration_from_secs`], but zero is rejected too.
pub fn positive_duration_from_secs(secs: f64) -> Option<Duration> {
    duration_from_secs(secs).filter(|duration| !duration.is_zero())
}

/// Get the current Unix timestamp, in seconds.
pub fn get_unix_timestamp() -> u64 {
    since_unix_epoch().as_secs()
}

/// Get the current Unix timestamp, in milliseconds.
///
/// Saturates at `u64::MAX`, which is far enough in the future to not matter in practice.
pub fn get_unix_timestamp_millis() -> u64 {
    u64::try_from(since_unix_epoch().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_durations() {
        assert_eq!(duration_from_secs(0.0), Some(Duration::ZERO));
        assert_eq!(duration_from_secs(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(positive_duration_from_secs(0.0), None);
        assert_eq!(
            positive_duration_from_secs(MAX_CONFIGURED_DURATION.as_secs_f64()),
            Some(MAX_CONFIGURED_DURATION)
        );

        for secs in [-1.0, f64::NAN, f64::INFINITY, 1e20, MAX_CONFIGURED_DURATION.as_secs_f64() + 1.0] {
            assert_eq!(duration_from_secs(secs), None, "{} should be rejected", secs);
        }
    }

    #[test]
    fn millis_and_seconds_agree() {
        let secs = get_unix_timestamp();
        let millis = get_unix_timestamp_millis();

        // Allow for the second boundary being crossed between the two calls.
        assert!(millis / 1000 >= secs);
        assert!(millis / 1000 <= secs + 1);
    }
}
