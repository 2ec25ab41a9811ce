use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Current time truncated to whole seconds, used to tag rounds
pub fn round_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::seconds(1)).unwrap_or(now)
}

/// Time left until the next multiple of `interval_secs` since the epoch
pub fn delay_until_aligned(now: DateTime<Utc>, interval_secs: u64) -> std::time::Duration {
    if interval_secs == 0 {
        return std::time::Duration::ZERO;
    }
    let secs = now.timestamp().max(0) as u64;
    let next_aligned = secs + interval_secs - (secs % interval_secs);
    std::time::Duration::from_secs(next_aligned - secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_until_aligned() {
        let now = DateTime::from_timestamp(1_699_999_990, 0).unwrap();
        assert_eq!(delay_until_aligned(now, 60).as_secs(), 50);

        let on_boundary = DateTime::from_timestamp(1_699_999_980, 0).unwrap();
        assert_eq!(delay_until_aligned(on_boundary, 60).as_secs(), 60);
    }

    #[test]
    fn test_round_timestamp_has_no_subseconds() {
        assert_eq!(round_timestamp().timestamp_subsec_nanos(), 0);
    }
}
