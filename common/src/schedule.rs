// Fire-time calculation for cron and fixed-interval triggers
//
// Every function here is pure: callers pass the reference instants in, so the
// same computation drives admin inserts, calibration and live firings.

use crate::errors::ScheduleError;
use crate::models::{Trigger, TriggerSchedule};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Longest accepted fixed interval: 100 years of seconds
pub const MAX_INTERVAL_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

/// Parse and validate a cron expression (second precision, 6 or 7 fields)
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Check a schedule definition without computing anything from it
pub fn validate_schedule(schedule: &TriggerSchedule) -> Result<(), ScheduleError> {
    match schedule {
        TriggerSchedule::Cron { expression } => parse_cron_expression(expression).map(|_| ()),
        TriggerSchedule::FixedInterval { interval_seconds } if *interval_seconds <= 0 => {
            Err(ScheduleError::NonPositiveInterval(*interval_seconds))
        }
        TriggerSchedule::FixedInterval { interval_seconds }
            if *interval_seconds > MAX_INTERVAL_SECONDS =>
        {
            Err(ScheduleError::IntervalTooLarge(*interval_seconds))
        }
        TriggerSchedule::FixedInterval { .. } => Ok(()),
    }
}

/// First cron fire time strictly after `after`
pub fn next_cron_fire_time(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;
    Ok(schedule.after(&after).next())
}

/// Next fire time of a fixed-interval trigger.
///
/// Returns `None` for a non-positive interval. When the trigger has fired at or
/// after its start, the result is the first step of the start-aligned grid
/// strictly after `last_fire_time`; a never-fired trigger takes the first step
/// of that grid. A last fire time before the start (e.g. the start was moved)
/// is simply advanced by one interval. Results beyond the representable
/// range are `None` as well.
pub fn next_fixed_interval_fire_time(
    interval_seconds: i64,
    start_time: DateTime<Utc>,
    last_fire_time: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    if interval_seconds <= 0 {
        return None;
    }
    let interval = Duration::try_seconds(interval_seconds)?;

    match last_fire_time {
        None => start_time.checked_add_signed(interval),
        Some(last) if last >= start_time => {
            let step_ms = interval.num_milliseconds();
            let elapsed_steps = (last - start_time).num_milliseconds() / step_ms;
            let offset_ms = step_ms.checked_mul(elapsed_steps.checked_add(1)?)?;
            start_time.checked_add_signed(Duration::try_milliseconds(offset_ms)?)
        }
        Some(last) => last.checked_add_signed(interval),
    }
}

/// Next fire time of `trigger` using `reference` as the effective last fire time.
///
/// Cron triggers without a reference start from their `start_time`. Any result
/// past the trigger's `end_time` yields `None`, as does an invalid schedule.
pub fn compute_next_fire_time(
    trigger: &Trigger,
    reference: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let next = match &trigger.schedule {
        TriggerSchedule::Cron { expression } => {
            let after = reference.unwrap_or(trigger.start_time);
            next_cron_fire_time(expression, after).ok().flatten()
        }
        TriggerSchedule::FixedInterval { interval_seconds } => {
            next_fixed_interval_fire_time(*interval_seconds, trigger.start_time, reference)
        }
    }?;

    match trigger.end_time {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

/// Whether a firing scheduled for `scheduled` is evaluated too late at `now`.
///
/// This is the single tolerance predicate used by the coordinator; the
/// threshold comes from configuration and defaults to three tick periods.
pub fn is_misfire(now: DateTime<Utc>, scheduled: DateTime<Utc>, threshold: Duration) -> bool {
    now - scheduled > threshold
}

/// `now` with its sub-second component dropped
pub fn truncate_to_second(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(0)
}

/// The next whole second strictly after `now`
pub fn next_whole_second(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_second(now) + Duration::seconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MisfireStrategy;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn trigger(schedule: TriggerSchedule) -> Trigger {
        Trigger {
            id: 1,
            job_id: 1,
            namespace: "default".to_string(),
            disabled: false,
            schedule,
            start_time: t0(),
            end_time: None,
            last_fire_time: None,
            next_fire_time: None,
            misfire_strategy: MisfireStrategy::Ignore,
            allow_concurrent: false,
            fire_count: 0,
            lock_version: 0,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[test]
    fn test_parse_valid_cron_expression() {
        assert!(parse_cron_expression("0 0 12 * * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(parse_cron_expression("invalid").is_err());
    }

    #[test]
    fn test_fixed_interval_never_fired() {
        let next = next_fixed_interval_fire_time(60, t0(), None);
        assert_eq!(next, Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_fixed_interval_after_fire_at_or_after_start() {
        let last = t0() + Duration::seconds(60);
        let next = next_fixed_interval_fire_time(60, t0(), Some(last));
        assert_eq!(next, Some(t0() + Duration::seconds(120)));
    }

    #[test]
    fn test_fixed_interval_last_fire_equal_to_start() {
        let next = next_fixed_interval_fire_time(60, t0(), Some(t0()));
        assert_eq!(next, Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_fixed_interval_last_fire_before_start() {
        let last = t0() - Duration::seconds(10);
        let next = next_fixed_interval_fire_time(60, t0(), Some(last));
        assert_eq!(next, Some(t0() + Duration::seconds(50)));
    }

    #[test]
    fn test_fixed_interval_stays_on_grid_for_late_reference() {
        let late = t0() + Duration::milliseconds(185_300);
        let next = next_fixed_interval_fire_time(60, t0(), Some(late));
        assert_eq!(next, Some(t0() + Duration::seconds(240)));
    }

    #[test]
    fn test_non_positive_interval_is_inactive() {
        assert_eq!(next_fixed_interval_fire_time(0, t0(), None), None);
        assert_eq!(next_fixed_interval_fire_time(-5, t0(), Some(t0())), None);

        let mut inactive = trigger(TriggerSchedule::FixedInterval { interval_seconds: 0 });
        inactive.next_fire_time = Some(t0());
        assert_eq!(compute_next_fire_time(&inactive, None), None);
    }

    #[test]
    fn test_oversized_interval_is_rejected_without_panicking() {
        let huge = i64::MAX / 1000 - 1;
        assert_eq!(next_fixed_interval_fire_time(huge, t0(), None), None);
        assert_eq!(next_fixed_interval_fire_time(huge, t0(), Some(t0())), None);
        assert_eq!(next_fixed_interval_fire_time(i64::MAX, t0(), None), None);
        assert_eq!(
            validate_schedule(&TriggerSchedule::FixedInterval {
                interval_seconds: huge
            }),
            Err(ScheduleError::IntervalTooLarge(huge))
        );
        assert!(validate_schedule(&TriggerSchedule::FixedInterval {
            interval_seconds: MAX_INTERVAL_SECONDS
        })
        .is_ok());
    }

    #[test]
    fn test_cron_next_is_strictly_after_reference() {
        let every_minute = trigger(TriggerSchedule::Cron {
            expression: "0 * * * * *".to_string(),
        });
        let next = compute_next_fire_time(&every_minute, Some(t0()));
        assert_eq!(next, Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_invalid_cron_yields_none() {
        let broken = trigger(TriggerSchedule::Cron {
            expression: "not a cron".to_string(),
        });
        assert_eq!(compute_next_fire_time(&broken, None), None);
        assert!(validate_schedule(&broken.schedule).is_err());
    }

    #[test]
    fn test_end_time_stops_schedule() {
        let mut bounded = trigger(TriggerSchedule::FixedInterval { interval_seconds: 60 });
        bounded.end_time = Some(t0() + Duration::seconds(90));
        assert_eq!(
            compute_next_fire_time(&bounded, None),
            Some(t0() + Duration::seconds(60))
        );
        assert_eq!(
            compute_next_fire_time(&bounded, Some(t0() + Duration::seconds(60))),
            None
        );
    }

    #[test]
    fn test_misfire_predicate() {
        let threshold = Duration::milliseconds(3_000);
        assert!(!is_misfire(t0() + Duration::milliseconds(3_000), t0(), threshold));
        assert!(is_misfire(t0() + Duration::milliseconds(3_001), t0(), threshold));
        assert!(!is_misfire(t0() - Duration::seconds(1), t0(), threshold));
    }

    #[test]
    fn test_whole_second_helpers() {
        let now = t0() + Duration::milliseconds(1_750);
        assert_eq!(truncate_to_second(now), t0() + Duration::seconds(1));
        assert_eq!(next_whole_second(now), t0() + Duration::seconds(2));
    }
}
