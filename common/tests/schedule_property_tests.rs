// Property-based tests for fire-time calculation and misfire planning

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::models::{MisfireStrategy, Trigger, TriggerOutcome, TriggerSchedule};
use common::schedule::{
    compute_next_fire_time, next_cron_fire_time, next_fixed_interval_fire_time, next_whole_second,
    truncate_to_second,
};
use common::scheduler::plan_firing;
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn interval_trigger(start: DateTime<Utc>, interval_seconds: i64, strategy: MisfireStrategy) -> Trigger {
    Trigger {
        id: 1,
        job_id: 1,
        namespace: "prop".to_string(),
        disabled: false,
        schedule: TriggerSchedule::FixedInterval { interval_seconds },
        start_time: start,
        end_time: None,
        last_fire_time: None,
        next_fire_time: Some(start + Duration::seconds(interval_seconds)),
        misfire_strategy: strategy,
        allow_concurrent: false,
        fire_count: 0,
        lock_version: 0,
        created_at: start,
        updated_at: start,
    }
}

proptest! {
    /// **Property: fixed-interval fire times stay on the start-aligned grid**
    ///
    /// *For any* positive interval and any last fire time at or after the start,
    /// the next fire time is strictly later, at most one interval later, and a
    /// whole number of intervals after the start.
    #[test]
    fn property_fixed_interval_stays_on_grid(
        interval in 1i64..86_400,
        start_offset in 0i64..1_000_000,
        elapsed_ms in 0i64..100_000_000,
    ) {
        let start = base() + Duration::seconds(start_offset);
        let last = start + Duration::milliseconds(elapsed_ms);

        let next = next_fixed_interval_fire_time(interval, start, Some(last)).unwrap();

        prop_assert!(next > last);
        prop_assert!(next - last <= Duration::seconds(interval));
        prop_assert_eq!((next - start).num_milliseconds() % (interval * 1_000), 0);
    }

    /// **Property: non-positive intervals never produce a fire time**
    #[test]
    fn property_non_positive_interval_is_inactive(
        interval in -10_000i64..=0,
        has_last in any::<bool>(),
    ) {
        let last = has_last.then(base);
        prop_assert_eq!(next_fixed_interval_fire_time(interval, base(), last), None);
    }

    /// **Property: end_time bounds every computed fire time**
    #[test]
    fn property_end_time_is_never_exceeded(
        interval in 1i64..3_600,
        end_after in 0i64..100_000,
        elapsed in 0i64..200_000,
    ) {
        let mut trigger = interval_trigger(base(), interval, MisfireStrategy::Ignore);
        let end = base() + Duration::seconds(end_after);
        trigger.end_time = Some(end);

        if let Some(next) = compute_next_fire_time(&trigger, Some(base() + Duration::seconds(elapsed))) {
            prop_assert!(next <= end);
        }
    }

    /// **Property: cron fire times are strictly after the reference**
    #[test]
    fn property_cron_next_is_strictly_after(
        offset_ms in 0i64..10_000_000,
        second in 0u32..60,
    ) {
        let after = base() + Duration::milliseconds(offset_ms);
        let expression = format!("{} * * * * *", second);

        let next = next_cron_fire_time(&expression, after).unwrap().unwrap();

        prop_assert!(next > after);
        prop_assert!(next - after <= Duration::seconds(60));
    }

    /// **Property: a firing always leaves the next fire time after its last fire time**
    ///
    /// *For any* lateness and misfire strategy, the planned next fire time is
    /// later than the recorded last fire time, and only non-ignored firings run the job.
    #[test]
    fn property_planned_next_follows_last(
        interval in 1i64..600,
        lateness_ms in 0i64..3_600_000,
        fire_once in any::<bool>(),
    ) {
        let strategy = if fire_once { MisfireStrategy::FireOnceNow } else { MisfireStrategy::Ignore };
        let trigger = interval_trigger(base(), interval, strategy);
        let scheduled = base() + Duration::seconds(interval);
        let now = scheduled + Duration::milliseconds(lateness_ms);

        let plan = plan_firing(&trigger, scheduled, now, Duration::seconds(3));
        let next = plan.next_fire_time.unwrap();

        if let Some(last) = plan.last_fire_time {
            prop_assert!(next > last);
        }
        if plan.misfire {
            prop_assert!(next > now);
        }
        prop_assert_eq!(plan.outcome.runs_job(), plan.outcome != TriggerOutcome::MisfireIgnored);
    }

    /// **Property: whole-second helpers bracket the instant**
    #[test]
    fn property_whole_second_helpers(offset_ms in 0i64..100_000_000) {
        let now = base() + Duration::milliseconds(offset_ms);
        let floor = truncate_to_second(now);
        let ceil = next_whole_second(now);

        prop_assert!(floor <= now);
        prop_assert!(ceil > now);
        prop_assert_eq!(ceil - floor, Duration::seconds(1));
    }
}
