// Trigger window: triggers due within the next few seconds plus the
// per-node bookkeeping used by the evaluation tick and the job runner

use crate::models::Trigger;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key of one pending firing: trigger id and scheduled time in epoch milliseconds
type FiringKey = (i64, i64);

#[derive(Default)]
pub struct TriggerWindowCache {
    triggers: Mutex<HashMap<i64, Trigger>>,
    /// Epoch second of the last local firing per trigger
    last_fire_second: DashMap<i64, i64>,
    fire_counts: DashMap<i64, u64>,
    in_flight: Arc<DashSet<FiringKey>>,
    /// Runs of a job currently executing on this node
    job_running: DashMap<i64, Arc<AtomicU32>>,
    job_run_counts: DashMap<i64, u64>,
}

/// Removes its firing from the in-flight set when dropped
pub struct InFlightGuard {
    set: Arc<DashSet<FiringKey>>,
    key: FiringKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// Holds one reentry slot of a job until dropped
pub struct ReentryGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TriggerWindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly loaded window; bookkeeping of triggers that left it is dropped
    pub async fn replace_all(&self, triggers: Vec<Trigger>) {
        let mut window = self.triggers.lock().await;
        *window = triggers.into_iter().map(|t| (t.id, t)).collect();
        self.last_fire_second.retain(|id, _| window.contains_key(id));
    }

    pub async fn upsert(&self, trigger: Trigger) {
        self.triggers.lock().await.insert(trigger.id, trigger);
    }

    pub async fn remove(&self, trigger_id: i64) {
        self.triggers.lock().await.remove(&trigger_id);
    }

    /// Keep `trigger` when it may fire before `now + lookahead_ms`, evict it otherwise
    pub async fn refresh_entry(&self, trigger: Trigger, now: DateTime<Utc>, lookahead_ms: i64) {
        let horizon = now + Duration::milliseconds(lookahead_ms);
        let eligible = !trigger.disabled && trigger.next_fire_time.is_some_and(|n| n <= horizon);
        if eligible {
            self.upsert(trigger).await;
        } else {
            self.remove(trigger.id).await;
        }
    }

    /// Triggers due at `now`, earliest first
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        let window = self.triggers.lock().await;
        let mut due: Vec<Trigger> = window.values().filter(|t| t.is_due(now)).cloned().collect();
        due.sort_by_key(|t| (t.next_fire_time, t.id));
        due
    }

    pub async fn len(&self) -> usize {
        self.triggers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.triggers.lock().await.is_empty()
    }

    pub fn fired_in_same_second(&self, trigger_id: i64, now: DateTime<Utc>) -> bool {
        self.last_fire_second
            .get(&trigger_id)
            .is_some_and(|second| *second == now.timestamp())
    }

    pub fn mark_fired(&self, trigger_id: i64, now: DateTime<Utc>) {
        self.last_fire_second.insert(trigger_id, now.timestamp());
    }

    pub fn record_fire(&self, trigger_id: i64) {
        *self.fire_counts.entry(trigger_id).or_insert(0) += 1;
    }

    /// Firings of a trigger that ran their job on this node
    pub fn fire_count(&self, trigger_id: i64) -> u64 {
        self.fire_counts.get(&trigger_id).map(|c| *c).unwrap_or(0)
    }

    /// Claim the in-flight slot for (trigger, scheduled time); `None` while already claimed
    pub fn begin_firing(&self, trigger_id: i64, scheduled: DateTime<Utc>) -> Option<InFlightGuard> {
        let key = (trigger_id, scheduled.timestamp_millis());
        if self.in_flight.insert(key) {
            Some(InFlightGuard {
                set: Arc::clone(&self.in_flight),
                key,
            })
        } else {
            None
        }
    }

    /// Enter a run of `job_id` while fewer than `max_reentry + 1` runs are active
    pub fn enter_job(&self, job_id: i64, max_reentry: u32) -> Option<ReentryGuard> {
        let counter = Arc::clone(
            self.job_running
                .entry(job_id)
                .or_insert_with(|| Arc::new(AtomicU32::new(0)))
                .value(),
        );

        let previous = counter.fetch_add(1, Ordering::AcqRel);
        if previous > max_reentry {
            counter.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ReentryGuard { counter })
    }

    pub fn running_jobs(&self, job_id: i64) -> u32 {
        self.job_running
            .get(&job_id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn record_job_run(&self, job_id: i64) {
        *self.job_run_counts.entry(job_id).or_insert(0) += 1;
    }

    /// Finished runs of a job on this node
    pub fn job_run_count(&self, job_id: i64) -> u64 {
        self.job_run_counts.get(&job_id).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MisfireStrategy, TriggerSchedule};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn trigger(id: i64, next: Option<DateTime<Utc>>) -> Trigger {
        Trigger {
            id,
            job_id: id,
            namespace: "default".to_string(),
            disabled: false,
            schedule: TriggerSchedule::FixedInterval { interval_seconds: 1 },
            start_time: t0(),
            end_time: None,
            last_fire_time: None,
            next_fire_time: next,
            misfire_strategy: MisfireStrategy::Ignore,
            allow_concurrent: false,
            fire_count: 0,
            lock_version: 0,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[tokio::test]
    async fn test_due_returns_earliest_first() {
        let cache = TriggerWindowCache::new();
        cache
            .replace_all(vec![
                trigger(1, Some(t0() + Duration::seconds(1))),
                trigger(2, Some(t0())),
                trigger(3, Some(t0() + Duration::seconds(5))),
            ])
            .await;

        let due = cache.due(t0() + Duration::seconds(1)).await;
        let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_refresh_entry_evicts_ineligible_triggers() {
        let cache = TriggerWindowCache::new();
        cache.upsert(trigger(1, Some(t0()))).await;

        cache
            .refresh_entry(trigger(1, Some(t0() + Duration::seconds(10))), t0(), 1_501)
            .await;
        assert!(cache.is_empty().await);

        cache
            .refresh_entry(trigger(1, Some(t0() + Duration::seconds(1))), t0(), 1_501)
            .await;
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let cache = TriggerWindowCache::new();
        let guard = cache.begin_firing(1, t0());
        assert!(guard.is_some());
        assert!(cache.begin_firing(1, t0()).is_none());
        // A different scheduled time is a different firing
        assert!(cache.begin_firing(1, t0() + Duration::seconds(1)).is_some());

        drop(guard);
        assert!(cache.begin_firing(1, t0()).is_some());
    }

    #[test]
    fn test_reentry_bound() {
        let cache = TriggerWindowCache::new();
        let first = cache.enter_job(7, 1);
        let second = cache.enter_job(7, 1);
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(cache.enter_job(7, 1).is_none());
        assert_eq!(cache.running_jobs(7), 2);

        drop(first);
        assert!(cache.enter_job(7, 1).is_some());
    }

    #[test]
    fn test_same_second_detection() {
        let cache = TriggerWindowCache::new();
        cache.mark_fired(1, t0() + Duration::milliseconds(100));
        assert!(cache.fired_in_same_second(1, t0() + Duration::milliseconds(900)));
        assert!(!cache.fired_in_same_second(1, t0() + Duration::milliseconds(1_000)));
        assert!(!cache.fired_in_same_second(2, t0()));
    }
}
