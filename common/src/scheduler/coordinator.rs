// ExecutionCoordinator: one trigger firing, from claim to persisted fire times
//
// A firing that disallows concurrency first wins the trigger's lock_version.
// Fire times are persisted before the job body runs, so a slow job never
// holds back the trigger for other nodes.

use super::runner::{JobRunner, RunOutcome, RunSource};
use crate::cache::TriggerWindowCache;
use crate::errors::SchedulerError;
use crate::models::{Job, MisfireStrategy, NodeRecord, Trigger, TriggerLog, TriggerOutcome};
use crate::registry::PluginRegistry;
use crate::schedule::{compute_next_fire_time, is_misfire, truncate_to_second};
use crate::store::Store;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The trigger was claimed by another node or changed under us
    Abstained,
    Fired {
        outcome: TriggerOutcome,
        run: Option<RunOutcome>,
    },
}

/// Fire-time decision for one evaluation of a due trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirePlan {
    pub outcome: TriggerOutcome,
    pub misfire: bool,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// Decide outcome and new fire times for `trigger`, scheduled at `scheduled`
/// and evaluated at `now`
pub fn plan_firing(
    trigger: &Trigger,
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    misfire_threshold: Duration,
) -> FirePlan {
    if !is_misfire(now, scheduled, misfire_threshold) {
        return FirePlan {
            outcome: TriggerOutcome::Fired,
            misfire: false,
            last_fire_time: Some(scheduled),
            next_fire_time: compute_next_fire_time(trigger, Some(scheduled)),
        };
    }

    match trigger.misfire_strategy {
        MisfireStrategy::Ignore => FirePlan {
            outcome: TriggerOutcome::MisfireIgnored,
            misfire: true,
            last_fire_time: trigger.last_fire_time,
            next_fire_time: compute_next_fire_time(trigger, Some(now)),
        },
        MisfireStrategy::FireOnceNow => {
            let last = truncate_to_second(now);
            FirePlan {
                outcome: TriggerOutcome::MisfireFiredOnce,
                misfire: true,
                last_fire_time: Some(last),
                next_fire_time: compute_next_fire_time(trigger, Some(last)),
            }
        }
    }
}

pub struct ExecutionCoordinator {
    namespace: String,
    instance_name: String,
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    window: Arc<TriggerWindowCache>,
    runner: Arc<JobRunner>,
    misfire_threshold: Duration,
    lookahead_ms: i64,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        namespace: impl Into<String>,
        instance_name: impl Into<String>,
        store: Arc<dyn Store>,
        registry: Arc<PluginRegistry>,
        window: Arc<TriggerWindowCache>,
        runner: Arc<JobRunner>,
        misfire_threshold: Duration,
        lookahead_ms: i64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            instance_name: instance_name.into(),
            store,
            registry,
            window,
            runner,
            misfire_threshold,
            lookahead_ms,
        }
    }

    /// Fire `trigger` as observed in the window
    #[instrument(skip_all, fields(trigger_id = trigger.id, job_id = trigger.job_id, namespace = %self.namespace))]
    pub async fn fire(
        &self,
        trigger: Trigger,
        now: DateTime<Utc>,
        node: &NodeRecord,
    ) -> Result<FireOutcome, SchedulerError> {
        let Some(scheduled) = trigger.next_fire_time else {
            debug!("Trigger has no next fire time, nothing to fire");
            return Ok(FireOutcome::Abstained);
        };

        let current = if trigger.allow_concurrent {
            self.confirm_unfired(&trigger, scheduled, now).await?
        } else {
            self.claim(&trigger, scheduled, now).await?
        };
        let Some(trigger) = current else {
            return Ok(FireOutcome::Abstained);
        };

        let plan = plan_firing(&trigger, scheduled, now, self.misfire_threshold);
        let mut outcome = plan.outcome;
        let mut job = None;
        if outcome.runs_job() {
            match self.store.get_job(&self.namespace, trigger.job_id).await? {
                Some(found) if !found.disabled => job = Some(found),
                Some(_) => {
                    debug!("Job disabled, trigger advances without a run");
                    outcome = TriggerOutcome::Skipped;
                }
                None => {
                    warn!("Job of trigger not found, trigger advances without a run");
                    outcome = TriggerOutcome::Skipped;
                }
            }
        }

        let log = TriggerLog {
            id: 0,
            namespace: self.namespace.clone(),
            instance_name: self.instance_name.clone(),
            trigger_id: trigger.id,
            job_id: trigger.job_id,
            scheduled_fire_time: scheduled,
            actual_fire_time: now,
            misfire: plan.misfire,
            outcome,
            last_fire_time: plan.last_fire_time,
            next_fire_time: plan.next_fire_time,
            created_at: now,
        };
        let trigger_log_id = self.store.insert_trigger_log(&log).await?;

        let fired = outcome.runs_job();
        self.store
            .update_fire_time(
                &self.namespace,
                trigger.id,
                plan.last_fire_time,
                plan.next_fire_time,
                fired,
            )
            .await?;

        self.window.mark_fired(trigger.id, now);
        if fired {
            self.window.record_fire(trigger.id);
            telemetry::record_trigger_fired(&self.namespace);
        }
        if plan.misfire {
            telemetry::record_trigger_misfire(
                &self.namespace,
                &trigger.misfire_strategy.to_string(),
            );
        }
        info!(
            outcome = %outcome,
            scheduled = %scheduled,
            next_fire_time = ?plan.next_fire_time,
            "Trigger evaluated"
        );
        self.registry.notify_triggered(&trigger, outcome).await;
        self.refresh_window(trigger.id, now).await?;

        let run = match job {
            Some(job) => Some(
                self.runner
                    .run_loaded(
                        job,
                        now,
                        node,
                        RunSource::Trigger {
                            trigger_id: trigger.id,
                            trigger_log_id,
                        },
                    )
                    .await?,
            ),
            None => None,
        };

        Ok(FireOutcome::Fired { outcome, run })
    }

    /// Re-read a concurrent trigger and keep it only while `scheduled` is
    /// still its next fire time
    async fn confirm_unfired(
        &self,
        observed: &Trigger,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Trigger>, SchedulerError> {
        match self.store.get_trigger(&self.namespace, observed.id).await? {
            Some(current) if !current.disabled && current.next_fire_time == Some(scheduled) => {
                Ok(Some(current))
            }
            Some(current) => {
                debug!("Window entry is stale, scheduled time already handled");
                self.window
                    .refresh_entry(current, now, self.lookahead_ms)
                    .await;
                Ok(None)
            }
            None => {
                self.window.remove(observed.id).await;
                Ok(None)
            }
        }
    }

    /// Win the trigger's lock_version, then confirm nobody fired it meanwhile
    async fn claim(
        &self,
        observed: &Trigger,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Trigger>, SchedulerError> {
        let won = self
            .store
            .claim_trigger(&self.namespace, observed.id, observed.lock_version)
            .await?;
        if !won {
            debug!(lock_version = observed.lock_version, "Trigger claimed by another node");
            telemetry::record_claim_abstained(&self.namespace, "trigger");
            self.refresh_window(observed.id, now).await?;
            return Ok(None);
        }

        let current = self.store.get_trigger(&self.namespace, observed.id).await?;
        match current {
            Some(current)
                if !current.disabled
                    && current.fire_count == observed.fire_count
                    && current.next_fire_time == Some(scheduled) =>
            {
                Ok(Some(current))
            }
            Some(current) => {
                debug!("Trigger changed after claim, abstaining");
                self.window
                    .refresh_entry(current, now, self.lookahead_ms)
                    .await;
                Ok(None)
            }
            None => {
                self.window.remove(observed.id).await;
                Ok(None)
            }
        }
    }

    async fn refresh_window(&self, trigger_id: i64, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        match self.store.get_trigger(&self.namespace, trigger_id).await? {
            Some(trigger) => {
                self.window
                    .refresh_entry(trigger, now, self.lookahead_ms)
                    .await
            }
            None => self.window.remove(trigger_id).await,
        }
        Ok(())
    }

    /// Run `job` outside of any trigger, reusing claim, reentry and retry handling
    pub async fn run_now(
        &self,
        job: Job,
        now: DateTime<Utc>,
        node: &NodeRecord,
    ) -> Result<RunOutcome, SchedulerError> {
        Ok(self
            .runner
            .run_loaded(job, now, node, RunSource::Manual)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerSchedule;
    use chrono::TimeZone;

    fn interval_trigger(start: DateTime<Utc>, strategy: MisfireStrategy) -> Trigger {
        Trigger {
            id: 1,
            job_id: 1,
            namespace: "default".to_string(),
            disabled: false,
            schedule: TriggerSchedule::FixedInterval {
                interval_seconds: 60,
            },
            start_time: start,
            end_time: None,
            last_fire_time: None,
            next_fire_time: Some(start + Duration::seconds(60)),
            misfire_strategy: strategy,
            allow_concurrent: false,
            fire_count: 0,
            lock_version: 0,
            created_at: start,
            updated_at: start,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_on_time_firing_advances_from_scheduled() {
        let trigger = interval_trigger(t0(), MisfireStrategy::Ignore);
        let scheduled = t0() + Duration::seconds(60);
        let plan = plan_firing(
            &trigger,
            scheduled,
            scheduled + Duration::milliseconds(400),
            Duration::seconds(3),
        );

        assert_eq!(plan.outcome, TriggerOutcome::Fired);
        assert!(!plan.misfire);
        assert_eq!(plan.last_fire_time, Some(scheduled));
        assert_eq!(plan.next_fire_time, Some(t0() + Duration::seconds(120)));
    }

    #[test]
    fn test_ignored_misfire_keeps_last_and_skips_ahead() {
        let trigger = interval_trigger(t0(), MisfireStrategy::Ignore);
        let scheduled = t0() + Duration::seconds(60);
        let now = t0() + Duration::seconds(200);
        let plan = plan_firing(&trigger, scheduled, now, Duration::seconds(3));

        assert_eq!(plan.outcome, TriggerOutcome::MisfireIgnored);
        assert!(plan.misfire);
        assert_eq!(plan.last_fire_time, None);
        assert_eq!(plan.next_fire_time, Some(t0() + Duration::seconds(240)));
        assert!(!plan.outcome.runs_job());
    }

    #[test]
    fn test_fire_once_now_uses_truncated_now() {
        let trigger = interval_trigger(t0(), MisfireStrategy::FireOnceNow);
        let scheduled = t0() + Duration::seconds(60);
        let now = t0() + Duration::milliseconds(200_750);
        let plan = plan_firing(&trigger, scheduled, now, Duration::seconds(3));

        assert_eq!(plan.outcome, TriggerOutcome::MisfireFiredOnce);
        assert_eq!(plan.last_fire_time, Some(t0() + Duration::seconds(200)));
        assert_eq!(plan.next_fire_time, Some(t0() + Duration::seconds(240)));
    }

    #[test]
    fn test_threshold_boundary_is_not_a_misfire() {
        let trigger = interval_trigger(t0(), MisfireStrategy::Ignore);
        let scheduled = t0() + Duration::seconds(60);
        let plan = plan_firing(
            &trigger,
            scheduled,
            scheduled + Duration::seconds(3),
            Duration::seconds(3),
        );
        assert_eq!(plan.outcome, TriggerOutcome::Fired);
    }
}
