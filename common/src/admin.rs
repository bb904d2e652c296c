// Job and trigger administration: validated creation, batch flag flips,
// deletion and read access

use crate::errors::{SchedulerError, ValidationError};
use crate::models::{
    Job, JobCreated, JobDetail, NewJob, NodeStatus, Trigger, TriggerSchedule,
};
use crate::schedule::{compute_next_fire_time, next_whole_second, validate_schedule};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

/// Administrative entry point over a store.
///
/// Changes reach running nodes through their next window reload and
/// calibration; no node is signalled directly.
#[derive(Clone)]
pub struct JobAdmin {
    store: Arc<dyn Store>,
}

impl JobAdmin {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate `request` and persist the job, its detail and its trigger together.
    ///
    /// A missing or past `start_time` becomes the next whole second after `now`.
    /// A disabled trigger is stored without a next fire time.
    #[instrument(skip(self, request), fields(namespace = %request.namespace, job_name = %request.name))]
    pub async fn add_job(
        &self,
        request: NewJob,
        now: DateTime<Utc>,
    ) -> Result<JobCreated, SchedulerError> {
        validate_new_job(&request)?;

        let start_time = match request.trigger.start_time {
            Some(start) if start >= now => start,
            _ => next_whole_second(now),
        };
        if let Some(end) = request.trigger.end_time {
            if end <= start_time {
                return Err(ValidationError::InvalidFieldValue {
                    field: "trigger.end_time".to_string(),
                    reason: "must be after start_time".to_string(),
                }
                .into());
            }
        }

        let job = Job {
            id: 0,
            namespace: request.namespace.clone(),
            name: request.name,
            disabled: request.disabled,
            allow_concurrent: request.allow_concurrent,
            max_reentry: request.max_reentry,
            max_retry_count: request.max_retry_count,
            is_update_data: request.is_update_data,
            job_data: request.job_data,
            run_count: 0,
            lock_version: 0,
            detail: request.detail,
            created_at: now,
            updated_at: now,
        };

        let mut trigger = Trigger {
            id: 0,
            job_id: 0,
            namespace: request.namespace,
            disabled: request.trigger.disabled,
            schedule: request.trigger.schedule,
            start_time,
            end_time: request.trigger.end_time,
            last_fire_time: None,
            next_fire_time: None,
            misfire_strategy: request.trigger.misfire_strategy,
            allow_concurrent: request.trigger.allow_concurrent,
            fire_count: 0,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        };
        if !trigger.disabled {
            trigger.next_fire_time = compute_next_fire_time(&trigger, None);
        }

        let (job_id, trigger_id) = self.store.add_job(&job, &trigger).await?;
        info!(job_id, trigger_id, next_fire_time = ?trigger.next_fire_time, "Job created");

        Ok(JobCreated {
            job_id,
            trigger_id,
            next_fire_time: trigger.next_fire_time,
        })
    }

    #[instrument(skip(self))]
    pub async fn enable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, SchedulerError> {
        Ok(self.store.enable_jobs(namespace, ids).await?)
    }

    #[instrument(skip(self))]
    pub async fn disable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, SchedulerError> {
        Ok(self.store.disable_jobs(namespace, ids).await?)
    }

    /// Re-enabled triggers get their next fire time at the next calibration
    #[instrument(skip(self))]
    pub async fn enable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, SchedulerError> {
        Ok(self.store.enable_triggers(namespace, ids).await?)
    }

    #[instrument(skip(self))]
    pub async fn disable_triggers(
        &self,
        namespace: &str,
        ids: &[i64],
    ) -> Result<u64, SchedulerError> {
        Ok(self.store.disable_triggers(namespace, ids).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, SchedulerError> {
        let deleted = self.store.delete_jobs(namespace, ids).await?;
        info!(deleted, "Jobs deleted");
        Ok(deleted)
    }

    pub async fn get_job(&self, namespace: &str, id: i64) -> Result<Option<Job>, SchedulerError> {
        Ok(self.store.get_job(namespace, id).await?)
    }

    pub async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.store.list_all_jobs(namespace).await?)
    }

    pub async fn get_trigger(
        &self,
        namespace: &str,
        id: i64,
    ) -> Result<Option<Trigger>, SchedulerError> {
        Ok(self.store.get_trigger(namespace, id).await?)
    }

    /// Every node row of the namespace with its availability at `now`
    pub async fn list_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeStatus>, SchedulerError> {
        Ok(self.store.list_all_nodes(namespace, now).await?)
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidFieldValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_new_job(request: &NewJob) -> Result<(), SchedulerError> {
    if request.namespace.trim().is_empty() {
        return Err(ValidationError::MissingField("namespace".to_string()).into());
    }
    if request.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name".to_string()).into());
    }
    if request.max_reentry < 0 {
        return Err(invalid("max_reentry", "must not be negative").into());
    }
    if request.max_retry_count < 0 {
        return Err(invalid("max_retry_count", "must not be negative").into());
    }
    if !request.job_data.is_object() {
        return Err(ValidationError::InvalidJson("job_data must be a JSON object".to_string()).into());
    }

    match &request.detail {
        JobDetail::Http(http) => {
            if http.url.trim().is_empty() {
                return Err(ValidationError::MissingField("detail.url".to_string()).into());
            }
            if http.timeout_ms <= 0 {
                return Err(invalid("detail.timeout_ms", "must be positive").into());
            }
        }
        JobDetail::Shell(shell) => {
            if shell.command.trim().is_empty() {
                return Err(ValidationError::MissingField("detail.command".to_string()).into());
            }
            if shell.timeout_ms < 0 {
                return Err(invalid("detail.timeout_ms", "must not be negative").into());
            }
        }
    }

    if let TriggerSchedule::Cron { expression } = &request.trigger.schedule {
        if expression.trim().is_empty() {
            return Err(ValidationError::MissingField("trigger.schedule.expression".to_string()).into());
        }
    }
    validate_schedule(&request.trigger.schedule)?;
    Ok(())
}
