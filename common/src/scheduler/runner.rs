// JobRunner: one job run with reentry control, optional job claim, retries
// and two-phase job logging

use crate::cache::TriggerWindowCache;
use crate::errors::{DatabaseError, ExecutionError};
use crate::models::{Job, JobLog, JobRunStatus, NodeRecord};
use crate::registry::PluginRegistry;
use crate::retry::RetryStrategy;
use crate::store::Store;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// What caused a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSource {
    Trigger { trigger_id: i64, trigger_log_id: i64 },
    Manual,
}

impl RunSource {
    fn trigger_id(&self) -> Option<i64> {
        match self {
            RunSource::Trigger { trigger_id, .. } => Some(*trigger_id),
            RunSource::Manual => None,
        }
    }

    fn trigger_log_id(&self) -> Option<i64> {
        match self {
            RunSource::Trigger { trigger_log_id, .. } => Some(*trigger_log_id),
            RunSource::Manual => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
    SkippedDisabled,
    /// The job already had `max_reentry + 1` runs active on this node
    SkippedReentry,
    /// Another node claimed the job first
    Abstained,
}

impl RunOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. } | RunOutcome::Failed { .. })
    }
}

pub struct JobRunner {
    namespace: String,
    instance_name: String,
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    window: Arc<TriggerWindowCache>,
    retry: Arc<dyn RetryStrategy>,
}

impl JobRunner {
    pub fn new(
        namespace: impl Into<String>,
        instance_name: impl Into<String>,
        store: Arc<dyn Store>,
        registry: Arc<PluginRegistry>,
        window: Arc<TriggerWindowCache>,
        retry: Arc<dyn RetryStrategy>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            instance_name: instance_name.into(),
            store,
            registry,
            window,
            retry,
        }
    }

    /// Run an already loaded job.
    ///
    /// `run_count` is incremented once every attempt has finished, whatever the
    /// outcome, as long as the job body was reached.
    #[instrument(skip_all, fields(job_id = job.id, job_name = %job.name, namespace = %self.namespace))]
    pub async fn run_loaded(
        &self,
        mut job: Job,
        now: DateTime<Utc>,
        node: &NodeRecord,
        source: RunSource,
    ) -> Result<RunOutcome, DatabaseError> {
        if job.disabled {
            debug!("Job disabled, skipping run");
            return Ok(RunOutcome::SkippedDisabled);
        }

        let Some(_reentry) = self.window.enter_job(job.id, job.effective_max_reentry()) else {
            warn!(
                max_reentry = job.effective_max_reentry(),
                "Reentry budget exhausted, skipping run"
            );
            self.log_skipped(&job, now, source).await?;
            telemetry::record_job_run(&self.namespace, "skipped");
            return Ok(RunOutcome::SkippedReentry);
        };

        if !job.allow_concurrent {
            if !self
                .store
                .claim_job(&self.namespace, job.id, job.lock_version)
                .await?
            {
                debug!(lock_version = job.lock_version, "Job claimed by another node");
                telemetry::record_claim_abstained(&self.namespace, "job");
                return Ok(RunOutcome::Abstained);
            }
            job.lock_version += 1;
        }

        let mut log = JobLog {
            id: 0,
            namespace: self.namespace.clone(),
            instance_name: self.instance_name.clone(),
            job_id: job.id,
            trigger_id: source.trigger_id(),
            trigger_log_id: source.trigger_log_id(),
            job_type: job.job_type(),
            status: JobRunStatus::Running,
            retry_count: 0,
            before_job_data: job.job_data.clone(),
            after_job_data: None,
            error: None,
            start_time: now,
            end_time: None,
        };
        log.id = self.store.insert_job_log(&log).await?;
        self.registry.notify_job_start(&job, &log).await;

        let started = Instant::now();
        let max_attempts = job.max_attempts();
        let (attempts, result) = self.execute_attempts(&mut job, now, node, &mut log).await;

        if let Err(e) = self
            .store
            .update_job_run_count(&self.namespace, job.id)
            .await
        {
            error!(error = %e, "Failed to update job run count");
        }
        self.window.record_job_run(job.id);

        if job.is_update_data && job.job_data != log.before_job_data {
            if let Err(e) = self
                .store
                .update_job_data(&self.namespace, job.id, &job.job_data)
                .await
            {
                error!(error = %e, "Failed to persist job data");
            }
        }

        let elapsed = started.elapsed();
        log.retry_count = attempts as i32;
        log.after_job_data = Some(job.job_data.clone());
        log.end_time = Some(
            log.start_time
                + Duration::from_std(elapsed).unwrap_or_else(|_| Duration::zero()),
        );
        let outcome = match result {
            Ok(()) => {
                log.status = JobRunStatus::Success;
                log.error = None;
                info!(attempts, "Job run succeeded");
                RunOutcome::Succeeded { attempts }
            }
            Err(e) => {
                log.status = JobRunStatus::Failed;
                log.error = Some(e.to_string());
                error!(attempts, max_attempts, error = %e, "Job run failed");
                RunOutcome::Failed {
                    attempts,
                    error: e.to_string(),
                }
            }
        };

        self.store.update_job_log(&log).await?;
        telemetry::record_job_run(&self.namespace, &log.status.to_string());
        telemetry::record_job_duration(&self.namespace, elapsed.as_secs_f64());
        self.registry.notify_job_end(&job, &log).await;

        Ok(outcome)
    }

    async fn execute_attempts(
        &self,
        job: &mut Job,
        now: DateTime<Utc>,
        node: &NodeRecord,
        log: &mut JobLog,
    ) -> (u32, Result<(), ExecutionError>) {
        let Some(executor) = self.registry.executor_for(job.job_type()) else {
            return (
                1,
                Err(ExecutionError::NoExecutor(job.job_type().to_string())),
            );
        };

        let max_attempts = job.max_attempts();
        let mut attempt = 1;
        loop {
            let result = AssertUnwindSafe(executor.execute(now, job, node, self.store.as_ref()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ExecutionError::Panicked(panic_message(&*panic))));

            let error = match result {
                Ok(()) => return (attempt, Ok(())),
                Err(e) => e,
            };
            if attempt >= max_attempts {
                return (attempt, Err(error));
            }

            warn!(attempt, max_attempts, error = %error, "Job attempt failed");
            log.retry_count = attempt as i32;
            log.error = Some(error.to_string());
            if let Err(e) = self.store.update_job_log(log).await {
                error!(error = %e, "Failed to record retry in job log");
            }
            self.registry.notify_job_retry(job, log, attempt).await;

            tokio::time::sleep(self.retry.delay_after(attempt)).await;
            attempt += 1;
        }
    }

    async fn log_skipped(
        &self,
        job: &Job,
        now: DateTime<Utc>,
        source: RunSource,
    ) -> Result<(), DatabaseError> {
        let log = JobLog {
            id: 0,
            namespace: self.namespace.clone(),
            instance_name: self.instance_name.clone(),
            job_id: job.id,
            trigger_id: source.trigger_id(),
            trigger_log_id: source.trigger_log_id(),
            job_type: job.job_type(),
            status: JobRunStatus::Skipped,
            retry_count: 0,
            before_job_data: job.job_data.clone(),
            after_job_data: None,
            error: Some("reentry budget exhausted".to_string()),
            start_time: now,
            end_time: Some(now),
        };
        self.store.insert_job_log(&log).await?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}
