// Explicit registry of executor and listener plugins handed to a node

use crate::executor::JobExecutor;
use crate::listener::{JobListener, SchedulerListener, TriggerListener};
use crate::models::{Job, JobLog, JobType, NodeRecord, Trigger, TriggerOutcome};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    executors: Vec<Arc<dyn JobExecutor>>,
    scheduler_listeners: Vec<Arc<dyn SchedulerListener>>,
    trigger_listeners: Vec<Arc<dyn TriggerListener>>,
    job_listeners: Vec<Arc<dyn JobListener>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn with_scheduler_listener(mut self, listener: Arc<dyn SchedulerListener>) -> Self {
        self.scheduler_listeners.push(listener);
        self
    }

    pub fn with_trigger_listener(mut self, listener: Arc<dyn TriggerListener>) -> Self {
        self.trigger_listeners.push(listener);
        self
    }

    pub fn with_job_listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.job_listeners.push(listener);
        self
    }

    /// First registered executor supporting `job_type`
    pub fn executor_for(&self, job_type: JobType) -> Option<Arc<dyn JobExecutor>> {
        self.executors
            .iter()
            .find(|e| e.supports(job_type))
            .cloned()
    }

    pub fn supported_job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.executor_for(*t).is_some())
            .collect()
    }

    pub async fn notify_started(&self, node: &NodeRecord) {
        for listener in &self.scheduler_listeners {
            if let Err(e) = listener.on_started(node).await {
                tracing::warn!(error = %e, event = "on_started", "Scheduler listener failed");
            }
        }
    }

    pub async fn notify_paused(&self, node: &NodeRecord) {
        for listener in &self.scheduler_listeners {
            if let Err(e) = listener.on_paused(node).await {
                tracing::warn!(error = %e, event = "on_paused", "Scheduler listener failed");
            }
        }
    }

    pub async fn notify_resumed(&self, node: &NodeRecord) {
        for listener in &self.scheduler_listeners {
            if let Err(e) = listener.on_resume(node).await {
                tracing::warn!(error = %e, event = "on_resume", "Scheduler listener failed");
            }
        }
    }

    pub async fn notify_stopped(&self, node: &NodeRecord) {
        for listener in &self.scheduler_listeners {
            if let Err(e) = listener.on_stop(node).await {
                tracing::warn!(error = %e, event = "on_stop", "Scheduler listener failed");
            }
        }
    }

    pub async fn notify_error(&self, node: &NodeRecord, error: &str) {
        for listener in &self.scheduler_listeners {
            if let Err(e) = listener.on_error_event(node, error).await {
                tracing::warn!(error = %e, event = "on_error_event", "Scheduler listener failed");
            }
        }
    }

    pub async fn notify_triggered(&self, trigger: &Trigger, outcome: TriggerOutcome) {
        for listener in &self.trigger_listeners {
            if let Err(e) = listener.on_triggered(trigger, outcome).await {
                tracing::warn!(
                    error = %e,
                    trigger_id = trigger.id,
                    "Trigger listener failed"
                );
            }
        }
    }

    pub async fn notify_job_start(&self, job: &Job, log: &JobLog) {
        for listener in &self.job_listeners {
            if let Err(e) = listener.on_start_run(job, log).await {
                tracing::warn!(error = %e, job_id = job.id, event = "on_start_run", "Job listener failed");
            }
        }
    }

    pub async fn notify_job_retry(&self, job: &Job, log: &JobLog, attempt: u32) {
        for listener in &self.job_listeners {
            if let Err(e) = listener.on_retry_run(job, log, attempt).await {
                tracing::warn!(error = %e, job_id = job.id, event = "on_retry_run", "Job listener failed");
            }
        }
    }

    pub async fn notify_job_end(&self, job: &Job, log: &JobLog) {
        for listener in &self.job_listeners {
            if let Err(e) = listener.on_end_run(job, log).await {
                tracing::warn!(error = %e, job_id = job.id, event = "on_end_run", "Job listener failed");
            }
        }
    }
}
