// Listener plugins notified about node, trigger and job events
//
// Listener errors never reach the scheduler: the registry logs them and
// moves on to the next listener.

use crate::models::{Job, JobLog, NodeRecord, Trigger, TriggerOutcome};
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SchedulerListener: Send + Sync {
    async fn on_started(&self, _node: &NodeRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_paused(&self, _node: &NodeRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_resume(&self, _node: &NodeRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _node: &NodeRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// A duty or firing failed with a persistence or execution error
    async fn on_error_event(&self, _node: &NodeRecord, _error: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TriggerListener: Send + Sync {
    /// Called once per firing with the trigger as persisted afterwards
    async fn on_triggered(
        &self,
        trigger: &Trigger,
        outcome: TriggerOutcome,
    ) -> anyhow::Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn on_start_run(&self, _job: &Job, _log: &JobLog) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_end_run(&self, _job: &Job, _log: &JobLog) -> anyhow::Result<()> {
        Ok(())
    }

    /// `attempt` is the 1-based attempt that just failed
    async fn on_retry_run(&self, _job: &Job, _log: &JobLog, _attempt: u32) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes every event to the tracing subscriber
pub struct LoggingListener;

#[async_trait]
impl SchedulerListener for LoggingListener {
    async fn on_started(&self, node: &NodeRecord) -> anyhow::Result<()> {
        tracing::info!(namespace = %node.namespace, instance = %node.instance_name, "Scheduler node started");
        Ok(())
    }

    async fn on_paused(&self, node: &NodeRecord) -> anyhow::Result<()> {
        tracing::info!(namespace = %node.namespace, instance = %node.instance_name, "Scheduler node paused");
        Ok(())
    }

    async fn on_resume(&self, node: &NodeRecord) -> anyhow::Result<()> {
        tracing::info!(namespace = %node.namespace, instance = %node.instance_name, "Scheduler node resumed");
        Ok(())
    }

    async fn on_stop(&self, node: &NodeRecord) -> anyhow::Result<()> {
        tracing::info!(namespace = %node.namespace, instance = %node.instance_name, "Scheduler node stopped");
        Ok(())
    }

    async fn on_error_event(&self, node: &NodeRecord, error: &str) -> anyhow::Result<()> {
        tracing::error!(
            namespace = %node.namespace,
            instance = %node.instance_name,
            error = error,
            "Scheduler node error"
        );
        Ok(())
    }
}

#[async_trait]
impl TriggerListener for LoggingListener {
    async fn on_triggered(&self, trigger: &Trigger, outcome: TriggerOutcome) -> anyhow::Result<()> {
        tracing::info!(
            trigger_id = trigger.id,
            job_id = trigger.job_id,
            outcome = %outcome,
            last_fire_time = ?trigger.last_fire_time,
            next_fire_time = ?trigger.next_fire_time,
            "Trigger fired"
        );
        Ok(())
    }
}

#[async_trait]
impl JobListener for LoggingListener {
    async fn on_start_run(&self, job: &Job, log: &JobLog) -> anyhow::Result<()> {
        tracing::info!(job_id = job.id, job_name = %job.name, job_log_id = log.id, "Job run started");
        Ok(())
    }

    async fn on_end_run(&self, job: &Job, log: &JobLog) -> anyhow::Result<()> {
        tracing::info!(
            job_id = job.id,
            job_name = %job.name,
            job_log_id = log.id,
            status = %log.status,
            attempts = log.retry_count,
            "Job run finished"
        );
        Ok(())
    }

    async fn on_retry_run(&self, job: &Job, log: &JobLog, attempt: u32) -> anyhow::Result<()> {
        tracing::warn!(
            job_id = job.id,
            job_name = %job.name,
            job_log_id = log.id,
            attempt,
            error = ?log.error,
            "Job attempt failed, retrying"
        );
        Ok(())
    }
}
