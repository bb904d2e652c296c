// Executor module for job execution
// Provides the plugin trait and the built-in HTTP and shell executors

pub mod http;
pub mod shell;

pub use http::HttpJobExecutor;
pub use shell::ShellJobExecutor;

use crate::errors::ExecutionError;
use crate::models::{Job, JobType, NodeRecord};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Runs the body of a job; called once per attempt
///
/// An executor may mutate `job.job_data`; the runner persists the change when
/// the job has `is_update_data` set.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn supports(&self, job_type: JobType) -> bool;

    async fn execute(
        &self,
        now: DateTime<Utc>,
        job: &mut Job,
        node: &NodeRecord,
        store: &dyn Store,
    ) -> Result<(), ExecutionError>;
}

/// Store `value` under `key` in the job's data, turning non-object data into an object
pub(crate) fn put_job_data(job: &mut Job, key: &str, value: serde_json::Value) {
    if !job.job_data.is_object() {
        job.job_data = serde_json::json!({});
    }
    if let Some(map) = job.job_data.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}
