// Durable state shared by every scheduler node of a namespace
//
// All cross-node coordination goes through the conditional updates below:
// `claim_trigger`/`claim_job` increment a row's `lock_version` only if it still
// equals the version the caller observed, and report whether they did.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::errors::DatabaseError;
use crate::models::{Job, JobLog, JobType, NodeEvent, NodeRecord, NodeStatus, Trigger, TriggerLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Insert or refresh the row identified by (namespace, instance_name)
    async fn upsert_node(
        &self,
        namespace: &str,
        instance_name: &str,
        heartbeat_interval_ms: i64,
        config: Option<serde_json::Value>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, DatabaseError>;

    /// Stamp `now` as the node's last heartbeat; false when the row is gone
    async fn heartbeat(&self, node: &NodeRecord, now: DateTime<Utc>)
        -> Result<bool, DatabaseError>;

    async fn list_available_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, DatabaseError>;

    async fn list_all_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeStatus>, DatabaseError>;

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------

    /// Triggers whose stored definition cannot produce a fire time
    /// (non-positive interval, missing cron expression, unknown type code)
    async fn count_invalid_triggers(&self, namespace: &str) -> Result<u64, DatabaseError>;

    /// Null `next_fire_time` of every structurally invalid trigger
    async fn invalidate_triggers(&self, namespace: &str) -> Result<u64, DatabaseError>;

    /// Jobs with an unknown type code, a missing detail row, or a type outside `supported`
    async fn count_invalid_jobs(
        &self,
        namespace: &str,
        supported: &[JobType],
    ) -> Result<u64, DatabaseError>;

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    async fn list_enabled_triggers(&self, namespace: &str) -> Result<Vec<Trigger>, DatabaseError>;

    async fn list_enabled_cron_triggers(
        &self,
        namespace: &str,
    ) -> Result<Vec<Trigger>, DatabaseError>;

    /// Enabled triggers with `next_fire_time <= now + within_ms`, earliest first
    async fn list_due_triggers(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        within_ms: i64,
        max_rows: i64,
    ) -> Result<Vec<Trigger>, DatabaseError>;

    async fn get_trigger(&self, namespace: &str, id: i64)
        -> Result<Option<Trigger>, DatabaseError>;

    /// Set `next_fire_time` only while `last_fire_time` still equals `expected_last`
    async fn update_next_fire_time(
        &self,
        namespace: &str,
        id: i64,
        expected_last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// Persist the result of a firing; `fired` increments `fire_count`
    async fn update_fire_time(
        &self,
        namespace: &str,
        id: i64,
        last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        fired: bool,
    ) -> Result<(), DatabaseError>;

    async fn claim_trigger(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError>;

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    async fn claim_job(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError>;

    async fn get_job(&self, namespace: &str, id: i64) -> Result<Option<Job>, DatabaseError>;

    async fn list_all_jobs(&self, namespace: &str) -> Result<Vec<Job>, DatabaseError>;

    async fn update_job_data(
        &self,
        namespace: &str,
        id: i64,
        job_data: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Increment `run_count` by one
    async fn update_job_run_count(&self, namespace: &str, id: i64) -> Result<(), DatabaseError>;

    /// Insert job, detail and trigger atomically. The `id` fields of both
    /// arguments and `trigger.job_id` are ignored; generated ids are returned.
    async fn add_job(&self, job: &Job, trigger: &Trigger) -> Result<(i64, i64), DatabaseError>;

    /// Remove jobs with their triggers and details atomically
    async fn delete_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError>;

    async fn enable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError>;

    async fn disable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError>;

    /// Clear the disabled flag; `next_fire_time` is refilled by calibration
    async fn enable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError>;

    /// Set the disabled flag and null `next_fire_time`
    async fn disable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError>;

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    async fn insert_node_log(
        &self,
        namespace: &str,
        instance_name: &str,
        event: NodeEvent,
        message: Option<&str>,
    ) -> Result<i64, DatabaseError>;

    async fn insert_trigger_log(&self, log: &TriggerLog) -> Result<i64, DatabaseError>;

    async fn insert_job_log(&self, log: &JobLog) -> Result<i64, DatabaseError>;

    /// Overwrite status, retry count, error, after-snapshot and end time of a job log
    async fn update_job_log(&self, log: &JobLog) -> Result<(), DatabaseError>;
}
