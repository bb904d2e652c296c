// Postgres-backed Store delegating to the repository layer

use super::Store;
use crate::db::repositories::{JobRepository, LogRepository, NodeRepository, TriggerRepository};
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{
    Job, JobLog, JobType, NodeEvent, NodeRecord, NodeStatus, Trigger, TriggerLog, TriggerType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub struct PgStore {
    nodes: NodeRepository,
    jobs: JobRepository,
    triggers: TriggerRepository,
    logs: LogRepository,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            nodes: NodeRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            triggers: TriggerRepository::new(pool.clone()),
            logs: LogRepository::new(pool),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_node(
        &self,
        namespace: &str,
        instance_name: &str,
        heartbeat_interval_ms: i64,
        config: Option<serde_json::Value>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, DatabaseError> {
        self.nodes
            .upsert(
                namespace,
                instance_name,
                heartbeat_interval_ms,
                config,
                description,
                now,
            )
            .await
    }

    async fn heartbeat(
        &self,
        node: &NodeRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.nodes.heartbeat(node, now).await
    }

    async fn list_available_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, DatabaseError> {
        let nodes = self.nodes.find_by_namespace(namespace).await?;
        Ok(nodes.into_iter().filter(|n| n.is_available_at(now)).collect())
    }

    async fn list_all_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeStatus>, DatabaseError> {
        let nodes = self.nodes.find_by_namespace(namespace).await?;
        Ok(nodes
            .into_iter()
            .map(|node| NodeStatus {
                available: node.is_available_at(now),
                node,
            })
            .collect())
    }

    async fn count_invalid_triggers(&self, namespace: &str) -> Result<u64, DatabaseError> {
        self.triggers.count_invalid(namespace).await
    }

    async fn invalidate_triggers(&self, namespace: &str) -> Result<u64, DatabaseError> {
        self.triggers.invalidate(namespace).await
    }

    async fn count_invalid_jobs(
        &self,
        namespace: &str,
        supported: &[JobType],
    ) -> Result<u64, DatabaseError> {
        self.jobs.count_invalid(namespace, supported).await
    }

    async fn list_enabled_triggers(&self, namespace: &str) -> Result<Vec<Trigger>, DatabaseError> {
        self.triggers.find_enabled(namespace, None).await
    }

    async fn list_enabled_cron_triggers(
        &self,
        namespace: &str,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        self.triggers
            .find_enabled(namespace, Some(TriggerType::Cron))
            .await
    }

    async fn list_due_triggers(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        within_ms: i64,
        max_rows: i64,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        self.triggers
            .find_due(namespace, now, within_ms, max_rows)
            .await
    }

    async fn get_trigger(
        &self,
        namespace: &str,
        id: i64,
    ) -> Result<Option<Trigger>, DatabaseError> {
        self.triggers.find_by_id(namespace, id).await
    }

    async fn update_next_fire_time(
        &self,
        namespace: &str,
        id: i64,
        expected_last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        self.triggers
            .update_next_fire_time(namespace, id, expected_last, next)
            .await
    }

    async fn update_fire_time(
        &self,
        namespace: &str,
        id: i64,
        last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        fired: bool,
    ) -> Result<(), DatabaseError> {
        self.triggers
            .update_fire_time(namespace, id, last, next, fired)
            .await
    }

    async fn claim_trigger(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError> {
        self.triggers
            .claim(namespace, id, expected_lock_version)
            .await
    }

    async fn claim_job(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError> {
        self.jobs.claim(namespace, id, expected_lock_version).await
    }

    async fn get_job(&self, namespace: &str, id: i64) -> Result<Option<Job>, DatabaseError> {
        self.jobs.find_by_id(namespace, id).await
    }

    async fn list_all_jobs(&self, namespace: &str) -> Result<Vec<Job>, DatabaseError> {
        self.jobs.find_by_namespace(namespace).await
    }

    async fn update_job_data(
        &self,
        namespace: &str,
        id: i64,
        job_data: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.jobs.update_data(namespace, id, job_data).await
    }

    async fn update_job_run_count(&self, namespace: &str, id: i64) -> Result<(), DatabaseError> {
        self.jobs.increment_run_count(namespace, id).await
    }

    async fn add_job(&self, job: &Job, trigger: &Trigger) -> Result<(i64, i64), DatabaseError> {
        self.jobs.create_with_trigger(job, trigger).await
    }

    async fn delete_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.jobs.delete_many(namespace, ids).await
    }

    async fn enable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.jobs.set_disabled(namespace, ids, false).await
    }

    async fn disable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.jobs.set_disabled(namespace, ids, true).await
    }

    async fn enable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.triggers.set_disabled(namespace, ids, false).await
    }

    async fn disable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.triggers.set_disabled(namespace, ids, true).await
    }

    async fn insert_node_log(
        &self,
        namespace: &str,
        instance_name: &str,
        event: NodeEvent,
        message: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        self.nodes
            .insert_log(namespace, instance_name, event, message)
            .await
    }

    async fn insert_trigger_log(&self, log: &TriggerLog) -> Result<i64, DatabaseError> {
        self.logs.insert_trigger_log(log).await
    }

    async fn insert_job_log(&self, log: &JobLog) -> Result<i64, DatabaseError> {
        self.logs.insert_job_log(log).await
    }

    async fn update_job_log(&self, log: &JobLog) -> Result<(), DatabaseError> {
        self.logs.update_job_log(log).await
    }
}
