// In-process Store used for embedding a single node and for tests
//
// Every method runs inside one critical section of a single mutex, which
// gives the composite operations (add/delete) and the conditional claims the
// same atomicity the Postgres store gets from transactions and row locks.

use super::Store;
use crate::errors::DatabaseError;
use crate::models::{
    Job, JobLog, JobType, NodeEvent, NodeLog, NodeRecord, NodeStatus, Trigger, TriggerLog,
    TriggerSchedule,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    nodes: Vec<NodeRecord>,
    jobs: BTreeMap<i64, Job>,
    triggers: BTreeMap<i64, Trigger>,
    node_logs: Vec<NodeLog>,
    trigger_logs: Vec<TriggerLog>,
    job_logs: BTreeMap<i64, JobLog>,
}

impl MemoryState {
    fn generate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn is_structurally_invalid(trigger: &Trigger) -> bool {
    match &trigger.schedule {
        TriggerSchedule::Cron { expression } => expression.trim().is_empty(),
        TriggerSchedule::FixedInterval { interval_seconds } => *interval_seconds <= 0,
    }
}

/// Store keeping all state in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn node_logs(&self) -> Vec<NodeLog> {
        self.state.lock().await.node_logs.clone()
    }

    pub async fn trigger_logs(&self) -> Vec<TriggerLog> {
        self.state.lock().await.trigger_logs.clone()
    }

    /// Job logs ordered by id
    pub async fn job_logs(&self) -> Vec<JobLog> {
        self.state.lock().await.job_logs.values().cloned().collect()
    }

    /// Overwrite a stored trigger, keyed by its id
    pub async fn put_trigger(&self, trigger: Trigger) {
        self.state.lock().await.triggers.insert(trigger.id, trigger);
    }

    /// Overwrite a stored job, keyed by its id
    pub async fn put_job(&self, job: Job) {
        self.state.lock().await.jobs.insert(job.id, job);
    }

    /// Change a node's heartbeat timestamp, e.g. to simulate a dead node
    pub async fn set_last_heartbeat(
        &self,
        namespace: &str,
        instance_name: &str,
        at: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock().await;
        match state
            .nodes
            .iter_mut()
            .find(|n| n.namespace == namespace && n.instance_name == instance_name)
        {
            Some(node) => {
                node.last_heartbeat_time = at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_node(
        &self,
        namespace: &str,
        instance_name: &str,
        heartbeat_interval_ms: i64,
        config: Option<serde_json::Value>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, DatabaseError> {
        let mut state = self.state.lock().await;

        if let Some(node) = state
            .nodes
            .iter_mut()
            .find(|n| n.namespace == namespace && n.instance_name == instance_name)
        {
            node.heartbeat_interval_ms = heartbeat_interval_ms;
            node.last_heartbeat_time = now;
            node.config = config;
            node.description = description.map(str::to_string);
            return Ok(node.clone());
        }

        let node = NodeRecord {
            id: state.generate_id(),
            namespace: namespace.to_string(),
            instance_name: instance_name.to_string(),
            heartbeat_interval_ms,
            last_heartbeat_time: now,
            config,
            description: description.map(str::to_string),
            created_at: now,
        };
        state.nodes.push(node.clone());
        Ok(node)
    }

    async fn heartbeat(
        &self,
        node: &NodeRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state
            .nodes
            .iter_mut()
            .find(|n| n.namespace == node.namespace && n.instance_name == node.instance_name)
        {
            Some(stored) => {
                stored.last_heartbeat_time = now;
                stored.heartbeat_interval_ms = node.heartbeat_interval_ms;
                stored.config = node.config.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_available_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.namespace == namespace && n.is_available_at(now))
            .cloned()
            .collect())
    }

    async fn list_all_nodes(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeStatus>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.namespace == namespace)
            .map(|n| NodeStatus {
                available: n.is_available_at(now),
                node: n.clone(),
            })
            .collect())
    }

    async fn count_invalid_triggers(&self, namespace: &str) -> Result<u64, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| t.namespace == namespace && is_structurally_invalid(t))
            .count() as u64)
    }

    async fn invalidate_triggers(&self, namespace: &str) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for trigger in state.triggers.values_mut() {
            if trigger.namespace == namespace
                && trigger.next_fire_time.is_some()
                && is_structurally_invalid(trigger)
            {
                trigger.next_fire_time = None;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn count_invalid_jobs(
        &self,
        namespace: &str,
        supported: &[JobType],
    ) -> Result<u64, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.namespace == namespace && !supported.contains(&j.job_type()))
            .count() as u64)
    }

    async fn list_enabled_triggers(&self, namespace: &str) -> Result<Vec<Trigger>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| t.namespace == namespace && !t.disabled)
            .cloned()
            .collect())
    }

    async fn list_enabled_cron_triggers(
        &self,
        namespace: &str,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| {
                t.namespace == namespace
                    && !t.disabled
                    && matches!(t.schedule, TriggerSchedule::Cron { .. })
            })
            .cloned()
            .collect())
    }

    async fn list_due_triggers(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        within_ms: i64,
        max_rows: i64,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        let horizon = now + Duration::milliseconds(within_ms);
        let state = self.state.lock().await;
        let mut due: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| {
                t.namespace == namespace
                    && !t.disabled
                    && t.next_fire_time.is_some_and(|next| next <= horizon)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_fire_time, t.id));
        due.truncate(max_rows.max(0) as usize);
        Ok(due)
    }

    async fn get_trigger(
        &self,
        namespace: &str,
        id: i64,
    ) -> Result<Option<Trigger>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .triggers
            .get(&id)
            .filter(|t| t.namespace == namespace)
            .cloned())
    }

    async fn update_next_fire_time(
        &self,
        namespace: &str,
        id: i64,
        expected_last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.triggers.get_mut(&id) {
            Some(trigger)
                if trigger.namespace == namespace && trigger.last_fire_time == expected_last =>
            {
                trigger.next_fire_time = next;
                trigger.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_fire_time(
        &self,
        namespace: &str,
        id: i64,
        last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        fired: bool,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        let trigger = state
            .triggers
            .get_mut(&id)
            .filter(|t| t.namespace == namespace)
            .ok_or_else(|| DatabaseError::NotFound(format!("trigger {}", id)))?;
        trigger.last_fire_time = last;
        trigger.next_fire_time = next;
        if fired {
            trigger.fire_count += 1;
        }
        trigger.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_trigger(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.triggers.get_mut(&id) {
            Some(trigger)
                if trigger.namespace == namespace
                    && trigger.lock_version == expected_lock_version =>
            {
                trigger.lock_version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_job(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.namespace == namespace && job.lock_version == expected_lock_version => {
                job.lock_version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_job(&self, namespace: &str, id: i64) -> Result<Option<Job>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).filter(|j| j.namespace == namespace).cloned())
    }

    async fn list_all_jobs(&self, namespace: &str) -> Result<Vec<Job>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn update_job_data(
        &self,
        namespace: &str,
        id: i64,
        job_data: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .filter(|j| j.namespace == namespace)
            .ok_or_else(|| DatabaseError::NotFound(format!("job {}", id)))?;
        job.job_data = job_data.clone();
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn update_job_run_count(&self, namespace: &str, id: i64) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .filter(|j| j.namespace == namespace)
            .ok_or_else(|| DatabaseError::NotFound(format!("job {}", id)))?;
        job.run_count += 1;
        Ok(())
    }

    async fn add_job(&self, job: &Job, trigger: &Trigger) -> Result<(i64, i64), DatabaseError> {
        let mut state = self.state.lock().await;

        if state
            .jobs
            .values()
            .any(|j| j.namespace == job.namespace && j.name == job.name)
        {
            return Err(DatabaseError::DuplicateKey(format!(
                "job '{}' already exists in namespace '{}'",
                job.name, job.namespace
            )));
        }

        let job_id = state.generate_id();
        let trigger_id = state.generate_id();

        let mut job = job.clone();
        job.id = job_id;
        let mut trigger = trigger.clone();
        trigger.id = trigger_id;
        trigger.job_id = job_id;

        state.jobs.insert(job_id, job);
        state.triggers.insert(trigger_id, trigger);
        Ok((job_id, trigger_id))
    }

    async fn delete_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut deleted = 0;
        for id in ids {
            let owned = state.jobs.get(id).is_some_and(|j| j.namespace == namespace);
            if owned {
                state.jobs.remove(id);
                state.triggers.retain(|_, t| t.job_id != *id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn enable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for job in state.jobs.values_mut() {
            if job.namespace == namespace && ids.contains(&job.id) {
                job.disabled = false;
                job.updated_at = Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn disable_jobs(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for job in state.jobs.values_mut() {
            if job.namespace == namespace && ids.contains(&job.id) {
                job.disabled = true;
                job.updated_at = Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn enable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for trigger in state.triggers.values_mut() {
            if trigger.namespace == namespace && ids.contains(&trigger.id) {
                trigger.disabled = false;
                trigger.updated_at = Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn disable_triggers(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for trigger in state.triggers.values_mut() {
            if trigger.namespace == namespace && ids.contains(&trigger.id) {
                trigger.disabled = true;
                trigger.next_fire_time = None;
                trigger.updated_at = Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn insert_node_log(
        &self,
        namespace: &str,
        instance_name: &str,
        event: NodeEvent,
        message: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let mut state = self.state.lock().await;
        let id = state.generate_id();
        state.node_logs.push(NodeLog {
            id,
            namespace: namespace.to_string(),
            instance_name: instance_name.to_string(),
            event,
            message: message.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn insert_trigger_log(&self, log: &TriggerLog) -> Result<i64, DatabaseError> {
        let mut state = self.state.lock().await;
        let id = state.generate_id();
        let mut log = log.clone();
        log.id = id;
        state.trigger_logs.push(log);
        Ok(id)
    }

    async fn insert_job_log(&self, log: &JobLog) -> Result<i64, DatabaseError> {
        let mut state = self.state.lock().await;
        let id = state.generate_id();
        let mut log = log.clone();
        log.id = id;
        state.job_logs.insert(id, log);
        Ok(id)
    }

    async fn update_job_log(&self, log: &JobLog) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        let stored = state
            .job_logs
            .get_mut(&log.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("job log {}", log.id)))?;
        stored.status = log.status;
        stored.retry_count = log.retry_count;
        stored.error = log.error.clone();
        stored.after_job_data = log.after_job_data.clone();
        stored.end_time = log.end_time;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDetail, MisfireStrategy, ShellJobDetail};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn job() -> Job {
        Job {
            id: 0,
            namespace: "default".to_string(),
            name: "cleanup".to_string(),
            disabled: false,
            allow_concurrent: false,
            max_reentry: 0,
            max_retry_count: 1,
            is_update_data: false,
            job_data: serde_json::json!({}),
            run_count: 0,
            lock_version: 0,
            detail: JobDetail::Shell(ShellJobDetail {
                command: "true".to_string(),
                args: vec![],
                working_dir: None,
                timeout_ms: 1_000,
            }),
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn trigger(interval_seconds: i64) -> Trigger {
        Trigger {
            id: 0,
            job_id: 0,
            namespace: "default".to_string(),
            disabled: false,
            schedule: TriggerSchedule::FixedInterval { interval_seconds },
            start_time: t0(),
            end_time: None,
            last_fire_time: None,
            next_fire_time: Some(t0() + Duration::seconds(interval_seconds.max(1))),
            misfire_strategy: MisfireStrategy::Ignore,
            allow_concurrent: false,
            fire_count: 0,
            lock_version: 0,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[tokio::test]
    async fn test_upsert_node_is_idempotent() {
        let store = MemoryStore::new();
        let first = store
            .upsert_node("default", "node-a", 3_000, None, None, t0())
            .await
            .unwrap();
        let second = store
            .upsert_node("default", "node-a", 3_000, None, Some("again"), t0())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.description.as_deref(), Some("again"));
        assert_eq!(store.list_all_nodes("default", t0()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_trigger_only_succeeds_for_observed_version() {
        let store = MemoryStore::new();
        let (_, trigger_id) = store.add_job(&job(), &trigger(60)).await.unwrap();

        assert!(store.claim_trigger("default", trigger_id, 0).await.unwrap());
        assert!(!store.claim_trigger("default", trigger_id, 0).await.unwrap());
        assert!(store.claim_trigger("default", trigger_id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_job_rejects_duplicate_name() {
        let store = MemoryStore::new();
        store.add_job(&job(), &trigger(60)).await.unwrap();
        let err = store.add_job(&job(), &trigger(60)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_delete_jobs_removes_triggers() {
        let store = MemoryStore::new();
        let (job_id, trigger_id) = store.add_job(&job(), &trigger(60)).await.unwrap();

        assert_eq!(store.delete_jobs("default", &[job_id]).await.unwrap(), 1);
        assert!(store.get_job("default", job_id).await.unwrap().is_none());
        assert!(store.get_trigger("default", trigger_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_triggers_nulls_non_positive_interval() {
        let store = MemoryStore::new();
        let (_, trigger_id) = store.add_job(&job(), &trigger(0)).await.unwrap();

        assert_eq!(store.count_invalid_triggers("default").await.unwrap(), 1);
        assert_eq!(store.invalidate_triggers("default").await.unwrap(), 1);
        let stored = store.get_trigger("default", trigger_id).await.unwrap().unwrap();
        assert!(stored.next_fire_time.is_none());
    }

    #[tokio::test]
    async fn test_update_next_fire_time_checks_last_fire_time() {
        let store = MemoryStore::new();
        let (_, trigger_id) = store.add_job(&job(), &trigger(60)).await.unwrap();
        let next = Some(t0() + Duration::seconds(120));

        assert!(!store
            .update_next_fire_time("default", trigger_id, Some(t0()), next)
            .await
            .unwrap());
        assert!(store
            .update_next_fire_time("default", trigger_id, None, next)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_due_triggers_respects_window_and_cap() {
        let store = MemoryStore::new();
        for (i, interval) in [10, 20, 30].into_iter().enumerate() {
            let mut j = job();
            j.name = format!("job-{}", i);
            store.add_job(&j, &trigger(interval)).await.unwrap();
        }

        let due = store
            .list_due_triggers("default", t0(), 20_000, 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 2);

        let capped = store
            .list_due_triggers("default", t0(), 60_000, 1)
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].next_fire_time, Some(t0() + Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_disable_triggers_clears_next_fire_time() {
        let store = MemoryStore::new();
        let (_, trigger_id) = store.add_job(&job(), &trigger(60)).await.unwrap();

        assert_eq!(store.disable_triggers("default", &[trigger_id]).await.unwrap(), 1);
        let stored = store.get_trigger("default", trigger_id).await.unwrap().unwrap();
        assert!(stored.disabled);
        assert!(stored.next_fire_time.is_none());
    }
}
