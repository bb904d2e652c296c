// SchedulerNode: one member of a namespace's scheduler cluster
//
// The node owns its periodic duties, the worker pool running trigger firings
// and the local caches. Every cross-node decision is taken by the store.

use super::coordinator::ExecutionCoordinator;
use super::duty::{self, DutyHandle};
use super::lifecycle::{Lifecycle, NodeState};
use super::pool::WorkerPool;
use super::runner::{JobRunner, RunOutcome};
use crate::cache::{ClusterMembershipCache, TriggerWindowCache};
use crate::config::SchedulerConfig;
use crate::errors::{ExecutionError, LifecycleError, SchedulerError};
use crate::models::{NodeEvent, NodeRecord, TriggerSchedule};
use crate::registry::PluginRegistry;
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::schedule::{compute_next_fire_time, parse_cron_expression};
use crate::store::Store;
use crate::telemetry;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, instrument, warn};

/// Counts found by one integrity check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Non-positive intervals, missing cron expressions and unknown type codes
    pub invalid_triggers: u64,
    /// Enabled cron triggers whose expression does not parse
    pub unparsable_cron: u64,
    /// Jobs no registered executor can run
    pub invalid_jobs: u64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.invalid_triggers == 0 && self.unparsable_cron == 0 && self.invalid_jobs == 0
    }
}

struct NodeInner {
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    lifecycle: Lifecycle,
    record: RwLock<NodeRecord>,
    membership: ClusterMembershipCache,
    window: Arc<TriggerWindowCache>,
    pool: WorkerPool,
    coordinator: Arc<ExecutionCoordinator>,
    duties: Mutex<Vec<DutyHandle>>,
    duty_permits: Arc<Semaphore>,
    /// Held for a whole transition so its side effects never interleave
    transitions: Mutex<()>,
}

/// Cheap to clone; clones share the same node
#[derive(Clone)]
pub struct SchedulerNode {
    inner: Arc<NodeInner>,
}

impl SchedulerNode {
    pub fn new(config: SchedulerConfig, store: Arc<dyn Store>, registry: PluginRegistry) -> Self {
        let retry = Arc::new(ExponentialBackoff::from_scheduler_config(&config));
        Self::with_retry_strategy(config, store, registry, retry)
    }

    pub fn with_retry_strategy(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        registry: PluginRegistry,
        retry: Arc<dyn RetryStrategy>,
    ) -> Self {
        let registry = Arc::new(registry);
        let window = Arc::new(TriggerWindowCache::new());
        let runner = Arc::new(JobRunner::new(
            config.namespace.clone(),
            config.instance_name.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&window),
            retry,
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            config.namespace.clone(),
            config.instance_name.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&window),
            runner,
            config.misfire_threshold(),
            config.window_lookahead_ms(),
        ));

        let now = Utc::now();
        let record = NodeRecord {
            id: 0,
            namespace: config.namespace.clone(),
            instance_name: config.instance_name.clone(),
            heartbeat_interval_ms: config.heartbeat_interval_ms as i64,
            last_heartbeat_time: now,
            config: serde_json::to_value(&config).ok(),
            description: config.description.clone(),
            created_at: now,
        };

        let inner = NodeInner {
            pool: WorkerPool::new(config.worker_pool_size, config.worker_queue_capacity),
            duty_permits: Arc::new(Semaphore::new(config.duty_pool_size)),
            config,
            store,
            registry,
            lifecycle: Lifecycle::new(),
            record: RwLock::new(record),
            membership: ClusterMembershipCache::new(),
            window,
            coordinator,
            duties: Mutex::new(Vec::new()),
            transitions: Mutex::new(()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn state(&self) -> NodeState {
        self.inner.lifecycle.state()
    }

    /// Init -> Running: register the node and install the periodic duties.
    ///
    /// A failed registration is reported but does not fail the start; the
    /// register duty retries it.
    #[instrument(skip(self), fields(namespace = %self.inner.config.namespace, instance = %self.inner.config.instance_name))]
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let _transition = self.inner.transitions.lock().await;
        self.inner.lifecycle.start()?;

        if let Err(e) = self.register(Utc::now()).await {
            self.report_error("register", &e).await;
        }
        self.install_duties().await;
        self.record_event(NodeEvent::Started, None).await;

        let record = self.node_record().await;
        self.inner.registry.notify_started(&record).await;
        info!("Scheduler node started");
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.inner.config.namespace, instance = %self.inner.config.instance_name))]
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        let _transition = self.inner.transitions.lock().await;
        self.inner.lifecycle.pause()?;
        self.cancel_duties().await;
        self.record_event(NodeEvent::Paused, None).await;

        let record = self.node_record().await;
        self.inner.registry.notify_paused(&record).await;
        info!("Scheduler node paused");
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.inner.config.namespace, instance = %self.inner.config.instance_name))]
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        let _transition = self.inner.transitions.lock().await;
        self.inner.lifecycle.resume()?;
        self.install_duties().await;
        self.record_event(NodeEvent::Resumed, None).await;

        let record = self.node_record().await;
        self.inner.registry.notify_resumed(&record).await;
        info!("Scheduler node resumed");
        Ok(())
    }

    /// Cancel the duties and shut the worker pool down, interrupting job
    /// bodies still in flight
    #[instrument(skip(self), fields(namespace = %self.inner.config.namespace, instance = %self.inner.config.instance_name))]
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let _transition = self.inner.transitions.lock().await;
        let previous = self.inner.lifecycle.stop()?;
        self.cancel_duties().await;
        self.inner.pool.shutdown();
        self.record_event(NodeEvent::Stopped, None).await;

        let record = self.node_record().await;
        self.inner.registry.notify_stopped(&record).await;
        info!(previous_state = %previous, "Scheduler node stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Duties
    // ------------------------------------------------------------------

    /// Insert or refresh this node's row
    #[instrument(skip(self))]
    pub async fn register(&self, now: DateTime<Utc>) -> Result<NodeRecord, SchedulerError> {
        let config = &self.inner.config;
        let record = self
            .inner
            .store
            .upsert_node(
                &config.namespace,
                &config.instance_name,
                config.heartbeat_interval_ms as i64,
                serde_json::to_value(config).ok(),
                config.description.as_deref(),
                now,
            )
            .await?;

        debug!(node_id = record.id, "Scheduler node registered");
        *self.inner.record.write().await = record.clone();
        Ok(record)
    }

    /// Refresh the heartbeat; a node whose row disappeared registers again
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let record = self.node_record().await;
        if record.id == 0 {
            self.register(now).await?;
            return Ok(());
        }

        if self.inner.store.heartbeat(&record, now).await? {
            self.inner.record.write().await.last_heartbeat_time = now;
        } else {
            warn!("Node row missing on heartbeat, registering again");
            self.register(now).await?;
        }
        Ok(())
    }

    /// Count structurally invalid triggers and jobs; violations are only reported
    #[instrument(skip(self))]
    pub async fn check_integrity(&self) -> Result<IntegrityReport, SchedulerError> {
        let namespace = &self.inner.config.namespace;
        let store = &self.inner.store;

        let invalid_triggers = store.count_invalid_triggers(namespace).await?;
        let unparsable_cron = store
            .list_enabled_cron_triggers(namespace)
            .await?
            .iter()
            .filter(|t| match &t.schedule {
                TriggerSchedule::Cron { expression } => parse_cron_expression(expression).is_err(),
                TriggerSchedule::FixedInterval { .. } => false,
            })
            .count() as u64;
        let supported = self.inner.registry.supported_job_types();
        let invalid_jobs = store.count_invalid_jobs(namespace, &supported).await?;

        let report = IntegrityReport {
            invalid_triggers,
            unparsable_cron,
            invalid_jobs,
        };
        if report.is_clean() {
            debug!("Integrity check passed");
        } else {
            warn!(
                invalid_triggers,
                unparsable_cron, invalid_jobs, "Integrity check found invalid definitions"
            );
        }
        Ok(report)
    }

    /// Null the fire time of invalid triggers, then recompute the next fire
    /// time of every enabled trigger from its last fire time.
    ///
    /// A stored value is only moved later, never earlier, and every write is
    /// conditional on `last_fire_time` being unchanged. Returns the number of
    /// triggers updated.
    #[instrument(skip(self))]
    pub async fn calibrate_fire_times(&self, now: DateTime<Utc>) -> Result<u64, SchedulerError> {
        let namespace = &self.inner.config.namespace;
        let store = &self.inner.store;

        let mut updated = store.invalidate_triggers(namespace).await?;
        for trigger in store.list_enabled_triggers(namespace).await? {
            let candidate = compute_next_fire_time(&trigger, trigger.last_fire_time);
            let write = match (candidate, trigger.next_fire_time) {
                (None, Some(_)) => true,
                (Some(_), None) => true,
                (Some(candidate), Some(current)) => candidate > current,
                (None, None) => false,
            };
            if !write {
                continue;
            }

            if store
                .update_next_fire_time(namespace, trigger.id, trigger.last_fire_time, candidate)
                .await?
            {
                debug!(trigger_id = trigger.id, next_fire_time = ?candidate, "Fire time calibrated");
                updated += 1;
            }
        }

        if updated > 0 {
            info!(updated, at = %now, "Calibrated trigger fire times");
        }
        Ok(updated)
    }

    pub async fn reload_membership(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        Ok(self
            .inner
            .membership
            .reload(self.inner.store.as_ref(), &self.inner.config.namespace, now)
            .await?)
    }

    /// Replace the trigger window with the triggers due before the next tick
    #[instrument(skip(self))]
    pub async fn reload_trigger_window(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let config = &self.inner.config;
        let triggers = self
            .inner
            .store
            .list_due_triggers(
                &config.namespace,
                now,
                config.window_lookahead_ms(),
                config.max_window_rows,
            )
            .await?;

        let count = triggers.len();
        if count as i64 >= config.max_window_rows {
            warn!(
                max_window_rows = config.max_window_rows,
                "Trigger window hit its row cap, some due triggers wait for the next reload"
            );
        }
        self.inner.window.replace_all(triggers).await;
        telemetry::update_trigger_window_size(count);
        Ok(count)
    }

    /// Dispatch every due window trigger to the worker pool and wait for the
    /// firings up to `max_tick_wait_ms`. Paused and stopped nodes do not fire.
    /// Returns the number of firings dispatched.
    #[instrument(skip(self))]
    pub async fn evaluate_triggers(&self, now: DateTime<Utc>) -> usize {
        if matches!(self.state(), NodeState::Paused | NodeState::Stopped) {
            return 0;
        }

        let record = self.node_record().await;
        let mut handles = Vec::new();
        for trigger in self.inner.window.due(now).await {
            let Some(scheduled) = trigger.next_fire_time else {
                continue;
            };
            if self.inner.window.fired_in_same_second(trigger.id, now) {
                debug!(trigger_id = trigger.id, "Trigger already fired this second");
                continue;
            }
            let Some(guard) = self.inner.window.begin_firing(trigger.id, scheduled) else {
                debug!(trigger_id = trigger.id, "Firing already in flight");
                continue;
            };

            let trigger_id = trigger.id;
            let coordinator = Arc::clone(&self.inner.coordinator);
            let registry = Arc::clone(&self.inner.registry);
            let record = record.clone();
            let task = async move {
                let _guard = guard;
                if let Err(e) = coordinator.fire(trigger, now, &record).await {
                    error!(trigger_id, error = %e, "Trigger firing failed");
                    registry.notify_error(&record, &e.to_string()).await;
                }
            };

            match self.inner.pool.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(trigger_id, error = %e, "Trigger firing rejected"),
            }
        }

        let dispatched = handles.len();
        if dispatched > 0
            && tokio::time::timeout(
                self.inner.config.max_tick_wait(),
                futures::future::join_all(handles),
            )
            .await
            .is_err()
        {
            debug!(dispatched, "Tick wait elapsed, firings continue in the background");
        }
        dispatched
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Run a job immediately, outside of its trigger's timing
    #[instrument(skip(self))]
    pub async fn run_job_now(&self, job_id: i64) -> Result<RunOutcome, SchedulerError> {
        let state = self.state();
        if state == NodeState::Stopped {
            return Err(LifecycleError::InvalidTransition {
                action: "run a job on",
                state: state.to_string(),
            }
            .into());
        }

        let job = self
            .inner
            .store
            .get_job(&self.inner.config.namespace, job_id)
            .await?
            .ok_or(ExecutionError::JobNotFound(job_id))?;
        let record = self.node_record().await;
        self.inner
            .coordinator
            .run_now(job, Utc::now(), &record)
            .await
    }

    /// Nodes seen available at the last membership reload
    pub async fn cluster_nodes(&self) -> Vec<NodeRecord> {
        self.inner.membership.nodes().await
    }

    pub async fn node_record(&self) -> NodeRecord {
        self.inner.record.read().await.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn window(&self) -> &Arc<TriggerWindowCache> {
        &self.inner.window
    }

    /// Firings of `trigger_id` on this node that ran their job
    pub fn local_fire_count(&self, trigger_id: i64) -> u64 {
        self.inner.window.fire_count(trigger_id)
    }

    /// Runs of `job_id` completed on this node
    pub fn local_run_count(&self, job_id: i64) -> u64 {
        self.inner.window.job_run_count(job_id)
    }

    pub async fn active_duties(&self) -> Vec<&'static str> {
        self.inner
            .duties
            .lock()
            .await
            .iter()
            .filter(|d| !d.is_finished())
            .map(|d| d.name())
            .collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn install_duties(&self) {
        let config = &self.inner.config;
        let heartbeat = config.heartbeat_interval();
        let tick = config.tick_period();

        let handles = vec![
            self.guarded_duty(
                "register",
                Duration::from_millis(config.register_period_ms),
                |node| async move { node.register(Utc::now()).await.map(|_| ()) },
            ),
            self.guarded_duty("heartbeat", heartbeat, |node| async move {
                node.heartbeat(Utc::now()).await
            }),
            self.guarded_duty(
                "integrity",
                Duration::from_millis(config.integrity_period_ms),
                |node| async move { node.check_integrity().await.map(|_| ()) },
            ),
            self.guarded_duty(
                "calibration",
                Duration::from_millis(config.calibration_period_ms),
                |node| async move { node.calibrate_fire_times(Utc::now()).await.map(|_| ()) },
            ),
            self.guarded_duty("membership", heartbeat, |node| async move {
                node.reload_membership(Utc::now()).await.map(|_| ())
            }),
            self.guarded_duty("window", tick, |node| async move {
                node.reload_trigger_window(Utc::now()).await.map(|_| ())
            }),
            self.tick_duty(tick),
        ];

        let mut duties = self.inner.duties.lock().await;
        duties.clear();
        duties.extend(handles);
        debug!(duties = duties.len(), "Periodic duties installed");
    }

    async fn cancel_duties(&self) {
        let mut duties = self.inner.duties.lock().await;
        for duty in duties.iter() {
            duty.abort();
        }
        duties.clear();
    }

    /// Duties hold only a weak reference so a dropped node is not kept alive
    fn guarded_duty<F, Fut>(&self, name: &'static str, period: Duration, action: F) -> DutyHandle
    where
        F: Fn(SchedulerNode) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SchedulerError>> + Send + 'static,
    {
        let weak: Weak<NodeInner> = Arc::downgrade(&self.inner);
        duty::spawn_guarded(
            name,
            period,
            Arc::clone(&self.inner.duty_permits),
            move || {
                let run = weak.upgrade().map(|inner| {
                    let node = SchedulerNode { inner };
                    (node.clone(), action(node))
                });
                async move {
                    let Some((node, run)) = run else {
                        return;
                    };
                    if let Err(e) = run.await {
                        node.report_error(name, &e).await;
                    }
                }
            },
        )
    }

    fn tick_duty(&self, period: Duration) -> DutyHandle {
        let weak: Weak<NodeInner> = Arc::downgrade(&self.inner);
        duty::spawn_inline("tick", period, move || {
            let node = weak.upgrade().map(|inner| SchedulerNode { inner });
            async move {
                if let Some(node) = node {
                    node.evaluate_triggers(Utc::now()).await;
                }
            }
        })
    }

    async fn report_error(&self, duty: &str, e: &SchedulerError) {
        error!(duty, error = %e, "Scheduler duty failed");
        let message = format!("{}: {}", duty, e);
        let record = self.node_record().await;
        self.inner.registry.notify_error(&record, &message).await;
        self.record_event(NodeEvent::Error, Some(&message)).await;
    }

    async fn record_event(&self, event: NodeEvent, message: Option<&str>) {
        let config = &self.inner.config;
        if let Err(e) = self
            .inner
            .store
            .insert_node_log(&config.namespace, &config.instance_name, event, message)
            .await
        {
            warn!(event = %event, error = %e, "Failed to write node log");
        }
    }
}
