use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Node Models
// ============================================================================

/// A scheduler node row, identified by (namespace, instance_name)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct NodeRecord {
    pub id: i64,
    pub namespace: String,
    pub instance_name: String,
    pub heartbeat_interval_ms: i64,
    pub last_heartbeat_time: DateTime<Utc>,
    pub config: Option<serde_json::Value>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    /// A node is available while its last heartbeat is younger than two intervals.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.last_heartbeat_time).num_milliseconds();
        age_ms < 2 * self.heartbeat_interval_ms
    }
}

/// Node row together with its availability at the time of the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub node: NodeRecord,
    pub available: bool,
}

// ============================================================================
// Job Models
// ============================================================================

/// Type tag selecting which executor handles a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Http,
    Shell,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::Http, JobType::Shell];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Http => "http",
            JobType::Shell => "shell",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(JobType::Http),
            "shell" => Ok(JobType::Shell),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// HttpMethod represents HTTP request methods
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(format!("Invalid HTTP method: {}", s)),
        }
    }
}

/// Detail row of an HTTP job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpJobDetail {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    pub timeout_ms: i64,
}

/// Detail row of a shell job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellJobDetail {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    pub timeout_ms: i64,
}

/// Type-specific payload of a job; exactly one per job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobDetail {
    Http(HttpJobDetail),
    Shell(ShellJobDetail),
}

impl JobDetail {
    pub fn job_type(&self) -> JobType {
        match self {
            JobDetail::Http(_) => JobType::Http,
            JobDetail::Shell(_) => JobType::Shell,
        }
    }
}

/// Job is the unit of work a trigger causes to run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub namespace: String,
    pub name: String,
    pub disabled: bool,
    pub allow_concurrent: bool,
    pub max_reentry: i32,
    pub max_retry_count: i32,
    pub is_update_data: bool,
    pub job_data: serde_json::Value,
    pub run_count: i64,
    pub lock_version: i64,
    pub detail: JobDetail,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn job_type(&self) -> JobType {
        self.detail.job_type()
    }

    /// Reentry budget applied on this node; jobs that forbid concurrency get none
    pub fn effective_max_reentry(&self) -> u32 {
        if self.allow_concurrent {
            self.max_reentry.max(0) as u32
        } else {
            0
        }
    }

    /// Number of attempts a run may take, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.max_retry_count.max(1) as u32
    }
}

// ============================================================================
// Trigger Models
// ============================================================================

/// Persisted trigger type code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    FixedInterval,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Cron => write!(f, "cron"),
            TriggerType::FixedInterval => write!(f, "fixed_interval"),
        }
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(TriggerType::Cron),
            "fixed_interval" => Ok(TriggerType::FixedInterval),
            _ => Err(format!("Invalid trigger type: {}", s)),
        }
    }
}

/// Schedule definition of a trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSchedule {
    Cron { expression: String },
    FixedInterval { interval_seconds: i64 },
}

impl TriggerSchedule {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerSchedule::Cron { .. } => TriggerType::Cron,
            TriggerSchedule::FixedInterval { .. } => TriggerType::FixedInterval,
        }
    }
}

/// What to do with a firing evaluated too late
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MisfireStrategy {
    #[default]
    Ignore,
    FireOnceNow,
}

impl std::fmt::Display for MisfireStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MisfireStrategy::Ignore => write!(f, "ignore"),
            MisfireStrategy::FireOnceNow => write!(f, "fire_once_now"),
        }
    }
}

impl FromStr for MisfireStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(MisfireStrategy::Ignore),
            "fire_once_now" => Ok(MisfireStrategy::FireOnceNow),
            _ => Err(format!("Invalid misfire strategy: {}", s)),
        }
    }
}

/// Trigger holds a schedule plus its firing bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: i64,
    pub job_id: i64,
    pub namespace: String,
    pub disabled: bool,
    pub schedule: TriggerSchedule,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_fire_time: Option<DateTime<Utc>>,
    /// `None` while the trigger is not eligible for automatic firing
    pub next_fire_time: Option<DateTime<Utc>>,
    pub misfire_strategy: MisfireStrategy,
    pub allow_concurrent: bool,
    pub fire_count: i64,
    pub lock_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Due at `now` when enabled and its next fire time has arrived
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.next_fire_time.is_some_and(|next| next <= now)
    }
}

// ============================================================================
// Log Models
// ============================================================================

/// Outcome recorded for one trigger firing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Fired,
    MisfireIgnored,
    MisfireFiredOnce,
    /// The trigger advanced but its job was missing or disabled
    Skipped,
}

impl std::fmt::Display for TriggerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerOutcome::Fired => write!(f, "fired"),
            TriggerOutcome::MisfireIgnored => write!(f, "misfire_ignored"),
            TriggerOutcome::MisfireFiredOnce => write!(f, "misfire_fired_once"),
            TriggerOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

impl TriggerOutcome {
    pub fn runs_job(&self) -> bool {
        matches!(self, TriggerOutcome::Fired | TriggerOutcome::MisfireFiredOnce)
    }
}

impl FromStr for TriggerOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fired" => Ok(TriggerOutcome::Fired),
            "misfire_ignored" => Ok(TriggerOutcome::MisfireIgnored),
            "misfire_fired_once" => Ok(TriggerOutcome::MisfireFiredOnce),
            "skipped" => Ok(TriggerOutcome::Skipped),
            _ => Err(format!("Invalid trigger outcome: {}", s)),
        }
    }
}

/// Append-only record of a trigger firing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerLog {
    pub id: i64,
    pub namespace: String,
    pub instance_name: String,
    pub trigger_id: i64,
    pub job_id: i64,
    pub scheduled_fire_time: DateTime<Utc>,
    pub actual_fire_time: DateTime<Utc>,
    pub misfire: bool,
    pub outcome: TriggerOutcome,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Status of a job run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobRunStatus::Running => write!(f, "running"),
            JobRunStatus::Success => write!(f, "success"),
            JobRunStatus::Failed => write!(f, "failed"),
            JobRunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for JobRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobRunStatus::Running),
            "success" => Ok(JobRunStatus::Success),
            "failed" => Ok(JobRunStatus::Failed),
            "skipped" => Ok(JobRunStatus::Skipped),
            _ => Err(format!("Invalid job run status: {}", s)),
        }
    }
}

/// Append-only record of a job run, updated in two phases (start, then retry/end)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLog {
    pub id: i64,
    pub namespace: String,
    pub instance_name: String,
    pub job_id: i64,
    pub trigger_id: Option<i64>,
    pub trigger_log_id: Option<i64>,
    pub job_type: JobType,
    pub status: JobRunStatus,
    /// Attempts made so far
    pub retry_count: i32,
    pub before_job_data: serde_json::Value,
    pub after_job_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Lifecycle events a node records about itself
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeEvent {
    Started,
    Paused,
    Resumed,
    Stopped,
    Error,
}

impl std::fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeEvent::Started => write!(f, "started"),
            NodeEvent::Paused => write!(f, "paused"),
            NodeEvent::Resumed => write!(f, "resumed"),
            NodeEvent::Stopped => write!(f, "stopped"),
            NodeEvent::Error => write!(f, "error"),
        }
    }
}

impl FromStr for NodeEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(NodeEvent::Started),
            "paused" => Ok(NodeEvent::Paused),
            "resumed" => Ok(NodeEvent::Resumed),
            "stopped" => Ok(NodeEvent::Stopped),
            "error" => Ok(NodeEvent::Error),
            _ => Err(format!("Invalid node event: {}", s)),
        }
    }
}

/// Append-only record of node lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeLog {
    pub id: i64,
    pub namespace: String,
    pub instance_name: String,
    pub event: NodeEvent,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Administration Models
// ============================================================================

/// Trigger part of a job creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrigger {
    pub schedule: TriggerSchedule,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub misfire_strategy: MisfireStrategy,
    #[serde(default)]
    pub allow_concurrent: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// Job creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub namespace: String,
    pub name: String,
    pub detail: JobDetail,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub allow_concurrent: bool,
    #[serde(default)]
    pub max_reentry: i32,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: i32,
    #[serde(default)]
    pub is_update_data: bool,
    #[serde(default = "default_job_data")]
    pub job_data: serde_json::Value,
    pub trigger: NewTrigger,
}

fn default_max_retry_count() -> i32 {
    1
}

fn default_job_data() -> serde_json::Value {
    serde_json::json!({})
}

/// Identifiers returned after a job is created
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCreated {
    pub job_id: i64,
    pub trigger_id: i64,
    pub next_fire_time: Option<DateTime<Utc>>,
}
