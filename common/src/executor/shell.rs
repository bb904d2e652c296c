// Shell job executor: runs a local command with arguments

use super::put_job_data;
use crate::errors::ExecutionError;
use crate::executor::JobExecutor;
use crate::models::{Job, JobDetail, JobType, NodeRecord};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Fails the attempt on spawn errors, non-zero exit or timeout
#[derive(Default)]
pub struct ShellJobExecutor;

impl ShellJobExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobExecutor for ShellJobExecutor {
    fn supports(&self, job_type: JobType) -> bool {
        job_type == JobType::Shell
    }

    #[tracing::instrument(skip_all, fields(job_id = job.id, job_name = %job.name))]
    async fn execute(
        &self,
        _now: DateTime<Utc>,
        job: &mut Job,
        _node: &NodeRecord,
        _store: &dyn Store,
    ) -> Result<(), ExecutionError> {
        let JobDetail::Shell(detail) = &job.detail else {
            return Err(ExecutionError::DetailMismatch(format!(
                "job {} is not a shell job",
                job.id
            )));
        };

        let mut command = Command::new(&detail.command);
        command
            .args(&detail.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &detail.working_dir {
            command.current_dir(dir);
        }

        tracing::info!(command = %detail.command, args = ?detail.args, "Executing shell command");
        let child = command.spawn().map_err(|e| {
            ExecutionError::ProcessFailed(format!("Failed to spawn '{}': {}", detail.command, e))
        })?;

        let waited = if detail.timeout_ms > 0 {
            let timeout_ms = detail.timeout_ms as u64;
            tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output())
                .await
                .map_err(|_| ExecutionError::Timeout(timeout_ms))?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|e| ExecutionError::ProcessFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExecutionError::ProcessFailed(format!(
                "'{}' exited with {}: {}",
                detail.command, output.status, stderr
            )));
        }

        if job.is_update_data {
            let exit_code = output.status.code();
            put_job_data(
                job,
                "last_output",
                json!({ "exit_code": exit_code, "stdout": stdout }),
            );
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::ShellJobDetail;
    use crate::store::MemoryStore;

    fn shell_job(command: &str, args: &[&str], timeout_ms: i64) -> Job {
        let now = Utc::now();
        Job {
            id: 1,
            namespace: "default".to_string(),
            name: "shell".to_string(),
            disabled: false,
            allow_concurrent: false,
            max_reentry: 0,
            max_retry_count: 1,
            is_update_data: true,
            job_data: json!({}),
            run_count: 0,
            lock_version: 0,
            detail: JobDetail::Shell(ShellJobDetail {
                command: command.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                working_dir: None,
                timeout_ms,
            }),
            created_at: now,
            updated_at: now,
        }
    }

    fn node() -> NodeRecord {
        let now = Utc::now();
        NodeRecord {
            id: 1,
            namespace: "default".to_string(),
            instance_name: "node-a".to_string(),
            heartbeat_interval_ms: 1_000,
            last_heartbeat_time: now,
            config: None,
            description: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_into_job_data() {
        let mut job = shell_job("sh", &["-c", "echo hello"], 5_000);
        ShellJobExecutor::new()
            .execute(Utc::now(), &mut job, &node(), &MemoryStore::new())
            .await
            .unwrap();

        assert_eq!(job.job_data["last_output"]["stdout"], "hello");
        assert_eq!(job.job_data["last_output"]["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let mut job = shell_job("sh", &["-c", "echo broken >&2; exit 3"], 5_000);
        let err = ShellJobExecutor::new()
            .execute(Utc::now(), &mut job, &node(), &MemoryStore::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::ProcessFailed(_)));
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let mut job = shell_job("sleep", &["5"], 100);
        let err = ShellJobExecutor::new()
            .execute(Utc::now(), &mut job, &node(), &MemoryStore::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Timeout(100)));
    }
}
