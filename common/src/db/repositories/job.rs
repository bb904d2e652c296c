// Job repository: jobs with their type-specific detail rows

use super::queries::job_queries;
use super::trigger::TriggerRepository;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{
    HttpJobDetail, HttpMethod, Job, JobDetail, JobType, ShellJobDetail, Trigger,
};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::instrument;

/// Repository for job-related database operations
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, namespace: &str, id: i64) -> Result<Option<Job>, DatabaseError> {
        let query = format!(
            "{} WHERE j.namespace = $1 AND j.id = $2",
            job_queries::SELECT_WITH_DETAILS
        );

        let row = sqlx::query(&query)
            .bind(namespace)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// All decodable jobs of a namespace; undecodable rows are skipped with a warning
    #[instrument(skip(self))]
    pub async fn find_by_namespace(&self, namespace: &str) -> Result<Vec<Job>, DatabaseError> {
        let query = format!(
            "{} WHERE j.namespace = $1 ORDER BY j.id",
            job_queries::SELECT_WITH_DETAILS
        );

        let rows = sqlx::query(&query)
            .bind(namespace)
            .fetch_all(self.pool.pool())
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match job_from_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable job row"),
            }
        }
        Ok(jobs)
    }

    #[instrument(skip(self))]
    pub async fn count_invalid(
        &self,
        namespace: &str,
        supported: &[JobType],
    ) -> Result<u64, DatabaseError> {
        let supported: Vec<String> = supported.iter().map(|t| t.as_str().to_string()).collect();

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS invalid
            FROM jobs j
            LEFT JOIN job_http_details h ON h.job_id = j.id
            LEFT JOIN job_shell_details s ON s.job_id = j.id
            WHERE j.namespace = $1 AND (
                NOT (j.job_type = ANY($2))
                OR (j.job_type = 'http' AND h.job_id IS NULL)
                OR (j.job_type = 'shell' AND s.job_id IS NULL)
            )
            "#,
        )
        .bind(namespace)
        .bind(&supported)
        .fetch_one(self.pool.pool())
        .await?;

        let invalid: i64 = row.try_get("invalid")?;
        Ok(invalid.max(0) as u64)
    }

    /// Increment `lock_version` if it still equals the observed value
    #[instrument(skip(self))]
    pub async fn claim(
        &self,
        namespace: &str,
        id: i64,
        expected_lock_version: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET lock_version = lock_version + 1
            WHERE namespace = $1 AND id = $2 AND lock_version = $3
            "#,
        )
        .bind(namespace)
        .bind(id)
        .bind(expected_lock_version)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, job_data))]
    pub async fn update_data(
        &self,
        namespace: &str,
        id: i64,
        job_data: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE jobs SET job_data = $3, updated_at = NOW() WHERE namespace = $1 AND id = $2",
        )
        .bind(namespace)
        .bind(id)
        .bind(job_data)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn increment_run_count(&self, namespace: &str, id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE jobs SET run_count = run_count + 1 WHERE namespace = $1 AND id = $2")
            .bind(namespace)
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        Ok(())
    }

    #[instrument(skip(self, ids))]
    pub async fn set_disabled(
        &self,
        namespace: &str,
        ids: &[i64],
        disabled: bool,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET disabled = $3, updated_at = NOW()
            WHERE namespace = $1 AND id = ANY($2)
            "#,
        )
        .bind(namespace)
        .bind(ids)
        .bind(disabled)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(affected = result.rows_affected(), disabled, "Job flags updated");
        Ok(result.rows_affected())
    }

    /// Insert job, detail and trigger in one transaction
    #[instrument(skip(self, job, trigger), fields(namespace = %job.namespace, job_name = %job.name))]
    pub async fn create_with_trigger(
        &self,
        job: &Job,
        trigger: &Trigger,
    ) -> Result<(i64, i64), DatabaseError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let job_id = insert_job(&mut tx, job).await?;
        insert_detail(&mut tx, job_id, &job.detail).await?;
        let trigger_id = TriggerRepository::insert(&mut tx, job_id, trigger).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::info!(job_id, trigger_id, "Job created");
        Ok((job_id, trigger_id))
    }

    /// Delete jobs, their triggers and details in one transaction
    #[instrument(skip(self, ids))]
    pub async fn delete_many(&self, namespace: &str, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM triggers WHERE namespace = $1 AND job_id = ANY($2)")
            .bind(namespace)
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM job_http_details WHERE job_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM job_shell_details WHERE job_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM jobs WHERE namespace = $1 AND id = ANY($2)")
            .bind(namespace)
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::info!(deleted = result.rows_affected(), "Jobs deleted");
        Ok(result.rows_affected())
    }
}

async fn insert_job(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<i64, DatabaseError> {
    let row = sqlx::query(
        r#"
        INSERT INTO jobs (
            namespace, name, job_type, disabled, allow_concurrent, max_reentry,
            max_retry_count, is_update_data, job_data, run_count, lock_version,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, $10, $11)
        RETURNING id
        "#,
    )
    .bind(&job.namespace)
    .bind(&job.name)
    .bind(job.job_type().as_str())
    .bind(job.disabled)
    .bind(job.allow_concurrent)
    .bind(job.max_reentry)
    .bind(job.max_retry_count)
    .bind(job.is_update_data)
    .bind(&job.job_data)
    .bind(job.created_at)
    .bind(job.updated_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.try_get("id")?)
}

async fn insert_detail(
    tx: &mut Transaction<'_, Postgres>,
    job_id: i64,
    detail: &JobDetail,
) -> Result<(), DatabaseError> {
    match detail {
        JobDetail::Http(http) => {
            let headers = serde_json::to_value(&http.headers)
                .map_err(|e| DatabaseError::InvalidData(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO job_http_details (job_id, method, url, headers, body, timeout_ms)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(job_id)
            .bind(http.method.to_string())
            .bind(&http.url)
            .bind(headers)
            .bind(&http.body)
            .bind(http.timeout_ms)
            .execute(&mut **tx)
            .await?;
        }
        JobDetail::Shell(shell) => {
            let args = serde_json::to_value(&shell.args)
                .map_err(|e| DatabaseError::InvalidData(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO job_shell_details (job_id, command, args, working_dir, timeout_ms)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(job_id)
            .bind(&shell.command)
            .bind(args)
            .bind(&shell.working_dir)
            .bind(shell.timeout_ms)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

fn missing_detail(job_id: i64, job_type: JobType) -> DatabaseError {
    DatabaseError::InvalidData(format!("job {} has no {} detail row", job_id, job_type))
}

fn job_from_row(row: &PgRow) -> Result<Job, DatabaseError> {
    let id: i64 = row.try_get("id")?;
    let job_type_code: String = row.try_get("job_type")?;
    let job_type = JobType::from_str(&job_type_code).map_err(DatabaseError::InvalidData)?;

    let detail = match job_type {
        JobType::Http => {
            let method: Option<String> = row.try_get("http_method")?;
            let url: Option<String> = row.try_get("http_url")?;
            let (Some(method), Some(url)) = (method, url) else {
                return Err(missing_detail(id, job_type));
            };
            let headers: Option<serde_json::Value> = row.try_get("http_headers")?;
            let headers: HashMap<String, String> = match headers {
                Some(value) => serde_json::from_value(value)
                    .map_err(|e| DatabaseError::InvalidData(e.to_string()))?,
                None => HashMap::new(),
            };
            let timeout_ms: Option<i64> = row.try_get("http_timeout_ms")?;

            JobDetail::Http(HttpJobDetail {
                method: HttpMethod::from_str(&method).map_err(DatabaseError::InvalidData)?,
                url,
                headers,
                body: row.try_get("http_body")?,
                timeout_ms: timeout_ms.unwrap_or_default(),
            })
        }
        JobType::Shell => {
            let command: Option<String> = row.try_get("shell_command")?;
            let Some(command) = command else {
                return Err(missing_detail(id, job_type));
            };
            let args: Option<serde_json::Value> = row.try_get("shell_args")?;
            let args: Vec<String> = match args {
                Some(value) => serde_json::from_value(value)
                    .map_err(|e| DatabaseError::InvalidData(e.to_string()))?,
                None => Vec::new(),
            };
            let timeout_ms: Option<i64> = row.try_get("shell_timeout_ms")?;

            JobDetail::Shell(ShellJobDetail {
                command,
                args,
                working_dir: row.try_get("shell_working_dir")?,
                timeout_ms: timeout_ms.unwrap_or_default(),
            })
        }
    };

    Ok(Job {
        id,
        namespace: row.try_get("namespace")?,
        name: row.try_get("name")?,
        disabled: row.try_get("disabled")?,
        allow_concurrent: row.try_get("allow_concurrent")?,
        max_reentry: row.try_get("max_reentry")?,
        max_retry_count: row.try_get("max_retry_count")?,
        is_update_data: row.try_get("is_update_data")?,
        job_data: row.try_get("job_data")?,
        run_count: row.try_get("run_count")?,
        lock_version: row.try_get("lock_version")?,
        detail,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
