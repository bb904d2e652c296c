// Append-only trigger and job run logs

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{JobLog, TriggerLog};
use sqlx::Row;
use tracing::instrument;

pub struct LogRepository {
    pool: DbPool,
}

impl LogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, log), fields(trigger_id = log.trigger_id, outcome = %log.outcome))]
    pub async fn insert_trigger_log(&self, log: &TriggerLog) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO trigger_logs (
                namespace, instance_name, trigger_id, job_id, scheduled_fire_time,
                actual_fire_time, misfire, outcome, last_fire_time, next_fire_time, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&log.namespace)
        .bind(&log.instance_name)
        .bind(log.trigger_id)
        .bind(log.job_id)
        .bind(log.scheduled_fire_time)
        .bind(log.actual_fire_time)
        .bind(log.misfire)
        .bind(log.outcome.to_string())
        .bind(log.last_fire_time)
        .bind(log.next_fire_time)
        .bind(log.created_at)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get("id")?)
    }

    #[instrument(skip(self, log), fields(job_id = log.job_id, status = %log.status))]
    pub async fn insert_job_log(&self, log: &JobLog) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_logs (
                namespace, instance_name, job_id, trigger_id, trigger_log_id, job_type,
                status, retry_count, before_job_data, after_job_data, error,
                start_time, end_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&log.namespace)
        .bind(&log.instance_name)
        .bind(log.job_id)
        .bind(log.trigger_id)
        .bind(log.trigger_log_id)
        .bind(log.job_type.as_str())
        .bind(log.status.to_string())
        .bind(log.retry_count)
        .bind(&log.before_job_data)
        .bind(&log.after_job_data)
        .bind(&log.error)
        .bind(log.start_time)
        .bind(log.end_time)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get("id")?)
    }

    #[instrument(skip(self, log), fields(job_log_id = log.id, status = %log.status))]
    pub async fn update_job_log(&self, log: &JobLog) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE job_logs
            SET status = $2, retry_count = $3, error = $4, after_job_data = $5, end_time = $6
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(log.status.to_string())
        .bind(log.retry_count)
        .bind(&log.error)
        .bind(&log.after_job_data)
        .bind(log.end_time)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("job log {}", log.id)));
        }
        Ok(())
    }
}
