// Trigger repository: schedule rows, fire-time bookkeeping and trigger claims

use super::queries::trigger_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{MisfireStrategy, Trigger, TriggerSchedule, TriggerType};
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::instrument;

pub struct TriggerRepository {
    pool: DbPool,
}

impl TriggerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a trigger for `job_id` inside an open transaction
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        job_id: i64,
        trigger: &Trigger,
    ) -> Result<i64, DatabaseError> {
        let (cron_expression, interval_seconds) = match &trigger.schedule {
            TriggerSchedule::Cron { expression } => (Some(expression.as_str()), None),
            TriggerSchedule::FixedInterval { interval_seconds } => (None, Some(*interval_seconds)),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO triggers (
                job_id, namespace, disabled, trigger_type, cron_expression,
                interval_seconds, start_time, end_time, last_fire_time, next_fire_time,
                misfire_strategy, allow_concurrent, fire_count, lock_version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0, 0, $13, $14)
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(&trigger.namespace)
        .bind(trigger.disabled)
        .bind(trigger.schedule.trigger_type().to_string())
        .bind(cron_expression)
        .bind(interval_seconds)
        .bind(trigger.start_time)
        .bind(trigger.end_time)
        .bind(trigger.last_fire_time)
        .bind(trigger.next_fire_time)
        .bind(trigger.misfire_strategy.to_string())
        .bind(trigger.allow_concurrent)
        .bind(trigger.created_at)
        .bind(trigger.updated_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.try_get("id")?)
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(
        &self,
        namespace: &str,
        id: i64,
    ) -> Result<Option<Trigger>, DatabaseError> {
        let query = format!(
            "{} WHERE namespace = $1 AND id = $2 AND {}",
            trigger_queries::SELECT_ALL_COLUMNS,
            trigger_queries::KNOWN_TYPE
        );

        let row = sqlx::query(&query)
            .bind(namespace)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(trigger_from_row).transpose()
    }

    /// Enabled triggers, optionally restricted to one type
    #[instrument(skip(self))]
    pub async fn find_enabled(
        &self,
        namespace: &str,
        trigger_type: Option<TriggerType>,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        let query = format!(
            "{} WHERE namespace = $1 AND disabled = FALSE AND {} AND ($2::VARCHAR IS NULL OR trigger_type = $2) ORDER BY id",
            trigger_queries::SELECT_ALL_COLUMNS,
            trigger_queries::KNOWN_TYPE
        );

        let rows = sqlx::query(&query)
            .bind(namespace)
            .bind(trigger_type.map(|t| t.to_string()))
            .fetch_all(self.pool.pool())
            .await?;

        Ok(decode_rows(&rows))
    }

    #[instrument(skip(self))]
    pub async fn find_due(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        within_ms: i64,
        max_rows: i64,
    ) -> Result<Vec<Trigger>, DatabaseError> {
        let query = format!(
            r#"{} WHERE namespace = $1 AND disabled = FALSE AND {}
                AND next_fire_time IS NOT NULL AND next_fire_time <= $2
            ORDER BY next_fire_time, id
            LIMIT $3"#,
            trigger_queries::SELECT_ALL_COLUMNS,
            trigger_queries::KNOWN_TYPE
        );

        let rows = sqlx::query(&query)
            .bind(namespace)
            .bind(now + Duration::milliseconds(within_ms))
            .bind(max_rows)
            .fetch_all(self.pool.pool())
            .await?;

        let triggers = decode_rows(&rows);
        tracing::debug!(count = triggers.len(), "Found triggers due within window");
        Ok(triggers)
    }

    #[instrument(skip(self))]
    pub async fn count_invalid(&self, namespace: &str) -> Result<u64, DatabaseError> {
        let query = format!(
            "SELECT COUNT(*) AS invalid FROM triggers WHERE namespace = $1 AND {}",
            trigger_queries::STRUCTURALLY_INVALID
        );

        let row = sqlx::query(&query)
            .bind(namespace)
            .fetch_one(self.pool.pool())
            .await?;

        let invalid: i64 = row.try_get("invalid")?;
        Ok(invalid.max(0) as u64)
    }

    #[instrument(skip(self))]
    pub async fn invalidate(&self, namespace: &str) -> Result<u64, DatabaseError> {
        let query = format!(
            r#"UPDATE triggers SET next_fire_time = NULL, updated_at = NOW()
            WHERE namespace = $1 AND next_fire_time IS NOT NULL AND {}"#,
            trigger_queries::STRUCTURALLY_INVALID
        );

        let result = sqlx::query(&query)
            .bind(namespace)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Compare-and-set of `next_fire_time` guarded by `last_fire_time`
    #[instrument(skip(self))]
    pub async fn update_next_fire_time(
        &self,
        namespace: &str,
        id: i64,
        expected_last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE triggers SET next_fire_time = $4, updated_at = NOW()
            WHERE namespace = $1 AND id = $2 AND last_fire_time IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(namespace)
        .bind(id)
        .bind(expected_last)
        .bind(next)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    pub async fn update_fire_time(
        &self,
        namespace: &str,
        id: i64,
        last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        fired: bool,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET last_fire_time = $3,
                next_fire_time = $4,
                fire_count = fire_count + CASE WHEN $5 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE namespace = $1 AND id = $2
            "#,
        )
        .bind(namespace)
        .bind(id)
        .bind(last)
        .bind(next)
        .bind(fired)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("trigger {}", id)));
        }
        Ok(())
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
            UPDATE triggers SET lock_version = lock_version + 1
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

    /// Flip the disabled flag; disabling also clears `next_fire_time`
    #[instrument(skip(self, ids))]
    pub async fn set_disabled(
        &self,
        namespace: &str,
        ids: &[i64],
        disabled: bool,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET disabled = $3,
                next_fire_time = CASE WHEN $3 THEN NULL ELSE next_fire_time END,
                updated_at = NOW()
            WHERE namespace = $1 AND id = ANY($2)
            "#,
        )
        .bind(namespace)
        .bind(ids)
        .bind(disabled)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(affected = result.rows_affected(), disabled, "Trigger flags updated");
        Ok(result.rows_affected())
    }
}

fn decode_rows(rows: &[PgRow]) -> Vec<Trigger> {
    rows.iter()
        .filter_map(|row| match trigger_from_row(row) {
            Ok(trigger) => Some(trigger),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable trigger row");
                None
            }
        })
        .collect()
}

fn trigger_from_row(row: &PgRow) -> Result<Trigger, DatabaseError> {
    let id: i64 = row.try_get("id")?;
    let type_code: String = row.try_get("trigger_type")?;
    let trigger_type = TriggerType::from_str(&type_code).map_err(DatabaseError::InvalidData)?;

    let schedule = match trigger_type {
        TriggerType::Cron => {
            let expression: Option<String> = row.try_get("cron_expression")?;
            TriggerSchedule::Cron {
                expression: expression.ok_or_else(|| {
                    DatabaseError::InvalidData(format!("trigger {} has no cron expression", id))
                })?,
            }
        }
        TriggerType::FixedInterval => {
            let interval_seconds: Option<i64> = row.try_get("interval_seconds")?;
            TriggerSchedule::FixedInterval {
                interval_seconds: interval_seconds.ok_or_else(|| {
                    DatabaseError::InvalidData(format!("trigger {} has no interval", id))
                })?,
            }
        }
    };

    let misfire: String = row.try_get("misfire_strategy")?;

    Ok(Trigger {
        id,
        job_id: row.try_get("job_id")?,
        namespace: row.try_get("namespace")?,
        disabled: row.try_get("disabled")?,
        schedule,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        last_fire_time: row.try_get("last_fire_time")?,
        next_fire_time: row.try_get("next_fire_time")?,
        misfire_strategy: MisfireStrategy::from_str(&misfire)
            .map_err(DatabaseError::InvalidData)?,
        allow_concurrent: row.try_get("allow_concurrent")?,
        fire_count: row.try_get("fire_count")?,
        lock_version: row.try_get("lock_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
