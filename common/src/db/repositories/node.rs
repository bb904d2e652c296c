// Scheduler node repository: registration, heartbeat and membership queries

use super::queries::node_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{NodeEvent, NodeRecord};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

pub struct NodeRepository {
    pool: DbPool,
}

impl NodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert the node row or refresh it when (namespace, instance_name) exists
    #[instrument(skip(self, config, description))]
    pub async fn upsert(
        &self,
        namespace: &str,
        instance_name: &str,
        heartbeat_interval_ms: i64,
        config: Option<serde_json::Value>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, DatabaseError> {
        let query = format!(
            r#"
            INSERT INTO scheduler_nodes (
                namespace, instance_name, heartbeat_interval_ms,
                last_heartbeat_time, config, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $4)
            ON CONFLICT (namespace, instance_name) DO UPDATE SET
                heartbeat_interval_ms = EXCLUDED.heartbeat_interval_ms,
                last_heartbeat_time = EXCLUDED.last_heartbeat_time,
                config = EXCLUDED.config,
                description = EXCLUDED.description
            RETURNING {}
            "#,
            node_queries::SELECT_ALL_COLUMNS
        );

        let node = sqlx::query_as::<_, NodeRecord>(&query)
            .bind(namespace)
            .bind(instance_name)
            .bind(heartbeat_interval_ms)
            .bind(now)
            .bind(config)
            .bind(description)
            .fetch_one(self.pool.pool())
            .await?;

        tracing::debug!(node_id = node.id, "Scheduler node upserted");
        Ok(node)
    }

    #[instrument(skip(self, node), fields(namespace = %node.namespace, instance = %node.instance_name))]
    pub async fn heartbeat(
        &self,
        node: &NodeRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_nodes
            SET last_heartbeat_time = $3, heartbeat_interval_ms = $4, config = $5
            WHERE namespace = $1 AND instance_name = $2
            "#,
        )
        .bind(&node.namespace)
        .bind(&node.instance_name)
        .bind(now)
        .bind(node.heartbeat_interval_ms)
        .bind(&node.config)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn find_by_namespace(&self, namespace: &str) -> Result<Vec<NodeRecord>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM scheduler_nodes WHERE namespace = $1 ORDER BY instance_name",
            node_queries::SELECT_ALL_COLUMNS
        );

        let nodes = sqlx::query_as::<_, NodeRecord>(&query)
            .bind(namespace)
            .fetch_all(self.pool.pool())
            .await?;

        Ok(nodes)
    }

    #[instrument(skip(self, message))]
    pub async fn insert_log(
        &self,
        namespace: &str,
        instance_name: &str,
        event: NodeEvent,
        message: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO node_logs (namespace, instance_name, event, message)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(namespace)
        .bind(instance_name)
        .bind(event.to_string())
        .bind(message)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get("id")?)
    }
}
