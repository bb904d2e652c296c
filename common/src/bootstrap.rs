// Bootstrap utilities for binary initialization
// Purpose: build the store and plugin registry a scheduler node runs with

use crate::config::Settings;
use crate::db::DbPool;
use crate::executor::{HttpJobExecutor, ShellJobExecutor};
use crate::listener::LoggingListener;
use crate::registry::PluginRegistry;
use crate::store::PgStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Initialize the database connection pool
///
/// # Errors
/// Returns error if the pool cannot connect
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Connect to Postgres and, unless disabled, apply the embedded migrations
///
/// # Errors
/// Returns error if the connection or a migration fails
#[tracing::instrument(skip(settings))]
pub async fn init_pg_store(settings: &Settings) -> Result<PgStore> {
    let db_pool = init_database_pool(settings).await?;

    if settings.database.run_migrations {
        db_pool
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    Ok(PgStore::new(db_pool))
}

/// Registry with the HTTP and shell executors and the logging listener
///
/// # Errors
/// Returns error if the HTTP client cannot be built
pub fn default_registry() -> Result<PluginRegistry> {
    let http = HttpJobExecutor::new().context("Failed to create HTTP executor")?;
    let listener = Arc::new(LoggingListener);

    Ok(PluginRegistry::new()
        .with_executor(Arc::new(http))
        .with_executor(Arc::new(ShellJobExecutor::new()))
        .with_scheduler_listener(listener.clone())
        .with_trigger_listener(listener.clone())
        .with_job_listener(listener))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobType;

    #[test]
    fn test_default_registry_supports_every_job_type() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.supported_job_types(), JobType::ALL.to_vec());
    }
}
