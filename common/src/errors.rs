// Error handling framework

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Fixed interval must be positive, got {0} seconds")]
    NonPositiveInterval(i64),

    #[error("Fixed interval of {0} seconds exceeds the 100 year maximum")]
    IntervalTooLarge(i64),

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),
}

/// Job execution errors, raised per attempt by an executor
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("No executor registered for job type: {0}")]
    NoExecutor(String),

    #[error("Execution timeout after {0} ms")]
    Timeout(u64),

    #[error("HTTP request failed: {0}")]
    HttpRequestFailed(String),

    #[error("Process failed: {0}")]
    ProcessFailed(String),

    #[error("Job detail does not match executor: {0}")]
    DetailMismatch(String),

    #[error("Execution interrupted")]
    Interrupted,

    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),
}

/// Validation errors for administrative input
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// Invalid node lifecycle transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Cannot {action} scheduler node in state {state}")]
    InvalidTransition { action: &'static str, state: String },
}

/// Top-level error returned by the scheduler's public operations
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Worker pool saturated: {capacity} tasks already queued or running")]
    PoolSaturated { capacity: usize },

    #[error("Worker pool is shut down")]
    PoolShutdown,
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Check for specific database error codes
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

impl From<DatabaseError> for ExecutionError {
    fn from(err: DatabaseError) -> Self {
        ExecutionError::StorageFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidJson(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout(300);
        assert!(err.to_string().contains("300 ms"));
    }

    #[test]
    fn test_lifecycle_error_names_action_and_state() {
        let err = LifecycleError::InvalidTransition {
            action: "resume",
            state: "running".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resume scheduler node in state running"
        );
    }

    #[test]
    fn test_scheduler_error_wraps_database_error() {
        let err: SchedulerError = DatabaseError::NotFound("job 7".to_string()).into();
        assert!(matches!(err, SchedulerError::Database(_)));
        assert!(err.to_string().contains("job 7"));
    }
}
