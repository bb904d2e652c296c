// SQL query constants for repositories
// Centralizes repeated SELECT column lists and predicates

/// SQL query fragments for scheduler_nodes table
pub mod node_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, namespace, instance_name, heartbeat_interval_ms,
        last_heartbeat_time, config, description, created_at"#;
}

/// SQL query fragments for jobs joined with their detail tables
pub mod job_queries {
    /// Detail columns are prefixed by table so both detail types fit one row
    pub const SELECT_WITH_DETAILS: &str = r#"
        SELECT
            j.id, j.namespace, j.name, j.job_type, j.disabled, j.allow_concurrent,
            j.max_reentry, j.max_retry_count, j.is_update_data, j.job_data,
            j.run_count, j.lock_version, j.created_at, j.updated_at,
            h.method AS http_method, h.url AS http_url, h.headers AS http_headers,
            h.body AS http_body, h.timeout_ms AS http_timeout_ms,
            s.command AS shell_command, s.args AS shell_args,
            s.working_dir AS shell_working_dir, s.timeout_ms AS shell_timeout_ms
        FROM jobs j
        LEFT JOIN job_http_details h ON h.job_id = j.id
        LEFT JOIN job_shell_details s ON s.job_id = j.id"#;
}

/// SQL query fragments for triggers table
pub mod trigger_queries {
    /// Only rows with a known type code; anything else is reported by the integrity check
    pub const SELECT_ALL_COLUMNS: &str = r#"
        SELECT
            id, job_id, namespace, disabled, trigger_type, cron_expression,
            interval_seconds, start_time, end_time, last_fire_time, next_fire_time,
            misfire_strategy, allow_concurrent, fire_count, lock_version,
            created_at, updated_at
        FROM triggers"#;

    pub const KNOWN_TYPE: &str = "trigger_type IN ('cron', 'fixed_interval')";

    /// Rows whose definition can never produce a fire time
    pub const STRUCTURALLY_INVALID: &str = r#"(
            trigger_type NOT IN ('cron', 'fixed_interval')
            OR (trigger_type = 'fixed_interval' AND (interval_seconds IS NULL OR interval_seconds <= 0))
            OR (trigger_type = 'cron' AND (cron_expression IS NULL OR TRIM(cron_expression) = ''))
        )"#;
}
