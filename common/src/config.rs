// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_run_migrations() -> bool {
    true
}

/// Settings of one scheduler node; also persisted on the node row as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Turns the whole scheduling subsystem on or off
    pub enabled: bool,
    pub namespace: String,
    pub instance_name: String,
    pub description: Option<String>,
    pub heartbeat_interval_ms: u64,
    /// Permits shared by the periodic duties
    pub duty_pool_size: usize,
    /// Job bodies running concurrently
    pub worker_pool_size: usize,
    /// Firings allowed to wait for a worker before submissions are rejected
    pub worker_queue_capacity: usize,
    pub tick_period_ms: u64,
    pub misfire_threshold_ms: u64,
    pub max_window_rows: i64,
    pub max_tick_wait_ms: u64,
    pub register_period_ms: u64,
    pub integrity_period_ms: u64,
    pub calibration_period_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "default".to_string(),
            instance_name: default_instance_name(),
            description: None,
            heartbeat_interval_ms: 3_000,
            duty_pool_size: 4,
            worker_pool_size: 16,
            worker_queue_capacity: 256,
            tick_period_ms: 1_000,
            misfire_threshold_ms: 3_000,
            max_window_rows: 5_000,
            max_tick_wait_ms: 5_000,
            register_period_ms: 60_000,
            integrity_period_ms: 60_000,
            calibration_period_ms: 30_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            retry_jitter_factor: 0.1,
        }
    }
}

impl SchedulerConfig {
    /// Lookahead of the trigger window: one and a half tick periods plus a millisecond
    pub fn window_lookahead_ms(&self) -> i64 {
        (self.tick_period_ms as f64 * 1.5) as i64 + 1
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn misfire_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.misfire_threshold_ms as i64)
    }

    pub fn max_tick_wait(&self) -> Duration {
        Duration::from_millis(self.max_tick_wait_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.is_empty() {
            return Err("Scheduler namespace cannot be empty".to_string());
        }
        if self.instance_name.is_empty() {
            return Err("Scheduler instance_name cannot be empty".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("Scheduler heartbeat_interval_ms must be greater than 0".to_string());
        }
        if self.tick_period_ms == 0 {
            return Err("Scheduler tick_period_ms must be greater than 0".to_string());
        }
        if self.duty_pool_size == 0 {
            return Err("Scheduler duty_pool_size must be greater than 0".to_string());
        }
        if self.worker_pool_size == 0 {
            return Err("Scheduler worker_pool_size must be greater than 0".to_string());
        }
        if self.max_window_rows <= 0 {
            return Err("Scheduler max_window_rows must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err("Scheduler retry_jitter_factor must be within 0.0..=1.0".to_string());
        }
        Ok(())
    }
}

/// `<hostname>-<pid>`, falling back to `localhost` when the hostname is unreadable
pub fn default_instance_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        self.scheduler.validate()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/cluster_scheduler".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
                run_migrations: true,
            },
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
