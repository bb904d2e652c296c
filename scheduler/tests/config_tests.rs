// The configuration shipped with the scheduler binary

use common::config::{SchedulerConfig, Settings};
use std::path::PathBuf;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../config")
}

#[test]
fn test_shipped_defaults_load_and_validate() {
    let settings = Settings::load_from_path(config_dir()).unwrap();
    settings.validate().unwrap();

    assert!(settings.scheduler.enabled);
    assert_eq!(settings.scheduler.namespace, "default");
    assert!(!settings.scheduler.instance_name.is_empty());
    assert!(settings.database.run_migrations);
}

#[test]
fn test_shipped_scheduler_section_matches_built_in_defaults() {
    let settings = Settings::load_from_path(config_dir()).unwrap();
    let defaults = SchedulerConfig::default();

    assert_eq!(
        settings.scheduler,
        SchedulerConfig {
            instance_name: settings.scheduler.instance_name.clone(),
            ..defaults
        }
    );
}
