//! Integration tests for shade-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let shade_dir = temp.path().join(".shade");
    std::fs::create_dir_all(&shade_dir).unwrap();

    let config_content = r#"
[farm]
max_entries = 5000
temp_base = "/var/tmp/shade"
respect_gitignore = false

[patterns]
include = [".opencode/skill/a/**"]
exclude = [".opencode/**"]

[sweep]
removing_max_age_secs = 120
farm_max_age_secs = 7200

[sync]
settle_ms = 300
junk_patterns = [".DS_Store"]
"#;
    std::fs::write(shade_dir.join("config.toml"), config_content).unwrap();

    let contents = std::fs::read_to_string(shade_dir.join("config.toml")).unwrap();
    let config: shade_config::Config = toml::from_str(&contents).unwrap();

    assert_eq!(config.farm.max_entries, 5000);
    assert_eq!(config.farm.temp_base(), PathBuf::from("/var/tmp/shade"));
    assert!(!config.farm.respect_gitignore);
    assert_eq!(config.patterns.include, vec![".opencode/skill/a/**"]);
    assert_eq!(config.patterns.exclude, vec![".opencode/**"]);
    assert_eq!(config.sweep.removing_max_age().as_secs(), 120);
    assert_eq!(config.sweep.farm_max_age().as_secs(), 7200);
    assert_eq!(config.sync.settle().as_millis(), 300);
    assert_eq!(config.sync.junk_patterns, vec![".DS_Store"]);
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let global_config = r#"
[patterns]
exclude = ["dist/**", "coverage/**"]

[sync]
settle_ms = 250
"#;
    let project_config = r#"
[patterns]
exclude = ["build/**"]
include = ["build/keep.txt"]
"#;

    let mut config: shade_config::Config = toml::from_str(global_config).unwrap();
    let project: shade_config::Config = toml::from_str(project_config).unwrap();
    config.merge(project);

    // Patterns replaced, sync settings preserved from global
    assert_eq!(config.patterns.exclude, vec!["build/**"]);
    assert_eq!(config.patterns.include, vec!["build/keep.txt"]);
    assert_eq!(config.sync.settle_ms, 250);
}

/// Test complete config serialization/deserialization cycle
#[test]
fn test_config_full_roundtrip_with_all_sections() {
    let mut original = shade_config::Config::default();
    original.farm.temp_base = Some(PathBuf::from("/tmp/farms"));
    original.patterns.exclude = vec!["node_modules".to_string()];

    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, original.to_toml()).unwrap();

    let contents = std::fs::read_to_string(&config_path).unwrap();
    let loaded: shade_config::Config = toml::from_str(&contents).unwrap();

    assert_eq!(original, loaded);
}

/// Test the test environment feeds a usable config
#[test]
fn test_environment_config_points_at_private_dirs() {
    let env = shade_config::testing::TestEnvironment::new().unwrap();
    let config = env.config();

    assert!(config.farm.temp_base().starts_with(env.temp_base.parent().unwrap()));
    assert_ne!(config.farm.temp_base(), std::env::temp_dir());
}
