//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and edge cases in configuration handling.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = SliderConfig::default();

    assert!(config.validate().is_ok());
    assert!(config.window.radius > 0);
    assert!(config.scheduler.buffer_ceiling_ms >= config.scheduler.buffer_floor_ms);
    assert_eq!(config.scheduler.buffer_floor_ms, 16);
    assert_eq!(config.loading.jitter, 0.15);
    assert!(config.loading.max_retries > 0);
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let original_config = SliderConfig::default();

    let toml_string = toml::to_string(&original_config)?;
    let deserialized_config: SliderConfig = toml::from_str(&toml_string)?;

    assert_eq!(original_config, deserialized_config);

    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("slider.toml");

    let test_config = r#"
[window]
radius = 1
looping = false

[scheduler]
buffer_floor_ms = 20
buffer_ceiling_ms = 80
high_priority_threshold = 4

[loading]
use_atlas = false
max_retries = 5
retry_base_delay_ms = 100

[idle]
enabled = true
timeout_ms = 1500
reset_duration_ms = 400

[general]
debug = true
transition_duration_ms = 450
"#;

    fs::write(&file_path, test_config)?;

    let config = SliderConfig::load(&file_path)?;

    assert_eq!(config.window.radius, 1);
    assert!(!config.window.looping);
    assert_eq!(config.scheduler.buffer_floor(), Duration::from_millis(20));
    assert_eq!(config.scheduler.high_priority_threshold, 4);
    // Not present in the file, falls back to the field default
    assert_eq!(config.scheduler.debounce_ms, 100);
    assert!(!config.loading.use_atlas);
    assert_eq!(config.loading.max_retries, 5);
    assert_eq!(config.idle.timeout(), Duration::from_millis(1500));
    assert!(config.general.debug);

    Ok(())
}

#[test]
fn test_partial_file_keeps_default_sections() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("partial.toml");

    fs::write(
        &file_path,
        r#"
[window]
radius = 4
looping = true
"#,
    )?;

    let config = SliderConfig::load(&file_path)?;

    assert_eq!(config.window.radius, 4);
    assert_eq!(config.scheduler, SchedulerConfig::default());
    assert_eq!(config.loading, LoadingConfig::default());

    Ok(())
}

#[test]
fn test_malformed_toml_handling() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("malformed.toml");

    let malformed_config = r#"
[window
radius = "two"
"#;

    fs::write(&file_path, malformed_config).unwrap();

    let result = SliderConfig::load(&file_path);
    assert!(result.is_err());
}

#[test]
fn test_missing_file_is_error() {
    let result = SliderConfig::load("/nonexistent/slidewarp/config.toml");
    assert!(result.is_err());
}

#[test]
fn test_validation_rejects_inverted_buffer_bounds() {
    let mut config = SliderConfig::default();
    config.scheduler.buffer_floor_ms = 50;
    config.scheduler.buffer_ceiling_ms = 20;

    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_zero_retries() {
    let mut config = SliderConfig::default();
    config.loading.max_retries = 0;

    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_out_of_range_jitter() {
    let mut config = SliderConfig::default();
    config.loading.jitter = 1.5;

    assert!(config.validate().is_err());
}

#[test]
fn test_validation_allows_zero_idle_timeout_when_disabled() {
    let mut config = SliderConfig::default();
    config.idle.timeout_ms = 0;
    assert!(config.validate().is_err());

    config.idle.enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = SliderConfig::default();
    config.window.radius = 3;
    config.loading.retry_base_delay_ms = 500;
    config.save(&file_path)?;

    let reloaded = SliderConfig::load(&file_path)?;
    assert_eq!(reloaded, config);

    Ok(())
}

#[test]
fn test_merge_partial_only_overrides_changed_sections() {
    let mut base = SliderConfig::default();
    base.general.debug = true;

    let mut partial = SliderConfig::default();
    partial.window.radius = 7;

    let merged = base.merge_partial(partial);

    assert_eq!(merged.window.radius, 7);
    assert!(merged.general.debug);
}
