//! Configuration management for Slidewarp
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It combines settings for the visibility window,
//! the render scheduler, asset loading, and idle behavior.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration struct containing all Slidewarp settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SliderConfig {
    /// Visibility window around the active slide
    #[serde(default)]
    pub window: WindowConfig,

    /// Frame-aligned update batching
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Atlas and individual image loading
    #[serde(default)]
    pub loading: LoadingConfig,

    /// Idle-reset behavior
    #[serde(default)]
    pub idle: IdleConfig,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Visibility window configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    /// Number of slides kept resident on each side of the active one
    pub radius: usize,

    /// Wrap around the ends of the slide list
    pub looping: bool,
}

/// Render scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Lower bound of the adaptive buffer delay (milliseconds)
    pub buffer_floor_ms: u64,

    /// Upper bound of the adaptive buffer delay (milliseconds)
    pub buffer_ceiling_ms: u64,

    /// Pending high-priority tasks that force an early flush
    #[serde(default = "SchedulerConfig::default_high_priority_threshold")]
    pub high_priority_threshold: usize,

    /// Quiescence period for debounced updates (milliseconds)
    #[serde(default = "SchedulerConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Asset loading configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadingConfig {
    /// Resolve images through atlas sheets when a frame exists
    pub use_atlas: bool,

    /// Total load attempts per image
    pub max_retries: u32,

    /// Delay before the second attempt; doubled for each further attempt (milliseconds)
    pub retry_base_delay_ms: u64,

    /// Random spread applied to each backoff delay (0.0-1.0)
    #[serde(default = "LoadingConfig::default_jitter")]
    pub jitter: f64,
}

/// Idle-reset configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdleConfig {
    /// Enable the idle effect
    pub enabled: bool,

    /// Pointer inactivity before the idle effect runs (milliseconds)
    pub timeout_ms: u64,

    /// Duration of the idle-reset animation (milliseconds)
    pub reset_duration_ms: u64,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,

    /// Duration of a slide transition (milliseconds)
    pub transition_duration_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            radius: 2,
            looping: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buffer_floor_ms: 16,
            buffer_ceiling_ms: 64,
            high_priority_threshold: Self::default_high_priority_threshold(),
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

impl SchedulerConfig {
    fn default_high_priority_threshold() -> usize {
        8
    }
    fn default_debounce_ms() -> u64 {
        100
    }

    pub fn buffer_floor(&self) -> Duration {
        Duration::from_millis(self.buffer_floor_ms)
    }

    pub fn buffer_ceiling(&self) -> Duration {
        Duration::from_millis(self.buffer_ceiling_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            use_atlas: true,
            max_retries: 3,
            retry_base_delay_ms: 250,
            jitter: Self::default_jitter(),
        }
    }
}

impl LoadingConfig {
    fn default_jitter() -> f64 {
        0.15
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 3000,
            reset_duration_ms: 800,
        }
    }
}

impl IdleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug: false,
            transition_duration_ms: 600,
        }
    }
}

impl SliderConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let rest = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: SliderConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.buffer_floor_ms == 0 {
            anyhow::bail!("Invalid buffer_floor_ms: must be at least 1");
        }

        if self.scheduler.buffer_ceiling_ms < self.scheduler.buffer_floor_ms {
            anyhow::bail!(
                "Invalid buffer bounds: ceiling {}ms is below floor {}ms",
                self.scheduler.buffer_ceiling_ms,
                self.scheduler.buffer_floor_ms
            );
        }

        if self.scheduler.high_priority_threshold == 0 {
            anyhow::bail!("Invalid high_priority_threshold: must be at least 1");
        }

        if self.loading.max_retries == 0 {
            anyhow::bail!("Invalid max_retries: at least one attempt is required");
        }

        if !(0.0..=1.0).contains(&self.loading.jitter) {
            anyhow::bail!("Invalid jitter: must be between 0.0 and 1.0");
        }

        if self.idle.enabled && self.idle.timeout_ms == 0 {
            anyhow::bail!("Invalid idle timeout: must be non-zero when idle effect is enabled");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults override this config
    pub fn merge_partial(mut self, partial: SliderConfig) -> Self {
        let default_config = SliderConfig::default();

        if partial.window != default_config.window {
            self.window = partial.window;
        }
        if partial.scheduler != default_config.scheduler {
            self.scheduler = partial.scheduler;
        }
        if partial.loading != default_config.loading {
            self.loading = partial.loading;
        }
        if partial.idle != default_config.idle {
            self.idle = partial.idle;
        }
        if partial.general != default_config.general {
            self.general = partial.general;
        }

        self
    }
}

#[cfg(test)]
mod tests;
