//! Configuration management for mixbridge
//!
//! Handles loading, parsing and validation of the YAML configuration file.
//! Every field has a default, so an absent file or a partial file is valid.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub mixer: MixerConfig,
    pub sync: SyncConfig,
    pub hotplug: HotplugConfig,
    /// Log every decoded event and every mixer action at info level
    pub verbose: bool,
}

/// Control surface configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Exact MIDI port name; must exist as both an input and an output
    pub name: String,
    /// Number of physical channels (slider + button pairs)
    pub channels: usize,
    /// LED for channel `c` is note `c + led_note_offset`
    pub led_note_offset: u8,
    /// Velocity used for a lit LED
    pub led_velocity: u8,
    /// Raw messages read per poll
    pub max_events_per_poll: usize,
}

/// Audio server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub client_label: String,
    /// Drop sources whose name contains `monitor_pattern`
    pub exclude_monitors: bool,
    pub monitor_pattern: String,
    /// Attempts per connect round
    pub connect_attempts: u32,
    pub connect_retry_ms: u64,
    /// Max-gain multiplier applied at full slider travel; `None` disables boost
    pub boost: Option<f32>,
}

/// Loop timing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for one wait on audio-server notifications
    pub change_timeout_ms: u64,
    /// Upper bound between two surface reconnect attempts
    pub reconnect_interval_ms: u64,
}

/// Hotplug watcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    pub enabled: bool,
    pub watch_dir: String,
    pub name_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            channels: 5,
            led_note_offset: 1,
            led_velocity: 100,
            max_events_per_poll: 10,
        }
    }
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            client_label: "mixbridge".to_string(),
            exclude_monitors: true,
            monitor_pattern: "monitor".to_string(),
            connect_attempts: 5,
            connect_retry_ms: 1000,
            boost: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            change_timeout_ms: 50,
            reconnect_interval_ms: 2000,
        }
    }
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_dir: "/dev/snd".to_string(),
            name_prefix: "midi".to_string(),
        }
    }
}

impl MixerConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    /// Gain reached at full slider travel
    pub fn max_gain(&self) -> f32 {
        self.boost.unwrap_or(1.0)
    }
}

impl SyncConfig {
    pub fn change_timeout(&self) -> Duration {
        Duration::from_millis(self.change_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.device.name.is_empty() {
            anyhow::bail!("device.name cannot be empty");
        }
        if self.device.channels == 0 {
            anyhow::bail!("device.channels must be at least 1");
        }
        let last_note = self
            .device
            .channels
            .checked_add(self.device.led_note_offset as usize);
        if last_note.map_or(true, |n| n > 128) {
            anyhow::bail!(
                "device.channels ({}) + led_note_offset ({}) exceeds the 128 MIDI notes",
                self.device.channels,
                self.device.led_note_offset
            );
        }
        if self.device.led_velocity == 0 || self.device.led_velocity > 127 {
            anyhow::bail!(
                "device.led_velocity {} is invalid (must be 1-127)",
                self.device.led_velocity
            );
        }
        if self.device.max_events_per_poll == 0 {
            anyhow::bail!("device.max_events_per_poll must be at least 1");
        }

        if self.mixer.client_label.is_empty() {
            anyhow::bail!("mixer.client_label cannot be empty");
        }
        if self.mixer.connect_attempts == 0 {
            anyhow::bail!("mixer.connect_attempts must be at least 1");
        }
        if self.mixer.exclude_monitors && self.mixer.monitor_pattern.is_empty() {
            anyhow::bail!("mixer.monitor_pattern cannot be empty when exclude_monitors is set");
        }
        if let Some(boost) = self.mixer.boost {
            if !boost.is_finite() || boost < 1.0 {
                anyhow::bail!("mixer.boost {} is invalid (must be >= 1.0)", boost);
            }
        }

        if self.sync.change_timeout_ms == 0 {
            anyhow::bail!("sync.change_timeout_ms must be at least 1");
        }

        if self.hotplug.enabled && self.hotplug.watch_dir.is_empty() {
            anyhow::bail!("hotplug.watch_dir cannot be empty when hotplug is enabled");
        }

        Ok(())
    }
}

// Default value functions
fn default_device_name() -> String {
    "QT Py M0 MIDI 1".to_string()
}
