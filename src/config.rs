//! Configuration file handling with TOML support.

use crate::models::{RhythmLabel, VitalsSnapshot};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Audio toggles and volume multipliers
    #[serde(default)]
    pub audio: AudioSettings,

    /// Scheduler and channel timing
    #[serde(default)]
    pub timing: TimingConfig,

    /// Vitals the monitor starts with
    #[serde(default)]
    pub patient: PatientConfig,
}

/// Audio settings. Volumes are 0.0-1.0 multipliers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AudioSettings {
    /// Play the oxygen pulse tone
    #[serde(default = "default_true")]
    pub enable_pulse_tone: bool,

    /// Play the rhythm-locked beep
    #[serde(default = "default_true")]
    pub enable_beeps: bool,

    /// Play alarm audio (continuous alarm, warning beeps, pause pulse)
    #[serde(default = "default_true")]
    pub enable_alarms: bool,

    /// Temporarily silence alarm audio while beeps and tones continue
    #[serde(default)]
    pub alarm_silenced: bool,

    #[serde(default = "default_volume")]
    pub master_volume: f32,

    #[serde(default = "default_volume")]
    pub beep_volume: f32,

    #[serde(default = "default_tone_volume")]
    pub tone_volume: f32,

    #[serde(default = "default_volume")]
    pub alarm_volume: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enable_pulse_tone: true,
            enable_beeps: true,
            enable_alarms: true,
            alarm_silenced: false,
            master_volume: default_volume(),
            beep_volume: default_volume(),
            tone_volume: default_tone_volume(),
            alarm_volume: default_volume(),
        }
    }
}

impl AudioSettings {
    /// Copy with every volume clamped to 0.0-1.0.
    pub fn sanitized(self) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            master_volume: clamp(self.master_volume),
            beep_volume: clamp(self.beep_volume),
            tone_volume: clamp(self.tone_volume),
            alarm_volume: clamp(self.alarm_volume),
            ..self
        }
    }

    /// Whether the alarm and warning-beep channels may sound.
    pub fn alarms_audible(&self) -> bool {
        self.enable_alarms && !self.alarm_silenced
    }
}

fn default_true() -> bool {
    true
}
fn default_volume() -> f32 {
    1.0
}
fn default_tone_volume() -> f32 {
    0.7
}

/// Timing settings, all in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Delay between a beep and its oxygen pulse tone
    #[serde(default = "default_pulse_transit")]
    pub pulse_transit_ms: u64,

    /// Silence after which the pause watchdog sounds
    #[serde(default = "default_pause_threshold")]
    pub pause_threshold_ms: u64,

    /// How often the pause watchdog checks
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,

    /// Upper bound on a single channel call
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            pulse_transit_ms: default_pulse_transit(),
            pause_threshold_ms: default_pause_threshold(),
            watchdog_interval_ms: default_watchdog_interval(),
            channel_timeout_ms: default_channel_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn pulse_transit(&self) -> Duration {
        Duration::from_millis(self.pulse_transit_ms)
    }

    pub fn pause_threshold(&self) -> Duration {
        Duration::from_millis(self.pause_threshold_ms)
    }

    /// Never zero; a zero period would spin the watchdog.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(10))
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms.max(1))
    }
}

fn default_pulse_transit() -> u64 {
    250
}
fn default_pause_threshold() -> u64 {
    3000
}
fn default_watchdog_interval() -> u64 {
    500
}
fn default_channel_timeout() -> u64 {
    200
}

/// Initial patient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientConfig {
    #[serde(default = "default_heart_rate")]
    pub heart_rate: f64,

    #[serde(default = "default_spo2")]
    pub spo2: f64,

    #[serde(default = "default_rhythm")]
    pub rhythm: String,
}

impl Default for PatientConfig {
    fn default() -> Self {
        Self {
            heart_rate: default_heart_rate(),
            spo2: default_spo2(),
            rhythm: default_rhythm(),
        }
    }
}

impl PatientConfig {
    pub fn vitals(&self) -> VitalsSnapshot {
        VitalsSnapshot::new(self.heart_rate, self.spo2)
    }

    pub fn rhythm(&self) -> RhythmLabel {
        RhythmLabel::new(self.rhythm.clone())
    }
}

fn default_heart_rate() -> f64 {
    75.0
}
fn default_spo2() -> f64 {
    98.0
}
fn default_rhythm() -> String {
    "sinus".to_string()
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from default location or fall back to defaults.
    pub fn load_or_default() -> Self {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                match Self::load(&path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to load config, using defaults");
                    }
                }
            }
        }
        Config::default()
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vitaltone").join("config.toml"))
    }

    /// Write the commented sample configuration to `path`.
    pub fn write_sample(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        fs::write(path, sample_config())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Generate a sample configuration file content.
pub fn sample_config() -> &'static str {
    r##"# vitaltone configuration file
# Audio alarm engine for a simulated patient monitor

[audio]
# Oxygen pulse tone trailing each beat
enable_pulse_tone = true
# Rhythm-locked QRS beep
enable_beeps = true
# Continuous alarm, warning beeps and pause pulse
enable_alarms = true
# Silence alarms only (beeps and tones keep playing)
alarm_silenced = false
# Volume multipliers, 0.0 - 1.0
master_volume = 1.0
beep_volume = 1.0
tone_volume = 0.7
alarm_volume = 1.0

[timing]
# Pulse transit time between beep and pulse tone
pulse_transit_ms = 250
# Silence that counts as a pause / dropped beat
pause_threshold_ms = 3000
# Pause watchdog cadence
watchdog_interval_ms = 500
# Give up on a channel call after this long
channel_timeout_ms = 200

[patient]
heart_rate = 75
spo2 = 98
rhythm = "sinus"
"##
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_parses_to_defaults() {
        let config: Config = toml::from_str(sample_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [audio]
            alarm_silenced = true
            tone_volume = 0.4

            [patient]
            heart_rate = 120
            "#,
        )
        .unwrap();

        assert!(config.audio.alarm_silenced);
        assert!(config.audio.enable_beeps);
        assert_eq!(config.audio.tone_volume, 0.4);
        assert_eq!(config.patient.heart_rate, 120.0);
        assert_eq!(config.patient.spo2, 98.0);
        assert_eq!(config.timing.pause_threshold_ms, 3000);
    }

    #[test]
    fn test_volumes_are_clamped() {
        let settings = AudioSettings {
            master_volume: 1.8,
            beep_volume: -0.5,
            tone_volume: f32::NAN,
            ..AudioSettings::default()
        }
        .sanitized();
        assert_eq!(settings.master_volume, 1.0);
        assert_eq!(settings.beep_volume, 0.0);
        assert_eq!(settings.tone_volume, 0.0);
        assert_eq!(settings.alarm_volume, 1.0);
    }

    #[test]
    fn test_alarms_audible() {
        let mut settings = AudioSettings::default();
        assert!(settings.alarms_audible());
        settings.alarm_silenced = true;
        assert!(!settings.alarms_audible());
        settings.alarm_silenced = false;
        settings.enable_alarms = false;
        assert!(!settings.alarms_audible());
    }

    #[test]
    fn test_write_sample_then_load() {
        let dir = std::env::temp_dir().join(format!("vitaltone-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");

        Config::write_sample(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, Config::default());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let err = Config::load(Path::new("/nonexistent/vitaltone/config.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vitaltone/config.toml"));
    }

    #[test]
    fn test_watchdog_interval_never_zero() {
        let timing = TimingConfig {
            watchdog_interval_ms: 0,
            ..TimingConfig::default()
        };
        assert!(timing.watchdog_interval() > Duration::ZERO);
    }
}
