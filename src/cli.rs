//! Command-line interface.
//!
//! Flags override the matching config-file values; anything left unset
//! falls through to the config file and then to built-in defaults.

use crate::config::Config;
use crate::engine::EngineOptions;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Audio alarm engine for a simulated bedside patient monitor.
///
/// Plays a rhythm-locked QRS beep, an oxygen pulse tone, warning beeps and
/// continuous alarms driven by heart rate, SpO2 and the rhythm label.
/// Runs as an interactive monitor, or in batch mode for scripted runs.
#[derive(Parser, Debug, Clone)]
#[command(name = "vitaltone")]
#[command(author = "Thomas Vincent")]
#[command(version)]
#[command(about = "Vitals-driven audio alarms for a simulated patient monitor", long_about = None)]
pub struct Args {
    /// Initial heart rate in bpm (0 = asystole)
    #[arg(short = 'r', long)]
    pub heart_rate: Option<f64>,

    /// Initial oxygen saturation, 0-100
    #[arg(short = 'o', long)]
    pub spo2: Option<f64>,

    /// Initial rhythm label
    ///
    /// Examples: sinus, sinus_brady, afib, vtach, artifact_ecg
    #[arg(short = 'R', long)]
    pub rhythm: Option<String>,

    /// Start muted
    #[arg(short = 'm', long)]
    pub mute: bool,

    /// Configuration file path
    #[arg(short = 'c', long, env = "VITALTONE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Batch mode - run headless and print the event log
    #[arg(short = 'b', long)]
    pub batch: bool,

    /// How long a batch run lasts (e.g. 10s, 1m30s)
    #[arg(short = 'd', long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub duration: Duration,

    /// Vitals script (TOML) replayed during a batch run
    #[arg(short = 's', long)]
    pub script: Option<PathBuf>,

    /// Export format for the batch event log
    #[arg(short = 'e', long, value_enum, default_value = "text")]
    pub export: ExportFormat,

    /// Where sound goes
    #[arg(long, value_enum, default_value = "terminal")]
    pub backend: BackendKind,

    /// Disable the oxygen pulse tone
    #[arg(long)]
    pub no_tone: bool,

    /// Disable the QRS beep
    #[arg(long)]
    pub no_beeps: bool,

    /// Disable alarm audio
    #[arg(long)]
    pub no_alarms: bool,

    /// Start with alarms silenced
    #[arg(long)]
    pub silence_alarms: bool,

    /// Master volume, 0.0-1.0
    #[arg(long)]
    pub master_volume: Option<f32>,

    /// Random vitals drift: heart rate wanders by up to this many bpm
    #[arg(short = 'j', long, default_value = "0", value_parser = parse_jitter)]
    pub jitter: f64,

    /// Write a sample configuration file and exit
    #[arg(long)]
    pub init_config: bool,

    /// Verbose output - debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Channel backend selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// In-memory channels that ring the terminal bell on beeps (default)
    #[default]
    Terminal,
    /// In-memory channels, no sound at all
    Silent,
    /// Synthesized audio on the default output device
    Playback,
}

/// Export format for the batch event log.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Plain text format
    #[default]
    Text,
    /// Comma-separated values (CSV)
    Csv,
    /// JavaScript Object Notation (JSON)
    Json,
}

fn parse_jitter(s: &str) -> Result<f64, String> {
    let jitter: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !jitter.is_finite() || jitter < 0.0 {
        return Err(format!("expected a finite, non-negative bpm, got {s}"));
    }
    Ok(jitter)
}

impl Args {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Fold flags that were given into the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(heart_rate) = self.heart_rate {
            config.patient.heart_rate = heart_rate;
        }
        if let Some(spo2) = self.spo2 {
            config.patient.spo2 = spo2;
        }
        if let Some(ref rhythm) = self.rhythm {
            config.patient.rhythm = rhythm.clone();
        }

        let audio = &mut config.audio;
        if self.no_tone {
            audio.enable_pulse_tone = false;
        }
        if self.no_beeps {
            audio.enable_beeps = false;
        }
        if self.no_alarms {
            audio.enable_alarms = false;
        }
        if self.silence_alarms {
            audio.alarm_silenced = true;
        }
        if let Some(volume) = self.master_volume {
            audio.master_volume = volume;
        }
    }

    /// Engine starting state from the merged configuration.
    pub fn engine_options(&self, config: &Config) -> EngineOptions {
        EngineOptions {
            settings: config.audio.sanitized(),
            timing: config.timing,
            vitals: config.patient.vitals(),
            rhythm: config.patient.rhythm(),
            muted: self.mute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["vitaltone"]);
        assert_eq!(args.heart_rate, None);
        assert_eq!(args.duration, Duration::from_secs(10));
        assert_eq!(args.backend, BackendKind::Terminal);
        assert_eq!(args.export, ExportFormat::Text);
        assert!(!args.batch);
        assert!(!args.mute);
    }

    #[test]
    fn test_vitals_flags() {
        let args = Args::parse_from(["vitaltone", "-r", "38", "-o", "93", "-R", "sinus_brady"]);
        assert_eq!(args.heart_rate, Some(38.0));
        assert_eq!(args.spo2, Some(93.0));
        assert_eq!(args.rhythm.as_deref(), Some("sinus_brady"));
    }

    #[test]
    fn test_batch_flags() {
        let args = Args::parse_from([
            "vitaltone", "-b", "-d", "1m30s", "-e", "csv", "--backend", "silent",
        ]);
        assert!(args.batch);
        assert_eq!(args.duration, Duration::from_secs(90));
        assert_eq!(args.export, ExportFormat::Csv);
        assert_eq!(args.backend, BackendKind::Silent);
    }

    #[test]
    fn test_overrides_win_over_config() {
        let args = Args::parse_from([
            "vitaltone", "-r", "0", "-R", "vfib", "--no-tone", "--silence-alarms", "--master-volume", "0.5", "-m",
        ]);
        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.patient.heart_rate, 0.0);
        assert_eq!(config.patient.spo2, 98.0);
        assert_eq!(config.patient.rhythm, "vfib");
        assert!(!config.audio.enable_pulse_tone);
        assert!(config.audio.enable_beeps);
        assert!(config.audio.alarm_silenced);
        assert_eq!(config.audio.master_volume, 0.5);

        let options = args.engine_options(&config);
        assert!(options.muted);
        assert!(options.vitals.is_asystole());
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let args = Args::parse_from(["vitaltone"]);
        let mut config = Config::default();
        config.audio.enable_beeps = false;
        config.patient.heart_rate = 110.0;
        args.apply_overrides(&mut config);
        assert!(!config.audio.enable_beeps);
        assert_eq!(config.patient.heart_rate, 110.0);
    }

    #[test]
    fn test_jitter_must_be_finite() {
        assert!(Args::try_parse_from(["vitaltone", "-j", "inf"]).is_err());
        assert!(Args::try_parse_from(["vitaltone", "-j", "NaN"]).is_err());
        assert!(Args::try_parse_from(["vitaltone", "--jitter=-3"]).is_err());
        let args = Args::try_parse_from(["vitaltone", "-j", "4.5"]).unwrap();
        assert_eq!(args.jitter, 4.5);
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Args::try_parse_from(["vitaltone", "-d", "soon"]).is_err());
    }
}
