//! Vitals sources for batch runs: TOML scripts and random drift.
//!
//! A script is a list of timed steps, each changing some of the inputs:
//!
//! ```toml
//! duration = "20s"
//!
//! [[step]]
//! at = "5s"
//! heart_rate = 38
//! spo2 = 93
//!
//! [[step]]
//! at = "12s"
//! rhythm = "vtach"
//! alarm_silenced = true
//! ```

use crate::config::AudioSettings;
use crate::engine::EngineHandle;
use crate::models::{RhythmLabel, VitalsSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// How often the drift source nudges the heart rate.
pub const DRIFT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("step {index} at {at:?} comes before the step preceding it")]
    OutOfOrder { index: usize, at: Duration },
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    duration(deserializer).map(Some)
}

/// A scripted sequence of vitals changes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    /// Run length; the command line `--duration` is used when absent
    #[serde(default, deserialize_with = "optional_duration")]
    pub duration: Option<Duration>,

    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// One timed change. Unset fields keep their previous value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Step {
    /// Offset from the start of the run
    #[serde(deserialize_with = "duration")]
    pub at: Duration,
    pub heart_rate: Option<f64>,
    pub spo2: Option<f64>,
    pub rhythm: Option<String>,
    pub muted: Option<bool>,
    pub alarm_silenced: Option<bool>,
    #[serde(default)]
    pub drop_beats: u32,
}

/// The inputs a script step can touch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientState {
    pub vitals: VitalsSnapshot,
    pub rhythm: RhythmLabel,
    pub muted: bool,
    pub settings: AudioSettings,
}

impl Scenario {
    pub fn parse(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        for (index, pair) in self.steps.windows(2).enumerate() {
            if pair[1].at < pair[0].at {
                return Err(ScenarioError::OutOfOrder {
                    index: index + 1,
                    at: pair[1].at,
                });
            }
        }
        Ok(())
    }

    /// Feed every step to the engine at its offset from `start`.
    pub async fn play(&self, handle: &EngineHandle, mut state: PatientState, start: Instant) {
        for step in &self.steps {
            time::sleep_until(start + step.at).await;
            step.apply(handle, &mut state);
        }
    }
}

impl Step {
    /// Fold this step into `state` and forward what changed.
    pub fn apply(&self, handle: &EngineHandle, state: &mut PatientState) {
        info!(at = %humantime::format_duration(self.at), "scenario step");

        if let Some(muted) = self.muted {
            if muted != state.muted {
                state.muted = muted;
                handle.set_muted(muted);
            }
        }

        if let Some(silenced) = self.alarm_silenced {
            if silenced != state.settings.alarm_silenced {
                state.settings.alarm_silenced = silenced;
                handle.update_settings(state.settings);
            }
        }

        let vitals = VitalsSnapshot::new(
            self.heart_rate.unwrap_or(state.vitals.heart_rate),
            self.spo2.unwrap_or(state.vitals.spo2),
        );
        let rhythm = self.rhythm.as_deref().map(RhythmLabel::new);
        match rhythm {
            Some(rhythm) => {
                state.vitals = vitals;
                state.rhythm = rhythm.clone();
                handle.update(vitals, rhythm);
            }
            None if vitals != state.vitals => {
                state.vitals = vitals;
                handle.update_vitals(vitals);
            }
            None => {}
        }

        if self.drop_beats > 0 {
            handle.drop_beats(self.drop_beats);
        }
    }
}

/// Random walk of the heart rate around a baseline.
#[derive(Debug)]
pub struct Drift {
    baseline: VitalsSnapshot,
    jitter: f64,
    rng: StdRng,
}

impl Drift {
    pub fn new(baseline: VitalsSnapshot, jitter: f64) -> Self {
        Self::with_rng(baseline, jitter, StdRng::from_entropy())
    }

    pub fn with_rng(baseline: VitalsSnapshot, jitter: f64, rng: StdRng) -> Self {
        Self {
            baseline,
            jitter: if jitter.is_finite() { jitter.abs() } else { 0.0 },
            rng,
        }
    }

    /// Next reading. Asystole stays asystole and saturation never drifts.
    pub fn sample(&mut self) -> VitalsSnapshot {
        if self.baseline.is_asystole() || self.jitter == 0.0 {
            return self.baseline;
        }
        let offset = self.rng.gen_range(-self.jitter..=self.jitter);
        // Never drift into asystole.
        let heart_rate = (self.baseline.heart_rate + offset).max(1.0);
        VitalsSnapshot::new(heart_rate.round(), self.baseline.spo2)
    }

    /// Push a fresh reading every [`DRIFT_INTERVAL`] until `until`.
    pub async fn run(mut self, handle: &EngineHandle, until: Instant) {
        let mut ticker = time::interval_at(Instant::now() + DRIFT_INTERVAL, DRIFT_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let vitals = self.sample();
                    debug!(%vitals, "drift");
                    handle.update_vitals(vitals);
                }
                _ = time::sleep_until(until) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let scenario = Scenario::parse(
            r#"
            duration = "20s"

            [[step]]
            at = "5s"
            heart_rate = 38
            spo2 = 93

            [[step]]
            at = "1m"
            rhythm = "vtach"
            alarm_silenced = true
            drop_beats = 2
            "#,
        )
        .unwrap();

        assert_eq!(scenario.duration, Some(Duration::from_secs(20)));
        assert_eq!(scenario.steps.len(), 2);
        assert_eq!(scenario.steps[0].at, Duration::from_secs(5));
        assert_eq!(scenario.steps[0].heart_rate, Some(38.0));
        assert_eq!(scenario.steps[1].at, Duration::from_secs(60));
        assert_eq!(scenario.steps[1].rhythm.as_deref(), Some("vtach"));
        assert_eq!(scenario.steps[1].drop_beats, 2);
    }

    #[test]
    fn test_empty_script() {
        let scenario = Scenario::parse("").unwrap();
        assert!(scenario.duration.is_none());
        assert!(scenario.steps.is_empty());
    }

    #[test]
    fn test_rejects_out_of_order_steps() {
        let err = Scenario::parse(
            r#"
            [[step]]
            at = "10s"
            [[step]]
            at = "2s"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::OutOfOrder { index: 1, .. }));
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(matches!(
            Scenario::parse("[[step]]\nat = \"whenever\"\n"),
            Err(ScenarioError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Scenario::load(Path::new("/nonexistent/vitaltone.toml")).unwrap_err();
        assert!(matches!(err, ScenarioError::Io { .. }));
    }

    #[test]
    fn test_drift_stays_within_jitter() {
        let baseline = VitalsSnapshot::new(80.0, 97.0);
        let mut drift = Drift::with_rng(baseline, 5.0, StdRng::seed_from_u64(7));
        for _ in 0..200 {
            let v = drift.sample();
            assert!((75.0..=85.0).contains(&v.heart_rate), "{v}");
            assert_eq!(v.spo2, 97.0);
        }
    }

    #[test]
    fn test_drift_leaves_asystole_alone() {
        let baseline = VitalsSnapshot::new(0.0, 97.0);
        let mut drift = Drift::with_rng(baseline, 20.0, StdRng::seed_from_u64(1));
        assert!(drift.sample().is_asystole());
    }

    #[test]
    fn test_drift_ignores_non_finite_jitter() {
        let baseline = VitalsSnapshot::new(80.0, 97.0);
        let mut drift = Drift::with_rng(baseline, f64::INFINITY, StdRng::seed_from_u64(5));
        assert_eq!(drift.sample(), baseline);
    }

    #[test]
    fn test_drift_never_reaches_asystole() {
        let baseline = VitalsSnapshot::new(3.0, 97.0);
        let mut drift = Drift::with_rng(baseline, 30.0, StdRng::seed_from_u64(3));
        for _ in 0..200 {
            assert!(drift.sample().heart_rate >= 1.0);
        }
    }
}
