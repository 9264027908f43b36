//! Alarm mode classification.
//!
//! One ordered classifier turns (vitals, rhythm, mute) into exactly one
//! [`AlarmMode`]. First match wins:
//! `Muted > Artifact > Flatline > Critical > Warning > Normal`.
//!
//! Heart-rate warning bands sit just inside the critical limits:
//!
//! ```text
//!   critical   warning        normal         warning   critical
//! ----------|---------|-------------------|----------|---------> bpm
//!           35        40                  140        150
//! ```

use crate::channel::ChannelRole;
use crate::models::{AlarmMode, RhythmLabel, VitalsSnapshot};

const CRITICAL_LOW_HR: f64 = 35.0;
const CRITICAL_HIGH_HR: f64 = 150.0;

/// Classify the current inputs into the mode that should be active.
pub fn classify(vitals: &VitalsSnapshot, rhythm: &RhythmLabel, muted: bool) -> AlarmMode {
    let hr = vitals.heart_rate;
    let spo2 = vitals.spo2;

    if muted {
        AlarmMode::Muted
    } else if rhythm.is_artifact() {
        AlarmMode::Artifact
    } else if vitals.is_asystole() {
        AlarmMode::Flatline
    } else if spo2 < 90.0 || hr < CRITICAL_LOW_HR || hr > CRITICAL_HIGH_HR {
        AlarmMode::Critical
    } else if (90.0..92.0).contains(&spo2) || hr < 40.0 || hr > 140.0 {
        AlarmMode::Warning
    } else {
        AlarmMode::Normal
    }
}

/// Channels that must be stopped before `mode` takes over.
///
/// Every mode releases the continuous loops it does not own, so two loops
/// never overlap across a transition.
pub fn releases(mode: AlarmMode) -> &'static [ChannelRole] {
    match mode {
        AlarmMode::Muted => &ChannelRole::ALL,
        AlarmMode::Artifact => &[ChannelRole::Alarm, ChannelRole::Flatline, ChannelRole::Warning],
        AlarmMode::Flatline => &[ChannelRole::Alarm, ChannelRole::Warning, ChannelRole::Artifact],
        AlarmMode::Critical => &[ChannelRole::Flatline, ChannelRole::Warning, ChannelRole::Artifact],
        AlarmMode::Warning => &[ChannelRole::Alarm, ChannelRole::Flatline, ChannelRole::Artifact],
        AlarmMode::Normal => &[
            ChannelRole::Alarm,
            ChannelRole::Flatline,
            ChannelRole::Warning,
            ChannelRole::Artifact,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(hr: f64, spo2: f64) -> AlarmMode {
        classify(&VitalsSnapshot::new(hr, spo2), &RhythmLabel::default(), false)
    }

    #[test]
    fn test_normal_sinus() {
        assert_eq!(mode(75.0, 98.0), AlarmMode::Normal);
        assert_eq!(mode(140.0, 92.0), AlarmMode::Normal);
        assert_eq!(mode(40.0, 95.0), AlarmMode::Normal);
    }

    #[test]
    fn test_critical_thresholds() {
        assert_eq!(mode(150.0, 85.0), AlarmMode::Critical);
        assert_eq!(mode(75.0, 89.9), AlarmMode::Critical);
        assert_eq!(mode(34.0, 98.0), AlarmMode::Critical);
        assert_eq!(mode(151.0, 98.0), AlarmMode::Critical);
    }

    #[test]
    fn test_warning_band_on_saturation() {
        assert_eq!(mode(75.0, 90.0), AlarmMode::Warning);
        assert_eq!(mode(75.0, 91.9), AlarmMode::Warning);
        assert_eq!(mode(75.0, 92.0), AlarmMode::Normal);
    }

    #[test]
    fn test_heart_rate_warning_bands() {
        assert_eq!(mode(38.0, 93.0), AlarmMode::Warning);
        assert_eq!(mode(35.0, 98.0), AlarmMode::Warning);
        assert_eq!(mode(39.9, 98.0), AlarmMode::Warning);
        assert_eq!(mode(140.5, 98.0), AlarmMode::Warning);
        assert_eq!(mode(150.0, 98.0), AlarmMode::Warning);
    }

    #[test]
    fn test_critical_saturation_beats_warning_heart_rate() {
        assert_eq!(mode(38.0, 85.0), AlarmMode::Critical);
        assert_eq!(mode(145.0, 89.0), AlarmMode::Critical);
    }

    #[test]
    fn test_asystole_is_flatline() {
        assert_eq!(mode(0.0, 40.0), AlarmMode::Flatline);
        assert_eq!(mode(-5.0, 98.0), AlarmMode::Flatline);
    }

    #[test]
    fn test_mute_wins_over_everything() {
        let rhythm = RhythmLabel::new("artifact");
        for (hr, spo2) in [(0.0, 50.0), (75.0, 98.0), (150.0, 80.0), (38.0, 91.0)] {
            let v = VitalsSnapshot::new(hr, spo2);
            assert_eq!(classify(&v, &rhythm, true), AlarmMode::Muted);
            assert_eq!(classify(&v, &RhythmLabel::default(), true), AlarmMode::Muted);
        }
    }

    #[test]
    fn test_artifact_wins_over_flatline_and_critical() {
        let rhythm = RhythmLabel::new("artifact_ecg");
        assert_eq!(classify(&VitalsSnapshot::new(0.0, 98.0), &rhythm, false), AlarmMode::Artifact);
        assert_eq!(classify(&VitalsSnapshot::new(180.0, 70.0), &rhythm, false), AlarmMode::Artifact);
    }

    #[test]
    fn test_flatline_wins_over_critical() {
        // asystole with low saturation is both flatline and critical
        assert_eq!(mode(0.0, 60.0), AlarmMode::Flatline);
    }

    #[test]
    fn test_every_mode_releases_foreign_loops() {
        for mode in [
            AlarmMode::Muted,
            AlarmMode::Normal,
            AlarmMode::Warning,
            AlarmMode::Critical,
            AlarmMode::Flatline,
            AlarmMode::Artifact,
        ] {
            for role in ChannelRole::LOOPS {
                if mode.loop_channel() != Some(role) {
                    assert!(releases(mode).contains(&role), "{mode} keeps {role}");
                }
            }
        }
    }
}
