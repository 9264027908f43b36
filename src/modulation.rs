//! Acoustic modulation model.
//!
//! Pure mappings from (rhythm, SpO2, heart rate) to playback rate and volume
//! for the rhythm-locked beep and the oxygen pulse tone.

use crate::models::{RhythmFamily, RhythmLabel};

/// Playback rate of the warning beep.
pub const WARNING_PITCH: f32 = 1.3;
/// Base volume of the warning beep, before alarm/master scaling.
pub const WARNING_VOLUME: f32 = 0.5;
/// Playback rate that turns the beep clip into an electrical buzz.
pub const ARTIFACT_RATE: f32 = 0.2;
/// Base volume of the artifact buzz, before master scaling.
pub const ARTIFACT_VOLUME: f32 = 0.3;

const VOLUME_VERY_WEAK: f32 = 0.2;
const VOLUME_WEAK: f32 = 0.4;
const VOLUME_STRONG: f32 = 0.6;

/// Rate and volume for one sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulation {
    pub pitch: f32,
    pub volume: f32,
}

/// Compute the beep's pitch and volume.
pub fn modulate(rhythm: &RhythmLabel, spo2: f64, heart_rate: f64) -> Modulation {
    Modulation {
        pitch: beep_pitch(rhythm, spo2),
        volume: pulse_strength(heart_rate, spo2),
    }
}

/// Rhythm factor times SpO2 factor; the two always combine multiplicatively.
pub fn beep_pitch(rhythm: &RhythmLabel, spo2: f64) -> f32 {
    rhythm_pitch(rhythm.family()) * spo2_pitch(spo2)
}

fn rhythm_pitch(family: RhythmFamily) -> f32 {
    match family {
        RhythmFamily::Lethal => 0.7,
        RhythmFamily::Atrial => 0.95,
        RhythmFamily::Brady => 0.85,
        RhythmFamily::Tachy => 1.05,
        RhythmFamily::Artifact | RhythmFamily::Other => 1.0,
    }
}

fn spo2_pitch(spo2: f64) -> f32 {
    if spo2 >= 97.0 {
        1.0
    } else if spo2 >= 94.0 {
        0.95
    } else if spo2 >= 90.0 {
        0.9
    } else {
        0.75
    }
}

/// Beep volume as a proxy for pulse strength.
///
/// Rules are checked very-weak first, then weak, then strong. Values no
/// rule claims (HR in (100, 120] with SpO2 >= 95) keep the strong default.
pub fn pulse_strength(heart_rate: f64, spo2: f64) -> f32 {
    if heart_rate < 40.0 || heart_rate > 140.0 || spo2 < 90.0 {
        VOLUME_VERY_WEAK
    } else if heart_rate < 50.0 || heart_rate > 120.0 || spo2 < 95.0 {
        VOLUME_WEAK
    } else {
        VOLUME_STRONG
    }
}

/// Perfusion index (0-10 scale) for the pulse tone.
pub fn perfusion_index(spo2: f64, heart_rate: f64) -> f64 {
    let mut index = if spo2 >= 98.0 {
        10.0
    } else if spo2 >= 95.0 {
        8.0
    } else if spo2 >= 92.0 {
        7.0
    } else if spo2 >= 88.0 {
        6.0
    } else if spo2 >= 85.0 {
        5.0
    } else if spo2 >= 82.0 {
        4.0
    } else if spo2 >= 78.0 {
        3.0
    } else if spo2 >= 75.0 {
        2.0
    } else if spo2 >= 70.0 {
        1.0
    } else {
        0.0
    };

    // Fast rates shorten filling time, so the pleth amplitude drops.
    if heart_rate >= 140.0 {
        index *= (1.0 - (heart_rate - 140.0) * 0.005).max(0.5);
        if spo2 >= 98.0 {
            index *= 1.15;
        }
    } else if heart_rate >= 120.0 {
        index *= 1.0 - (heart_rate - 120.0) * 0.0075;
        if spo2 >= 98.0 {
            index *= 1.1;
        }
    }

    index
}

/// Pulse-tone pitch: high and pleasant when saturated, low when desaturated.
pub fn tone_pitch(spo2: f64) -> f32 {
    if spo2 >= 98.0 {
        1.4
    } else if spo2 >= 95.0 {
        1.2
    } else if spo2 >= 92.0 {
        1.0
    } else if spo2 >= 88.0 {
        0.85
    } else if spo2 >= 85.0 {
        0.7
    } else {
        0.6
    }
}

pub fn tone_volume(perfusion_index: f64, tone_volume: f32, master_volume: f32) -> f32 {
    ((perfusion_index / 10.0) as f32 * tone_volume * master_volume).clamp(0.1, 1.0)
}

/// Pitch and volume for the pulse tone, plus the perfusion index behind it.
pub fn pulse_tone(spo2: f64, heart_rate: f64, tone_volume_setting: f32, master: f32) -> (Modulation, f64) {
    let index = perfusion_index(spo2, heart_rate);
    let modulation = Modulation {
        pitch: tone_pitch(spo2),
        volume: tone_volume(index, tone_volume_setting, master),
    };
    (modulation, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_normal_sinus_beep() {
        let m = modulate(&RhythmLabel::new("sinus"), 98.0, 75.0);
        assert!(approx(m.pitch, 1.0));
        assert!(approx(m.volume, 0.6));
    }

    #[test]
    fn test_factors_combine_multiplicatively() {
        let lethal = beep_pitch(&RhythmLabel::new("vtach"), 98.0);
        let hypoxic = beep_pitch(&RhythmLabel::new("sinus"), 85.0);
        let both = beep_pitch(&RhythmLabel::new("vtach"), 85.0);
        assert!(approx(lethal, 0.7));
        assert!(approx(hypoxic, 0.75));
        assert!(approx(both, 0.7 * 0.75));
        assert!(both < lethal && both < hypoxic);
    }

    #[test]
    fn test_spo2_pitch_bands() {
        let sinus = RhythmLabel::new("sinus");
        assert!(approx(beep_pitch(&sinus, 97.0), 1.0));
        assert!(approx(beep_pitch(&sinus, 96.9), 0.95));
        assert!(approx(beep_pitch(&sinus, 94.0), 0.95));
        assert!(approx(beep_pitch(&sinus, 91.0), 0.9));
        assert!(approx(beep_pitch(&sinus, 89.9), 0.75));
    }

    #[test]
    fn test_rhythm_pitch_families() {
        assert!(approx(beep_pitch(&RhythmLabel::new("aflutter"), 99.0), 0.95));
        assert!(approx(beep_pitch(&RhythmLabel::new("sinus_brady"), 99.0), 0.85));
        assert!(approx(beep_pitch(&RhythmLabel::new("sinus_tachy"), 99.0), 1.05));
    }

    #[test]
    fn test_pulse_strength_tiers() {
        assert!(approx(pulse_strength(35.0, 99.0), 0.2));
        assert!(approx(pulse_strength(145.0, 99.0), 0.2));
        assert!(approx(pulse_strength(80.0, 85.0), 0.2));
        assert!(approx(pulse_strength(45.0, 99.0), 0.4));
        assert!(approx(pulse_strength(130.0, 99.0), 0.4));
        assert!(approx(pulse_strength(80.0, 92.0), 0.4));
        assert!(approx(pulse_strength(50.0, 95.0), 0.6));
        assert!(approx(pulse_strength(100.0, 99.0), 0.6));
    }

    #[test]
    fn test_unclaimed_band_keeps_strong_default() {
        assert!(approx(pulse_strength(110.0, 98.0), 0.6));
        assert!(approx(pulse_strength(120.0, 95.0), 0.6));
    }

    #[test]
    fn test_modulation_is_deterministic() {
        let rhythm = RhythmLabel::new("afib");
        assert_eq!(modulate(&rhythm, 93.0, 112.0), modulate(&rhythm, 93.0, 112.0));
    }

    #[test]
    fn test_perfusion_index_table() {
        assert_eq!(perfusion_index(99.0, 80.0), 10.0);
        assert_eq!(perfusion_index(95.0, 80.0), 8.0);
        assert_eq!(perfusion_index(90.0, 80.0), 6.0);
        assert_eq!(perfusion_index(80.0, 80.0), 3.0);
        assert_eq!(perfusion_index(50.0, 80.0), 0.0);
    }

    #[test]
    fn test_perfusion_index_tachycardia_scaling() {
        // 8 * (1 - 10 * 0.0075)
        assert!((perfusion_index(96.0, 130.0) - 7.4).abs() < 1e-9);
        // reduction floors at 0.5
        assert!((perfusion_index(96.0, 260.0) - 4.0).abs() < 1e-9);
        // strong saturation gets a boost back
        assert!((perfusion_index(99.0, 140.0) - 11.5).abs() < 1e-9);
    }

    #[test]
    fn test_tone_pitch_bands() {
        assert!(approx(tone_pitch(98.0), 1.4));
        assert!(approx(tone_pitch(96.0), 1.2));
        assert!(approx(tone_pitch(92.0), 1.0));
        assert!(approx(tone_pitch(88.0), 0.85));
        assert!(approx(tone_pitch(85.0), 0.7));
        assert!(approx(tone_pitch(70.0), 0.6));
    }

    #[test]
    fn test_tone_volume_clamped() {
        assert!(approx(tone_volume(10.0, 0.7, 1.0), 0.7));
        assert!(approx(tone_volume(0.0, 0.7, 1.0), 0.1));
        assert!(approx(tone_volume(11.5, 1.0, 1.0), 1.0));
    }
}
