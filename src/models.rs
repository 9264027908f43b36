//! Data models for vitals, rhythm labels, alarm modes and engine events.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::channel::ChannelRole;

/// Highest heart rate the engine will honour; anything above is clamped.
pub const MAX_HEART_RATE: f64 = 300.0;

/// Latest known vitals. Replaced wholesale on every update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    /// Heart rate in bpm (0 = asystole)
    pub heart_rate: f64,
    /// Oxygen saturation, 0-100
    pub spo2: f64,
}

impl VitalsSnapshot {
    pub fn new(heart_rate: f64, spo2: f64) -> Self {
        Self { heart_rate, spo2 }.sanitized()
    }

    /// Clamp values to their physically meaningful ranges.
    ///
    /// Negative or non-finite heart rates read as asystole, a non-finite
    /// saturation reads as 0 so the result always lands in a defined mode.
    pub fn sanitized(self) -> Self {
        let heart_rate = if self.heart_rate.is_finite() {
            self.heart_rate.clamp(0.0, MAX_HEART_RATE)
        } else {
            0.0
        };
        let spo2 = if self.spo2.is_finite() {
            self.spo2.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self { heart_rate, spo2 }
    }

    pub fn is_asystole(&self) -> bool {
        self.heart_rate == 0.0
    }
}

impl Default for VitalsSnapshot {
    fn default() -> Self {
        Self {
            heart_rate: 75.0,
            spo2: 98.0,
        }
    }
}

impl fmt::Display for VitalsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HR {:.0} SpO2 {:.0}%", self.heart_rate, self.spo2)
    }
}

/// Acoustic family of a waveform, derived by substring matching on the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhythmFamily {
    /// Ventricular tachycardia / fibrillation, torsades
    Lethal,
    /// Atrial fibrillation / flutter, SVT
    Atrial,
    Brady,
    Tachy,
    /// Lead off or electrical noise
    Artifact,
    Other,
}

/// Opaque waveform classification, e.g. `sinus`, `vtach`, `artifact_ecg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RhythmLabel(String);

impl RhythmLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn family(&self) -> RhythmFamily {
        let label = self.0.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| label.contains(n));

        if has(&["artifact", "lead_off", "lead-off", "leadoff", "noise"]) {
            RhythmFamily::Artifact
        } else if has(&["vtach", "vfib", "torsades"]) {
            RhythmFamily::Lethal
        } else if has(&["afib", "aflutter", "svt"]) {
            RhythmFamily::Atrial
        } else if has(&["brady"]) {
            RhythmFamily::Brady
        } else if has(&["tachy"]) {
            RhythmFamily::Tachy
        } else {
            RhythmFamily::Other
        }
    }

    pub fn is_artifact(&self) -> bool {
        self.family() == RhythmFamily::Artifact
    }
}

impl Default for RhythmLabel {
    fn default() -> Self {
        Self::new("sinus")
    }
}

impl fmt::Display for RhythmLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single active acoustic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlarmMode {
    Muted,
    #[default]
    Normal,
    Warning,
    Critical,
    Flatline,
    Artifact,
}

impl AlarmMode {
    /// Whether the rhythm-locked beep timer runs in this mode.
    pub fn schedules_beeps(self) -> bool {
        matches!(self, AlarmMode::Normal | AlarmMode::Warning)
    }

    /// Whether the pulse-tone timer may run in this mode.
    pub fn allows_pulse_tone(self) -> bool {
        !matches!(
            self,
            AlarmMode::Muted | AlarmMode::Flatline | AlarmMode::Artifact
        )
    }

    /// The continuous loop this mode holds while active.
    pub fn loop_channel(self) -> Option<ChannelRole> {
        match self {
            AlarmMode::Critical => Some(ChannelRole::Alarm),
            AlarmMode::Flatline => Some(ChannelRole::Flatline),
            AlarmMode::Artifact => Some(ChannelRole::Artifact),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmMode::Muted => write!(f, "muted"),
            AlarmMode::Normal => write!(f, "normal"),
            AlarmMode::Warning => write!(f, "warning"),
            AlarmMode::Critical => write!(f, "critical"),
            AlarmMode::Flatline => write!(f, "flatline"),
            AlarmMode::Artifact => write!(f, "artifact"),
        }
    }
}

/// Visual-flash notification, issued once per audible beep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flash {
    pub heart_rate: f64,
    pub spo2: f64,
}

/// Observable engine activity, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    ModeChanged { from: AlarmMode, to: AlarmMode },
    Beep { pitch: f32, volume: f32 },
    WarningBeep { count: u8 },
    /// Third warning beep forced the switch to the continuous alarm
    Escalated,
    PulseTone {
        pitch: f32,
        volume: f32,
        perfusion_index: f64,
    },
    BeatDropped,
    PauseDetected { silence_ms: u64 },
    ChannelFault { role: ChannelRole, op: &'static str },
}

impl EngineEvent {
    /// Short name used by the exporters.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::ModeChanged { .. } => "mode",
            EngineEvent::Beep { .. } => "beep",
            EngineEvent::WarningBeep { .. } => "warning_beep",
            EngineEvent::Escalated => "escalated",
            EngineEvent::PulseTone { .. } => "pulse_tone",
            EngineEvent::BeatDropped => "beat_dropped",
            EngineEvent::PauseDetected { .. } => "pause",
            EngineEvent::ChannelFault { .. } => "channel_fault",
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::ModeChanged { from, to } => write!(f, "mode {} -> {}", from, to),
            EngineEvent::Beep { pitch, volume } => {
                write!(f, "beep pitch={:.2} vol={:.2}", pitch, volume)
            }
            EngineEvent::WarningBeep { count } => write!(f, "warning beep {}/3", count),
            EngineEvent::Escalated => write!(f, "escalated to continuous alarm"),
            EngineEvent::PulseTone {
                pitch,
                volume,
                perfusion_index,
            } => write!(
                f,
                "pulse tone pitch={:.2} vol={:.2} pi={:.1}",
                pitch, volume, perfusion_index
            ),
            EngineEvent::BeatDropped => write!(f, "beat dropped"),
            EngineEvent::PauseDetected { silence_ms } => {
                write!(f, "pause detected after {}ms", silence_ms)
            }
            EngineEvent::ChannelFault { role, op } => write!(f, "{} {} failed", role, op),
        }
    }
}
