//! Event log export.
//!
//! Batch runs print every engine event in one of three formats: plain text
//! for reading, CSV for spreadsheets and JSON for tooling.

use crate::cli::ExportFormat;
use crate::models::{AlarmMode, EngineEvent};
use chrono::{DateTime, Utc};
use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use std::time::Duration;

/// An engine event with the time it was observed.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedEvent {
    pub at: DateTime<Utc>,
    /// Milliseconds since the start of the run
    pub offset_ms: u64,
    pub event: EngineEvent,
}

impl LoggedEvent {
    pub fn new(event: EngineEvent, offset: Duration) -> Self {
        Self {
            at: Utc::now(),
            offset_ms: offset.as_millis() as u64,
            event,
        }
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub duration_ms: u64,
    pub beeps: u64,
    pub pulse_tones: u64,
    pub warning_beeps: u64,
    pub escalations: u64,
    pub dropped_beats: u64,
    pub pauses: u64,
    pub mode_changes: u64,
    pub channel_faults: u64,
    pub final_mode: AlarmMode,
}

impl RunSummary {
    pub fn from_events(events: &[LoggedEvent], duration: Duration, final_mode: AlarmMode) -> Self {
        let mut summary = RunSummary {
            duration_ms: duration.as_millis() as u64,
            final_mode,
            ..Default::default()
        };
        for logged in events {
            let counter = match logged.event {
                EngineEvent::Beep { .. } => &mut summary.beeps,
                EngineEvent::PulseTone { .. } => &mut summary.pulse_tones,
                EngineEvent::WarningBeep { .. } => &mut summary.warning_beeps,
                EngineEvent::Escalated => &mut summary.escalations,
                EngineEvent::BeatDropped => &mut summary.dropped_beats,
                EngineEvent::PauseDetected { .. } => &mut summary.pauses,
                EngineEvent::ModeChanged { .. } => &mut summary.mode_changes,
                EngineEvent::ChannelFault { .. } => &mut summary.channel_faults,
            };
            *counter += 1;
        }
        summary
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a RunSummary,
    events: &'a [LoggedEvent],
}

/// Render the event log in the requested format.
pub fn export_events(events: &[LoggedEvent], summary: &RunSummary, format: ExportFormat) -> String {
    match format {
        ExportFormat::Text => export_text(events, summary),
        ExportFormat::Csv => export_csv(events),
        ExportFormat::Json => export_json(events, summary),
    }
}

fn export_text(events: &[LoggedEvent], summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("VITALTONE EVENT LOG\n");
    output.push_str("===================\n\n");

    for logged in events {
        output.push_str(&format!(
            "{} {:>8} {}\n",
            logged.at.format("%H:%M:%S%.3f"),
            format_offset(logged.offset_ms),
            logged.event
        ));
    }

    let count = |n: u64| n.to_formatted_string(&Locale::en);
    output.push('\n');
    output.push_str(&format!(
        "Duration: {}\n",
        humantime::format_duration(Duration::from_millis(summary.duration_ms))
    ));
    output.push_str(&format!("Final mode: {}\n", summary.final_mode));
    output.push_str(&format!("Beeps: {}\n", count(summary.beeps)));
    output.push_str(&format!("Pulse tones: {}\n", count(summary.pulse_tones)));
    output.push_str(&format!("Warning beeps: {}\n", count(summary.warning_beeps)));
    output.push_str(&format!("Escalations: {}\n", count(summary.escalations)));
    output.push_str(&format!("Dropped beats: {}\n", count(summary.dropped_beats)));
    output.push_str(&format!("Pauses: {}\n", count(summary.pauses)));
    output.push_str(&format!("Mode changes: {}\n", count(summary.mode_changes)));
    if summary.channel_faults > 0 {
        output.push_str(&format!("Channel faults: {}\n", count(summary.channel_faults)));
    }

    output
}

fn export_csv(events: &[LoggedEvent]) -> String {
    let mut output = String::new();

    output.push_str("Time,OffsetMs,Kind,Detail\n");

    for logged in events {
        output.push_str(&format!(
            "{},{},{},\"{}\"\n",
            logged.at.to_rfc3339(),
            logged.offset_ms,
            logged.event.kind(),
            logged.event.to_string().replace('"', "\"\""),
        ));
    }

    output
}

fn export_json(events: &[LoggedEvent], summary: &RunSummary) -> String {
    let report = JsonReport { summary, events };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => json + "\n",
        Err(e) => format!("{{\"error\": \"{}\"}}\n", e),
    }
}

/// `+12.345s` style offset.
fn format_offset(offset_ms: u64) -> String {
    format!("+{}.{:03}s", offset_ms / 1000, offset_ms % 1000)
}
