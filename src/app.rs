//! Interactive monitor state.
//!
//! Holds what the screen shows and forwards key presses to the engine.

use crate::audio::build_bank;
use crate::cli::{Args, BackendKind};
use crate::config::{AudioSettings, Config};
use crate::engine::{self, EngineHandle, FlashCallback};
use crate::models::{AlarmMode, EngineEvent, Flash, MAX_HEART_RATE, RhythmLabel, VitalsSnapshot};
use anyhow::Result;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, trace};

/// How long a readout stays highlighted after a beep.
pub const FLASH_DURATION: Duration = Duration::from_millis(150);

/// Events kept for the on-screen log.
const RECENT_EVENTS: usize = 12;

const HEART_RATE_STEP: f64 = 5.0;
const SPO2_STEP: f64 = 1.0;
const DROP_BEATS: u32 = 4;

/// Rhythms cycled with `r`.
pub const RHYTHM_PRESETS: [&str; 11] = [
    "sinus",
    "sinus_brady",
    "sinus_tachy",
    "afib",
    "aflutter",
    "svt",
    "vtach",
    "vfib",
    "torsades",
    "artifact_ecg",
    "lead_off",
];

/// Application state.
pub struct App {
    pub vitals: VitalsSnapshot,
    pub rhythm: RhythmLabel,
    pub muted: bool,
    pub settings: AudioSettings,
    pub mode: AlarmMode,
    pub backend: BackendKind,
    /// Newest first
    pub recent: VecDeque<(Instant, EngineEvent)>,
    pub beeps: u64,
    pub started: Instant,
    pub running: bool,
    pub show_help: bool,
    last_flash: Option<Instant>,
    /// Heart rate to restore when leaving simulated asystole
    before_asystole: Option<f64>,
    engine: EngineHandle,
    events: UnboundedReceiver<EngineEvent>,
    flashes: UnboundedReceiver<Flash>,
}

impl App {
    /// Create the application and start its engine.
    pub fn new(args: &Args, config: &Config) -> Result<Self> {
        let options = args.engine_options(config);
        let bank = build_bank(args.backend, true, config.timing.channel_timeout())?;

        let (flash_tx, flashes) = mpsc::unbounded_channel();
        let on_flash: FlashCallback = Box::new(move |flash| {
            let _ = flash_tx.send(flash);
        });

        let vitals = options.vitals;
        let rhythm = options.rhythm.clone();
        let muted = options.muted;
        let settings = options.settings;
        let (engine, events) = engine::spawn(options, bank, Some(on_flash));

        info!(backend = ?args.backend, "interactive monitor started");

        Ok(Self {
            vitals,
            rhythm,
            muted,
            settings,
            mode: engine.mode(),
            backend: args.backend,
            recent: VecDeque::with_capacity(RECENT_EVENTS),
            beeps: 0,
            started: Instant::now(),
            running: true,
            show_help: false,
            last_flash: None,
            before_asystole: None,
            engine,
            events,
            flashes,
        })
    }

    /// Pull everything the engine reported since the last frame.
    pub fn poll(&mut self) {
        while let Ok(flash) = self.flashes.try_recv() {
            trace!(heart_rate = flash.heart_rate, spo2 = flash.spo2, "flash");
            self.last_flash = Some(Instant::now());
        }

        while let Ok(event) = self.events.try_recv() {
            if matches!(event, EngineEvent::Beep { .. }) {
                self.beeps += 1;
            }
            // Pulse tones would drown the log.
            if matches!(event, EngineEvent::PulseTone { .. } | EngineEvent::Beep { .. }) {
                continue;
            }
            if self.recent.len() == RECENT_EVENTS {
                self.recent.pop_back();
            }
            self.recent.push_front((Instant::now(), event));
        }

        self.mode = self.engine.mode();
    }

    /// Whether the readouts should be drawn highlighted.
    pub fn is_flashing(&self) -> bool {
        self.last_flash
            .is_some_and(|t| t.elapsed() < FLASH_DURATION)
    }

    pub fn adjust_heart_rate(&mut self, delta: f64) {
        let heart_rate = (self.vitals.heart_rate + delta).clamp(0.0, MAX_HEART_RATE);
        self.before_asystole = None;
        self.set_vitals(VitalsSnapshot::new(heart_rate, self.vitals.spo2));
    }

    pub fn heart_rate_up(&mut self) {
        self.adjust_heart_rate(HEART_RATE_STEP);
    }

    pub fn heart_rate_down(&mut self) {
        self.adjust_heart_rate(-HEART_RATE_STEP);
    }

    pub fn adjust_spo2(&mut self, delta: f64) {
        self.set_vitals(VitalsSnapshot::new(self.vitals.heart_rate, self.vitals.spo2 + delta));
    }

    pub fn spo2_up(&mut self) {
        self.adjust_spo2(SPO2_STEP);
    }

    pub fn spo2_down(&mut self) {
        self.adjust_spo2(-SPO2_STEP);
    }

    /// Toggle simulated asystole, restoring the previous rate afterwards.
    pub fn toggle_asystole(&mut self) {
        let heart_rate = match self.before_asystole.take() {
            Some(previous) => previous,
            None => {
                self.before_asystole = Some(self.vitals.heart_rate);
                0.0
            }
        };
        self.set_vitals(VitalsSnapshot::new(heart_rate, self.vitals.spo2));
    }

    fn set_vitals(&mut self, vitals: VitalsSnapshot) {
        if vitals != self.vitals {
            self.vitals = vitals;
            self.engine.update_vitals(vitals);
        }
    }

    /// Cycle to the next rhythm preset.
    pub fn next_rhythm(&mut self) {
        let current = RHYTHM_PRESETS
            .iter()
            .position(|r| *r == self.rhythm.as_str());
        let next = current.map_or(0, |i| (i + 1) % RHYTHM_PRESETS.len());
        self.rhythm = RhythmLabel::new(RHYTHM_PRESETS[next]);
        self.engine.set_rhythm(self.rhythm.clone());
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        self.engine.set_muted(self.muted);
    }

    pub fn toggle_silence(&mut self) {
        self.settings.alarm_silenced = !self.settings.alarm_silenced;
        self.engine.update_settings(self.settings);
    }

    pub fn toggle_tone(&mut self) {
        self.settings.enable_pulse_tone = !self.settings.enable_pulse_tone;
        self.engine.update_settings(self.settings);
    }

    pub fn toggle_beeps(&mut self) {
        self.settings.enable_beeps = !self.settings.enable_beeps;
        self.engine.update_settings(self.settings);
    }

    pub fn drop_beats(&mut self) {
        self.engine.drop_beats(DROP_BEATS);
    }

    pub fn manual_beep(&mut self) {
        self.engine.trigger_beep();
    }

    pub fn manual_pulse_tone(&mut self) {
        self.engine.trigger_pulse_tone();
    }

    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    pub fn quit(&mut self) {
        self.running = false;
    }

    pub fn should_quit(&self) -> bool {
        !self.running
    }

    /// Time since start, e.g. `1m 5s`.
    pub fn uptime(&self) -> String {
        let secs = self.started.elapsed().as_secs();
        humantime::format_duration(Duration::from_secs(secs)).to_string()
    }

    /// Stop the engine and release every channel.
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn app(extra: &[&str]) -> App {
        let mut argv = vec!["vitaltone", "--backend", "silent"];
        argv.extend_from_slice(extra);
        let args = Args::parse_from(argv);
        let mut config = Config::default();
        args.apply_overrides(&mut config);
        App::new(&args, &config).unwrap()
    }

    #[tokio::test]
    async fn test_heart_rate_is_clamped() {
        let mut app = app(&["-r", "3"]);
        app.heart_rate_down();
        assert_eq!(app.vitals.heart_rate, 0.0);
        app.adjust_heart_rate(1000.0);
        assert_eq!(app.vitals.heart_rate, MAX_HEART_RATE);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_asystole_toggle_restores_rate() {
        let mut app = app(&["-r", "82"]);
        app.toggle_asystole();
        assert!(app.vitals.is_asystole());
        app.toggle_asystole();
        assert_eq!(app.vitals.heart_rate, 82.0);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_rhythm_presets_cycle() {
        let mut app = app(&["-R", "lead_off"]);
        app.next_rhythm();
        assert_eq!(app.rhythm.as_str(), "sinus");
        app.next_rhythm();
        assert_eq!(app.rhythm.as_str(), "sinus_brady");

        let mut custom = self::app(&["-R", "junctional"]);
        custom.next_rhythm();
        assert_eq!(custom.rhythm.as_str(), RHYTHM_PRESETS[0]);

        app.shutdown().await;
        custom.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tracks_mode_and_flash() {
        let mut app = app(&[]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.poll();
        assert_eq!(app.mode, AlarmMode::Normal);
        assert_eq!(app.beeps, 1);
        assert!(app.is_flashing());

        app.toggle_asystole();
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.poll();
        assert_eq!(app.mode, AlarmMode::Flatline);
        assert!(matches!(
            app.recent.front(),
            Some((_, EngineEvent::ModeChanged { to: AlarmMode::Flatline, .. }))
        ));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_toggles() {
        let mut app = app(&[]);
        app.toggle_silence();
        assert!(app.settings.alarm_silenced);
        app.toggle_tone();
        assert!(!app.settings.enable_pulse_tone);
        app.toggle_beeps();
        assert!(!app.settings.enable_beeps);
        app.toggle_mute();
        assert!(app.muted);
        app.quit();
        assert!(app.should_quit());
        app.shutdown().await;
    }
}
