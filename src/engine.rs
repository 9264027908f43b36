//! The alarm engine.
//!
//! A single task owns every channel and all mutable alarm state. Vitals
//! updates arrive as commands, timer ticks arrive on a second queue, and
//! both are handled one at a time, so no two callbacks ever race on the
//! mode, the escalation counter or the last-beep time.
//!
//! Continuous loops (alarm, flatline, artifact buzz) are only started and
//! stopped by mode transitions. The discrete channels (beep, warning beep,
//! pulse tone) are only touched from ticks.

use crate::channel::{ChannelBank, ChannelResult, ChannelRole, SoundChannel};
use crate::config::{AudioSettings, TimingConfig};
use crate::mode;
use crate::models::{AlarmMode, EngineEvent, Flash, RhythmLabel, VitalsSnapshot};
use crate::modulation::{self, ARTIFACT_RATE, ARTIFACT_VOLUME, WARNING_PITCH, WARNING_VOLUME};
use crate::scheduler::{RepeatingTimer, Tick, TimerKind, beat_period};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Warning beeps played before the forced switch to the continuous alarm.
pub const WARNING_BEEPS: u8 = 3;

/// Receives one notification per audible beep.
pub type FlashCallback = Box<dyn Fn(Flash) + Send + Sync + 'static>;

/// Starting state and settings for an engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub settings: AudioSettings,
    pub timing: TimingConfig,
    pub vitals: VitalsSnapshot,
    pub rhythm: RhythmLabel,
    pub muted: bool,
}

#[derive(Debug)]
enum Command {
    Update {
        vitals: Option<VitalsSnapshot>,
        rhythm: Option<RhythmLabel>,
    },
    Mute(bool),
    Settings(AudioSettings),
    DropBeats(u32),
    TriggerBeep,
    TriggerPulseTone,
    Shutdown,
}

/// Control handle for a running engine.
///
/// Dropping the handle shuts the engine down: timers are cancelled and
/// every channel is stopped.
#[derive(Debug)]
pub struct EngineHandle {
    commands: UnboundedSender<Command>,
    mode: watch::Receiver<AlarmMode>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn update_vitals(&self, vitals: VitalsSnapshot) {
        self.send(Command::Update {
            vitals: Some(vitals),
            rhythm: None,
        });
    }

    pub fn set_rhythm(&self, rhythm: RhythmLabel) {
        self.send(Command::Update {
            vitals: None,
            rhythm: Some(rhythm),
        });
    }

    /// Replace vitals and rhythm together, with a single re-evaluation.
    pub fn update(&self, vitals: VitalsSnapshot, rhythm: RhythmLabel) {
        self.send(Command::Update {
            vitals: Some(vitals),
            rhythm: Some(rhythm),
        });
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(Command::Mute(muted));
    }

    pub fn update_settings(&self, settings: AudioSettings) {
        self.send(Command::Settings(settings));
    }

    /// Skip the next `count` beats, as a blocked or paused rhythm would.
    pub fn drop_beats(&self, count: u32) {
        self.send(Command::DropBeats(count));
    }

    /// Fire a beep now, e.g. when an external sweep crosses an R wave.
    pub fn trigger_beep(&self) {
        self.send(Command::TriggerBeep);
    }

    pub fn trigger_pulse_tone(&self) {
        self.send(Command::TriggerPulseTone);
    }

    pub fn mode(&self) -> AlarmMode {
        *self.mode.borrow()
    }

    /// Stop the engine and wait until every channel has been released.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "engine task ended abnormally");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("engine already stopped, command dropped");
        }
    }
}

/// Start an engine on the current tokio runtime.
///
/// Returns the control handle and the stream of engine events.
pub fn spawn<C: SoundChannel>(
    options: EngineOptions,
    channels: ChannelBank<C>,
    flash: Option<FlashCallback>,
) -> (EngineHandle, UnboundedReceiver<EngineEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (tick_tx, tick_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (mode_tx, mode_rx) = watch::channel(AlarmMode::Normal);

    let engine = Engine {
        channels,
        settings: options.settings.sanitized(),
        timing: options.timing,
        vitals: options.vitals.sanitized(),
        rhythm: options.rhythm,
        muted: options.muted,
        mode: AlarmMode::Normal,
        escalation: 0,
        escalated: false,
        pause: PauseState {
            last_beep: Instant::now(),
            corrected: false,
        },
        dropped_beats: 0,
        armed: None,
        beep_timer: RepeatingTimer::new(TimerKind::Beep),
        tone_timer: RepeatingTimer::new(TimerKind::PulseTone),
        watchdog: RepeatingTimer::new(TimerKind::PauseWatchdog),
        ticks: tick_tx,
        events: event_tx,
        mode_tx,
        flash,
    };

    let task = tokio::spawn(engine.run(command_rx, tick_rx));

    (
        EngineHandle {
            commands: command_tx,
            mode: mode_rx,
            task,
        },
        event_rx,
    )
}

struct PauseState {
    last_beep: Instant,
    /// A corrective pulse already sounded for the current gap
    corrected: bool,
}

/// Inputs the timers were last armed for.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScheduleInputs {
    heart_rate: f64,
    mode: AlarmMode,
    tone_enabled: bool,
}

impl ScheduleInputs {
    fn tone_eligible(&self) -> bool {
        self.tone_enabled && self.mode.allows_pulse_tone()
    }
}

struct Engine<C> {
    channels: ChannelBank<C>,
    settings: AudioSettings,
    timing: TimingConfig,
    vitals: VitalsSnapshot,
    rhythm: RhythmLabel,
    muted: bool,
    mode: AlarmMode,
    escalation: u8,
    /// Warning already escalated; hold Critical while the inputs still read Warning
    escalated: bool,
    pause: PauseState,
    dropped_beats: u32,
    armed: Option<ScheduleInputs>,
    beep_timer: RepeatingTimer,
    tone_timer: RepeatingTimer,
    watchdog: RepeatingTimer,
    ticks: UnboundedSender<Tick>,
    events: UnboundedSender<EngineEvent>,
    mode_tx: watch::Sender<AlarmMode>,
    flash: Option<FlashCallback>,
}

/// Run one channel call and absorb its failure.
macro_rules! control {
    ($engine:ident, $op:ident($role:expr $(, $arg:expr)*)) => {{
        let role = $role;
        let result = $engine.channels.$op(role $(, $arg)*).await;
        $engine.absorb(role, stringify!($op), result)
    }};
}

impl<C: SoundChannel> Engine<C> {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut ticks: UnboundedReceiver<Tick>,
    ) {
        info!(vitals = %self.vitals, rhythm = %self.rhythm, "alarm engine started");
        self.evaluate().await;

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(tick) = ticks.recv() => self.on_tick(tick).await,
            }
        }

        self.teardown().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Update { vitals, rhythm } => {
                if let Some(vitals) = vitals {
                    self.vitals = vitals.sanitized();
                }
                if let Some(rhythm) = rhythm {
                    self.rhythm = rhythm;
                }
                self.evaluate().await;
            }
            Command::Mute(muted) => {
                self.muted = muted;
                self.evaluate().await;
            }
            Command::Settings(settings) => self.apply_settings(settings.sanitized()).await,
            Command::DropBeats(count) => {
                self.dropped_beats = self.dropped_beats.saturating_add(count);
                debug!(pending = self.dropped_beats, "dropping beats");
            }
            Command::TriggerBeep => self.beat().await,
            Command::TriggerPulseTone => self.pulse_tone().await,
            Command::Shutdown => {}
        }
    }

    async fn on_tick(&mut self, tick: Tick) {
        match tick.kind {
            TimerKind::Beep if self.beep_timer.is_current(tick) => self.beat().await,
            TimerKind::PulseTone if self.tone_timer.is_current(tick) => self.pulse_tone().await,
            TimerKind::PauseWatchdog if self.watchdog.is_current(tick) => self.check_pause().await,
            _ => trace!(?tick, "stale tick discarded"),
        }
    }

    /// Re-derive the mode from the current inputs and re-arm timers.
    async fn evaluate(&mut self) {
        let classified = mode::classify(&self.vitals, &self.rhythm, self.muted);
        if classified != AlarmMode::Warning {
            self.escalated = false;
        }
        let target = if classified == AlarmMode::Warning && self.escalated {
            AlarmMode::Critical
        } else {
            classified
        };

        self.enter(target).await;
        self.reschedule();
    }

    /// Switch modes: release foreign channels first, then acquire our own.
    /// Re-entering the active mode does nothing.
    async fn enter(&mut self, target: AlarmMode) {
        let from = self.mode;
        if from == target {
            return;
        }

        for &role in mode::releases(target) {
            control!(self, stop(role));
        }

        // Recorded before acquiring so a failed start still leaves a consistent mode.
        self.mode = target;
        self.escalation = 0;
        self.pause.corrected = false;

        match target {
            AlarmMode::Normal => self.pause.last_beep = Instant::now(),
            AlarmMode::Critical => {
                if self.settings.alarms_audible() {
                    self.start_loop(ChannelRole::Alarm).await;
                }
            }
            AlarmMode::Flatline => self.start_loop(ChannelRole::Flatline).await,
            AlarmMode::Artifact => self.start_loop(ChannelRole::Artifact).await,
            AlarmMode::Muted | AlarmMode::Warning => {}
        }

        self.mode_tx.send_replace(target);
        self.emit(EngineEvent::ModeChanged { from, to: target });
        info!(%from, to = %target, vitals = %self.vitals, rhythm = %self.rhythm, "alarm mode changed");
    }

    fn loop_settings(&self, role: ChannelRole) -> (f32, f32) {
        let master = self.settings.master_volume;
        match role {
            ChannelRole::Artifact => (ARTIFACT_RATE, ARTIFACT_VOLUME * master),
            _ => (1.0, self.settings.alarm_volume * master),
        }
    }

    async fn start_loop(&mut self, role: ChannelRole) {
        let (rate, volume) = self.loop_settings(role);
        control!(self, set_looping(role, true));
        control!(self, set_rate(role, rate));
        control!(self, set_volume(role, volume));
        control!(self, rewind(role));
        control!(self, play(role));
    }

    /// Stop a discrete clip if it is still sounding, then replay it from the top.
    async fn replay(&mut self, role: ChannelRole, rate: f32, volume: f32) {
        if control!(self, is_playing(role)) == Some(true) {
            control!(self, stop(role));
        }
        control!(self, rewind(role));
        control!(self, set_rate(role, rate));
        control!(self, set_volume(role, volume));
        control!(self, play(role));
    }

    /// Arm, re-arm or cancel timers for whatever inputs changed.
    ///
    /// The beep timer follows heart rate and mode. The pulse tone follows
    /// heart rate and its own eligibility, and is re-armed with the beep so
    /// it keeps trailing it by the transit delay. The watchdog follows the mode.
    fn reschedule(&mut self) {
        let next = ScheduleInputs {
            heart_rate: self.vitals.heart_rate,
            mode: self.mode,
            tone_enabled: self.settings.enable_pulse_tone,
        };
        let prev = self.armed.replace(next);
        if prev == Some(next) {
            return;
        }

        let rate_changed = prev.is_none_or(|p| p.heart_rate != next.heart_rate);
        let mode_changed = prev.is_none_or(|p| p.mode != next.mode);
        let tone_changed = prev.is_none_or(|p| p.tone_eligible() != next.tone_eligible());
        let period = beat_period(next.heart_rate);

        if rate_changed || mode_changed {
            match period.filter(|_| next.mode.schedules_beeps()) {
                Some(period) => self.beep_timer.arm(period, Duration::ZERO, self.ticks.clone()),
                None => self.beep_timer.cancel(),
            }
        }

        let beep_rearmed = mode_changed && next.mode.schedules_beeps();
        if rate_changed || tone_changed || beep_rearmed {
            match period.filter(|_| next.tone_eligible()) {
                Some(period) => {
                    self.tone_timer
                        .arm(period, self.timing.pulse_transit(), self.ticks.clone())
                }
                None => self.tone_timer.cancel(),
            }
        }

        if mode_changed {
            if next.mode == AlarmMode::Normal {
                let interval = self.timing.watchdog_interval();
                self.watchdog.arm(interval, interval, self.ticks.clone());
            } else {
                self.watchdog.cancel();
            }
        }

        debug!(
            heart_rate = next.heart_rate,
            mode = %next.mode,
            beep = self.beep_timer.is_armed(),
            tone = self.tone_timer.is_armed(),
            watchdog = self.watchdog.is_armed(),
            "timers rescheduled"
        );
    }

    /// One rhythm-locked beat.
    async fn beat(&mut self) {
        if !self.mode.schedules_beeps() || self.vitals.is_asystole() {
            return;
        }

        if self.dropped_beats > 0 {
            self.dropped_beats -= 1;
            self.emit(EngineEvent::BeatDropped);
            return;
        }

        match self.mode {
            AlarmMode::Warning => self.warning_beat().await,
            AlarmMode::Normal => self.normal_beat().await,
            _ => {}
        }
    }

    async fn normal_beat(&mut self) {
        self.record_beat();
        if !self.settings.enable_beeps {
            return;
        }

        let modulation = modulation::modulate(&self.rhythm, self.vitals.spo2, self.vitals.heart_rate);
        let volume = modulation.volume * self.settings.beep_volume * self.settings.master_volume;
        self.replay(ChannelRole::Beep, modulation.pitch, volume).await;

        // The channel has been told to play, the display may flash now.
        if let Some(flash) = &self.flash {
            flash(Flash {
                heart_rate: self.vitals.heart_rate,
                spo2: self.vitals.spo2,
            });
        }
        self.emit(EngineEvent::Beep {
            pitch: modulation.pitch,
            volume,
        });
        trace!(pitch = modulation.pitch, volume, "beep");
    }

    async fn warning_beat(&mut self) {
        self.record_beat();
        if self.escalation >= WARNING_BEEPS {
            return;
        }

        self.escalation += 1;
        let count = self.escalation;
        if self.settings.alarms_audible() {
            let volume = WARNING_VOLUME * self.settings.alarm_volume * self.settings.master_volume;
            self.replay(ChannelRole::Warning, WARNING_PITCH, volume).await;
        }
        self.emit(EngineEvent::WarningBeep { count });
        debug!(count, "warning beep");

        if count >= WARNING_BEEPS {
            self.escalated = true;
            self.emit(EngineEvent::Escalated);
            info!("warning not cleared after {} beeps, escalating", WARNING_BEEPS);
            self.enter(AlarmMode::Critical).await;
            self.reschedule();
        }
    }

    fn record_beat(&mut self) {
        self.pause.last_beep = Instant::now();
        self.pause.corrected = false;
    }

    /// One oxygen pulse tone, trailing the beat by the transit time.
    async fn pulse_tone(&mut self) {
        if !self.settings.enable_pulse_tone
            || !self.mode.allows_pulse_tone()
            || self.vitals.is_asystole()
        {
            return;
        }

        let (modulation, perfusion_index) = modulation::pulse_tone(
            self.vitals.spo2,
            self.vitals.heart_rate,
            self.settings.tone_volume,
            self.settings.master_volume,
        );
        self.replay(ChannelRole::PulseTone, modulation.pitch, modulation.volume)
            .await;
        self.emit(EngineEvent::PulseTone {
            pitch: modulation.pitch,
            volume: modulation.volume,
            perfusion_index,
        });
    }

    /// Watchdog: one corrective alarm pulse per over-long silence in Normal.
    async fn check_pause(&mut self) {
        if self.mode != AlarmMode::Normal || self.pause.corrected {
            return;
        }

        let silence = self.pause.last_beep.elapsed();
        if silence <= self.timing.pause_threshold() {
            return;
        }

        self.pause.corrected = true;
        let silence_ms = silence.as_millis() as u64;
        self.emit(EngineEvent::PauseDetected { silence_ms });
        info!(silence_ms, "pause detected");

        if !self.settings.alarms_audible() {
            return;
        }

        let role = ChannelRole::Alarm;
        if control!(self, is_playing(role)) != Some(false) {
            return;
        }
        let volume = self.settings.alarm_volume * self.settings.master_volume;
        control!(self, set_looping(role, false));
        control!(self, set_rate(role, 1.0));
        control!(self, set_volume(role, volume));
        control!(self, rewind(role));
        control!(self, play(role));
    }

    async fn apply_settings(&mut self, settings: AudioSettings) {
        let was_audible = self.settings.alarms_audible();
        self.settings = settings;
        let audible = settings.alarms_audible();

        if was_audible && !audible {
            control!(self, stop(ChannelRole::Alarm));
            control!(self, stop(ChannelRole::Warning));
        } else if !was_audible && audible && self.mode == AlarmMode::Critical {
            self.start_loop(ChannelRole::Alarm).await;
        }

        if let Some(role) = self.mode.loop_channel() {
            if role != ChannelRole::Alarm || audible {
                let (_, volume) = self.loop_settings(role);
                control!(self, set_volume(role, volume));
            }
        }

        debug!(?settings, "audio settings updated");
        self.reschedule();
    }

    async fn teardown(&mut self) {
        self.beep_timer.cancel();
        self.tone_timer.cancel();
        self.watchdog.cancel();

        for (role, error) in self.channels.stop_all().await {
            warn!(%role, %error, "failed to stop channel during shutdown");
        }
        info!("alarm engine stopped");
    }

    fn absorb<T>(&self, role: ChannelRole, op: &'static str, result: ChannelResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%role, op, %error, "channel call failed");
                self.emit(EngineEvent::ChannelFault { role, op });
                None
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
