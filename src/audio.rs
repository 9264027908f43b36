//! Channel backends.
//!
//! The virtual backend keeps channel state in memory and can ring the
//! terminal bell for beeps, so the monitor is audible on any terminal.
//! Real synthesized output lives behind the `playback` feature.

use crate::channel::{ChannelBank, ChannelError, ChannelResult, ChannelRole, SoundChannel};
use crate::cli::BackendKind;
use anyhow::Result;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Length of one clip at playback rate 1.0.
fn clip_length(role: ChannelRole) -> Duration {
    match role {
        ChannelRole::Beep | ChannelRole::Warning => Duration::from_millis(150),
        ChannelRole::PulseTone => Duration::from_millis(100),
        ChannelRole::Alarm | ChannelRole::Flatline | ChannelRole::Artifact => {
            Duration::from_millis(1000)
        }
    }
}

#[derive(Debug)]
struct VirtualState {
    started: Option<Instant>,
    looping: bool,
    rate: f32,
    volume: f32,
    plays: u32,
    stops: u32,
    failing: bool,
}

/// Point-in-time view of a virtual channel.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub playing: bool,
    pub looping: bool,
    pub rate: f32,
    pub volume: f32,
    pub plays: u32,
    pub stops: u32,
}

/// In-memory channel. Clones share state, so a clone kept outside the
/// engine observes what the engine did.
#[derive(Debug, Clone)]
pub struct VirtualChannel {
    role: ChannelRole,
    state: Arc<Mutex<VirtualState>>,
    bell: bool,
}

impl VirtualChannel {
    pub fn new(role: ChannelRole) -> Self {
        Self {
            role,
            state: Arc::new(Mutex::new(VirtualState {
                started: None,
                looping: false,
                rate: 1.0,
                volume: 1.0,
                plays: 0,
                stops: 0,
                failing: false,
            })),
            bell: false,
        }
    }

    /// Ring the terminal bell whenever a beep plays.
    pub fn with_bell(mut self, bell: bool) -> Self {
        self.bell = bell && matches!(self.role, ChannelRole::Beep | ChannelRole::Warning);
        self
    }

    /// Make every subsequent call fail, as an unplugged device would.
    #[cfg(test)]
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.failing = failing;
        }
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> ChannelSnapshot {
        let state = self.state.lock().unwrap();
        ChannelSnapshot {
            playing: self.playing(&state),
            looping: state.looping,
            rate: state.rate,
            volume: state.volume,
            plays: state.plays,
            stops: state.stops,
        }
    }

    fn playing(&self, state: &VirtualState) -> bool {
        match state.started {
            Some(_) if state.looping => true,
            Some(started) => started.elapsed() < clip_length(self.role).div_f32(state.rate.max(0.05)),
            None => false,
        }
    }

    fn lock(&self) -> ChannelResult<MutexGuard<'_, VirtualState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| ChannelError::Backend(format!("{} channel state poisoned", self.role)))?;
        if state.failing {
            return Err(ChannelError::Unavailable(self.role));
        }
        Ok(state)
    }
}

/// Emit a BEL character; most terminal emulators turn it into a beep.
fn ring_bell() {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}

impl SoundChannel for VirtualChannel {
    async fn play(&mut self) -> ChannelResult {
        let mut state = self.lock()?;
        state.started = Some(Instant::now());
        state.plays += 1;
        drop(state);
        if self.bell {
            ring_bell();
        }
        Ok(())
    }

    async fn stop(&mut self) -> ChannelResult {
        let mut state = self.lock()?;
        if state.started.take().is_some() {
            state.stops += 1;
        }
        Ok(())
    }

    async fn rewind(&mut self) -> ChannelResult {
        let mut state = self.lock()?;
        if state.started.is_some() {
            state.started = Some(Instant::now());
        }
        Ok(())
    }

    async fn set_rate(&mut self, rate: f32) -> ChannelResult {
        self.lock()?.rate = rate;
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> ChannelResult {
        self.lock()?.volume = volume;
        Ok(())
    }

    async fn set_looping(&mut self, looping: bool) -> ChannelResult {
        self.lock()?.looping = looping;
        Ok(())
    }

    async fn is_playing(&mut self) -> ChannelResult<bool> {
        let state = self.lock()?;
        Ok(self.playing(&state))
    }
}

/// Any of the channel backends the binary can drive.
pub enum Backend {
    Virtual(VirtualChannel),
    #[cfg(feature = "playback")]
    Playback(crate::playback::PlaybackChannel),
}

macro_rules! dispatch {
    ($self:ident, $call:ident($($arg:expr),*)) => {
        match $self {
            Backend::Virtual(channel) => channel.$call($($arg),*).await,
            #[cfg(feature = "playback")]
            Backend::Playback(channel) => channel.$call($($arg),*).await,
        }
    };
}

impl SoundChannel for Backend {
    async fn play(&mut self) -> ChannelResult {
        dispatch!(self, play())
    }

    async fn stop(&mut self) -> ChannelResult {
        dispatch!(self, stop())
    }

    async fn rewind(&mut self) -> ChannelResult {
        dispatch!(self, rewind())
    }

    async fn set_rate(&mut self, rate: f32) -> ChannelResult {
        dispatch!(self, set_rate(rate))
    }

    async fn set_volume(&mut self, volume: f32) -> ChannelResult {
        dispatch!(self, set_volume(volume))
    }

    async fn set_looping(&mut self, looping: bool) -> ChannelResult {
        dispatch!(self, set_looping(looping))
    }

    async fn is_playing(&mut self) -> ChannelResult<bool> {
        dispatch!(self, is_playing())
    }
}

/// Build the six channels for the selected backend.
///
/// `bell` only applies to the terminal backend; batch output turns it off.
pub fn build_bank(kind: BackendKind, bell: bool, call_timeout: Duration) -> Result<ChannelBank<Backend>> {
    match kind {
        BackendKind::Terminal => Ok(ChannelBank::new(
            |role| Backend::Virtual(VirtualChannel::new(role).with_bell(bell)),
            call_timeout,
        )),
        BackendKind::Silent => Ok(ChannelBank::new(
            |role| Backend::Virtual(VirtualChannel::new(role)),
            call_timeout,
        )),
        #[cfg(feature = "playback")]
        BackendKind::Playback => {
            let device = crate::playback::PlaybackDevice::open()?;
            Ok(ChannelBank::new(
                |role| Backend::Playback(device.channel(role)),
                call_timeout,
            ))
        }
        #[cfg(not(feature = "playback"))]
        BackendKind::Playback => {
            anyhow::bail!("vitaltone was built without the `playback` feature")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_discrete_clip_finishes() {
        let mut channel = VirtualChannel::new(ChannelRole::Beep);
        channel.play().await.unwrap();
        assert!(channel.is_playing().await.unwrap());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!channel.is_playing().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_stretches_clip() {
        let mut channel = VirtualChannel::new(ChannelRole::Beep);
        channel.set_rate(0.5).await.unwrap();
        channel.play().await.unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(channel.is_playing().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_plays_until_stopped() {
        let mut channel = VirtualChannel::new(ChannelRole::Flatline);
        channel.set_looping(true).await.unwrap();
        channel.play().await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(channel.is_playing().await.unwrap());

        channel.stop().await.unwrap();
        let snap = channel.snapshot();
        assert!(!snap.playing);
        assert_eq!(snap.stops, 1);
    }

    #[tokio::test]
    async fn test_failing_channel_reports_unavailable() {
        let mut channel = VirtualChannel::new(ChannelRole::Alarm);
        channel.set_failing(true);
        assert_eq!(
            channel.play().await,
            Err(ChannelError::Unavailable(ChannelRole::Alarm))
        );
    }

    #[test]
    fn test_bell_only_on_beep_roles() {
        assert!(VirtualChannel::new(ChannelRole::Beep).with_bell(true).bell);
        assert!(VirtualChannel::new(ChannelRole::Warning).with_bell(true).bell);
        assert!(!VirtualChannel::new(ChannelRole::PulseTone).with_bell(true).bell);
        assert!(!VirtualChannel::new(ChannelRole::Beep).with_bell(false).bell);
    }

    #[test]
    fn test_silent_backend_builds() {
        assert!(build_bank(BackendKind::Silent, false, Duration::from_millis(100)).is_ok());
    }
}
