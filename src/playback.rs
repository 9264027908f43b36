//! Synthesized audio output through rodio.
//!
//! The output stream is not `Send`, so one dedicated thread owns it along
//! with a sink per channel role. Channels talk to that thread over a
//! request queue and await a oneshot reply for every call.

use crate::channel::{ChannelError, ChannelResult, ChannelRole, SoundChannel};
use anyhow::{Context, Result, anyhow};
use rodio::source::SineWave;
use rodio::{OutputStream, Sink, Source};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Op {
    Play,
    Stop,
    Rewind,
    SetRate(f32),
    SetVolume(f32),
    SetLooping(bool),
    IsPlaying,
}

struct Request {
    role: ChannelRole,
    op: Op,
    reply: oneshot::Sender<ChannelResult<bool>>,
}

/// Tone frequency (Hz) and clip length for each role.
fn voice(role: ChannelRole) -> (f32, Duration) {
    match role {
        ChannelRole::Beep => (1000.0, Duration::from_millis(150)),
        ChannelRole::Warning => (880.0, Duration::from_millis(150)),
        ChannelRole::PulseTone => (660.0, Duration::from_millis(100)),
        ChannelRole::Alarm => (960.0, Duration::from_millis(500)),
        ChannelRole::Flatline => (1000.0, Duration::from_millis(1000)),
        ChannelRole::Artifact => (120.0, Duration::from_millis(1000)),
    }
}

fn clip(role: ChannelRole, looping: bool) -> Box<dyn Source<Item = f32> + Send> {
    let (frequency, length) = voice(role);
    let tone = SineWave::new(frequency).take_duration(length).amplify(0.5);
    if looping {
        Box::new(tone.repeat_infinite())
    } else {
        Box::new(tone)
    }
}

struct Voice {
    sink: Sink,
    looping: bool,
}

impl Voice {
    fn handle(&mut self, role: ChannelRole, op: Op) -> bool {
        match op {
            Op::Play => {
                self.sink.clear();
                self.sink.append(clip(role, self.looping));
                self.sink.play();
            }
            Op::Stop => self.sink.clear(),
            // Clips restart from the top on every play.
            Op::Rewind => {}
            Op::SetRate(rate) => self.sink.set_speed(rate.max(0.05)),
            Op::SetVolume(volume) => self.sink.set_volume(volume),
            Op::SetLooping(looping) => self.looping = looping,
            Op::IsPlaying => return !self.sink.empty() && !self.sink.is_paused(),
        }
        false
    }
}

/// Handle to the audio thread.
pub struct PlaybackDevice {
    requests: std_mpsc::Sender<Request>,
}

impl PlaybackDevice {
    /// Open the default output device.
    pub fn open() -> Result<Self> {
        let (requests, inbox) = std_mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        std::thread::Builder::new()
            .name("vitaltone-audio".into())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(output) => output,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let mut voices = Vec::with_capacity(ChannelRole::ALL.len());
                for role in ChannelRole::ALL {
                    match Sink::try_new(&handle) {
                        Ok(sink) => voices.push((role, Voice { sink, looping: false })),
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{role} sink: {e}")));
                            return;
                        }
                    }
                }
                let _ = ready_tx.send(Ok(()));

                for request in inbox {
                    let Some((_, voice)) = voices.iter_mut().find(|(r, _)| *r == request.role) else {
                        let _ = request.reply.send(Err(ChannelError::Unavailable(request.role)));
                        continue;
                    };
                    let answer = voice.handle(request.role, request.op);
                    let _ = request.reply.send(Ok(answer));
                }
                debug!("audio thread exiting");
            })
            .context("Failed to spawn audio thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { requests }),
            Ok(Err(e)) => Err(anyhow!("Failed to open audio output: {e}")),
            Err(_) => Err(anyhow!("Audio thread exited during startup")),
        }
    }

    pub fn channel(&self, role: ChannelRole) -> PlaybackChannel {
        PlaybackChannel {
            role,
            requests: self.requests.clone(),
        }
    }
}

/// One role's view of the audio thread.
pub struct PlaybackChannel {
    role: ChannelRole,
    requests: std_mpsc::Sender<Request>,
}

impl PlaybackChannel {
    async fn call(&self, op: Op) -> ChannelResult<bool> {
        let (reply, answer) = oneshot::channel();
        let request = Request {
            role: self.role,
            op,
            reply,
        };
        if self.requests.send(request).is_err() {
            warn!(role = %self.role, "audio thread is gone");
            return Err(ChannelError::Unavailable(self.role));
        }
        answer
            .await
            .map_err(|_| ChannelError::Backend("audio thread dropped the request".into()))?
    }
}

impl SoundChannel for PlaybackChannel {
    async fn play(&mut self) -> ChannelResult {
        self.call(Op::Play).await.map(drop)
    }

    async fn stop(&mut self) -> ChannelResult {
        self.call(Op::Stop).await.map(drop)
    }

    async fn rewind(&mut self) -> ChannelResult {
        self.call(Op::Rewind).await.map(drop)
    }

    async fn set_rate(&mut self, rate: f32) -> ChannelResult {
        self.call(Op::SetRate(rate)).await.map(drop)
    }

    async fn set_volume(&mut self, volume: f32) -> ChannelResult {
        self.call(Op::SetVolume(volume)).await.map(drop)
    }

    async fn set_looping(&mut self, looping: bool) -> ChannelResult {
        self.call(Op::SetLooping(looping)).await.map(drop)
    }

    async fn is_playing(&mut self) -> ChannelResult<bool> {
        self.call(Op::IsPlaying).await
    }
}
