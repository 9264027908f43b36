//! Sound channel capability and the bank of six role-addressed channels.
//!
//! A channel is anything that can be started, stopped, rewound and given a
//! playback rate and volume. The engine only talks to channels through
//! [`ChannelBank`], which bounds every call with a timeout.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Failure of a single channel-control call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("channel {0} is unavailable")]
    Unavailable(ChannelRole),
    #[error("audio backend error: {0}")]
    Backend(String),
    #[error("channel call timed out after {0:?}")]
    Timeout(Duration),
}

pub type ChannelResult<T = ()> = Result<T, ChannelError>;

/// The six logical channels, each owned by exactly one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Beep,
    Alarm,
    Flatline,
    Warning,
    Artifact,
    PulseTone,
}

impl ChannelRole {
    pub const ALL: [ChannelRole; 6] = [
        ChannelRole::Beep,
        ChannelRole::Alarm,
        ChannelRole::Flatline,
        ChannelRole::Warning,
        ChannelRole::Artifact,
        ChannelRole::PulseTone,
    ];

    /// Roles that hold a continuous loop while their mode is active.
    #[cfg(test)]
    pub const LOOPS: [ChannelRole; 3] = [
        ChannelRole::Alarm,
        ChannelRole::Flatline,
        ChannelRole::Artifact,
    ];

    fn index(self) -> usize {
        match self {
            ChannelRole::Beep => 0,
            ChannelRole::Alarm => 1,
            ChannelRole::Flatline => 2,
            ChannelRole::Warning => 3,
            ChannelRole::Artifact => 4,
            ChannelRole::PulseTone => 5,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Beep => write!(f, "beep"),
            ChannelRole::Alarm => write!(f, "alarm"),
            ChannelRole::Flatline => write!(f, "flatline"),
            ChannelRole::Warning => write!(f, "warning"),
            ChannelRole::Artifact => write!(f, "artifact"),
            ChannelRole::PulseTone => write!(f, "pulse_tone"),
        }
    }
}

/// A controllable playback resource.
///
/// Every call may complete asynchronously; callers await a stop before
/// issuing the next play.
pub trait SoundChannel: Send + 'static {
    fn play(&mut self) -> impl Future<Output = ChannelResult> + Send;
    fn stop(&mut self) -> impl Future<Output = ChannelResult> + Send;
    fn rewind(&mut self) -> impl Future<Output = ChannelResult> + Send;
    fn set_rate(&mut self, rate: f32) -> impl Future<Output = ChannelResult> + Send;
    fn set_volume(&mut self, volume: f32) -> impl Future<Output = ChannelResult> + Send;
    fn set_looping(&mut self, looping: bool) -> impl Future<Output = ChannelResult> + Send;
    fn is_playing(&mut self) -> impl Future<Output = ChannelResult<bool>> + Send;
}

/// All six channels, addressed by role.
pub struct ChannelBank<C> {
    channels: [C; 6],
    call_timeout: Duration,
}

impl<C: SoundChannel> ChannelBank<C> {
    /// Build one channel per role.
    pub fn new(make: impl FnMut(ChannelRole) -> C, call_timeout: Duration) -> Self {
        Self {
            channels: ChannelRole::ALL.map(make),
            call_timeout,
        }
    }

    fn get(&mut self, role: ChannelRole) -> &mut C {
        &mut self.channels[role.index()]
    }

    pub async fn play(&mut self, role: ChannelRole) -> ChannelResult {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).play()).await
    }

    pub async fn stop(&mut self, role: ChannelRole) -> ChannelResult {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).stop()).await
    }

    pub async fn rewind(&mut self, role: ChannelRole) -> ChannelResult {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).rewind()).await
    }

    pub async fn set_rate(&mut self, role: ChannelRole, rate: f32) -> ChannelResult {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).set_rate(rate)).await
    }

    pub async fn set_volume(&mut self, role: ChannelRole, volume: f32) -> ChannelResult {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).set_volume(volume.clamp(0.0, 1.0))).await
    }

    pub async fn set_looping(&mut self, role: ChannelRole, looping: bool) -> ChannelResult {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).set_looping(looping)).await
    }

    pub async fn is_playing(&mut self, role: ChannelRole) -> ChannelResult<bool> {
        let limit = self.call_timeout;
        bounded(limit, self.get(role).is_playing()).await
    }

    /// Stop every channel concurrently, returning the roles that failed.
    pub async fn stop_all(&mut self) -> Vec<(ChannelRole, ChannelError)> {
        let limit = self.call_timeout;
        let stops = self
            .channels
            .iter_mut()
            .zip(ChannelRole::ALL)
            .map(|(channel, role)| async move { (role, bounded(limit, channel.stop()).await) });

        futures::future::join_all(stops)
            .await
            .into_iter()
            .filter_map(|(role, result)| result.err().map(|e| (role, e)))
            .collect()
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = ChannelResult<T>>,
) -> ChannelResult<T> {
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::VirtualChannel;

    /// Channel whose calls never complete.
    struct HungChannel;

    impl SoundChannel for HungChannel {
        async fn play(&mut self) -> ChannelResult {
            std::future::pending().await
        }
        async fn stop(&mut self) -> ChannelResult {
            std::future::pending().await
        }
        async fn rewind(&mut self) -> ChannelResult {
            Ok(())
        }
        async fn set_rate(&mut self, _rate: f32) -> ChannelResult {
            Ok(())
        }
        async fn set_volume(&mut self, _volume: f32) -> ChannelResult {
            Ok(())
        }
        async fn set_looping(&mut self, _looping: bool) -> ChannelResult {
            Ok(())
        }
        async fn is_playing(&mut self) -> ChannelResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_roles_have_distinct_slots() {
        let mut seen: Vec<usize> = ChannelRole::ALL.iter().map(|r| r.index()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let mut bank = ChannelBank::new(|_| HungChannel, Duration::from_millis(200));
        let result = bank.play(ChannelRole::Beep).await;
        assert_eq!(result, Err(ChannelError::Timeout(Duration::from_millis(200))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_reports_every_failure() {
        let mut bank = ChannelBank::new(|_| HungChannel, Duration::from_millis(50));
        let failures = bank.stop_all().await;
        assert_eq!(failures.len(), 6);
    }

    #[tokio::test]
    async fn test_bank_routes_calls_by_role() {
        let channels: Vec<VirtualChannel> = ChannelRole::ALL.iter().map(|r| VirtualChannel::new(*r)).collect();
        let probe = channels.clone();
        let mut iter = channels.into_iter();
        let mut bank = ChannelBank::new(|_| iter.next().unwrap(), Duration::from_millis(200));

        bank.set_rate(ChannelRole::Warning, 1.3).await.unwrap();
        bank.set_volume(ChannelRole::Warning, 1.7).await.unwrap();
        bank.play(ChannelRole::Warning).await.unwrap();

        let warning = probe[3].snapshot();
        assert_eq!(warning.rate, 1.3);
        assert_eq!(warning.volume, 1.0);
        assert_eq!(warning.plays, 1);
        assert_eq!(probe[0].snapshot().plays, 0);
    }
}
