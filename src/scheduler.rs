//! Generation-counted repeating timers.
//!
//! Each timer runs as a small task that posts [`Tick`]s into the engine's
//! queue. Re-arming or cancelling bumps the generation, so a tick that was
//! already queued by the previous task is recognised as stale and dropped.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

/// Which repeating event a tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Beep,
    PulseTone,
    PauseWatchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Beat period for a heart rate: 60000 / bpm milliseconds.
pub fn beat_period(heart_rate: f64) -> Option<Duration> {
    (heart_rate > 0.0 && heart_rate.is_finite()).then(|| Duration::from_secs_f64(60.0 / heart_rate))
}

/// One repeating timer slot. At most one task is alive per slot.
#[derive(Debug)]
pub struct RepeatingTimer {
    kind: TimerKind,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl RepeatingTimer {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            task: None,
        }
    }

    /// Cancel any running timer and start a fresh one.
    ///
    /// The first tick fires after `first_delay` (zero fires immediately),
    /// then every `period`. Late ticks are pushed back rather than bunched.
    pub fn arm(&mut self, period: Duration, first_delay: Duration, ticks: UnboundedSender<Tick>) {
        self.cancel();

        let tick = Tick {
            kind: self.kind,
            generation: self.generation,
        };
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + first_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if ticks.send(tick).is_err() {
                    break;
                }
            }
        }));

        trace!(kind = ?self.kind, generation = self.generation, ?period, "timer armed");
    }

    /// Stop the timer. Ticks it already queued become stale.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    /// Whether `tick` came from the currently armed timer.
    pub fn is_current(&self, tick: Tick) -> bool {
        tick.kind == self.kind && self.task.is_some() && tick.generation == self.generation
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Tick>) -> Vec<Tick> {
        let mut out = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            out.push(tick);
        }
        out
    }

    #[test]
    fn test_beat_period() {
        assert_eq!(beat_period(75.0), Some(Duration::from_millis(800)));
        assert_eq!(beat_period(60.0), Some(Duration::from_secs(1)));
        assert_eq!(beat_period(0.0), None);
        assert_eq!(beat_period(-10.0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_then_every_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RepeatingTimer::new(TimerKind::Beep);
        timer.arm(Duration::from_millis(800), Duration::ZERO, tx);

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&mut rx).len(), 1);

        time::sleep(Duration::from_millis(1700)).await;
        // ticks at 800 and 1600
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_delay_offsets_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RepeatingTimer::new(TimerKind::PulseTone);
        timer.arm(Duration::from_millis(800), Duration::from_millis(250), tx);

        time::sleep(Duration::from_millis(200)).await;
        assert!(drain(&mut rx).is_empty());

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_makes_queued_ticks_stale() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RepeatingTimer::new(TimerKind::Beep);
        timer.arm(Duration::from_millis(500), Duration::ZERO, tx.clone());

        time::sleep(Duration::from_millis(10)).await;
        let old = drain(&mut rx);
        assert_eq!(old.len(), 1);

        timer.arm(Duration::from_millis(500), Duration::ZERO, tx);
        assert!(!timer.is_current(old[0]));

        time::sleep(Duration::from_millis(10)).await;
        let fresh = drain(&mut rx);
        assert_eq!(fresh.len(), 1);
        assert!(timer.is_current(fresh[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RepeatingTimer::new(TimerKind::PauseWatchdog);
        timer.arm(Duration::from_millis(500), Duration::from_millis(500), tx);
        timer.cancel();
        assert!(!timer.is_armed());

        time::sleep(Duration::from_secs(3)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
