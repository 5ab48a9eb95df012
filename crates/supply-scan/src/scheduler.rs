//! Frame scheduling for the decode loop.
//!
//! A `FrameClock` paces the loop at display refresh. A `ScanLoop` is the
//! running loop itself: while one exists the controller waits for the next
//! tick, and cancelling it (consuming the value) means no further tick is
//! ever awaited for that loop.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};

/// Default display refresh rate.
pub const DEFAULT_FPS: u32 = 60;

/// Paces decode iterations.
#[async_trait]
pub trait FrameClock: Send {
    /// Wait for the next frame slot.
    async fn tick(&mut self);

    /// Called when a new scan loop starts.
    fn restart(&mut self) {}
}

/// Ticks at a fixed refresh rate; late ticks are skipped, never bunched.
pub struct DisplayClock {
    period: Duration,
    interval: Option<Interval>,
}

impl DisplayClock {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            period,
            interval: None,
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / fps.max(1) as f64))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn interval(period: Duration) -> Interval {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }
}

impl Default for DisplayClock {
    fn default() -> Self {
        Self::from_fps(DEFAULT_FPS)
    }
}

#[async_trait]
impl FrameClock for DisplayClock {
    async fn tick(&mut self) {
        let period = self.period;
        self.interval
            .get_or_insert_with(|| Self::interval(period))
            .tick()
            .await;
    }

    fn restart(&mut self) {
        self.interval = None;
    }
}

/// Yields to the scheduler once per tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateClock;

#[async_trait]
impl FrameClock for ImmediateClock {
    async fn tick(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// Why a scan loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Decoded,
    Paused,
    DeviceLost,
    Reset,
    Unmounted,
    Superseded,
}

/// Counters of a finished scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub iterations: u64,
    pub decode_attempts: u64,
    pub elapsed: Duration,
}

/// A running decode loop.
#[derive(Debug)]
pub struct ScanLoop {
    started_at: Instant,
    iterations: u64,
    decode_attempts: u64,
}

impl ScanLoop {
    pub fn start() -> Self {
        tracing::debug!("Scan loop scheduled");
        Self {
            started_at: Instant::now(),
            iterations: 0,
            decode_attempts: 0,
        }
    }

    /// Record one iteration; `attempted` is false when no frame was ready.
    pub fn record(&mut self, attempted: bool) {
        self.iterations += 1;
        if attempted {
            self.decode_attempts += 1;
        }
    }

    pub fn decode_attempts(&self) -> u64 {
        self.decode_attempts
    }

    /// Stop the loop; nothing is scheduled for it afterwards.
    pub fn cancel(self, reason: StopReason) -> ScanStats {
        let stats = ScanStats {
            iterations: self.iterations,
            decode_attempts: self.decode_attempts,
            elapsed: self.started_at.elapsed(),
        };
        tracing::debug!(
            "Scan loop stopped ({reason:?}) after {} iteration(s), {} decode attempt(s)",
            stats.iterations,
            stats.decode_attempts
        );
        stats
    }
}
