//! Rolling one-second throughput counters.

use tracing::info;

const WINDOW_US: u64 = 1_000_000;

/// Totals for one window. Durations are summed, not averaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u32,
    /// Texture generation plus graphics-plane poll.
    pub acquire_us: u64,
    pub composite_us: u64,
    pub send_us: u64,
}

#[derive(Debug, Default)]
pub struct StatsAccumulator {
    window_start: Option<u64>,
    current: FrameStats,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquire(&mut self, us: u64) {
        self.current.acquire_us += us;
    }

    pub fn record_composite(&mut self, us: u64) {
        self.current.composite_us += us;
    }

    pub fn record_send(&mut self, us: u64) {
        self.current.send_us += us;
    }

    /// Count one frame that reached the sink.
    pub fn frame_sent(&mut self) {
        self.current.frames += 1;
    }

    /// Close the window if a second has passed since it opened.
    ///
    /// The first call only opens the window. Returns the finished window's
    /// totals and starts a new one at `now_us`.
    pub fn roll(&mut self, now_us: u64) -> Option<FrameStats> {
        match self.window_start {
            None => {
                self.window_start = Some(now_us);
                None
            }
            Some(start) if now_us.saturating_sub(start) >= WINDOW_US => {
                self.window_start = Some(now_us);
                Some(std::mem::take(&mut self.current))
            }
            Some(_) => None,
        }
    }
}

pub fn log_summary(stats: &FrameStats) {
    info!(
        fps = stats.frames,
        acquire_us = stats.acquire_us,
        composite_us = stats.composite_us,
        send_us = stats.send_us,
        "[Stat] Send framerate: {} FPS", stats.frames
    );
}
