//! `FrameGate`: caps accepted frames at the configured rate.

/// Accepts a frame when at least `delay_us` has passed since the last
/// accepted one. Rejections leave the baseline untouched.
#[derive(Debug, Clone)]
pub struct FrameGate {
    delay_us: u64,
    baseline: Option<u64>,
}

impl FrameGate {
    /// `delay_us == 0` disables throttling.
    pub fn new(delay_us: u64) -> Self {
        Self { delay_us, baseline: None }
    }

    pub fn delay_us(&self) -> u64 {
        self.delay_us
    }

    pub fn should_process(&mut self, now_us: u64) -> bool {
        match self.baseline {
            Some(last) if now_us.saturating_sub(last) < self.delay_us => false,
            Some(last) => {
                // A timestamp older than the baseline never moves it back.
                self.baseline = Some(last.max(now_us));
                true
            }
            None => {
                self.baseline = Some(now_us);
                true
            }
        }
    }
}
