use std::time::{Duration, Instant};

/// Fixed-rate frame pacing for the synthetic render loop.
pub struct FramePacing {
    frame_duration: Duration,
    next_due: Instant,
}

impl FramePacing {
    pub fn new(fps: f64) -> Self {
        let fps = if fps > 0.0 { fps } else { 90.0 };
        let frame_duration = Duration::from_secs_f64(1.0 / fps);
        Self {
            frame_duration,
            next_due: Instant::now(),
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Sleep until the next frame slot. Falls forward instead of bursting
    /// when the loop has fallen behind.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
            self.next_due += self.frame_duration;
        } else {
            self.next_due = now + self.frame_duration;
        }
    }
}
