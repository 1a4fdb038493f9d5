use std::collections::VecDeque;

use web_time::{Duration, Instant};

/// Frame timing with FPS pacing and a rolling one-second FPS window.
pub struct FrameTiming {
    /// Target FPS (0 = unlimited)
    target_fps: u32,
    /// Minimum frame duration based on target FPS
    min_frame_duration: Duration,
    /// Last frame timestamp
    last_frame: Instant,
    /// Frame completion times inside the rolling window.
    window: VecDeque<Instant>,
    /// FPS value last reported by [`fps`](Self::fps).
    last_reported_fps: u32,
}

impl FrameTiming {
    /// Width of the rolling FPS window.
    const WINDOW: Duration = Duration::from_secs(1);

    /// Create a new frame timer with the given FPS target (0 = unlimited).
    #[must_use]
    pub fn new(target_fps: u32) -> Self {
        let min_frame_duration = if target_fps > 0 {
            Duration::from_secs_f64(1.0 / f64::from(target_fps))
        } else {
            Duration::ZERO
        };

        Self {
            target_fps,
            min_frame_duration,
            last_frame: Instant::now(),
            window: VecDeque::new(),
            last_reported_fps: 0,
        }
    }

    /// The configured FPS target (0 = unlimited).
    #[must_use]
    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    /// Call at the start of each loop turn. Returns `true` if enough time
    /// has passed to process another frame.
    #[must_use]
    pub fn should_process(&self) -> bool {
        if self.target_fps == 0 {
            return true;
        }
        self.last_frame.elapsed() >= self.min_frame_duration
    }

    /// Time remaining until the next frame slot, for loop sleeping.
    #[must_use]
    pub fn until_next_slot(&self) -> Duration {
        if self.target_fps == 0 {
            return Duration::ZERO;
        }
        self.min_frame_duration
            .saturating_sub(self.last_frame.elapsed())
    }

    /// Call after processing a frame to update the window.
    pub fn end_frame(&mut self) {
        let now = Instant::now();
        self.last_frame = now;
        self.window.push_back(now);
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) > Self::WINDOW {
                let _ = self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames completed within the rolling one-second window.
    #[must_use]
    pub fn fps(&self) -> u32 {
        self.window.len() as u32
    }

    /// Mean frame interval over the window, in milliseconds.
    #[must_use]
    pub fn frame_interval_ms(&self) -> f32 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let (Some(first), Some(last)) = (self.window.front(), self.window.back())
        else {
            return 0.0;
        };
        last.duration_since(*first).as_secs_f32() * 1000.0 / (n as f32 - 1.0)
    }

    /// Returns `Some(fps)` when the integer FPS changed since the last
    /// report, for `fps:change` emission.
    #[must_use]
    pub fn fps_changed(&mut self) -> Option<u32> {
        let fps = self.fps();
        if fps != self.last_reported_fps {
            self.last_reported_fps = fps;
            Some(fps)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_target_always_processes() {
        let t = FrameTiming::new(0);
        assert!(t.should_process());
        assert_eq!(t.until_next_slot(), Duration::ZERO);
    }

    #[test]
    fn window_counts_recent_frames() {
        let mut t = FrameTiming::new(0);
        for _ in 0..5 {
            t.end_frame();
        }
        assert_eq!(t.fps(), 5);
    }

    #[test]
    fn fps_changed_reports_once_per_value() {
        let mut t = FrameTiming::new(0);
        t.end_frame();
        assert_eq!(t.fps_changed(), Some(1));
        assert_eq!(t.fps_changed(), None);
        t.end_frame();
        assert_eq!(t.fps_changed(), Some(2));
    }
}
