//! Shared utilities for the perception pipeline.

/// Per-frame timing, FPS pacing, and the rolling FPS window.
pub mod frame_timing;
/// Monotonic microsecond clock.
pub mod time;
