//! Scripted camera source.
//!
//! Plays a fixed sequence of RGBA frames with monotonic timestamps,
//! repeating the final frame once the script is exhausted. Tests build
//! scripts from generated imagery (solid frames, rendered markers);
//! headless benchmarks loop a capture dump.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::camera::{
    CameraCapabilities, CameraFrame, CameraSettingsUpdate, CameraSource,
};
use crate::error::{ArError, ErrorCode};
use crate::options::{CameraOptions, Facing};
use crate::util::time::MonotonicClock;

/// Solid-luminance RGBA frame.
#[must_use]
pub fn solid_frame(width: u32, height: u32, luma: u8) -> Vec<u8> {
    let mut data = vec![luma; (width * height * 4) as usize];
    for px in data.chunks_exact_mut(4) {
        px[3] = 255;
    }
    data
}

/// Scripted frame source.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    script: VecDeque<Arc<[u8]>>,
    last: Option<Arc<[u8]>>,
    clock: MonotonicClock,
    last_timestamp_us: u64,
    initialized: bool,
}

impl SyntheticSource {
    /// Source that repeats a single mid-gray frame forever.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_script(
            width,
            height,
            vec![solid_frame(width, height, 128)],
        )
    }

    /// Source playing `frames` in order, then repeating the last one.
    ///
    /// Each frame must be `width * height * 4` bytes.
    #[must_use]
    pub fn with_script(width: u32, height: u32, frames: Vec<Vec<u8>>) -> Self {
        let script: VecDeque<Arc<[u8]>> =
            frames.into_iter().map(Arc::from).collect();
        Self {
            width,
            height,
            script,
            last: None,
            clock: MonotonicClock::new(),
            last_timestamp_us: 0,
            initialized: false,
        }
    }

    /// Append more frames to the script (e.g. mid-test scene changes).
    pub fn push_frames(&mut self, frames: Vec<Vec<u8>>) {
        for f in frames {
            self.script.push_back(Arc::from(f));
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        // Strictly monotonic even when the clock resolution collapses
        // consecutive calls onto the same microsecond.
        let now = self.clock.now_us().max(self.last_timestamp_us + 1);
        self.last_timestamp_us = now;
        now
    }
}

impl CameraSource for SyntheticSource {
    fn initialize(&mut self, requested: &CameraOptions) -> Result<(), ArError> {
        if self.script.is_empty() && self.last.is_none() {
            return Err(ArError::new(
                ErrorCode::CameraInit,
                "synthetic source has an empty script",
            ));
        }
        if requested.width != self.width || requested.height != self.height {
            log::debug!(
                "synthetic source keeps its scripted {}x{} (requested {}x{})",
                self.width,
                self.height,
                requested.width,
                requested.height
            );
        }
        self.initialized = true;
        Ok(())
    }

    fn current_frame(&mut self) -> Option<CameraFrame> {
        if !self.initialized {
            return None;
        }
        let data = match self.script.pop_front() {
            Some(frame) => {
                self.last = Some(Arc::clone(&frame));
                frame
            }
            None => Arc::clone(self.last.as_ref()?),
        };
        let timestamp_us = self.next_timestamp();
        Some(CameraFrame {
            data,
            width: self.width,
            height: self.height,
            timestamp_us,
        })
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capabilities(&self) -> CameraCapabilities {
        CameraCapabilities {
            max_width: self.width,
            max_height: self.height,
            frame_rates: vec![30, 60, 120],
            facings: vec![Facing::Environment],
        }
    }

    fn update_settings(
        &mut self,
        _update: &CameraSettingsUpdate,
    ) -> Result<(), ArError> {
        // The scripted resolution is fixed; rate changes are meaningless
        // because pacing lives in the frame driver.
        Ok(())
    }

    fn destroy(&mut self) {
        self.initialized = false;
        self.script.clear();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_script_then_repeats_last() {
        let mut src = SyntheticSource::with_script(
            4,
            4,
            vec![solid_frame(4, 4, 10), solid_frame(4, 4, 20)],
        );
        src.initialize(&CameraOptions::default()).unwrap();
        assert_eq!(src.current_frame().unwrap().data[0], 10);
        assert_eq!(src.current_frame().unwrap().data[0], 20);
        assert_eq!(src.current_frame().unwrap().data[0], 20);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut src = SyntheticSource::new(2, 2);
        src.initialize(&CameraOptions::default()).unwrap();
        let mut prev = 0;
        for _ in 0..10 {
            let ts = src.current_frame().unwrap().timestamp_us;
            assert!(ts > prev);
            prev = ts;
        }
    }

    #[test]
    fn uninitialized_source_yields_nothing() {
        let mut src = SyntheticSource::new(2, 2);
        assert!(src.current_frame().is_none());
        src.initialize(&CameraOptions::default()).unwrap();
        assert!(src.current_frame().is_some());
        src.destroy();
        assert!(src.current_frame().is_none());
    }

    #[test]
    fn empty_script_fails_initialize() {
        let mut src = SyntheticSource::with_script(2, 2, Vec::new());
        let err = src.initialize(&CameraOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CameraInit);
    }
}
