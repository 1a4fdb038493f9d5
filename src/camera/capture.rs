//! Live capture through nokhwa.
//!
//! Desktop capture backends do not expose facing; the requested facing is
//! recorded but device selection always starts at index 0. Frames are
//! decoded to RGBA on the capture thread nokhwa manages internally.

use std::sync::Arc;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
    RequestedFormatType, Resolution,
};
use nokhwa::Camera;

use crate::camera::{
    CameraCapabilities, CameraFrame, CameraSettingsUpdate, CameraSource,
};
use crate::error::{ArError, ErrorCode, Suggestion};
use crate::options::{CameraOptions, Facing};
use crate::util::time::MonotonicClock;

fn map_nokhwa(e: &nokhwa::NokhwaError) -> ArError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    let code = if lower.contains("permission") || lower.contains("denied") {
        ErrorCode::CameraPermissionDenied
    } else if lower.contains("not found") || lower.contains("no device") {
        ErrorCode::CameraNotFound
    } else if lower.contains("busy") || lower.contains("in use") {
        ErrorCode::CameraBusy
    } else {
        ErrorCode::CameraInit
    };
    let mut err = ArError::new(code, text);
    if code == ErrorCode::CameraBusy {
        err = err.with_suggestion(Suggestion::new(
            "close other applications holding the camera and retry",
        ));
    }
    err
}

/// Camera source backed by a local capture device.
pub struct CaptureSource {
    camera: Option<Camera>,
    resolution: (u32, u32),
    facing: Facing,
    clock: MonotonicClock,
    last_timestamp_us: u64,
}

impl CaptureSource {
    /// Unopened capture source; call `initialize` before use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            camera: None,
            resolution: (0, 0),
            facing: Facing::Environment,
            clock: MonotonicClock::new(),
            last_timestamp_us: 0,
        }
    }

    fn open(
        &mut self,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<(), ArError> {
        let requested = RequestedFormat::new::<RgbAFormat>(
            RequestedFormatType::Closest(CameraFormat::new(
                Resolution::new(width, height),
                FrameFormat::MJPEG,
                frame_rate,
            )),
        );
        let mut camera = Camera::new(CameraIndex::Index(0), requested)
            .map_err(|e| map_nokhwa(&e))?;
        camera.open_stream().map_err(|e| map_nokhwa(&e))?;

        let negotiated = camera.resolution();
        self.resolution = (negotiated.width(), negotiated.height());
        log::info!(
            "camera stream open at {}x{} (requested {width}x{height}@{frame_rate})",
            self.resolution.0,
            self.resolution.1
        );
        self.camera = Some(camera);
        Ok(())
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSource for CaptureSource {
    fn initialize(&mut self, requested: &CameraOptions) -> Result<(), ArError> {
        self.facing = requested.facing;
        self.open(requested.width, requested.height, requested.frame_rate)?;
        // Block until the device delivers its first frame so downstream
        // init sees real dimensions.
        if let Some(camera) = self.camera.as_mut() {
            let _ = camera.frame().map_err(|e| map_nokhwa(&e))?;
        }
        Ok(())
    }

    fn current_frame(&mut self) -> Option<CameraFrame> {
        let camera = self.camera.as_mut()?;
        let buffer = match camera.frame() {
            Ok(b) => b,
            Err(e) => {
                log::warn!("frame read failed: {e}");
                return None;
            }
        };
        let decoded = match buffer.decode_image::<RgbAFormat>() {
            Ok(img) => img,
            Err(e) => {
                log::warn!("frame decode failed: {e}");
                return None;
            }
        };
        let now =
            self.clock.now_us().max(self.last_timestamp_us + 1);
        self.last_timestamp_us = now;
        Some(CameraFrame {
            data: Arc::from(decoded.into_raw().into_boxed_slice()),
            width: self.resolution.0,
            height: self.resolution.1,
            timestamp_us: now,
        })
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn capabilities(&self) -> CameraCapabilities {
        CameraCapabilities {
            max_width: self.resolution.0.max(1920),
            max_height: self.resolution.1.max(1080),
            frame_rates: vec![15, 30, 60],
            facings: vec![self.facing],
        }
    }

    fn update_settings(
        &mut self,
        update: &CameraSettingsUpdate,
    ) -> Result<(), ArError> {
        let (mut w, mut h) = self.resolution;
        let mut rate = 30;
        if let Some(width) = update.width {
            w = width;
        }
        if let Some(height) = update.height {
            h = height;
        }
        if let Some(frame_rate) = update.frame_rate {
            rate = frame_rate;
        }
        if let Some(facing) = update.facing {
            self.facing = facing;
        }
        if self.camera.is_some() {
            self.destroy();
            self.open(w, h, rate)?;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                log::debug!("stop_stream on teardown: {e}");
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.destroy();
    }
}
