//! Video frame acquisition.
//!
//! The engine consumes frames through the [`CameraSource`] trait: a live
//! capture device behind the `capture` feature, and a scripted synthetic
//! source that is always available for tests and headless runs. Frames
//! are RGBA bytes with strictly monotonic microsecond timestamps.

/// Live capture through nokhwa (feature `capture`).
#[cfg(feature = "capture")]
pub mod capture;
/// Scripted frame source for tests and headless benchmarking.
pub mod synthetic;

use std::sync::Arc;

use crate::error::ArError;
use crate::options::{CameraOptions, Facing};

/// One acquired video frame.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Tightly packed RGBA bytes, `width * height * 4`.
    pub data: Arc<[u8]>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Strictly monotonic timestamp in microseconds.
    pub timestamp_us: u64,
}

/// What a capture device reports it can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCapabilities {
    /// Largest supported width.
    pub max_width: u32,
    /// Largest supported height.
    pub max_height: u32,
    /// Supported frame rates.
    pub frame_rates: Vec<u32>,
    /// Available facings.
    pub facings: Vec<Facing>,
}

/// Partial settings update applied to a running source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraSettingsUpdate {
    /// New width, if changing.
    pub width: Option<u32>,
    /// New height, if changing.
    pub height: Option<u32>,
    /// New facing, if changing.
    pub facing: Option<Facing>,
    /// New frame rate, if changing.
    pub frame_rate: Option<u32>,
}

/// A source of camera frames.
pub trait CameraSource: Send {
    /// Negotiate the requested settings and block until the first frame
    /// is available.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with one of the camera codes
    /// (`CameraPermissionDenied`, `CameraNotFound`, `CameraBusy`,
    /// `CameraInit`).
    fn initialize(&mut self, requested: &CameraOptions) -> Result<(), ArError>;

    /// The latest frame, or `None` when no new frame is ready.
    fn current_frame(&mut self) -> Option<CameraFrame>;

    /// The negotiated resolution.
    fn resolution(&self) -> (u32, u32);

    /// What the device reports it can do.
    fn capabilities(&self) -> CameraCapabilities;

    /// Apply a partial settings update.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] when the device rejects the new settings.
    fn update_settings(
        &mut self,
        update: &CameraSettingsUpdate,
    ) -> Result<(), ArError>;

    /// Stop the stream and release the device. Idempotent.
    fn destroy(&mut self);
}
