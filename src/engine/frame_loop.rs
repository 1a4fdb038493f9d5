//! The per-frame driver loop.
//!
//! One background thread paces itself to the camera frame rate and runs
//! the frame pipeline: acquire, upload, preprocess, plugin encode,
//! submit, plugin collect, assemble, emit. Commands from the engine
//! (start, stop, point-cloud supply, shutdown) arrive over a channel and
//! are drained between frames; nothing inside the loop blocks on GPU
//! completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use glam::Vec3;
use web_time::{Duration, Instant};

use crate::camera::CameraSource;
use crate::detect::{DetectorPlugin, FrameInputs, FrameOutputs};
use crate::error::ArError;
use crate::events::{ArEvent, EventEmitter, PerformanceSnapshot};
use crate::frame::ArFrame;
use crate::gpu::backend::KernelBackend;
use crate::gpu::context::GpuContext;
use crate::gpu::resources::TrackedTexture;
use crate::preprocess::Preprocessor;
use crate::util::frame_timing::FrameTiming;

use super::FrameCallback;

/// Sustained-low-FPS window before a performance warning fires.
const PERF_WARN_AFTER: Duration = Duration::from_secs(2);

pub(crate) enum DriverCommand {
    Start(Option<FrameCallback>),
    Stop,
    SupplyPoints(Vec<Vec3>, Option<Vec<Vec3>>),
    Shutdown,
}

pub(crate) struct FrameDriver {
    ctx: GpuContext,
    backend: Arc<dyn KernelBackend>,
    camera: Box<dyn CameraSource>,
    preprocess: Preprocessor,
    external: TrackedTexture,
    plugins: Vec<Box<dyn DetectorPlugin>>,
    emitter: Arc<EventEmitter>,
    timing: FrameTiming,
    width: u32,
    height: u32,
    running: Arc<AtomicBool>,
    on_frame: Option<FrameCallback>,
    last_timestamp_us: u64,
    ready_emitted: bool,
    low_fps_since: Option<Instant>,
}

impl FrameDriver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: GpuContext,
        backend: Arc<dyn KernelBackend>,
        camera: Box<dyn CameraSource>,
        preprocess: Preprocessor,
        plugins: Vec<Box<dyn DetectorPlugin>>,
        emitter: Arc<EventEmitter>,
        timing: FrameTiming,
        width: u32,
        height: u32,
        running: Arc<AtomicBool>,
    ) -> Result<Self, ArError> {
        // The imported camera frame. The handle handed out in `ArFrame`
        // is only valid until the next frame overwrites this texture.
        let external = TrackedTexture::new(
            &ctx,
            "external camera frame",
            width,
            height,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        )?;
        Ok(Self {
            ctx,
            backend,
            camera,
            preprocess,
            external,
            plugins,
            emitter,
            timing,
            width,
            height,
            running,
            on_frame: None,
            last_timestamp_us: 0,
            ready_emitted: false,
            low_fps_since: None,
        })
    }

    pub(crate) fn run(mut self, rx: &mpsc::Receiver<DriverCommand>) {
        loop {
            let command = if self.running.load(Ordering::Acquire) {
                let wait = self
                    .timing
                    .until_next_slot()
                    .max(Duration::from_micros(200));
                match rx.recv_timeout(wait) {
                    Ok(c) => Some(c),
                    Err(mpsc::RecvTimeoutError::Timeout) => None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match rx.recv() {
                    Ok(c) => Some(c),
                    Err(_) => break,
                }
            };

            match command {
                Some(DriverCommand::Start(callback)) => {
                    if callback.is_some() {
                        self.on_frame = callback;
                    }
                    if !self.ready_emitted {
                        self.emitter.emit(&ArEvent::Ready);
                        self.ready_emitted = true;
                    }
                    self.running.store(true, Ordering::Release);
                }
                Some(DriverCommand::Stop) => {
                    self.running.store(false, Ordering::Release);
                }
                Some(DriverCommand::SupplyPoints(points, normals)) => {
                    for plugin in &mut self.plugins {
                        plugin.supply_points(points.clone(), normals.clone());
                    }
                }
                Some(DriverCommand::Shutdown) => break,
                None => {}
            }

            if self.running.load(Ordering::Acquire) && self.timing.should_process()
            {
                self.process_frame();
            }
        }
        self.teardown();
    }

    fn process_frame(&mut self) {
        // 1. Acquire; with no new frame, yield to the next loop turn.
        let Some(frame) = self.camera.current_frame() else {
            return;
        };
        if frame.timestamp_us <= self.last_timestamp_us {
            log::debug!("skipping non-monotonic camera frame");
            return;
        }
        if frame.width != self.width || frame.height != self.height {
            log::warn!(
                "camera frame size {}x{} does not match the negotiated \
                 {}x{}; frame dropped",
                frame.width,
                frame.height,
                self.width,
                self.height
            );
            return;
        }
        let timestamp_us = frame.timestamp_us;

        // 2. Import: upload into the recycled external texture.
        self.ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.external.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        self.emitter.emit(&ArEvent::FrameBefore { timestamp_us });

        // 3. Record preprocessing and every plugin's GPU stages, then
        // submit once.
        let mut encoder = self.ctx.create_encoder();
        if let Err(e) = self.preprocess.encode(
            &self.ctx,
            self.backend.as_ref(),
            &mut encoder,
            self.external.view(),
        ) {
            self.emitter.emit(&ArEvent::Error(e));
            return;
        }
        for plugin in &mut self.plugins {
            let mut inputs = FrameInputs {
                ctx: &self.ctx,
                backend: self.backend.as_ref(),
                encoder: &mut encoder,
                camera_view: self.external.view(),
                preprocess: &self.preprocess,
                timestamp_us,
            };
            if let Err(e) = plugin.encode(&mut inputs) {
                log::warn!("plugin '{}' encode failed: {e}", plugin.name());
                self.emitter.emit(&ArEvent::Error(e));
            }
        }
        self.ctx.submit(encoder);

        // 4. Collect: launch idle workers, fold in completed results.
        let mut outputs = FrameOutputs::default();
        for plugin in &mut self.plugins {
            if let Err(e) =
                plugin.collect(&self.ctx, timestamp_us, &mut outputs)
            {
                log::warn!("plugin '{}' collect failed: {e}", plugin.name());
                self.emitter.emit(&ArEvent::Error(e));
            }
        }

        // 5. Per-detection events, in plugin order.
        for event in outputs.events.drain(..) {
            self.emitter.emit(&event);
        }

        // 6. Assemble and hand out the frame record.
        let ar_frame = ArFrame {
            timestamp_us,
            width: self.width,
            height: self.height,
            camera_texture: Some(self.external.share()),
            grayscale_texture: Some(self.preprocess.gray().share()),
            markers: outputs.markers,
            planes: outputs.planes,
            features: outputs.features,
            light: outputs.light,
        };
        self.emitter.emit(&ArEvent::Frame(ar_frame.clone()));
        if let Some(callback) = self.on_frame.as_mut() {
            callback(&ar_frame);
        }
        self.emitter.emit(&ArEvent::FrameAfter(ar_frame));

        // 7. The external texture is recycled on the next upload; frame
        // handles expire with it. Update the rolling FPS window.
        self.last_timestamp_us = timestamp_us;
        self.timing.end_frame();
        if let Some(fps) = self.timing.fps_changed() {
            self.emitter.emit(&ArEvent::FpsChange(fps));
        }
        self.check_performance();
    }

    fn check_performance(&mut self) {
        let target = self.timing.target_fps();
        let fps = self.timing.fps();
        if target == 0 || fps == 0 || fps * 2 >= target {
            self.low_fps_since = None;
            return;
        }
        let since = *self.low_fps_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= PERF_WARN_AFTER {
            let busy = self.plugins.iter().filter(|p| p.busy()).count() as u32;
            self.emitter
                .emit(&ArEvent::PerformanceWarning(PerformanceSnapshot {
                    fps,
                    frame_interval_ms: self.timing.frame_interval_ms(),
                    detectors_busy: busy,
                }));
            // Re-arm so the warning repeats only after another window.
            self.low_fps_since = None;
        }
    }

    fn teardown(mut self) {
        log::debug!("frame driver shutting down");
        for plugin in &mut self.plugins {
            plugin.destroy(&self.ctx);
        }
        self.plugins.clear();
        self.camera.destroy();
        // Remaining tracked resources (preprocessor textures, the
        // external texture) release on drop here; the engine verifies
        // the tracker count afterwards.
    }
}
