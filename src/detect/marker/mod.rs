//! Fiducial marker detection.
//!
//! GPU stages (blur, threshold) run in the shared preprocessor; this
//! plugin reads the binary image back, traces contours, extracts
//! candidate quads, and decodes them against an ArUco dictionary. On a
//! native compute backend the warp and decode of the candidate quads run
//! as one batched dispatch; on the emulation backend (and for
//! still-image input) the warp and decode run on the CPU from the
//! grayscale readback. Decoded detections feed the shared tracker for
//! confirmation, pose smoothing, and loss handling.

/// Border following on the binary image.
pub mod contour;
/// Warped-patch bit extraction and dictionary matching.
pub mod decode;
/// Pre-shipped ArUco dictionaries.
pub mod dictionary;
/// Polygon approximation and quad validation.
pub mod quad;

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec2};
use rustc_hash::FxHashMap;

use crate::error::{ArError, ErrorCode};
use crate::events::ArEvent;
use crate::frame::{MarkerRotation, TrackedMarker};
use crate::gpu::backend::{
    BackendKind, Binding, Kernel, KernelBackend, KernelDescriptor,
};
use crate::gpu::context::GpuContext;
use crate::gpu::readback::{ReadbackRing, ReadbackTicket};
use crate::gpu::resources::{TrackedBuffer, TrackedTexture};
use crate::math::{CameraIntrinsics, Homography};
use crate::options::MarkerOptions;
use crate::preprocess::cpu::GrayImage;
use crate::track::kalman::ConstantVelocityFilter;
use crate::track::{pose, Track, TrackTransition, TrackerParams};

use self::decode::{decode_patch, rotate_corners, Decoded, PATCH_SIDE};
use self::dictionary::Dictionary;
use self::quad::Quad;

use super::worker::DetectorWorker;
use super::{DetectorPlugin, FrameInputs, FrameOutputs, PluginSetup};

const WARP_SRC: &str = include_str!("../../../assets/shaders/compute/warp.wgsl");
const DECODE_SRC: &str =
    include_str!("../../../assets/shaders/compute/decode.wgsl");

/// One decoded marker before tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// Image corners rotated to agree with the decoded orientation.
    pub corners: [Vec2; 4],
    /// Dictionary id.
    pub id: u32,
    /// Quarter turns from the canonical pattern.
    pub rotation: u32,
    /// `1 - hamming / cells^2`.
    pub confidence: f32,
}

/// Candidate quads from the thresholded image.
#[must_use]
pub fn find_quads(binary: &GrayImage, opts: &MarkerOptions) -> Vec<Quad> {
    let min_points = (opts.min_perimeter * 0.5) as usize;
    let contours = contour::trace_contours(binary, min_points.max(8));
    let mut quads = Vec::new();
    for c in &contours {
        if c.perimeter < opts.min_perimeter || c.perimeter > opts.max_perimeter {
            continue;
        }
        let polygon = quad::approximate_polygon(c, 0.02 * c.perimeter);
        if let Some(q) = quad::validate(&polygon, opts) {
            quads.push(q);
        }
    }
    let mut quads = quad::suppress_nested(quads);
    quads.truncate(opts.max_batch);
    quads
}

/// Canonical decode-square corners (TL, TR, BR, BL).
fn canonical_corners() -> [Vec2; 4] {
    let s = PATCH_SIDE as f32;
    [
        Vec2::new(0.0, 0.0),
        Vec2::new(s, 0.0),
        Vec2::new(s, s),
        Vec2::new(0.0, s),
    ]
}

/// CPU warp of one quad into the canonical patch.
#[must_use]
pub fn warp_patch(gray: &GrayImage, q: &Quad) -> Option<Vec<u8>> {
    let h = Homography::from_correspondences(&canonical_corners(), &q.corners)?;
    let mut patch = vec![0u8; PATCH_SIDE * PATCH_SIDE];
    for y in 0..PATCH_SIDE {
        for x in 0..PATCH_SIDE {
            let p = h.apply(Vec2::new(x as f32 + 0.5, y as f32 + 0.5))?;
            patch[y * PATCH_SIDE + x] =
                gray.sample_bilinear(p.x, p.y).round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(patch)
}

fn decoded_to_raw(q: &Quad, d: Decoded) -> RawDetection {
    RawDetection {
        corners: rotate_corners(q.corners, d.rotation),
        id: d.id,
        rotation: d.rotation,
        confidence: d.confidence,
    }
}

/// CPU warp + decode of candidate quads.
#[must_use]
pub fn decode_quads_cpu(
    gray: &GrayImage,
    quads: &[Quad],
    dict: &Dictionary,
) -> Vec<RawDetection> {
    let mut out = Vec::new();
    for q in quads {
        let Some(patch) = warp_patch(gray, q) else {
            continue;
        };
        if let Some(d) = decode_patch(&patch, dict) {
            out.push(decoded_to_raw(q, d));
        }
    }
    out
}

/// Full still-image detection: blur, threshold, contours, decode.
///
/// This is the complete CPU rendition of the pipeline, used for one-shot
/// image processing and as the test oracle for the GPU path.
#[must_use]
pub fn detect_in_image(
    gray: &GrayImage,
    opts: &MarkerOptions,
) -> Vec<RawDetection> {
    let dict = Dictionary::predefined(opts.dictionary);
    let blurred = crate::preprocess::cpu::gaussian_blur(gray);
    let binary = crate::preprocess::cpu::adaptive_threshold(
        &blurred,
        opts.threshold_window,
        opts.threshold_constant,
    );
    let quads = find_quads(&binary, opts);
    decode_quads_cpu(&blurred, &quads, dict)
}

// =============================================================================
// GPU batch structures
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct WarpParams {
    quad_count: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DecodeParams {
    quad_count: u32,
    cells: u32,
    code_count: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DecodeRecord {
    id: u32,
    rotation: u32,
    valid: u32,
    confidence: f32,
}

/// Convert an r32float readback into a byte image (values scaled 0-255).
fn f32_image(bytes: &[u8], width: u32, height: u32, scale: f32) -> GrayImage {
    let mut data = Vec::with_capacity((width * height) as usize);
    for chunk in bytes.chunks_exact(4) {
        let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        data.push((v * scale).round().clamp(0.0, 255.0) as u8);
    }
    data.resize((width * height) as usize, 0);
    GrayImage::new(data, width, height)
}

struct MarkerJob {
    device: wgpu::Device,
    binary: ReadbackTicket,
    gray: Option<ReadbackTicket>,
    batch: Option<(ReadbackTicket, Vec<Quad>)>,
    width: u32,
    height: u32,
    opts: MarkerOptions,
    timestamp_us: u64,
}

#[derive(Clone, Default)]
struct MarkerJobResult {
    detections: Vec<RawDetection>,
    next_quads: Vec<Quad>,
    timestamp_us: u64,
    error: Option<ArError>,
}

fn run_marker_job(job: MarkerJob) -> MarkerJobResult {
    let dict = Dictionary::predefined(job.opts.dictionary);
    let mut result = MarkerJobResult {
        timestamp_us: job.timestamp_us,
        ..Default::default()
    };

    // Previous frame's batched decode records, if any.
    if let Some((ticket, quads)) = job.batch {
        match ticket.resolve(&job.device) {
            Ok(bytes) => {
                let records: &[DecodeRecord] =
                    bytemuck::cast_slice(&bytes[..quads.len() * 16]);
                for (q, r) in quads.iter().zip(records) {
                    if r.valid == 1 {
                        result.detections.push(decoded_to_raw(
                            q,
                            Decoded {
                                id: r.id,
                                rotation: r.rotation,
                                distance: 0,
                                confidence: r.confidence,
                            },
                        ));
                    }
                }
            }
            Err(e) => result.error = Some(e),
        }
    }

    let binary = match job.binary.resolve(&job.device) {
        Ok(bytes) => {
            let mut img = f32_image(&bytes, job.width, job.height, 1.0);
            for v in &mut img.data {
                *v = u8::from(*v > 0);
            }
            img
        }
        Err(e) => {
            if let Some(g) = job.gray {
                g.discard();
            }
            result.error = Some(e);
            return result;
        }
    };

    let quads = find_quads(&binary, &job.opts);
    match job.gray {
        Some(gray_ticket) => match gray_ticket.resolve(&job.device) {
            // Emulation path: decode this frame's quads on the CPU.
            Ok(bytes) => {
                let gray = f32_image(&bytes, job.width, job.height, 255.0);
                result.detections = decode_quads_cpu(&gray, &quads, dict);
            }
            Err(e) => result.error = Some(e),
        },
        // Native path: hand the quads back for the next batched dispatch.
        None => result.next_quads = quads,
    }
    result
}

// =============================================================================
// Plugin
// =============================================================================

struct MarkerTrack {
    track: Track,
    kalman: ConstantVelocityFilter,
    orientation: Option<Quat>,
    exported: TrackedMarker,
}

struct GpuBatch {
    warp_kernel: Kernel,
    decode_kernel: Kernel,
    strip: TrackedTexture,
    records: TrackedBuffer,
    codes: TrackedBuffer,
    warp_params: TrackedBuffer,
    decode_params: TrackedBuffer,
    homographies: TrackedBuffer,
    records_ring: ReadbackRing,
}

/// The marker detection plugin.
pub struct MarkerDetectorPlugin {
    opts: MarkerOptions,
    tracker_params: TrackerParams,
    intrinsics: Option<CameraIntrinsics>,
    width: u32,
    height: u32,
    binary_ring: Option<ReadbackRing>,
    gray_ring: Option<ReadbackRing>,
    batch: Option<GpuBatch>,
    worker: Option<DetectorWorker<MarkerJob, MarkerJobResult>>,
    staged_binary: Option<ReadbackTicket>,
    staged_gray: Option<ReadbackTicket>,
    staged_batch: Option<(ReadbackTicket, Vec<Quad>)>,
    pending_quads: Vec<Quad>,
    tracks: FxHashMap<u32, MarkerTrack>,
    last_result_us: u64,
    orientation_alpha: f32,
    process_noise: f32,
    measurement_noise: f32,
}

impl MarkerDetectorPlugin {
    /// Plugin with default options (overridden from the engine config at
    /// initialization).
    #[must_use]
    pub fn new() -> Self {
        Self {
            opts: MarkerOptions::default(),
            tracker_params: TrackerParams::default(),
            intrinsics: None,
            width: 0,
            height: 0,
            binary_ring: None,
            gray_ring: None,
            batch: None,
            worker: None,
            staged_binary: None,
            staged_gray: None,
            staged_batch: None,
            pending_quads: Vec::new(),
            tracks: FxHashMap::default(),
            last_result_us: 0,
            orientation_alpha: 0.3,
            process_noise: 0.01,
            measurement_noise: 0.05,
        }
    }

    fn init_batch(
        &self,
        setup: &mut PluginSetup<'_>,
        dict: &Dictionary,
    ) -> Result<GpuBatch, ArError> {
        let ctx = setup.ctx;
        let strip_width = (PATCH_SIDE * self.opts.max_batch) as u32;
        let strip = TrackedTexture::new(
            ctx,
            "marker warp strip",
            strip_width,
            PATCH_SIDE as u32,
            wgpu::TextureFormat::R32Float,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING,
        )?;
        let records_size = (self.opts.max_batch * 16) as u64;
        let records = TrackedBuffer::new(
            ctx,
            "marker decode records",
            records_size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        )?;
        let packed = dict.packed_codes();
        let codes = TrackedBuffer::new(
            ctx,
            "marker dictionary codes",
            (packed.len() * 8) as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )?;
        ctx.queue
            .write_buffer(codes.buffer(), 0, bytemuck::cast_slice(&packed));

        let uniform =
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST;
        let warp_params =
            TrackedBuffer::new(ctx, "marker warp params", 16, uniform)?;
        let decode_params =
            TrackedBuffer::new(ctx, "marker decode params", 16, uniform)?;
        let homographies = TrackedBuffer::new(
            ctx,
            "marker homographies",
            96 * 16,
            uniform,
        )?;
        ctx.queue.write_buffer(
            decode_params.buffer(),
            0,
            bytemuck::bytes_of(&DecodeParams {
                quad_count: 0,
                cells: dict.cells(),
                code_count: dict.len() as u32,
                _pad: 0,
            }),
        );

        let warp_kernel = setup.backend.create_kernel(
            setup.ctx,
            setup.composer,
            &KernelDescriptor {
                label: "marker warp",
                source: WARP_SRC,
                entry_point: "main",
            },
        )?;
        let decode_kernel = setup.backend.create_kernel(
            setup.ctx,
            setup.composer,
            &KernelDescriptor {
                label: "marker decode",
                source: DECODE_SRC,
                entry_point: "main",
            },
        )?;

        let records_ring = ReadbackRing::new(
            ctx,
            "marker records",
            2,
            records_size as u32,
            1,
        )?;

        Ok(GpuBatch {
            warp_kernel,
            decode_kernel,
            strip,
            records,
            codes,
            warp_params,
            decode_params,
            homographies,
            records_ring,
        })
    }

    fn apply_result(
        &mut self,
        result: &MarkerJobResult,
        timestamp_us: u64,
        out: &mut FrameOutputs,
    ) {
        let fresh = result.timestamp_us > self.last_result_us;
        if fresh {
            self.last_result_us = result.timestamp_us;
            self.pending_quads = result.next_quads.clone();

            if let Some(err) = &result.error {
                out.events.push(ArEvent::Error(err.clone()));
                out.markers = Some(Vec::new());
                self.miss_all(timestamp_us, out);
                return;
            }

            let mut seen: Vec<u32> = Vec::new();
            for det in &result.detections {
                seen.push(det.id);
                self.observe(det, timestamp_us, out);
            }
            self.tick_unseen(&seen, timestamp_us, out);
        }

        let mut export: Vec<TrackedMarker> = self
            .tracks
            .values()
            .filter(|t| t.track.state() != crate::track::TrackState::Tentative)
            .map(|t| {
                let mut m = t.exported.clone();
                m.stale = !fresh;
                m
            })
            .collect();
        export.sort_by_key(|m| m.id);
        out.markers = Some(export);
    }

    fn observe(
        &mut self,
        det: &RawDetection,
        now_us: u64,
        out: &mut FrameOutputs,
    ) {
        let pose_est = self.intrinsics.as_ref().and_then(|k| {
            pose::estimate_marker_pose(&det.corners, self.opts.marker_size_m, k)
        });

        let is_new = !self.tracks.contains_key(&det.id);
        let entry = self.tracks.entry(det.id).or_insert_with(|| {
            let track = Track::new(now_us, det.confidence);
            MarkerTrack {
                track,
                kalman: ConstantVelocityFilter::new(
                    self.process_noise,
                    self.measurement_noise,
                ),
                orientation: None,
                exported: TrackedMarker {
                    id: det.id,
                    corners: det.corners,
                    rotation: MarkerRotation::from_quarter_turns(det.rotation),
                    confidence: det.confidence,
                    pose: None,
                    state: crate::track::TrackState::Tentative,
                    stale: false,
                },
            }
        });

        // Creation already counted this detection as the first update.
        let transition = if is_new {
            if self.tracker_params.confirm_updates <= 1 {
                entry.track.force_confirm()
            } else {
                TrackTransition::None
            }
        } else {
            entry.track.observe(now_us, det.confidence, &self.tracker_params)
        };

        let smoothed_pose = pose_est.map(|p| {
            let position = entry.kalman.update(p.position, now_us);
            let rotation = match entry.orientation {
                Some(prev) => {
                    pose::slerp_smooth(prev, p.rotation, self.orientation_alpha)
                }
                None => p.rotation,
            };
            entry.orientation = Some(rotation);
            crate::frame::Pose { position, rotation }
        });

        entry.exported = TrackedMarker {
            id: det.id,
            corners: det.corners,
            rotation: MarkerRotation::from_quarter_turns(det.rotation),
            confidence: entry.track.confidence(),
            pose: smoothed_pose,
            state: entry.track.state(),
            stale: false,
        };

        match transition {
            TrackTransition::Detected => {
                out.events.push(ArEvent::MarkerDetected(entry.exported.clone()));
            }
            TrackTransition::Updated => {
                out.events.push(ArEvent::MarkerUpdated(entry.exported.clone()));
            }
            _ => {}
        }
    }

    fn tick_unseen(
        &mut self,
        seen: &[u32],
        now_us: u64,
        out: &mut FrameOutputs,
    ) {
        let mut removed = Vec::new();
        for (id, entry) in &mut self.tracks {
            if seen.contains(id) {
                continue;
            }
            match entry.track.tick(now_us, true, &self.tracker_params) {
                TrackTransition::Lost => {
                    entry.exported.state = entry.track.state();
                    out.events.push(ArEvent::MarkerLost { id: *id });
                }
                TrackTransition::Removed => removed.push(*id),
                _ => {
                    entry.exported.confidence = entry.track.confidence();
                }
            }
        }
        for id in removed {
            let _ = self.tracks.remove(&id);
        }
    }

    fn miss_all(&mut self, now_us: u64, out: &mut FrameOutputs) {
        self.tick_unseen(&[], now_us, out);
    }
}

impl Default for MarkerDetectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorPlugin for MarkerDetectorPlugin {
    fn name(&self) -> &'static str {
        "markers"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn initialize(&mut self, setup: &mut PluginSetup<'_>) -> Result<(), ArError> {
        self.opts = setup.options.marker.clone();
        self.tracker_params = TrackerParams {
            confirm_updates: self.opts.confirm_updates,
            lost_after_us: self.opts.loss_timeout_ms * 1000,
            removed_after_us: self.opts.removal_timeout_ms * 1000,
            alpha: setup.options.tracking.confidence_alpha,
        };
        self.orientation_alpha = setup.options.tracking.orientation_alpha;
        self.process_noise = setup.options.tracking.process_noise;
        self.measurement_noise = setup.options.tracking.measurement_noise;
        self.intrinsics = Some(setup.intrinsics);
        self.width = setup.width;
        self.height = setup.height;

        let row_bytes = setup.width * 4;
        self.binary_ring = Some(ReadbackRing::new(
            setup.ctx,
            "marker binary",
            2,
            row_bytes,
            setup.height,
        )?);

        let dict = Dictionary::predefined(self.opts.dictionary);
        if setup.backend.kind() == BackendKind::NativeCompute {
            self.batch = Some(self.init_batch(setup, dict)?);
        } else {
            // Emulation: the decode kernel writes a storage buffer, so
            // the whole decode stage falls back to CPU from a grayscale
            // readback.
            log::info!(
                "marker decode falls back to CPU: {}",
                crate::gpu::backend::RasterEmulationBackend::
                    unsupported_buffer_kernel("marker decode")
            );
            self.gray_ring = Some(ReadbackRing::new(
                setup.ctx,
                "marker gray",
                2,
                row_bytes,
                setup.height,
            )?);
        }

        self.worker = Some(
            DetectorWorker::spawn("markers", run_marker_job).map_err(|e| {
                ArError::new(
                    ErrorCode::PluginInitFailed,
                    format!("marker worker spawn failed: {e}"),
                )
            })?,
        );
        Ok(())
    }

    fn encode(&mut self, frame: &mut FrameInputs<'_>) -> Result<(), ArError> {
        let busy = self.worker.as_ref().is_some_and(DetectorWorker::busy);
        if busy {
            // Single flight: leave this frame to the running job.
            return Ok(());
        }

        if let Some(ring) = self.binary_ring.as_mut() {
            if let Some(slot) = ring.try_acquire() {
                ring.encode_copy(
                    frame.encoder,
                    frame.preprocess.binary().texture(),
                    slot,
                );
                self.staged_binary = Some(ring.ticket(slot));
            }
        }
        if let Some(ring) = self.gray_ring.as_mut() {
            if let Some(slot) = ring.try_acquire() {
                ring.encode_copy(
                    frame.encoder,
                    frame.preprocess.blurred().texture(),
                    slot,
                );
                self.staged_gray = Some(ring.ticket(slot));
            }
        }

        // Batched warp + decode of the quads found by the last job.
        if let Some(batch) = self.batch.as_mut() {
            if !self.pending_quads.is_empty() {
                let count = self.pending_quads.len().min(self.opts.max_batch);
                let mut rows = [[0f32; 4]; 96];
                for (i, q) in self.pending_quads[..count].iter().enumerate() {
                    let Some(h) = Homography::from_correspondences(
                        &canonical_corners(),
                        &q.corners,
                    ) else {
                        continue;
                    };
                    for r in 0..3 {
                        rows[i * 3 + r] = [
                            h.0[r * 3] as f32,
                            h.0[r * 3 + 1] as f32,
                            h.0[r * 3 + 2] as f32,
                            0.0,
                        ];
                    }
                }
                frame.ctx.queue.write_buffer(
                    batch.homographies.buffer(),
                    0,
                    bytemuck::cast_slice(&rows),
                );
                frame.ctx.queue.write_buffer(
                    batch.warp_params.buffer(),
                    0,
                    bytemuck::bytes_of(&WarpParams {
                        quad_count: count as u32,
                        _pad: [0; 3],
                    }),
                );
                frame.ctx.queue.write_buffer(
                    batch.decode_params.buffer(),
                    0,
                    bytemuck::bytes_of(&DecodeParams {
                        quad_count: count as u32,
                        cells: Dictionary::predefined(self.opts.dictionary)
                            .cells(),
                        code_count: Dictionary::predefined(self.opts.dictionary)
                            .len() as u32,
                        _pad: 0,
                    }),
                );

                let strip_w = (count * PATCH_SIDE) as u32;
                let grid =
                    batch.warp_kernel.grid_for(strip_w, PATCH_SIDE as u32);
                frame.backend.encode(
                    frame.ctx,
                    frame.encoder,
                    &batch.warp_kernel,
                    &[
                        Binding::StorageTexture(batch.strip.view()),
                        Binding::Texture(frame.preprocess.blurred().view()),
                        Binding::uniform(batch.warp_params.buffer()),
                        Binding::uniform(batch.homographies.buffer()),
                    ],
                    grid,
                )?;
                frame.backend.encode(
                    frame.ctx,
                    frame.encoder,
                    &batch.decode_kernel,
                    &[
                        Binding::storage(batch.records.buffer()),
                        Binding::Texture(batch.strip.view()),
                        Binding::uniform(batch.decode_params.buffer()),
                        Binding::storage_read(batch.codes.buffer()),
                    ],
                    ((count as u32).div_ceil(32).max(1), 1, 1),
                )?;

                if let Some(slot) = batch.records_ring.try_acquire() {
                    batch.records_ring.encode_copy_buffer(
                        frame.encoder,
                        batch.records.buffer(),
                        (count * 16) as u64,
                        slot,
                    );
                    self.staged_batch = Some((
                        batch.records_ring.ticket(slot),
                        self.pending_quads[..count].to_vec(),
                    ));
                }
                self.pending_quads.clear();
            }
        }
        Ok(())
    }

    fn collect(
        &mut self,
        ctx: &GpuContext,
        timestamp_us: u64,
        out: &mut FrameOutputs,
    ) -> Result<(), ArError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };

        if let Some(binary) = self.staged_binary.take() {
            let job = MarkerJob {
                device: ctx.device.clone(),
                binary,
                gray: self.staged_gray.take(),
                batch: self.staged_batch.take(),
                width: self.width,
                height: self.height,
                opts: self.opts.clone(),
                timestamp_us,
            };
            if !worker.try_submit(job) {
                log::debug!("marker job refused (worker busy)");
            }
        }

        if let Some(result) = worker.latest() {
            self.apply_result(&result, timestamp_us, out);
        } else {
            out.markers = Some(Vec::new());
        }
        Ok(())
    }

    fn busy(&self) -> bool {
        self.worker.as_ref().is_some_and(DetectorWorker::busy)
    }

    fn destroy(&mut self, _ctx: &GpuContext) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.shutdown(web_time::Duration::from_secs(1));
        }
        if let Some(t) = self.staged_binary.take() {
            t.discard();
        }
        if let Some(t) = self.staged_gray.take() {
            t.discard();
        }
        if let Some((t, _)) = self.staged_batch.take() {
            t.discard();
        }
        self.binary_ring = None;
        self.gray_ring = None;
        self.batch = None;
        self.tracks.clear();
    }
}
