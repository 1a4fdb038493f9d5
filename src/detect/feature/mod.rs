//! Sparse feature detection and matching.
//!
//! The FAST response kernel runs on the GPU; the CPU stage (in the
//! plugin's worker) applies non-max suppression, computes orientations
//! and descriptors from the grayscale readback, and matches against the
//! previous frame's descriptors with the ratio test.

/// FAST response and non-max suppression.
pub mod fast;
/// Oriented binary descriptors and matching.
pub mod orb;

use bytemuck::{Pod, Zeroable};

use crate::error::{ArError, ErrorCode};
use crate::events::ArEvent;
use crate::frame::{Descriptor, FeatureSet, Keypoint};
use crate::gpu::backend::{Binding, Kernel, KernelDescriptor};
use crate::gpu::context::GpuContext;
use crate::gpu::readback::{ReadbackRing, ReadbackTicket};
use crate::gpu::resources::TrackedBuffer;
use crate::options::FeatureOptions;
use crate::preprocess::cpu::GrayImage;

use super::worker::DetectorWorker;
use super::{DetectorPlugin, FrameInputs, FrameOutputs, PluginSetup};

const FAST_SRC: &str = include_str!("../../../assets/shaders/compute/fast.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FastParams {
    threshold: f32,
    _pad: [f32; 3],
}

/// Full still-image feature extraction (CPU): FAST, suppression,
/// orientation, descriptors.
#[must_use]
pub fn detect_in_image(
    gray: &GrayImage,
    opts: &FeatureOptions,
) -> (Vec<Keypoint>, Vec<Descriptor>) {
    let map = fast::response_map(gray, f32::from(opts.threshold));
    let mut keypoints =
        fast::non_max_suppression(&map, gray.width, gray.height, opts.max_keypoints);
    let mut descriptors = Vec::with_capacity(keypoints.len());
    for kp in &mut keypoints {
        kp.angle =
            orb::orientation(gray, kp.position.x as i32, kp.position.y as i32);
        descriptors.push(orb::describe(gray, kp));
    }
    (keypoints, descriptors)
}

struct FeatureJob {
    device: wgpu::Device,
    response: ReadbackTicket,
    gray: ReadbackTicket,
    width: u32,
    height: u32,
    opts: FeatureOptions,
    timestamp_us: u64,
}

#[derive(Clone, Default)]
struct FeatureJobResult {
    features: FeatureSet,
    timestamp_us: u64,
    error: Option<ArError>,
}

/// The feature detection plugin.
pub struct FeatureDetectorPlugin {
    opts: FeatureOptions,
    width: u32,
    height: u32,
    kernel: Option<Kernel>,
    params: Option<TrackedBuffer>,
    response_tex: Option<crate::gpu::resources::TrackedTexture>,
    response_ring: Option<ReadbackRing>,
    gray_ring: Option<ReadbackRing>,
    worker: Option<DetectorWorker<FeatureJob, FeatureJobResult>>,
    staged_response: Option<ReadbackTicket>,
    staged_gray: Option<ReadbackTicket>,
    last_result_us: u64,
    last_features: FeatureSet,
}

impl FeatureDetectorPlugin {
    /// Plugin with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            opts: FeatureOptions::default(),
            width: 0,
            height: 0,
            kernel: None,
            params: None,
            response_tex: None,
            response_ring: None,
            gray_ring: None,
            worker: None,
            staged_response: None,
            staged_gray: None,
            last_result_us: 0,
            last_features: FeatureSet::default(),
        }
    }
}

impl Default for FeatureDetectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn run_feature_job(
    prev_descriptors: &mut Vec<Descriptor>,
    job: FeatureJob,
) -> FeatureJobResult {
    let mut result = FeatureJobResult {
        timestamp_us: job.timestamp_us,
        ..Default::default()
    };

    let response_bytes = match job.response.resolve(&job.device) {
        Ok(b) => b,
        Err(e) => {
            job.gray.discard();
            // Failure contract: clear arrays, return an empty match list.
            prev_descriptors.clear();
            result.error = Some(e);
            return result;
        }
    };
    let gray_bytes = match job.gray.resolve(&job.device) {
        Ok(b) => b,
        Err(e) => {
            prev_descriptors.clear();
            result.error = Some(e);
            return result;
        }
    };

    let responses: Vec<f32> = response_bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let gray = {
        let data: Vec<u8> = gray_bytes
            .chunks_exact(4)
            .map(|c| {
                let v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                (v * 255.0).round().clamp(0.0, 255.0) as u8
            })
            .collect();
        GrayImage::new(data, job.width, job.height)
    };

    let mut keypoints = fast::non_max_suppression(
        &responses,
        job.width,
        job.height,
        job.opts.max_keypoints,
    );
    let mut descriptors = Vec::with_capacity(keypoints.len());
    for kp in &mut keypoints {
        kp.angle = orb::orientation(
            &gray,
            kp.position.x as i32,
            kp.position.y as i32,
        );
        descriptors.push(orb::describe(&gray, kp));
    }

    let matches = orb::match_descriptors(
        &descriptors,
        prev_descriptors,
        job.opts.match_max_distance,
        job.opts.match_ratio,
    );
    *prev_descriptors = descriptors.clone();

    result.features = FeatureSet {
        keypoints,
        descriptors,
        matches,
        stale: false,
    };
    result
}

impl DetectorPlugin for FeatureDetectorPlugin {
    fn name(&self) -> &'static str {
        "features"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn initialize(&mut self, setup: &mut PluginSetup<'_>) -> Result<(), ArError> {
        self.opts = setup.options.feature.clone();
        self.width = setup.width;
        self.height = setup.height;

        self.response_tex = Some(crate::gpu::resources::TrackedTexture::new(
            setup.ctx,
            "fast response",
            setup.width,
            setup.height,
            wgpu::TextureFormat::R32Float,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
        )?);
        self.kernel = Some(setup.backend.create_kernel(
            setup.ctx,
            setup.composer,
            &KernelDescriptor {
                label: "fast response",
                source: FAST_SRC,
                entry_point: "main",
            },
        )?);

        let params = TrackedBuffer::new(
            setup.ctx,
            "fast params",
            16,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )?;
        setup.ctx.queue.write_buffer(
            params.buffer(),
            0,
            bytemuck::bytes_of(&FastParams {
                threshold: f32::from(self.opts.threshold) / 255.0,
                _pad: [0.0; 3],
            }),
        );
        self.params = Some(params);

        let row_bytes = setup.width * 4;
        self.response_ring = Some(ReadbackRing::new(
            setup.ctx,
            "fast response",
            2,
            row_bytes,
            setup.height,
        )?);
        self.gray_ring = Some(ReadbackRing::new(
            setup.ctx,
            "feature gray",
            2,
            row_bytes,
            setup.height,
        )?);

        let mut prev: Vec<Descriptor> = Vec::new();
        self.worker = Some(
            DetectorWorker::spawn("features", move |job| {
                run_feature_job(&mut prev, job)
            })
            .map_err(|e| {
                ArError::new(
                    ErrorCode::PluginInitFailed,
                    format!("feature worker spawn failed: {e}"),
                )
            })?,
        );
        Ok(())
    }

    fn encode(&mut self, frame: &mut FrameInputs<'_>) -> Result<(), ArError> {
        if self.worker.as_ref().is_some_and(DetectorWorker::busy) {
            return Ok(());
        }
        let (Some(kernel), Some(params), Some(tex)) =
            (&self.kernel, &self.params, &self.response_tex)
        else {
            return Ok(());
        };

        let grid = kernel.grid_for(self.width, self.height);
        frame.backend.encode(
            frame.ctx,
            frame.encoder,
            kernel,
            &[
                Binding::StorageTexture(tex.view()),
                Binding::Texture(frame.preprocess.gray().view()),
                Binding::uniform(params.buffer()),
            ],
            grid,
        )?;

        if let Some(ring) = self.response_ring.as_mut() {
            if let Some(slot) = ring.try_acquire() {
                ring.encode_copy(frame.encoder, tex.texture(), slot);
                self.staged_response = Some(ring.ticket(slot));
            }
        }
        if let Some(ring) = self.gray_ring.as_mut() {
            if let Some(slot) = ring.try_acquire() {
                ring.encode_copy(
                    frame.encoder,
                    frame.preprocess.gray().texture(),
                    slot,
                );
                self.staged_gray = Some(ring.ticket(slot));
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

        match (self.staged_response.take(), self.staged_gray.take()) {
            (Some(response), Some(gray)) => {
                let job = FeatureJob {
                    device: ctx.device.clone(),
                    response,
                    gray,
                    width: self.width,
                    height: self.height,
                    opts: self.opts.clone(),
                    timestamp_us,
                };
                if !worker.try_submit(job) {
                    log::debug!("feature job refused (worker busy)");
                }
            }
            (Some(t), None) | (None, Some(t)) => t.discard(),
            (None, None) => {}
        }

        if let Some(result) = worker.latest() {
            let fresh = result.timestamp_us > self.last_result_us;
            if fresh {
                self.last_result_us = result.timestamp_us;
                if let Some(err) = result.error {
                    out.events.push(ArEvent::Error(err));
                    self.last_features = FeatureSet::default();
                } else {
                    self.last_features = result.features;
                }
            }
            let mut features = self.last_features.clone();
            features.stale = !fresh;
            out.features = Some(features);
        } else {
            out.features = Some(FeatureSet::default());
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
        if let Some(t) = self.staged_response.take() {
            t.discard();
        }
        if let Some(t) = self.staged_gray.take() {
            t.discard();
        }
        self.kernel = None;
        self.params = None;
        self.response_tex = None;
        self.response_ring = None;
        self.gray_ring = None;
    }
}
