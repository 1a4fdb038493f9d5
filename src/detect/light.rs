//! Ambient light estimation.
//!
//! The camera frame is reduced to a small grid of tile-mean colors on
//! the GPU; the CPU side averages the grid into an ambient intensity and
//! a correlated color temperature (McCamy's approximation). The readback
//! ring is double-buffered so CPU consumption of one estimate overlaps
//! the next frame's copy.

use bytemuck::{Pod, Zeroable};

use crate::error::{ArError, ErrorCode};
use crate::events::ArEvent;
use crate::frame::LightEstimate;
use crate::gpu::backend::{Binding, Kernel, KernelDescriptor};
use crate::gpu::context::GpuContext;
use crate::gpu::readback::{ReadbackRing, ReadbackTicket};
use crate::gpu::resources::{TrackedBuffer, TrackedTexture};

use super::worker::DetectorWorker;
use super::{DetectorPlugin, FrameInputs, FrameOutputs, PluginSetup};

const LUMINANCE_SRC: &str =
    include_str!("../../assets/shaders/compute/luminance.wgsl");

/// Tile grid edge length.
const GRID: u32 = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TileParams {
    tile_size: u32,
    _pad: [u32; 3],
}

/// Reduce mean linear RGB to an estimate.
///
/// Intensity is Rec. 601 luminance; color temperature uses McCamy's
/// CCT approximation from CIE 1931 chromaticity.
#[must_use]
fn estimate_from_mean(r: f64, g: f64, b: f64) -> LightEstimate {
    let intensity = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 1.0);

    // sRGB primaries to XYZ.
    let x = 0.4124 * r + 0.3576 * g + 0.1805 * b;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = 0.0193 * r + 0.1192 * g + 0.9505 * b;
    let sum = x + y + z;
    let color_temperature_k = if sum < 1e-9 {
        6500.0
    } else {
        let cx = x / sum;
        let cy = y / sum;
        let n = (cx - 0.3320) / (0.1858 - cy);
        let cct = 449.0 * n.powi(3) + 3525.0 * n.powi(2) + 6823.3 * n + 5520.33;
        cct.clamp(1000.0, 20000.0)
    };

    LightEstimate {
        intensity: intensity as f32,
        color_temperature_k: color_temperature_k as f32,
        stale: false,
    }
}

struct LightJob {
    device: wgpu::Device,
    ticket: ReadbackTicket,
    tiles_x: u32,
    tiles_y: u32,
    timestamp_us: u64,
}

#[derive(Clone, Default)]
struct LightJobResult {
    estimate: Option<LightEstimate>,
    timestamp_us: u64,
    error: Option<ArError>,
}

fn run_light_job(job: LightJob) -> LightJobResult {
    let mut result = LightJobResult {
        timestamp_us: job.timestamp_us,
        ..Default::default()
    };
    let bytes = match job.ticket.resolve(&job.device) {
        Ok(b) => b,
        Err(e) => {
            result.error = Some(e);
            return result;
        }
    };
    let mut acc = [0.0f64; 3];
    let mut count = 0u32;
    for tile in bytes.chunks_exact(16).take((job.tiles_x * job.tiles_y) as usize)
    {
        let r = f32::from_le_bytes([tile[0], tile[1], tile[2], tile[3]]);
        let g = f32::from_le_bytes([tile[4], tile[5], tile[6], tile[7]]);
        let b = f32::from_le_bytes([tile[8], tile[9], tile[10], tile[11]]);
        acc[0] += f64::from(r);
        acc[1] += f64::from(g);
        acc[2] += f64::from(b);
        count += 1;
    }
    if count > 0 {
        let inv = 1.0 / f64::from(count);
        result.estimate =
            Some(estimate_from_mean(acc[0] * inv, acc[1] * inv, acc[2] * inv));
    }
    result
}

/// The light estimation plugin.
pub struct LightEstimatorPlugin {
    enabled: bool,
    kernel: Option<Kernel>,
    params: Option<TrackedBuffer>,
    tiles: Option<TrackedTexture>,
    ring: Option<ReadbackRing>,
    worker: Option<DetectorWorker<LightJob, LightJobResult>>,
    staged: Option<ReadbackTicket>,
    tiles_x: u32,
    tiles_y: u32,
    last_result_us: u64,
    last_estimate: Option<LightEstimate>,
}

impl LightEstimatorPlugin {
    /// Plugin with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            kernel: None,
            params: None,
            tiles: None,
            ring: None,
            worker: None,
            staged: None,
            tiles_x: 0,
            tiles_y: 0,
            last_result_us: 0,
            last_estimate: None,
        }
    }
}

impl Default for LightEstimatorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorPlugin for LightEstimatorPlugin {
    fn name(&self) -> &'static str {
        "light"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn initialize(&mut self, setup: &mut PluginSetup<'_>) -> Result<(), ArError> {
        self.enabled = setup.options.light.enabled;
        if !self.enabled {
            return Ok(());
        }

        let tile_size = setup.width.max(setup.height).div_ceil(GRID).max(1);
        self.tiles_x = setup.width.div_ceil(tile_size);
        self.tiles_y = setup.height.div_ceil(tile_size);

        self.tiles = Some(TrackedTexture::new(
            setup.ctx,
            "light tiles",
            self.tiles_x,
            self.tiles_y,
            wgpu::TextureFormat::Rgba32Float,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
        )?);
        self.kernel = Some(setup.backend.create_kernel(
            setup.ctx,
            setup.composer,
            &KernelDescriptor {
                label: "light tiles",
                source: LUMINANCE_SRC,
                entry_point: "main",
            },
        )?);
        let params = TrackedBuffer::new(
            setup.ctx,
            "light params",
            16,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )?;
        setup.ctx.queue.write_buffer(
            params.buffer(),
            0,
            bytemuck::bytes_of(&TileParams {
                tile_size,
                _pad: [0; 3],
            }),
        );
        self.params = Some(params);

        // Double-buffered: one slot resolving on the worker while the
        // next frame's copy lands in the other.
        self.ring = Some(ReadbackRing::new(
            setup.ctx,
            "light tiles",
            2,
            self.tiles_x * 16,
            self.tiles_y,
        )?);

        self.worker = Some(
            DetectorWorker::spawn("light", run_light_job).map_err(|e| {
                ArError::new(
                    ErrorCode::PluginInitFailed,
                    format!("light worker spawn failed: {e}"),
                )
            })?,
        );
        Ok(())
    }

    fn encode(&mut self, frame: &mut FrameInputs<'_>) -> Result<(), ArError> {
        if !self.enabled {
            return Ok(());
        }
        if self.worker.as_ref().is_some_and(DetectorWorker::busy) {
            return Ok(());
        }
        let (Some(kernel), Some(params), Some(tiles)) =
            (&self.kernel, &self.params, &self.tiles)
        else {
            return Ok(());
        };

        frame.backend.encode(
            frame.ctx,
            frame.encoder,
            kernel,
            &[
                Binding::StorageTexture(tiles.view()),
                Binding::Texture(frame.camera_view),
                Binding::uniform(params.buffer()),
            ],
            kernel.grid_for(self.tiles_x, self.tiles_y),
        )?;

        if let Some(ring) = self.ring.as_mut() {
            if let Some(slot) = ring.try_acquire() {
                ring.encode_copy(frame.encoder, tiles.texture(), slot);
                self.staged = Some(ring.ticket(slot));
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
        if !self.enabled {
            return Ok(());
        }
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };

        if let Some(ticket) = self.staged.take() {
            let job = LightJob {
                device: ctx.device.clone(),
                ticket,
                tiles_x: self.tiles_x,
                tiles_y: self.tiles_y,
                timestamp_us,
            };
            if !worker.try_submit(job) {
                log::debug!("light job refused (worker busy)");
            }
        }

        if let Some(result) = worker.latest() {
            let fresh = result.timestamp_us > self.last_result_us;
            if fresh {
                self.last_result_us = result.timestamp_us;
                if let Some(err) = result.error {
                    out.events.push(ArEvent::Error(err));
                } else if let Some(estimate) = result.estimate {
                    self.last_estimate = Some(estimate);
                    out.events.push(ArEvent::LightUpdated(estimate));
                }
            }
            out.light = self.last_estimate.map(|mut e| {
                e.stale = !fresh;
                e
            });
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
        if let Some(t) = self.staged.take() {
            t.discard();
        }
        self.kernel = None;
        self.params = None;
        self.tiles = None;
        self.ring = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_gray_is_mid_intensity_near_d65() {
        let e = estimate_from_mean(0.5, 0.5, 0.5);
        assert!((e.intensity - 0.5).abs() < 1e-3);
        assert!(
            (5500.0..8000.0).contains(&e.color_temperature_k),
            "cct {}",
            e.color_temperature_k
        );
    }

    #[test]
    fn warm_light_reads_below_neutral_temperature() {
        let warm = estimate_from_mean(0.8, 0.5, 0.2);
        let cool = estimate_from_mean(0.2, 0.5, 0.9);
        assert!(warm.color_temperature_k < cool.color_temperature_k);
    }

    #[test]
    fn black_frame_has_zero_intensity() {
        let e = estimate_from_mean(0.0, 0.0, 0.0);
        assert_eq!(e.intensity, 0.0);
    }
}
