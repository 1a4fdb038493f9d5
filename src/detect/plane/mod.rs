//! Plane detection and tracking.
//!
//! The host supplies a 3-D point cloud (unprojected depth or external
//! reconstruction) through [`DetectorPlugin::supply_points`]. On a
//! native compute backend the RANSAC trials run as one dispatch and the
//! candidate buffer is read back; the emulation backend cannot express
//! the storage-buffer output, so the whole stage runs on the CPU inside
//! the worker. Candidates are deduplicated, given boundaries, and
//! matched to tracked planes with confidence smoothing and a two-second
//! expiry.

/// Boundary polygons and the freshness cache.
pub mod boundary;
/// CPU RANSAC reference implementation.
pub mod ransac;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::error::{ArError, ErrorCode};
use crate::events::ArEvent;
use crate::frame::{DetectedPlane, PlaneOrientation};
use crate::gpu::backend::{
    BackendKind, Binding, Kernel, KernelDescriptor,
};
use crate::gpu::context::GpuContext;
use crate::gpu::readback::{ReadbackRing, ReadbackTicket};
use crate::gpu::resources::TrackedBuffer;
use crate::options::PlaneOptions;
use crate::track::{Track, TrackTransition, TrackerParams};

use self::boundary::BoundaryCache;
use self::ransac::PlaneCandidate;

use super::worker::DetectorWorker;
use super::{DetectorPlugin, FrameInputs, FrameOutputs, PluginSetup};

const RANSAC_SRC: &str =
    include_str!("../../../assets/shaders/compute/ransac.wgsl");

/// Largest point cloud uploaded to the GPU per frame.
pub const MAX_POINTS: usize = 16_384;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RansacParams {
    point_count: u32,
    trial_count: u32,
    has_normals: u32,
    seed: u32,
    distance_threshold: f32,
    normal_cos_min: f32,
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuPlaneCandidate {
    plane: [f32; 4],
    centroid: [f32; 4],
    inliers: u32,
    score: f32,
    _pad: [u32; 2],
}

/// A point cloud supplied for one or more frames.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    /// Points in camera/world space (meters).
    pub points: Vec<Vec3>,
    /// Optional per-point normals.
    pub normals: Option<Vec<Vec3>>,
}

#[derive(Clone)]
struct PlaneObservation {
    candidate: PlaneCandidate,
    boundary: Option<Vec<Vec3>>,
    area: f32,
}

struct PlaneJob {
    device: Option<wgpu::Device>,
    ticket: Option<ReadbackTicket>,
    cloud: Arc<PointCloud>,
    opts: PlaneOptions,
    seed: u64,
    timestamp_us: u64,
}

#[derive(Clone, Default)]
struct PlaneJobResult {
    observations: Vec<PlaneObservation>,
    timestamp_us: u64,
    error: Option<ArError>,
}

fn run_plane_job(cache: &mut BoundaryCache, job: PlaneJob) -> PlaneJobResult {
    let mut result = PlaneJobResult {
        timestamp_us: job.timestamp_us,
        ..Default::default()
    };

    let candidates: Vec<PlaneCandidate> = match (job.ticket, job.device) {
        (Some(ticket), Some(device)) => match ticket.resolve(&device) {
            Ok(bytes) => {
                let records: &[GpuPlaneCandidate] =
                    bytemuck::cast_slice(&bytes);
                records
                    .iter()
                    .filter(|r| r.inliers > 0)
                    .map(|r| PlaneCandidate {
                        normal: Vec3::new(r.plane[0], r.plane[1], r.plane[2]),
                        d: r.plane[3],
                        centroid: Vec3::new(
                            r.centroid[0],
                            r.centroid[1],
                            r.centroid[2],
                        ),
                        inliers: r.inliers,
                        score: r.score,
                    })
                    .collect()
            }
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        },
        _ => ransac::plane_candidates(
            &job.cloud.points,
            job.cloud.normals.as_deref(),
            &job.opts,
            job.seed,
        ),
    };

    let selected = ransac::select_planes(candidates, &job.opts);
    for candidate in selected {
        let inliers = ransac::inlier_points(
            &job.cloud.points,
            &candidate,
            job.opts.distance_threshold,
        );
        let bound = cache.get_or_compute(
            candidate.normal,
            candidate.d,
            job.timestamp_us,
            &inliers,
        );
        result.observations.push(PlaneObservation {
            candidate,
            area: bound.area,
            boundary: if bound.polygon.is_empty() {
                None
            } else {
                Some(bound.polygon)
            },
        });
    }
    cache.evict_older_than(job.timestamp_us);
    result
}

struct PlaneTrackEntry {
    track: Track,
    exported: DetectedPlane,
}

struct GpuRansac {
    kernel: Kernel,
    points: TrackedBuffer,
    normals: TrackedBuffer,
    params: TrackedBuffer,
    candidates: TrackedBuffer,
    ring: ReadbackRing,
}

/// The plane detection plugin.
pub struct PlaneDetectorPlugin {
    opts: PlaneOptions,
    tracker_params: TrackerParams,
    gpu: Option<GpuRansac>,
    worker: Option<DetectorWorker<PlaneJob, PlaneJobResult>>,
    input: Option<Arc<PointCloud>>,
    input_dirty: bool,
    staged: Option<(ReadbackTicket, Arc<PointCloud>)>,
    tracks: FxHashMap<u32, PlaneTrackEntry>,
    next_id: u32,
    last_result_us: u64,
}

impl PlaneDetectorPlugin {
    /// Plugin with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            opts: PlaneOptions::default(),
            tracker_params: TrackerParams::default(),
            gpu: None,
            worker: None,
            input: None,
            input_dirty: false,
            staged: None,
            tracks: FxHashMap::default(),
            next_id: 0,
            last_result_us: 0,
        }
    }

    fn observe(
        &mut self,
        obs: &PlaneObservation,
        now_us: u64,
        out: &mut FrameOutputs,
    ) {
        let normal = obs.candidate.normal.normalize_or_zero();
        if normal == Vec3::ZERO {
            return;
        }
        let measured_confidence = (obs.candidate.inliers as f32
            / self.opts.min_inliers.max(1) as f32)
            .clamp(0.0, 1.0);

        // Match against tracked planes by normal similarity and offset.
        let matched_id = self
            .tracks
            .iter()
            .find(|(_, entry)| {
                entry.exported.normal.dot(normal).abs() > 0.9
                    && (entry.exported.d - obs.candidate.d).abs() < 0.15
            })
            .map(|(id, _)| *id);

        if let Some(id) = matched_id {
            if let Some(entry) = self.tracks.get_mut(&id) {
                let transition = entry.track.observe(
                    now_us,
                    measured_confidence,
                    &self.tracker_params,
                );
                entry.exported = DetectedPlane {
                    id,
                    normal,
                    d: obs.candidate.d,
                    centroid: obs.candidate.centroid,
                    inliers: obs.candidate.inliers,
                    area: obs.area,
                    orientation: PlaneOrientation::classify(normal.y),
                    confidence: entry.track.confidence(),
                    last_seen_us: now_us,
                    boundary: obs.boundary.clone(),
                    state: entry.track.state(),
                    stale: false,
                };
                match transition {
                    TrackTransition::Detected => out
                        .events
                        .push(ArEvent::PlaneDetected(entry.exported.clone())),
                    TrackTransition::Updated => out
                        .events
                        .push(ArEvent::PlaneUpdated(entry.exported.clone())),
                    _ => {}
                }
            }
        } else {
            let id = self.next_id;
            self.next_id += 1;
            let mut track = Track::new(now_us, measured_confidence);
            let transition = track.force_confirm();
            let exported = DetectedPlane {
                id,
                normal,
                d: obs.candidate.d,
                centroid: obs.candidate.centroid,
                inliers: obs.candidate.inliers,
                area: obs.area,
                orientation: PlaneOrientation::classify(normal.y),
                confidence: track.confidence(),
                last_seen_us: now_us,
                boundary: obs.boundary.clone(),
                state: track.state(),
                stale: false,
            };
            if transition == TrackTransition::Detected {
                out.events.push(ArEvent::PlaneDetected(exported.clone()));
            }
            let _ = self
                .tracks
                .insert(id, PlaneTrackEntry { track, exported });
        }
    }

    fn expire(&mut self, seen: &[u32], now_us: u64, out: &mut FrameOutputs) {
        let mut removed = Vec::new();
        for (id, entry) in &mut self.tracks {
            if seen.contains(id) {
                continue;
            }
            match entry.track.tick(now_us, true, &self.tracker_params) {
                // Planes have no user-visible lost state: crossing the
                // expiry removes them outright.
                TrackTransition::Lost | TrackTransition::Removed => {
                    removed.push(*id);
                }
                _ => entry.exported.confidence = entry.track.confidence(),
            }
        }
        for id in removed {
            let _ = self.tracks.remove(&id);
            out.events.push(ArEvent::PlaneRemoved { id });
        }
    }

    fn apply_result(
        &mut self,
        result: &PlaneJobResult,
        timestamp_us: u64,
        out: &mut FrameOutputs,
    ) {
        let fresh = result.timestamp_us > self.last_result_us;
        if fresh {
            self.last_result_us = result.timestamp_us;
            if let Some(err) = &result.error {
                out.events.push(ArEvent::Error(err.clone()));
            } else {
                let mut seen = Vec::new();
                for obs in result.observations.clone() {
                    self.observe(&obs, timestamp_us, out);
                }
                // The ids seen this round are those updated at now_us.
                for (id, entry) in &self.tracks {
                    if entry.track.last_update_us() == timestamp_us {
                        seen.push(*id);
                    }
                }
                self.expire(&seen, timestamp_us, out);
            }
        }

        let mut export: Vec<DetectedPlane> = self
            .tracks
            .values()
            .map(|e| {
                let mut p = e.exported.clone();
                p.stale = !fresh;
                p
            })
            .collect();
        export.sort_by_key(|p| p.id);
        out.planes = Some(export);
    }
}

impl Default for PlaneDetectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorPlugin for PlaneDetectorPlugin {
    fn name(&self) -> &'static str {
        "planes"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn initialize(&mut self, setup: &mut PluginSetup<'_>) -> Result<(), ArError> {
        self.opts = setup.options.plane.clone();
        self.tracker_params = TrackerParams {
            confirm_updates: 1,
            lost_after_us: self.opts.expiry_ms * 1000,
            removed_after_us: 0,
            alpha: setup.options.tracking.confidence_alpha,
        };

        if setup.backend.kind() == BackendKind::NativeCompute {
            let kernel = setup.backend.create_kernel(
                setup.ctx,
                setup.composer,
                &KernelDescriptor {
                    label: "plane ransac",
                    source: RANSAC_SRC,
                    entry_point: "main",
                },
            )?;
            let storage =
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
            let points = TrackedBuffer::new(
                setup.ctx,
                "ransac points",
                (MAX_POINTS * 16) as u64,
                storage,
            )?;
            let normals = TrackedBuffer::new(
                setup.ctx,
                "ransac normals",
                (MAX_POINTS * 16) as u64,
                storage,
            )?;
            let params = TrackedBuffer::new(
                setup.ctx,
                "ransac params",
                32,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            )?;
            let candidate_bytes = u64::from(self.opts.iterations) * 48;
            let candidates = TrackedBuffer::new(
                setup.ctx,
                "ransac candidates",
                candidate_bytes,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            )?;
            let ring = ReadbackRing::new(
                setup.ctx,
                "ransac candidates",
                2,
                candidate_bytes as u32,
                1,
            )?;
            self.gpu = Some(GpuRansac {
                kernel,
                points,
                normals,
                params,
                candidates,
                ring,
            });
        } else {
            log::info!(
                "plane RANSAC falls back to CPU: {}",
                crate::gpu::backend::RasterEmulationBackend::
                    unsupported_buffer_kernel("plane ransac")
            );
        }

        let mut cache = BoundaryCache::new(self.opts.boundary_cache_ms * 1000);
        self.worker = Some(
            DetectorWorker::spawn("planes", move |job| {
                run_plane_job(&mut cache, job)
            })
            .map_err(|e| {
                ArError::new(
                    ErrorCode::PluginInitFailed,
                    format!("plane worker spawn failed: {e}"),
                )
            })?,
        );
        Ok(())
    }

    fn encode(&mut self, frame: &mut FrameInputs<'_>) -> Result<(), ArError> {
        if self.worker.as_ref().is_some_and(DetectorWorker::busy) {
            return Ok(());
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        let (Some(cloud), true) = (&self.input, self.input_dirty) else {
            return Ok(());
        };

        let count = cloud.points.len().min(MAX_POINTS);
        if count < 3 {
            return Ok(());
        }
        let packed: Vec<[f32; 4]> = cloud.points[..count]
            .iter()
            .map(|p| [p.x, p.y, p.z, 0.0])
            .collect();
        frame.ctx.queue.write_buffer(
            gpu.points.buffer(),
            0,
            bytemuck::cast_slice(&packed),
        );
        let has_normals = match &cloud.normals {
            Some(ns) if ns.len() >= count => {
                let packed_n: Vec<[f32; 4]> = ns[..count]
                    .iter()
                    .map(|n| [n.x, n.y, n.z, 0.0])
                    .collect();
                frame.ctx.queue.write_buffer(
                    gpu.normals.buffer(),
                    0,
                    bytemuck::cast_slice(&packed_n),
                );
                1
            }
            _ => 0,
        };
        frame.ctx.queue.write_buffer(
            gpu.params.buffer(),
            0,
            bytemuck::bytes_of(&RansacParams {
                point_count: count as u32,
                trial_count: self.opts.iterations,
                has_normals,
                seed: (frame.timestamp_us & 0xffff_ffff) as u32,
                distance_threshold: self.opts.distance_threshold,
                normal_cos_min: self
                    .opts
                    .normal_threshold_deg
                    .to_radians()
                    .cos(),
                _pad: [0.0; 2],
            }),
        );

        frame.backend.encode(
            frame.ctx,
            frame.encoder,
            &gpu.kernel,
            &[
                Binding::storage(gpu.candidates.buffer()),
                Binding::storage_read(gpu.points.buffer()),
                Binding::storage_read(gpu.normals.buffer()),
                Binding::uniform(gpu.params.buffer()),
            ],
            (self.opts.iterations.div_ceil(64).max(1), 1, 1),
        )?;

        if let Some(slot) = gpu.ring.try_acquire() {
            let size = u64::from(self.opts.iterations) * 48;
            gpu.ring.encode_copy_buffer(
                frame.encoder,
                gpu.candidates.buffer(),
                size,
                slot,
            );
            self.staged = Some((gpu.ring.ticket(slot), Arc::clone(cloud)));
            self.input_dirty = false;
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

        let job = if let Some((ticket, cloud)) = self.staged.take() {
            Some(PlaneJob {
                device: Some(ctx.device.clone()),
                ticket: Some(ticket),
                cloud,
                opts: self.opts.clone(),
                seed: timestamp_us,
                timestamp_us,
            })
        } else if self.gpu.is_none() && self.input_dirty {
            self.input.as_ref().map(|cloud| {
                self.input_dirty = false;
                PlaneJob {
                    device: None,
                    ticket: None,
                    cloud: Arc::clone(cloud),
                    opts: self.opts.clone(),
                    seed: timestamp_us,
                    timestamp_us,
                }
            })
        } else {
            None
        };
        if let Some(job) = job {
            if !worker.try_submit(job) {
                log::debug!("plane job refused (worker busy)");
            }
        }

        if let Some(result) = worker.latest() {
            self.apply_result(&result, timestamp_us, out);
        } else if !self.tracks.is_empty() || self.input.is_some() {
            out.planes = Some(Vec::new());
        }
        Ok(())
    }

    fn busy(&self) -> bool {
        self.worker.as_ref().is_some_and(DetectorWorker::busy)
    }

    fn supply_points(
        &mut self,
        points: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
    ) {
        self.input = Some(Arc::new(PointCloud { points, normals }));
        self.input_dirty = true;
    }

    fn destroy(&mut self, _ctx: &GpuContext) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.shutdown(web_time::Duration::from_secs(1));
        }
        if let Some((t, _)) = self.staged.take() {
            t.discard();
        }
        self.gpu = None;
        self.tracks.clear();
        self.input = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor_cloud() -> Arc<PointCloud> {
        use rand::Rng as _;
        use rand::SeedableRng as _;
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let points = (0..5000)
            .map(|i| {
                let x = rng.random_range(-2.0..2.0);
                let z = rng.random_range(-2.0..2.0);
                if i % 10 == 0 {
                    Vec3::new(x, rng.random_range(-2.0..2.0), z)
                } else {
                    let n: f32 = (0..3)
                        .map(|_| rng.random_range(-0.01..0.01))
                        .sum::<f32>()
                        / 3.0;
                    Vec3::new(x, n, z)
                }
            })
            .collect();
        Arc::new(PointCloud {
            points,
            normals: None,
        })
    }

    #[test]
    fn cpu_job_finds_one_horizontal_plane() {
        let mut cache = BoundaryCache::new(1_000_000);
        let result = run_plane_job(
            &mut cache,
            PlaneJob {
                device: None,
                ticket: None,
                cloud: floor_cloud(),
                opts: PlaneOptions::default(),
                seed: 4,
                timestamp_us: 1,
            },
        );
        assert!(result.error.is_none());
        assert_eq!(result.observations.len(), 1);
        let obs = &result.observations[0];
        let n = obs.candidate.normal;
        let n = if n.y < 0.0 { -n } else { n };
        assert!((n - Vec3::Y).length() < 0.01);
        assert!(obs.candidate.d.abs() < 0.02);
        assert!(obs.boundary.is_some());
        assert!(obs.area > 3.0);
    }

    #[test]
    fn tracking_assigns_stable_ids_and_expires() {
        let mut plugin = PlaneDetectorPlugin::new();
        plugin.tracker_params = TrackerParams {
            confirm_updates: 1,
            lost_after_us: 2_000_000,
            removed_after_us: 0,
            alpha: 0.3,
        };
        let obs = PlaneObservation {
            candidate: PlaneCandidate {
                normal: Vec3::Y,
                d: 0.0,
                centroid: Vec3::ZERO,
                inliers: 500,
                score: 400.0,
            },
            boundary: None,
            area: 1.0,
        };

        let mut out = FrameOutputs::default();
        plugin.observe(&obs, 1_000, &mut out);
        assert_eq!(plugin.tracks.len(), 1);
        assert!(matches!(out.events[0], ArEvent::PlaneDetected(_)));

        // A near-identical observation matches the same id.
        let mut out = FrameOutputs::default();
        let mut moved = obs.clone();
        moved.candidate.d = 0.05;
        plugin.observe(&moved, 40_000, &mut out);
        assert_eq!(plugin.tracks.len(), 1);
        assert!(matches!(out.events[0], ArEvent::PlaneUpdated(_)));

        // A very different plane becomes a new id.
        let mut out = FrameOutputs::default();
        let mut wall = obs.clone();
        wall.candidate.normal = Vec3::X;
        wall.candidate.d = 1.0;
        plugin.observe(&wall, 80_000, &mut out);
        assert_eq!(plugin.tracks.len(), 2);

        // Silence past the expiry removes both.
        let mut out = FrameOutputs::default();
        plugin.expire(&[], 5_000_000, &mut out);
        assert!(plugin.tracks.is_empty());
        assert_eq!(
            out.events
                .iter()
                .filter(|e| matches!(e, ArEvent::PlaneRemoved { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn exported_planes_have_unit_normals() {
        let mut plugin = PlaneDetectorPlugin::new();
        let obs = PlaneObservation {
            candidate: PlaneCandidate {
                normal: Vec3::new(0.0, 2.0, 0.0), // deliberately unnormalized
                d: -0.5,
                centroid: Vec3::ZERO,
                inliers: 200,
                score: 100.0,
            },
            boundary: None,
            area: 0.0,
        };
        let mut out = FrameOutputs::default();
        plugin.observe(&obs, 1, &mut out);
        let plane = &plugin.tracks.values().next().unwrap().exported;
        assert!((plane.normal.length() - 1.0).abs() < 1e-6);
        assert_eq!(plane.orientation, PlaneOrientation::Horizontal);
    }
}
