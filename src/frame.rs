//! Per-frame output records handed to subscribers.
//!
//! An [`ArFrame`] is assembled by the engine once per camera frame and
//! borrowed by subscribers for the duration of the callback. Texture
//! handles are reference-counted but recycled when the next frame begins;
//! subscribers must not retain them across frames.

use std::sync::Arc;

use glam::{Quat, Vec2, Vec3};

use crate::track::TrackState;

/// Decoded in-plane rotation of a marker relative to its canonical pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRotation {
    /// Pattern upright.
    R0,
    /// Rotated 90 degrees clockwise.
    R90,
    /// Rotated 180 degrees.
    R180,
    /// Rotated 270 degrees clockwise.
    R270,
}

impl MarkerRotation {
    /// Number of clockwise quarter turns (0..=3).
    #[must_use]
    pub fn quarter_turns(self) -> u32 {
        match self {
            Self::R0 => 0,
            Self::R90 => 1,
            Self::R180 => 2,
            Self::R270 => 3,
        }
    }

    /// Rotation from a quarter-turn count (wraps modulo 4).
    #[must_use]
    pub fn from_quarter_turns(turns: u32) -> Self {
        match turns % 4 {
            0 => Self::R0,
            1 => Self::R90,
            2 => Self::R180,
            _ => Self::R270,
        }
    }
}

/// A rigid pose in camera space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Translation in meters.
    pub position: Vec3,
    /// Unit rotation quaternion.
    pub rotation: Quat,
}

/// A fiducial marker with decoded id and tracked pose.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedMarker {
    /// Dictionary id of the decoded pattern.
    pub id: u32,
    /// Image-space corners, clockwise from top-left.
    pub corners: [Vec2; 4],
    /// Decoded orientation relative to the canonical pattern.
    pub rotation: MarkerRotation,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
    /// Smoothed 6-DOF pose, when intrinsics allowed solving one.
    pub pose: Option<Pose>,
    /// Tracker lifecycle state.
    pub state: TrackState,
    /// True when this record is the previous frame's completed detection.
    pub stale: bool,
}

/// Orientation class of a detected plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneOrientation {
    /// Normal within ~25 degrees of the world up axis.
    Horizontal,
    /// Normal nearly perpendicular to the up axis.
    Vertical,
    /// Everything else.
    Other,
}

impl PlaneOrientation {
    /// Classify from the y component of a unit normal.
    #[must_use]
    pub fn classify(normal_y: f32) -> Self {
        let ny = normal_y.abs();
        if ny > 0.9 {
            Self::Horizontal
        } else if ny < 0.3 {
            Self::Vertical
        } else {
            Self::Other
        }
    }
}

/// A detected and tracked planar surface.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPlane {
    /// Stable tracker id.
    pub id: u32,
    /// Unit plane normal.
    pub normal: Vec3,
    /// Signed distance to the origin (`n . x + d = 0`).
    pub d: f32,
    /// Inlier centroid.
    pub centroid: Vec3,
    /// Number of RANSAC inliers supporting the fit.
    pub inliers: u32,
    /// Estimated surface area in square meters.
    pub area: f32,
    /// Orientation class derived from the normal.
    pub orientation: PlaneOrientation,
    /// Tracker confidence in `[0, 1]`.
    pub confidence: f32,
    /// Timestamp of the last supporting observation (monotonic microseconds).
    pub last_seen_us: u64,
    /// Convex boundary polygon in 3-D, when computed.
    pub boundary: Option<Vec<Vec3>>,
    /// Tracker lifecycle state.
    pub state: TrackState,
    /// True when this record is the previous frame's completed detection.
    pub stale: bool,
}

/// A sparse image feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Image coordinate in pixels.
    pub position: Vec2,
    /// Orientation angle in radians.
    pub angle: f32,
    /// Corner response (strictly positive).
    pub response: f32,
    /// Pyramid octave the keypoint was found in.
    pub octave: u8,
}

/// A 256-bit binary descriptor over an oriented sampling pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    /// Hamming distance to another descriptor.
    #[must_use]
    pub fn hamming(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A descriptor correspondence between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    /// Index into the query (current) descriptor set.
    pub query: u32,
    /// Index into the train (previous) descriptor set.
    pub train: u32,
    /// Hamming distance of the accepted match.
    pub distance: u32,
}

/// Keypoints, descriptors, and matches for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    /// Detected keypoints after non-max suppression and capping.
    pub keypoints: Vec<Keypoint>,
    /// One descriptor per keypoint.
    pub descriptors: Vec<Descriptor>,
    /// Matches against the previous frame's descriptors.
    pub matches: Vec<FeatureMatch>,
    /// True when carried over from the previous completed detection.
    pub stale: bool,
}

/// Scene light estimate derived from downsampled luminance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEstimate {
    /// Mean scene luminance in `[0, 1]`.
    pub intensity: f32,
    /// Correlated color temperature estimate in kelvin.
    pub color_temperature_k: f32,
    /// True when carried over from the previous completed estimate.
    pub stale: bool,
}

/// The per-frame tracking record emitted to subscribers.
#[derive(Debug, Clone)]
pub struct ArFrame {
    /// Monotonic frame timestamp in microseconds.
    pub timestamp_us: u64,
    /// Frame width in pixels (matches the negotiated camera resolution).
    pub width: u32,
    /// Frame height in pixels (matches the negotiated camera resolution).
    pub height: u32,
    /// The imported camera frame texture, valid until the next frame begins.
    pub camera_texture: Option<Arc<wgpu::Texture>>,
    /// The derived grayscale texture, valid until the next frame begins.
    pub grayscale_texture: Option<Arc<wgpu::Texture>>,
    /// Tracked markers, when the marker plugin is enabled.
    pub markers: Option<Vec<TrackedMarker>>,
    /// Tracked planes, when the plane plugin is enabled.
    pub planes: Option<Vec<DetectedPlane>>,
    /// Sparse features, when the feature plugin is enabled.
    pub features: Option<FeatureSet>,
    /// Light estimate, when the light stage is enabled.
    pub light: Option<LightEstimate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_quarter_turns_round_trip() {
        for turns in 0..8 {
            let r = MarkerRotation::from_quarter_turns(turns);
            assert_eq!(r.quarter_turns(), turns % 4);
        }
    }

    #[test]
    fn orientation_classification_thresholds() {
        assert_eq!(PlaneOrientation::classify(0.95), PlaneOrientation::Horizontal);
        assert_eq!(PlaneOrientation::classify(-0.95), PlaneOrientation::Horizontal);
        assert_eq!(PlaneOrientation::classify(0.1), PlaneOrientation::Vertical);
        assert_eq!(PlaneOrientation::classify(0.5), PlaneOrientation::Other);
    }

    #[test]
    fn descriptor_hamming_counts_differing_bits() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([0b1011, 0, 1, 0]);
        assert_eq!(a.hamming(&b), 4);
        assert_eq!(b.hamming(&b), 0);
    }
}
