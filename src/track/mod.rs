//! Temporal tracking shared by the marker and plane detectors.
//!
//! Both detectors run the same lifecycle machine over their targets:
//!
//! ```text
//! Tentative --confirm after K updates--> Tracking
//! Tracking  --no update for T us------> Lost
//! Lost      --no update for T' us-----> Removed
//! Any       --missed while expected---> lower confidence
//! ```
//!
//! Confidence is fused with an exponential moving average and poses are
//! smoothed by a constant-velocity Kalman filter plus quaternion slerp.

/// Constant-velocity Kalman filter over position and velocity.
pub mod kalman;
/// Planar pose recovery from a homography and orientation smoothing.
pub mod pose;

/// Lifecycle state of a tracked target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Seen, but not yet confirmed by enough updates.
    Tentative,
    /// Confirmed and actively tracked.
    Tracking,
    /// Expected but unseen past the loss timeout.
    Lost,
}

/// Tuning constants for the lifecycle machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerParams {
    /// Updates required to confirm a tentative target.
    pub confirm_updates: u32,
    /// Microseconds without an update before `Tracking` becomes `Lost`.
    pub lost_after_us: u64,
    /// Further microseconds without an update before removal.
    pub removed_after_us: u64,
    /// EMA factor applied to observed confidence.
    pub alpha: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            confirm_updates: 3,
            lost_after_us: 500_000,
            removed_after_us: 1_500_000,
            alpha: 0.3,
        }
    }
}

/// Transition produced by feeding the machine one frame of evidence.
///
/// Callers map these onto their event names (`marker:detected`,
/// `plane:removed`, ...). `Removed` means the caller must drop the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTransition {
    /// Nothing externally visible changed.
    None,
    /// The target was confirmed (first detection, or recovery from loss).
    Detected,
    /// A confirmed target was updated.
    Updated,
    /// A confirmed target crossed the loss timeout.
    Lost,
    /// The target aged out and must be dropped.
    Removed,
}

/// Per-target lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    state: TrackState,
    hits: u32,
    confidence: f32,
    last_update_us: u64,
}

impl Track {
    /// New tentative track from a first observation.
    #[must_use]
    pub fn new(now_us: u64, confidence: f32) -> Self {
        Self {
            state: TrackState::Tentative,
            hits: 1,
            confidence: confidence.clamp(0.0, 1.0),
            last_update_us: now_us,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Current fused confidence in `[0, 1]`.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Timestamp of the last supporting observation.
    #[must_use]
    pub fn last_update_us(&self) -> u64 {
        self.last_update_us
    }

    /// Promote a fresh track straight to `Tracking` (used when the
    /// confirmation threshold is one observation).
    #[must_use]
    pub fn force_confirm(&mut self) -> TrackTransition {
        match self.state {
            TrackState::Tentative => {
                self.state = TrackState::Tracking;
                TrackTransition::Detected
            }
            TrackState::Tracking | TrackState::Lost => TrackTransition::None,
        }
    }

    /// Feed an observation.
    #[must_use]
    pub fn observe(
        &mut self,
        now_us: u64,
        measured_confidence: f32,
        params: &TrackerParams,
    ) -> TrackTransition {
        let measured = measured_confidence.clamp(0.0, 1.0);
        self.confidence =
            params.alpha * measured + (1.0 - params.alpha) * self.confidence;
        self.last_update_us = now_us;
        self.hits += 1;

        match self.state {
            TrackState::Tentative => {
                if self.hits >= params.confirm_updates {
                    self.state = TrackState::Tracking;
                    TrackTransition::Detected
                } else {
                    TrackTransition::None
                }
            }
            TrackState::Tracking => TrackTransition::Updated,
            TrackState::Lost => {
                // Recovery counts as a fresh detection.
                self.state = TrackState::Tracking;
                TrackTransition::Detected
            }
        }
    }

    /// Advance time without an observation. `expected` means the target
    /// should have been visible this frame, which decays confidence.
    #[must_use]
    pub fn tick(
        &mut self,
        now_us: u64,
        expected: bool,
        params: &TrackerParams,
    ) -> TrackTransition {
        if expected {
            self.confidence *= 1.0 - params.alpha;
        }
        let silent = now_us.saturating_sub(self.last_update_us);
        match self.state {
            TrackState::Tentative => {
                // Tentative tracks never surfaced; drop them quietly.
                if silent >= params.lost_after_us {
                    TrackTransition::Removed
                } else {
                    TrackTransition::None
                }
            }
            TrackState::Tracking => {
                if silent >= params.lost_after_us {
                    self.state = TrackState::Lost;
                    TrackTransition::Lost
                } else {
                    TrackTransition::None
                }
            }
            TrackState::Lost => {
                if silent >= params.lost_after_us + params.removed_after_us {
                    TrackTransition::Removed
                } else {
                    TrackTransition::None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000;

    fn params() -> TrackerParams {
        TrackerParams {
            confirm_updates: 3,
            lost_after_us: 100 * MS,
            removed_after_us: 200 * MS,
            alpha: 0.3,
        }
    }

    #[test]
    fn confirms_after_k_updates() {
        let p = params();
        let mut t = Track::new(0, 0.9);
        assert_eq!(t.state(), TrackState::Tentative);
        assert_eq!(t.observe(10 * MS, 0.9, &p), TrackTransition::None);
        assert_eq!(t.observe(20 * MS, 0.9, &p), TrackTransition::Detected);
        assert_eq!(t.state(), TrackState::Tracking);
        assert_eq!(t.observe(30 * MS, 0.9, &p), TrackTransition::Updated);
    }

    #[test]
    fn loses_then_removes_on_silence() {
        let p = params();
        let mut t = Track::new(0, 1.0);
        let _ = t.observe(10 * MS, 1.0, &p);
        let _ = t.observe(20 * MS, 1.0, &p);
        assert_eq!(t.tick(50 * MS, true, &p), TrackTransition::None);
        assert_eq!(t.tick(130 * MS, true, &p), TrackTransition::Lost);
        assert_eq!(t.state(), TrackState::Lost);
        assert_eq!(t.tick(200 * MS, false, &p), TrackTransition::None);
        assert_eq!(t.tick(330 * MS, false, &p), TrackTransition::Removed);
    }

    #[test]
    fn recovery_from_lost_is_a_detection() {
        let p = params();
        let mut t = Track::new(0, 1.0);
        let _ = t.observe(10 * MS, 1.0, &p);
        let _ = t.observe(20 * MS, 1.0, &p);
        assert_eq!(t.tick(130 * MS, true, &p), TrackTransition::Lost);
        assert_eq!(t.observe(150 * MS, 0.8, &p), TrackTransition::Detected);
        assert_eq!(t.state(), TrackState::Tracking);
    }

    #[test]
    fn missed_while_expected_decays_confidence() {
        let p = params();
        let mut t = Track::new(0, 1.0);
        let before = t.confidence();
        let _ = t.tick(10 * MS, true, &p);
        assert!(t.confidence() < before);
        // Confidence stays within [0, 1].
        assert!(t.confidence() >= 0.0);
    }

    #[test]
    fn confidence_ema_moves_toward_measurement() {
        let p = params();
        let mut t = Track::new(0, 0.0);
        let _ = t.observe(MS, 1.0, &p);
        assert!((t.confidence() - 0.3).abs() < 1e-6);
        let _ = t.observe(2 * MS, 1.0, &p);
        assert!((t.confidence() - 0.51).abs() < 1e-6);
    }

    #[test]
    fn tentative_tracks_vanish_quietly() {
        let p = params();
        let mut t = Track::new(0, 0.5);
        assert_eq!(t.tick(150 * MS, false, &p), TrackTransition::Removed);
    }
}
