//! Constant-velocity Kalman filter for pose position smoothing.
//!
//! State is `(x, y, z, vx, vy, vz)`; the measurement is the raw solver
//! position. Process and measurement noise are scalar configuration
//! constants applied isotropically.

use glam::Vec3;

use crate::math::linalg;

const N: usize = 6;
const M: usize = 3;

/// Six-state constant-velocity filter.
#[derive(Debug, Clone)]
pub struct ConstantVelocityFilter {
    /// State estimate `(position, velocity)`.
    x: [f64; N],
    /// State covariance, row-major 6x6.
    p: Vec<f64>,
    process_noise: f64,
    measurement_noise: f64,
    last_us: Option<u64>,
}

impl ConstantVelocityFilter {
    /// Filter with the given scalar noise constants.
    #[must_use]
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        let mut p = vec![0.0; N * N];
        for i in 0..N {
            p[i * N + i] = 1.0;
        }
        Self {
            x: [0.0; N],
            p,
            process_noise: f64::from(process_noise.max(1e-6)),
            measurement_noise: f64::from(measurement_noise.max(1e-6)),
            last_us: None,
        }
    }

    /// Current smoothed position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x[0] as f32, self.x[1] as f32, self.x[2] as f32)
    }

    /// Current velocity estimate.
    #[must_use]
    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.x[3] as f32, self.x[4] as f32, self.x[5] as f32)
    }

    /// Predict-and-correct with a new measurement at `now_us`.
    ///
    /// The first call seeds the state directly. Returns the smoothed
    /// position.
    pub fn update(&mut self, measurement: Vec3, now_us: u64) -> Vec3 {
        let Some(last) = self.last_us else {
            self.x[0] = f64::from(measurement.x);
            self.x[1] = f64::from(measurement.y);
            self.x[2] = f64::from(measurement.z);
            self.last_us = Some(now_us);
            return measurement;
        };
        let dt = (now_us.saturating_sub(last) as f64 / 1e6).max(1e-4);
        self.last_us = Some(now_us);

        self.predict(dt);
        self.correct(measurement);
        self.position()
    }

    fn predict(&mut self, dt: f64) {
        // x' = F x with F = [I dt*I; 0 I]
        for i in 0..3 {
            self.x[i] += dt * self.x[i + 3];
        }

        // P' = F P F^T + Q
        let mut f = vec![0.0; N * N];
        for i in 0..N {
            f[i * N + i] = 1.0;
        }
        for i in 0..3 {
            f[i * N + i + 3] = dt;
        }
        let ft = linalg::transpose(&f, N, N);
        let fp = linalg::mat_mul(&f, &self.p, N, N, N);
        self.p = linalg::mat_mul(&fp, &ft, N, N, N);
        // Discrete white-noise acceleration, diagonal approximation.
        let q_pos = self.process_noise * dt * dt;
        let q_vel = self.process_noise * dt;
        for i in 0..3 {
            self.p[i * N + i] += q_pos;
            self.p[(i + 3) * N + (i + 3)] += q_vel;
        }
    }

    fn correct(&mut self, z: Vec3) {
        // Innovation y = z - H x, with H = [I3 0]
        let y = [
            f64::from(z.x) - self.x[0],
            f64::from(z.y) - self.x[1],
            f64::from(z.z) - self.x[2],
        ];

        // S = H P H^T + R is the top-left 3x3 block of P plus R.
        let mut s = vec![0.0; M * M];
        for r in 0..M {
            for c in 0..M {
                s[r * M + c] = self.p[r * N + c];
            }
            s[r * M + r] += self.measurement_noise;
        }
        let Some(s_inv) = linalg::invert(&s, M) else {
            return;
        };

        // K = P H^T S^-1 (6x3)
        let mut pht = vec![0.0; N * M];
        for r in 0..N {
            for c in 0..M {
                pht[r * M + c] = self.p[r * N + c];
            }
        }
        let k = linalg::mat_mul(&pht, &s_inv, N, M, M);

        // x += K y
        for r in 0..N {
            let mut acc = 0.0;
            for c in 0..M {
                acc += k[r * M + c] * y[c];
            }
            self.x[r] += acc;
        }

        // P = (I - K H) P. With H = [I3 0], K H is the 6x3 block of K
        // widened with zeros.
        let mut kh = vec![0.0; N * N];
        for r in 0..N {
            for c in 0..M {
                kh[r * N + c] = k[r * M + c];
            }
        }
        let mut i_kh = vec![0.0; N * N];
        for i in 0..N {
            i_kh[i * N + i] = 1.0;
        }
        for i in 0..N * N {
            i_kh[i] -= kh[i];
        }
        self.p = linalg::mat_mul(&i_kh, &self.p, N, N, N);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_seeds_state() {
        let mut f = ConstantVelocityFilter::new(0.01, 0.05);
        let p = f.update(Vec3::new(1.0, 2.0, 3.0), 0);
        assert_eq!(p, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(f.velocity(), Vec3::ZERO);
    }

    #[test]
    fn converges_to_stationary_measurement() {
        let mut f = ConstantVelocityFilter::new(0.01, 0.05);
        let target = Vec3::new(0.5, -0.25, 1.5);
        let mut t = 0u64;
        let mut last = Vec3::ZERO;
        for _ in 0..60 {
            last = f.update(target, t);
            t += 33_000;
        }
        assert!((last - target).length() < 1e-3);
        assert!(f.velocity().length() < 0.05);
    }

    #[test]
    fn tracks_constant_velocity_motion() {
        let mut f = ConstantVelocityFilter::new(0.05, 0.01);
        // Target moves +0.1 m/s along x, sampled at 50 Hz.
        let mut t = 0u64;
        for i in 0..100 {
            let x = 0.1 * (i as f32) * 0.02;
            let _ = f.update(Vec3::new(x, 0.0, 1.0), t);
            t += 20_000;
        }
        let v = f.velocity();
        assert!((v.x - 0.1).abs() < 0.03, "vx was {}", v.x);
        assert!(v.y.abs() < 0.01 && v.z.abs() < 0.01);
    }

    #[test]
    fn smooths_noisy_measurements() {
        use rand::Rng as _;
        use rand::SeedableRng as _;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut f = ConstantVelocityFilter::new(0.001, 0.1);
        let target = Vec3::new(0.0, 0.0, 2.0);
        let mut t = 0u64;
        let mut last = Vec3::ZERO;
        for _ in 0..200 {
            let noise = Vec3::new(
                rng.random_range(-0.05..0.05),
                rng.random_range(-0.05..0.05),
                rng.random_range(-0.05..0.05),
            );
            last = f.update(target + noise, t);
            t += 33_000;
        }
        // The filtered estimate sits well inside the noise band.
        assert!((last - target).length() < 0.03);
    }
}
