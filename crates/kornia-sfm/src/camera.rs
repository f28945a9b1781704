use glam::{DMat3, DQuat, DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Points closer than this to the image plane are treated as invalid.
pub(crate) const MIN_DEPTH: f64 = 1e-12;

/// Rigid transform from world to camera coordinates, `x_c = R x_w + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3 {
    /// Rotation from world to camera.
    pub rotation: DQuat,
    /// Translation from world to camera.
    pub translation: DVec3,
}

impl Default for Pose3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose3 {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a pose from a world-to-camera rotation and translation.
    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    /// Pose of a camera centered at `eye` looking towards `target`.
    ///
    /// The camera z axis points at the target and the x axis is `up x z`.
    pub fn look_at(eye: DVec3, target: DVec3, up: DVec3) -> Self {
        let z = (target - eye).normalize();
        let x = up.cross(z).normalize();
        let y = z.cross(x);
        // rows of the world-to-camera rotation are the camera axes
        let rotation = DMat3::from_cols(x, y, z).transpose();
        Self::new(DQuat::from_mat3(&rotation), -(rotation * eye))
    }

    /// Pose from the `[qx, qy, qz, qw, tx, ty, tz]` parameter block.
    pub fn from_params(x: &[f64]) -> Self {
        Self::new(
            DQuat::from_xyzw(x[0], x[1], x[2], x[3]),
            DVec3::new(x[4], x[5], x[6]),
        )
    }

    /// The `[qx, qy, qz, qw, tx, ty, tz]` parameter block.
    pub fn to_params(&self) -> [f64; 7] {
        let q = self.rotation;
        let t = self.translation;
        [q.x, q.y, q.z, q.w, t.x, t.y, t.z]
    }

    /// Map a world point into the camera frame.
    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Camera center in world coordinates, `-R^T t`.
    pub fn center(&self) -> DVec3 {
        -(self.rotation.inverse() * self.translation)
    }

    /// Angle in degrees of the relative rotation between two poses.
    pub fn rotation_angle_deg(&self, other: &Pose3) -> f64 {
        self.rotation.angle_between(other.rotation).to_degrees()
    }
}

/// Bundler calibration: one focal length and two radial distortion terms.
///
/// The principal point is fixed and never optimized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Focal length in pixels.
    pub focal: f64,
    /// Second order radial distortion.
    pub k1: f64,
    /// Fourth order radial distortion.
    pub k2: f64,
    /// Principal point x.
    pub u0: f64,
    /// Principal point y.
    pub v0: f64,
}

impl Calibration {
    const UNDISTORT_ITERATIONS: usize = 20;

    /// Create a calibration without distortion.
    pub fn new(focal: f64, u0: f64, v0: f64) -> Self {
        Self {
            focal,
            k1: 0.0,
            k2: 0.0,
            u0,
            v0,
        }
    }

    /// Set the radial distortion coefficients.
    pub fn with_distortion(mut self, k1: f64, k2: f64) -> Self {
        self.k1 = k1;
        self.k2 = k2;
        self
    }

    /// The optimizable `[f, k1, k2]` block.
    pub fn to_params(&self) -> [f64; 3] {
        [self.focal, self.k1, self.k2]
    }

    /// Replace `[f, k1, k2]` keeping the principal point.
    pub fn with_params(&self, params: &[f64]) -> Self {
        Self {
            focal: params[0],
            k1: params[1],
            k2: params[2],
            u0: self.u0,
            v0: self.v0,
        }
    }

    /// Distort and scale a point on the normalized image plane into pixels.
    #[inline]
    pub fn uncalibrate(&self, p: DVec2) -> DVec2 {
        let r2 = p.length_squared();
        let g = 1.0 + r2 * (self.k1 + self.k2 * r2);
        DVec2::new(self.u0, self.v0) + self.focal * g * p
    }

    /// Invert [`Self::uncalibrate`] by fixed point iteration.
    pub fn calibrate(&self, uv: DVec2) -> DVec2 {
        let pd = (uv - DVec2::new(self.u0, self.v0)) / self.focal;
        let mut p = pd;
        for _ in 0..Self::UNDISTORT_ITERATIONS {
            let r2 = p.length_squared();
            let g = 1.0 + r2 * (self.k1 + self.k2 * r2);
            p = pd / g;
        }
        p
    }
}

/// A posed camera with Bundler calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    /// World to camera transform.
    pub pose: Pose3,
    /// Intrinsics.
    pub calibration: Calibration,
}

impl PinholeCamera {
    /// Create a new camera.
    pub fn new(pose: Pose3, calibration: Calibration) -> Self {
        Self { pose, calibration }
    }

    /// Depth of a world point along the optical axis.
    #[inline]
    pub fn depth(&self, point: DVec3) -> f64 {
        self.pose.transform_point(point).z
    }

    /// Project a world point to pixels, `None` if it is not in front of the camera.
    pub fn project(&self, point: DVec3) -> Option<DVec2> {
        let pc = self.pose.transform_point(point);
        if pc.z <= MIN_DEPTH {
            return None;
        }
        Some(self.calibration.uncalibrate(DVec2::new(pc.x / pc.z, pc.y / pc.z)))
    }

    /// Pixel distance between `uv` and the projection of `point`.
    ///
    /// Points behind the camera have infinite error.
    pub fn reprojection_error(&self, point: DVec3, uv: DVec2) -> f64 {
        self.project(point)
            .map_or(f64::INFINITY, |projected| projected.distance(uv))
    }

    /// Unit direction in world coordinates of the ray through pixel `uv`.
    pub fn backproject_ray(&self, uv: DVec2) -> DVec3 {
        let p = self.calibration.calibrate(uv);
        (self.pose.rotation.inverse() * DVec3::new(p.x, p.y, 1.0)).normalize()
    }

    /// Camera center in world coordinates.
    pub fn center(&self) -> DVec3 {
        self.pose.center()
    }
}

/// How calibration variables are allocated during bundle adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationSharing {
    /// One calibration estimated for all cameras.
    Shared,
    /// Each camera has its own calibration.
    #[default]
    PerCamera,
}
