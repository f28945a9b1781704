//! Landmark initialization by triangulating 2D tracks.
//!
//! Points are first estimated linearly (DLT on normalized image coordinates) and
//! then refined on pixel reprojection error. In RANSAC mode minimal two-view
//! hypotheses are scored against every measurement of the track and the final
//! point is estimated from the inliers of the best hypothesis.

use std::collections::BTreeMap;

use glam::{DVec2, DVec3};
use kornia_optim::{
    numerical_jacobian, Factor, FactorError, FactorResult, LevenbergMarquardt,
    LinearizationResult, OptimizerError, Problem, Variable, VariableType,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::camera::{PinholeCamera, MIN_DEPTH};
use crate::scene::Landmark;
use crate::track::{Measurement, Track2d};

/// Outcome of triangulating one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriangulationExitCode {
    /// A landmark was estimated.
    Success,
    /// The point is behind a contributing camera, or no point could be formed.
    CheiralityFailure,
    /// The widest angle between observation rays is below the minimum.
    SmallBaseline,
    /// The mean reprojection error is above the threshold.
    ExceedsReprojThresh,
    /// Fewer than two measurements have a known camera.
    InsufficientMeasurements,
}

/// How RANSAC picks the camera pairs used as minimal hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RansacSampling {
    /// Pairs sampled uniformly without replacement.
    #[default]
    Uniform,
    /// Pairs sampled without replacement with probability proportional to their baseline.
    BaselineBiased,
    /// The pairs with the widest baselines.
    TopKBaselines,
}

/// Triangulation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriangulationMode {
    /// Use every measurement in a single estimate.
    Direct,
    /// Robust estimation from two-view hypotheses.
    Ransac(RansacSampling),
}

impl Default for TriangulationMode {
    fn default() -> Self {
        TriangulationMode::Ransac(RansacSampling::Uniform)
    }
}

/// Parameters of [`LandmarkInitializer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationParams {
    /// Triangulation strategy.
    pub mode: TriangulationMode,
    /// Inlier threshold and maximum mean reprojection error, in pixels.
    pub reproj_error_thresh: f64,
    /// Minimum angle in degrees between the widest pair of observation rays.
    pub min_tri_angle_deg: Option<f64>,
    /// Number of RANSAC hypotheses, all camera pairs when unset.
    pub num_ransac_hypotheses: Option<usize>,
    /// Refine the linear estimate on reprojection error.
    pub refine: bool,
}

impl Default for TriangulationParams {
    fn default() -> Self {
        Self {
            mode: TriangulationMode::default(),
            reproj_error_thresh: 10.0,
            min_tri_angle_deg: None,
            num_ransac_hypotheses: Some(20),
            refine: true,
        }
    }
}

impl TriangulationParams {
    /// Set the triangulation mode.
    pub fn with_mode(mut self, mode: TriangulationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the reprojection error threshold.
    pub fn with_reproj_error_thresh(mut self, thresh: f64) -> Self {
        self.reproj_error_thresh = thresh;
        self
    }

    /// Set the minimum triangulation angle.
    pub fn with_min_tri_angle_deg(mut self, angle: Option<f64>) -> Self {
        self.min_tri_angle_deg = angle;
        self
    }

    /// Set the number of RANSAC hypotheses.
    pub fn with_num_ransac_hypotheses(mut self, num: Option<usize>) -> Self {
        self.num_ransac_hypotheses = num;
        self
    }

    /// Enable or disable nonlinear refinement.
    pub fn with_refine(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }
}

/// Result of [`LandmarkInitializer::triangulate`].
#[derive(Debug, Clone)]
pub struct TriangulationResult {
    /// The landmark, only on success.
    pub landmark: Option<Landmark>,
    /// Mean reprojection error over the final measurements, when a point exists.
    pub avg_reprojection_error: Option<f64>,
    /// Outcome.
    pub exit_code: TriangulationExitCode,
    /// Measurements supporting the final estimate.
    pub num_inliers: usize,
}

impl TriangulationResult {
    fn failure(
        exit_code: TriangulationExitCode,
        avg_reprojection_error: Option<f64>,
        num_inliers: usize,
    ) -> Self {
        Self {
            landmark: None,
            avg_reprojection_error,
            exit_code,
            num_inliers,
        }
    }
}

/// Estimates landmarks for 2D tracks given the current camera estimates.
pub struct LandmarkInitializer<'a> {
    cameras: &'a BTreeMap<usize, PinholeCamera>,
    params: TriangulationParams,
}

impl<'a> LandmarkInitializer<'a> {
    /// Create an initializer over `cameras`.
    pub fn new(cameras: &'a BTreeMap<usize, PinholeCamera>, params: TriangulationParams) -> Self {
        Self { cameras, params }
    }

    /// Triangulation parameters.
    pub fn params(&self) -> &TriangulationParams {
        &self.params
    }

    /// Triangulate with an RNG seeded from `seed`.
    pub fn triangulate_seeded(&self, track: &Track2d, seed: u64) -> TriangulationResult {
        let mut rng = StdRng::seed_from_u64(seed);
        self.triangulate(track, &mut rng)
    }

    /// Triangulate `track`.
    ///
    /// Measurements from cameras without an estimate are ignored. `rng` is only
    /// used in RANSAC mode.
    pub fn triangulate<R: Rng + ?Sized>(&self, track: &Track2d, rng: &mut R) -> TriangulationResult {
        let usable: Vec<(Measurement, &PinholeCamera)> = track
            .measurements()
            .iter()
            .filter_map(|m| self.cameras.get(&m.camera_index).map(|c| (*m, c)))
            .collect();

        if usable.len() < 2 {
            return TriangulationResult::failure(
                TriangulationExitCode::InsufficientMeasurements,
                None,
                0,
            );
        }

        let selected: Vec<usize> = match self.params.mode {
            TriangulationMode::Direct => (0..usable.len()).collect(),
            TriangulationMode::Ransac(sampling) => {
                match self.ransac_inliers(&usable, sampling, rng) {
                    Some(inliers) => inliers,
                    None => {
                        return TriangulationResult::failure(
                            TriangulationExitCode::CheiralityFailure,
                            None,
                            0,
                        )
                    }
                }
            }
        };

        let cameras: Vec<&PinholeCamera> = selected.iter().map(|&i| usable[i].1).collect();
        let uvs: Vec<DVec2> = selected.iter().map(|&i| usable[i].0.uv).collect();
        let num_inliers = selected.len();

        let Some(mut point) = triangulate_dlt(&cameras, &uvs) else {
            return TriangulationResult::failure(
                TriangulationExitCode::CheiralityFailure,
                None,
                num_inliers,
            );
        };

        if self.params.refine {
            match refine_point(&cameras, &uvs, point) {
                Ok(refined) => point = refined,
                Err(err) => log::debug!("point refinement failed, keeping linear estimate: {err}"),
            }
        }

        if cameras.iter().any(|c| c.depth(point) <= MIN_DEPTH) {
            return TriangulationResult::failure(
                TriangulationExitCode::CheiralityFailure,
                None,
                num_inliers,
            );
        }

        let avg_error = cameras
            .iter()
            .zip(&uvs)
            .map(|(c, uv)| c.reprojection_error(point, *uv))
            .sum::<f64>()
            / num_inliers as f64;

        if let Some(min_angle) = self.params.min_tri_angle_deg {
            let centers: Vec<DVec3> = cameras.iter().map(|c| c.center()).collect();
            if max_ray_angle_deg(&centers, point) < min_angle {
                return TriangulationResult::failure(
                    TriangulationExitCode::SmallBaseline,
                    Some(avg_error),
                    num_inliers,
                );
            }
        }

        if avg_error > self.params.reproj_error_thresh {
            return TriangulationResult::failure(
                TriangulationExitCode::ExceedsReprojThresh,
                Some(avg_error),
                num_inliers,
            );
        }

        let measurements = selected.iter().map(|&i| usable[i].0).collect();
        TriangulationResult {
            landmark: Some(Landmark::new(point, measurements)),
            avg_reprojection_error: Some(avg_error),
            exit_code: TriangulationExitCode::Success,
            num_inliers,
        }
    }

    /// Indices into `usable` of the inliers of the best two-view hypothesis.
    fn ransac_inliers<R: Rng + ?Sized>(
        &self,
        usable: &[(Measurement, &PinholeCamera)],
        sampling: RansacSampling,
        rng: &mut R,
    ) -> Option<Vec<usize>> {
        let n = usable.len();
        let centers: Vec<DVec3> = usable.iter().map(|(_, c)| c.center()).collect();

        let mut baselines = Vec::with_capacity(n * (n - 1) / 2);
        for a in 0..n {
            for b in a + 1..n {
                baselines.push((a, b, centers[a].distance(centers[b])));
            }
        }

        let num_hypotheses = self.params.num_ransac_hypotheses.unwrap_or(baselines.len());
        let hypotheses = sample_hypotheses(rng, &baselines, num_hypotheses, sampling);

        // (inlier count, total inlier error, inliers, hypothesis pair)
        let mut best: Option<(usize, f64, Vec<usize>, (usize, usize))> = None;
        for (a, b) in hypotheses {
            let (ma, ca) = usable[a];
            let (mb, cb) = usable[b];
            let Some(point) = triangulate_dlt(&[ca, cb], &[ma.uv, mb.uv]) else {
                continue;
            };
            if ca.depth(point) <= MIN_DEPTH || cb.depth(point) <= MIN_DEPTH {
                continue;
            }

            let mut inliers = Vec::new();
            let mut total_error = 0.0;
            for (i, (m, c)) in usable.iter().enumerate() {
                let err = c.reprojection_error(point, m.uv);
                if err < self.params.reproj_error_thresh {
                    inliers.push(i);
                    total_error += err;
                }
            }

            let is_better = match &best {
                None => true,
                Some((count, error, _, _)) => {
                    inliers.len() > *count || (inliers.len() == *count && total_error < *error)
                }
            };
            if is_better {
                best = Some((inliers.len(), total_error, inliers, (a, b)));
            }
        }

        best.map(|(count, _, inliers, (a, b))| {
            if count >= 2 {
                inliers
            } else {
                vec![a, b]
            }
        })
    }
}

/// Pick the camera pairs used as RANSAC hypotheses.
///
/// `baselines` lists `(a, b, baseline)` for every candidate pair. When the budget
/// covers all pairs every pair is used once, in input order.
pub fn sample_hypotheses<R: Rng + ?Sized>(
    rng: &mut R,
    baselines: &[(usize, usize, f64)],
    num_hypotheses: usize,
    sampling: RansacSampling,
) -> Vec<(usize, usize)> {
    let n = baselines.len();
    if num_hypotheses >= n {
        return baselines.iter().map(|&(a, b, _)| (a, b)).collect();
    }

    let picked: Vec<usize> = match sampling {
        RansacSampling::Uniform => rand::seq::index::sample(rng, n, num_hypotheses).into_vec(),
        RansacSampling::BaselineBiased => {
            match rand::seq::index::sample_weighted(rng, n, |i| baselines[i].2, num_hypotheses) {
                Ok(indices) => indices.into_vec(),
                // degenerate weights, e.g. coincident camera centers
                Err(_) => rand::seq::index::sample(rng, n, num_hypotheses).into_vec(),
            }
        }
        RansacSampling::TopKBaselines => {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&i, &j| baselines[j].2.total_cmp(&baselines[i].2));
            order.truncate(num_hypotheses);
            order
        }
    };

    picked
        .into_iter()
        .map(|i| (baselines[i].0, baselines[i].1))
        .collect()
}

/// Linear triangulation from two or more views.
///
/// Pixels are undistorted to normalized coordinates and the point is the right
/// singular vector of the smallest singular value of the stacked DLT system.
/// Returns `None` for fewer than two views or a point at infinity.
pub fn triangulate_dlt(cameras: &[&PinholeCamera], uvs: &[DVec2]) -> Option<DVec3> {
    let n = cameras.len().min(uvs.len());
    if n < 2 {
        return None;
    }

    let mut a = faer::Mat::<f64>::zeros(2 * n, 4);
    for (i, (camera, uv)) in cameras.iter().zip(uvs).enumerate() {
        let p = camera.calibration.calibrate(*uv);
        let rot = glam::DMat3::from_quat(camera.pose.rotation);
        let t = camera.pose.translation;
        let row = |r: usize| {
            let axis = rot.row(r);
            [axis.x, axis.y, axis.z, t[r]]
        };
        let (p0, p1, p2) = (row(0), row(1), row(2));
        for j in 0..4 {
            a.write(2 * i, j, p.x * p2[j] - p0[j]);
            a.write(2 * i + 1, j, p.y * p2[j] - p1[j]);
        }
    }

    let svd = a.svd();
    let xh = svd.v().col(3);
    let w = xh[3];
    if w.abs() < 1e-12 {
        return None;
    }
    let point = DVec3::new(xh[0] / w, xh[1] / w, xh[2] / w);
    point.is_finite().then_some(point)
}

/// Refine a point on pixel reprojection error with the cameras held fixed.
pub fn refine_point(
    cameras: &[&PinholeCamera],
    uvs: &[DVec2],
    initial: DVec3,
) -> Result<DVec3, OptimizerError> {
    let mut problem = Problem::new();
    problem.add_variable(Variable::euclidean("p", 3), initial.to_array().to_vec())?;
    for (camera, uv) in cameras.iter().zip(uvs) {
        problem.add_factor(
            Box::new(PointReprojectionFactor {
                camera: **camera,
                uv: *uv,
            }),
            vec!["p".to_string()],
        )?;
    }

    let optimizer = LevenbergMarquardt::default()
        .with_max_iterations(20)
        .with_tolerances(1e-10, 1e-10);
    optimizer.optimize(&mut problem)?;

    let p = problem.variable_values("p")?;
    Ok(DVec3::new(p[0], p[1], p[2]))
}

/// Widest angle in degrees between rays from `centers` to `point`.
pub fn max_ray_angle_deg(centers: &[DVec3], point: DVec3) -> f64 {
    let rays: Vec<DVec3> = centers
        .iter()
        .map(|c| (point - *c).normalize_or_zero())
        .collect();
    let mut max_angle: f64 = 0.0;
    for (i, ri) in rays.iter().enumerate() {
        for rj in &rays[i + 1..] {
            let angle = ri.dot(*rj).clamp(-1.0, 1.0).acos().to_degrees();
            max_angle = max_angle.max(angle);
        }
    }
    max_angle
}

/// Reprojection residual of a free point through a fixed camera.
struct PointReprojectionFactor {
    camera: PinholeCamera,
    uv: DVec2,
}

impl PointReprojectionFactor {
    fn residual(&self, x: &[f64]) -> FactorResult<Vec<f64>> {
        let pc = self
            .camera
            .pose
            .transform_point(DVec3::new(x[0], x[1], x[2]));
        if pc.z.abs() < MIN_DEPTH {
            return Err(FactorError::InvalidParameters(
                "point on the camera plane".to_string(),
            ));
        }
        let uv = self
            .camera
            .calibration
            .uncalibrate(DVec2::new(pc.x / pc.z, pc.y / pc.z));
        Ok(vec![uv.x - self.uv.x, uv.y - self.uv.y])
    }
}

impl Factor for PointReprojectionFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        let residual = self.residual(params[0])?;
        let jacobian = if compute_jacobian {
            Some(numerical_jacobian(
                params,
                &[VariableType::Euclidean(3)],
                2,
                |p| self.residual(p[0]),
            )?)
        } else {
            None
        };
        Ok(LinearizationResult::new(residual, jacobian, 3))
    }

    fn residual_dim(&self) -> usize {
        2
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Calibration, Pose3};
    use approx::assert_relative_eq;

    fn ring_cameras(num: usize, radius: f64) -> BTreeMap<usize, PinholeCamera> {
        (0..num)
            .map(|i| {
                let theta = i as f64 * 0.35;
                let eye = DVec3::new(radius * theta.sin(), 0.3 * i as f64, -radius * theta.cos());
                let pose = Pose3::look_at(eye, DVec3::ZERO, DVec3::Y);
                (i, PinholeCamera::new(pose, Calibration::new(500.0, 320.0, 240.0)))
            })
            .collect()
    }

    fn observe(cameras: &BTreeMap<usize, PinholeCamera>, point: DVec3) -> Track2d {
        Track2d::new(
            cameras
                .iter()
                .map(|(&i, c)| Measurement::new(i, c.project(point).unwrap()))
                .collect(),
        )
    }

    #[test]
    fn test_direct_recovers_point() {
        let cameras = ring_cameras(4, 6.0);
        let point = DVec3::new(0.4, -0.3, 0.8);
        let track = observe(&cameras, point);

        let params = TriangulationParams::default().with_mode(TriangulationMode::Direct);
        let initializer = LandmarkInitializer::new(&cameras, params);
        let result = initializer.triangulate_seeded(&track, 0);

        assert_eq!(result.exit_code, TriangulationExitCode::Success);
        assert_eq!(result.num_inliers, 4);
        let landmark = result.landmark.unwrap();
        assert_relative_eq!(landmark.point.x, point.x, epsilon = 1e-9);
        assert_relative_eq!(landmark.point.y, point.y, epsilon = 1e-9);
        assert_relative_eq!(landmark.point.z, point.z, epsilon = 1e-9);
        assert!(result.avg_reprojection_error.unwrap() < 1e-6);
    }

    #[test]
    fn test_dlt_without_refinement_is_exact() {
        let cameras = ring_cameras(3, 5.0);
        let point = DVec3::new(-0.2, 0.1, 0.3);
        let cams: Vec<&PinholeCamera> = cameras.values().collect();
        let uvs: Vec<DVec2> = cams.iter().map(|c| c.project(point).unwrap()).collect();
        let estimate = triangulate_dlt(&cams, &uvs).unwrap();
        assert_relative_eq!(estimate.distance(point), 0.0, epsilon = 1e-9);
        assert!(triangulate_dlt(&cams[..1], &uvs[..1]).is_none());
    }

    #[test]
    fn test_ransac_rejects_outlier() {
        let cameras = ring_cameras(5, 6.0);
        let point = DVec3::new(0.2, 0.5, -0.1);
        let mut measurements = observe(&cameras, point).measurements().to_vec();
        measurements[2].uv += DVec2::new(80.0, -60.0);
        let track = Track2d::new(measurements);

        let params = TriangulationParams::default()
            .with_mode(TriangulationMode::Ransac(RansacSampling::Uniform))
            .with_reproj_error_thresh(2.0)
            .with_num_ransac_hypotheses(Some(10));
        let initializer = LandmarkInitializer::new(&cameras, params);
        let result = initializer.triangulate_seeded(&track, 7);

        assert_eq!(result.exit_code, TriangulationExitCode::Success);
        assert_eq!(result.num_inliers, 4);
        let landmark = result.landmark.unwrap();
        assert!(!landmark.camera_indices().contains(&2));
        assert!(landmark.point.distance(point) < 1e-6);
    }

    #[test]
    fn test_direct_with_outlier_exceeds_threshold() {
        let cameras = ring_cameras(5, 6.0);
        let point = DVec3::new(0.2, 0.5, -0.1);
        let mut measurements = observe(&cameras, point).measurements().to_vec();
        measurements[2].uv += DVec2::new(80.0, -60.0);

        let params = TriangulationParams::default()
            .with_mode(TriangulationMode::Direct)
            .with_reproj_error_thresh(2.0);
        let initializer = LandmarkInitializer::new(&cameras, params);
        let result = initializer.triangulate_seeded(&Track2d::new(measurements), 0);

        assert_eq!(result.exit_code, TriangulationExitCode::ExceedsReprojThresh);
        assert!(result.landmark.is_none());
        assert!(result.avg_reprojection_error.unwrap() > 2.0);
    }

    #[test]
    fn test_small_baseline() {
        let calibration = Calibration::new(500.0, 320.0, 240.0);
        let cameras: BTreeMap<usize, PinholeCamera> = [
            (0, PinholeCamera::new(Pose3::IDENTITY, calibration)),
            (
                1,
                PinholeCamera::new(
                    Pose3::new(glam::DQuat::IDENTITY, DVec3::new(-0.1, 0.0, 0.0)),
                    calibration,
                ),
            ),
        ]
        .into_iter()
        .collect();
        let track = observe(&cameras, DVec3::new(0.0, 0.0, 50.0));

        let params = TriangulationParams::default()
            .with_mode(TriangulationMode::Direct)
            .with_min_tri_angle_deg(Some(1.0));
        let result = LandmarkInitializer::new(&cameras, params).triangulate_seeded(&track, 0);

        assert_eq!(result.exit_code, TriangulationExitCode::SmallBaseline);
        assert!(result.landmark.is_none());
        assert!(result.avg_reprojection_error.is_some());
    }

    #[test]
    fn test_cheirality_failure() {
        let calibration = Calibration::new(500.0, 320.0, 240.0);
        let cameras: BTreeMap<usize, PinholeCamera> = [
            (0, PinholeCamera::new(Pose3::IDENTITY, calibration)),
            (
                1,
                PinholeCamera::new(
                    Pose3::new(glam::DQuat::IDENTITY, DVec3::new(-1.0, 0.0, 0.0)),
                    calibration,
                ),
            ),
        ]
        .into_iter()
        .collect();
        // the rays only meet behind both cameras
        let track = Track2d::new(vec![
            Measurement::new(0, DVec2::new(320.0 - 50.0, 240.0)),
            Measurement::new(1, DVec2::new(320.0 + 50.0, 240.0)),
        ]);

        let params = TriangulationParams::default()
            .with_mode(TriangulationMode::Direct)
            .with_refine(false);
        let result = LandmarkInitializer::new(&cameras, params).triangulate_seeded(&track, 0);
        assert_eq!(result.exit_code, TriangulationExitCode::CheiralityFailure);
        assert!(result.avg_reprojection_error.is_none());
        assert!(result.landmark.is_none());
    }

    fn cameras_along_x(xs: &[f64]) -> BTreeMap<usize, PinholeCamera> {
        let calibration = Calibration::new(500.0, 320.0, 240.0);
        xs.iter()
            .enumerate()
            .map(|(i, &x)| {
                let pose = Pose3::new(glam::DQuat::IDENTITY, DVec3::new(-x, 0.0, 0.0));
                (i, PinholeCamera::new(pose, calibration))
            })
            .collect()
    }

    #[test]
    fn test_exit_code_priority() {
        let cameras = cameras_along_x(&[0.0, 0.1]);
        let params = TriangulationParams::default()
            .with_mode(TriangulationMode::Direct)
            .with_refine(false)
            .with_reproj_error_thresh(2.0)
            .with_min_tri_angle_deg(Some(5.0));
        let initializer = LandmarkInitializer::new(&cameras, params);

        // behind the cameras with a tiny baseline: cheirality wins
        let behind = Track2d::new(vec![
            Measurement::new(0, DVec2::new(320.0 - 5.0, 240.0)),
            Measurement::new(1, DVec2::new(320.0 + 5.0, 240.0)),
        ]);
        let result = initializer.triangulate_seeded(&behind, 0);
        assert_eq!(result.exit_code, TriangulationExitCode::CheiralityFailure);
        assert!(result.avg_reprojection_error.is_none());

        // far away with a tiny baseline and a large error: small baseline wins
        let mut measurements = observe(&cameras, DVec3::new(0.0, 0.0, 50.0))
            .measurements()
            .to_vec();
        measurements[1].uv.y += 40.0;
        let result = initializer.triangulate_seeded(&Track2d::new(measurements), 0);
        assert_eq!(result.exit_code, TriangulationExitCode::SmallBaseline);
        assert!(result.avg_reprojection_error.unwrap() > 2.0);
        assert!(result.landmark.is_none());
    }

    #[test]
    fn test_ransac_tie_break_lowest_error() {
        let cameras = cameras_along_x(&[0.0, 1.0, 2.0, 3.0]);
        let p = DVec3::new(1.5, 1.0, 10.0);
        let q = DVec3::new(1.5, -1.0, 10.0);

        // cameras 0, 1 see p with a 4px epipolar error, cameras 2, 3 see q exactly
        let project = |i: usize, point: DVec3| cameras[&i].project(point).unwrap();
        let track = Track2d::new(vec![
            Measurement::new(0, project(0, p)),
            Measurement::new(1, project(1, p) + DVec2::new(0.0, 4.0)),
            Measurement::new(2, project(2, q)),
            Measurement::new(3, project(3, q)),
        ]);

        // every pair is tried in order, so (0, 1) is scored before (2, 3)
        let params = TriangulationParams::default()
            .with_mode(TriangulationMode::Ransac(RansacSampling::Uniform))
            .with_reproj_error_thresh(5.0)
            .with_num_ransac_hypotheses(None);
        let result = LandmarkInitializer::new(&cameras, params).triangulate_seeded(&track, 0);

        assert_eq!(result.exit_code, TriangulationExitCode::Success);
        assert_eq!(result.num_inliers, 2);
        let landmark = result.landmark.unwrap();
        assert_eq!(landmark.camera_indices(), vec![2, 3]);
        assert!(landmark.point.distance(q) < 1e-6);
    }

    #[test]
    fn test_insufficient_measurements() {
        let cameras = ring_cameras(2, 6.0);
        let track = Track2d::new(vec![
            Measurement::new(0, DVec2::new(1.0, 2.0)),
            Measurement::new(9, DVec2::new(3.0, 4.0)),
        ]);
        let result = LandmarkInitializer::new(&cameras, TriangulationParams::default())
            .triangulate_seeded(&track, 0);
        assert_eq!(
            result.exit_code,
            TriangulationExitCode::InsufficientMeasurements
        );
        assert!(result.avg_reprojection_error.is_none());
    }

    #[test]
    fn test_sample_hypotheses() {
        let baselines = vec![(0, 1, 1.0), (0, 2, 5.0), (1, 2, 3.0), (0, 3, 0.5)];
        let mut rng = StdRng::seed_from_u64(3);

        let all = sample_hypotheses(&mut rng, &baselines, 10, RansacSampling::Uniform);
        assert_eq!(all, vec![(0, 1), (0, 2), (1, 2), (0, 3)]);

        let top = sample_hypotheses(&mut rng, &baselines, 2, RansacSampling::TopKBaselines);
        assert_eq!(top, vec![(0, 2), (1, 2)]);

        for sampling in [RansacSampling::Uniform, RansacSampling::BaselineBiased] {
            let picked = sample_hypotheses(&mut rng, &baselines, 3, sampling);
            assert_eq!(picked.len(), 3);
            let mut dedup = picked.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(dedup.len(), 3);
        }

        let biased = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            sample_hypotheses(&mut rng, &baselines, 2, RansacSampling::BaselineBiased)
        };
        assert_eq!(biased(11), biased(11));
    }

    #[test]
    fn test_max_ray_angle() {
        let centers = [DVec3::new(-1.0, 0.0, 0.0), DVec3::new(1.0, 0.0, 0.0)];
        let angle = max_ray_angle_deg(&centers, DVec3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(angle, 90.0, epsilon = 1e-9);
    }
}
