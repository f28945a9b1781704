//! Bundle adjustment of poses, calibrations and landmarks.
//!
//! The problem has one SE(3) variable `x{i}` per camera, one calibration
//! variable `k{i}` (`[f, k1, k2]`) per camera or per shared group and one point
//! variable `p{j}` per landmark. Every measurement contributes a whitened
//! reprojection residual. Poses and calibrations are softly anchored to their
//! initial estimates to remove the gauge freedom.
//!
//! Landmarks are marginalized, so each solver step factors only the reduced
//! camera system and scales linearly with the number of landmarks.

use std::time::Instant;

use glam::{DQuat, DVec2, DVec3};
use kornia_optim::lie::so3_log;
use kornia_optim::{
    numerical_jacobian, Factor, FactorError, FactorResult, LevenbergMarquardt,
    LinearizationResult, OptimizerError, OptimizerResult, PriorFactor, Problem, ProblemError,
    TerminationReason, Variable, VariableType,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::{CalibrationSharing, PinholeCamera, Pose3, MIN_DEPTH};
use crate::metrics::SceneMetrics;
use crate::scene::{Landmark, SceneError, SceneModel};

/// Reasons a bundle adjustment can fail.
#[derive(Debug, Error)]
pub enum BundleAdjustmentError {
    /// Nothing to optimize.
    #[error("scene has no landmarks")]
    NoLandmarks,

    /// Building the factor graph failed.
    #[error("failed to build the problem: {0}")]
    Problem(#[from] ProblemError),

    /// The solver failed.
    #[error("optimizer failed: {0}")]
    Optimizer(#[from] OptimizerError),

    /// The input or optimized scene is inconsistent.
    #[error("invalid scene: {0}")]
    Scene(#[from] SceneError),

    /// The solution diverged.
    #[error("final error is not finite: {0}")]
    NonFiniteCost(f64),

    /// The wall clock budget ran out before convergence.
    #[error("time budget of {budget_secs}s exceeded after {elapsed_secs:.3}s")]
    TimeBudgetExceeded {
        /// Configured budget.
        budget_secs: f64,
        /// Time spent.
        elapsed_secs: f64,
    },
}

/// Parameters of [`BundleAdjuster`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleAdjustmentConfig {
    /// Landmarks with a larger mean reprojection error are dropped after optimization.
    pub output_reproj_error_thresh: f64,
    /// Calibration variable allocation.
    pub calibration_sharing: CalibrationSharing,
    /// Measurement noise in pixels.
    pub measurement_sigma: f64,
    /// Standard deviation of the pose prior.
    pub pose_prior_sigma: f64,
    /// Standard deviation of the calibration prior.
    pub calibration_prior_sigma: f64,
    /// Optional wall clock budget in seconds.
    pub time_budget_secs: Option<f64>,
    /// Solver settings.
    pub solver: LevenbergMarquardt,
}

impl Default for BundleAdjustmentConfig {
    fn default() -> Self {
        Self {
            output_reproj_error_thresh: 3.0,
            calibration_sharing: CalibrationSharing::PerCamera,
            measurement_sigma: 1.0,
            pose_prior_sigma: 0.1,
            calibration_prior_sigma: 0.1,
            time_budget_secs: None,
            solver: LevenbergMarquardt::default().with_max_iterations(100),
        }
    }
}

impl BundleAdjustmentConfig {
    /// Set the output reprojection error threshold.
    pub fn with_output_reproj_error_thresh(mut self, thresh: f64) -> Self {
        self.output_reproj_error_thresh = thresh;
        self
    }

    /// Set the calibration sharing policy.
    pub fn with_calibration_sharing(mut self, sharing: CalibrationSharing) -> Self {
        self.calibration_sharing = sharing;
        self
    }

    /// Set the wall clock budget.
    pub fn with_time_budget_secs(mut self, budget: Option<f64>) -> Self {
        self.time_budget_secs = budget;
        self
    }

    /// Set the solver settings.
    pub fn with_solver(mut self, solver: LevenbergMarquardt) -> Self {
        self.solver = solver;
        self
    }
}

/// Errors and scene statistics of one bundle adjustment.
#[derive(Debug, Clone, Serialize)]
pub struct BundleAdjustmentMetrics {
    /// Total squared whitened error before optimization.
    pub initial_error: f64,
    /// Total squared whitened error after optimization.
    pub final_error: f64,
    /// Solver iterations.
    pub iterations: usize,
    /// Why the solver stopped.
    pub termination: TerminationReason,
    /// Optimized scene before landmark filtering.
    pub before_filtering: SceneMetrics,
    /// Optimized scene after landmark filtering.
    pub after_filtering: SceneMetrics,
}

/// Output of a successful [`BundleAdjuster::optimize`].
#[derive(Debug, Clone)]
pub struct BundleAdjustmentResult {
    /// Optimized scene before filtering.
    pub optimized: SceneModel,
    /// Optimized scene after filtering.
    pub filtered: SceneModel,
    /// Solver summary.
    pub solver: OptimizerResult,
    /// Errors and scene statistics.
    pub metrics: BundleAdjustmentMetrics,
}

/// Jointly refines the cameras and landmarks of a scene.
#[derive(Debug, Clone, Default)]
pub struct BundleAdjuster {
    config: BundleAdjustmentConfig,
}

impl BundleAdjuster {
    /// Create the adjuster.
    pub fn new(config: BundleAdjustmentConfig) -> Self {
        Self { config }
    }

    /// Adjuster configuration.
    pub fn config(&self) -> &BundleAdjustmentConfig {
        &self.config
    }

    /// Optimize `scene` and return the filtered result.
    ///
    /// Failures are logged and yield an empty scene over the same images.
    pub fn run(&self, scene: &SceneModel) -> SceneModel {
        match self.optimize(scene) {
            Ok(result) => result.filtered,
            Err(err) => {
                log::error!("bundle adjustment failed: {err}");
                SceneModel::new(scene.number_images())
            }
        }
    }

    /// Optimize `scene`, reporting failures as errors.
    pub fn optimize(
        &self,
        scene: &SceneModel,
    ) -> Result<BundleAdjustmentResult, BundleAdjustmentError> {
        if scene.number_landmarks() == 0 {
            return Err(BundleAdjustmentError::NoLandmarks);
        }

        let camera_indices = scene.valid_camera_indices();
        let shared_index = camera_indices.first().copied();
        let calibration_key = |index: usize| match (self.config.calibration_sharing, shared_index) {
            (CalibrationSharing::Shared, Some(shared)) => calibration_name(shared),
            _ => calibration_name(index),
        };

        let lookup_camera = |index: usize| {
            scene.cameras().get(&index).ok_or(SceneError::MissingCamera {
                camera_index: index,
            })
        };

        let mut problem = Problem::new();

        for &index in &camera_indices {
            let camera = lookup_camera(index)?;
            let pose_var = pose_name(index);
            let pose = camera.pose.to_params();
            problem.add_variable(Variable::se3(pose_var.clone(), pose.to_vec()), pose.to_vec())?;
            problem.add_factor(
                Box::new(PosePriorFactor::new(camera.pose, self.config.pose_prior_sigma)),
                vec![pose_var],
            )?;

            let calibration_var = calibration_key(index);
            if !problem.get_variables().contains_key(&calibration_var) {
                let calibration = camera.calibration.to_params().to_vec();
                problem.add_variable(
                    Variable::euclidean(calibration_var.clone(), 3),
                    calibration.clone(),
                )?;
                problem.add_factor(
                    Box::new(PriorFactor::with_sigma(
                        calibration,
                        self.config.calibration_prior_sigma,
                    )),
                    vec![calibration_var],
                )?;
            }
        }

        for (j, landmark) in scene.landmarks().iter().enumerate() {
            let point_var = point_name(j);
            problem.add_variable(
                Variable::euclidean(point_var.clone(), 3),
                landmark.point.to_array().to_vec(),
            )?;
            problem.set_marginalized(&point_var)?;
            for m in &landmark.measurements {
                let camera = lookup_camera(m.camera_index)?;
                problem.add_factor(
                    Box::new(ReprojectionFactor::new(
                        m.uv,
                        DVec2::new(camera.calibration.u0, camera.calibration.v0),
                        self.config.measurement_sigma,
                    )),
                    vec![
                        pose_name(m.camera_index),
                        calibration_key(m.camera_index),
                        point_var.clone(),
                    ],
                )?;
            }
        }

        log::info!(
            "bundle adjustment over {} cameras, {} landmarks, {} factors",
            camera_indices.len(),
            scene.number_landmarks(),
            problem.get_factors().len()
        );

        let start = Instant::now();
        let budget = self.config.time_budget_secs;
        let solver = self.config.solver.optimize_with_callback(&mut problem, |_, _| {
            budget.map_or(true, |b| start.elapsed().as_secs_f64() <= b)
        })?;

        if solver.termination_reason == TerminationReason::Interrupted {
            return Err(BundleAdjustmentError::TimeBudgetExceeded {
                budget_secs: budget.unwrap_or_default(),
                elapsed_secs: start.elapsed().as_secs_f64(),
            });
        }
        if !solver.final_cost.is_finite() {
            return Err(BundleAdjustmentError::NonFiniteCost(solver.final_cost));
        }

        log::info!(
            "bundle adjustment error {:.4e} -> {:.4e} after {} iterations ({:?})",
            solver.initial_cost,
            solver.final_cost,
            solver.iterations,
            solver.termination_reason
        );

        let mut optimized = SceneModel::new(scene.number_images());
        for &index in &camera_indices {
            let camera = lookup_camera(index)?;
            let pose = Pose3::from_params(problem.variable_values(&pose_name(index))?);
            let calibration = camera
                .calibration
                .with_params(problem.variable_values(&calibration_key(index))?);
            optimized.add_camera(index, PinholeCamera::new(pose, calibration))?;
        }
        for (j, landmark) in scene.landmarks().iter().enumerate() {
            let p = problem.variable_values(&point_name(j))?;
            optimized.add_landmark(Landmark::new(
                DVec3::new(p[0], p[1], p[2]),
                landmark.measurements.clone(),
            ))?;
        }

        let filtered = optimized.filter_landmarks(self.config.output_reproj_error_thresh);
        let metrics = BundleAdjustmentMetrics {
            initial_error: solver.initial_cost,
            final_error: solver.final_cost,
            iterations: solver.iterations,
            termination: solver.termination_reason,
            before_filtering: optimized.aggregate_metrics(),
            after_filtering: filtered.aggregate_metrics(),
        };

        log::info!(
            "filtering at {:.2}px kept {} of {} landmarks",
            self.config.output_reproj_error_thresh,
            metrics.after_filtering.num_landmarks,
            metrics.before_filtering.num_landmarks
        );
        filtered.log_reprojection_error_stats();

        Ok(BundleAdjustmentResult {
            optimized,
            filtered,
            solver,
            metrics,
        })
    }
}

fn pose_name(index: usize) -> String {
    format!("x{index}")
}

fn calibration_name(index: usize) -> String {
    format!("k{index}")
}

fn point_name(index: usize) -> String {
    format!("p{index}")
}

/// Whitened reprojection residual over `[pose, calibration, point]`.
///
/// Residual: `r = (project(x_c) - uv) / sigma` with `x_c = R p + t`.
struct ReprojectionFactor {
    uv: DVec2,
    principal_point: DVec2,
    sigma: f64,
}

impl ReprojectionFactor {
    const VAR_TYPES: [VariableType; 3] = [
        VariableType::SE3,
        VariableType::Euclidean(3),
        VariableType::Euclidean(3),
    ];

    fn new(uv: DVec2, principal_point: DVec2, sigma: f64) -> Self {
        Self {
            uv,
            principal_point,
            sigma,
        }
    }

    fn residual(&self, params: &[&[f64]]) -> FactorResult<Vec<f64>> {
        let pose = Pose3::from_params(params[0]);
        let calibration = params[1];
        let point = DVec3::new(params[2][0], params[2][1], params[2][2]);

        let pc = pose.transform_point(point);
        if pc.z.abs() < MIN_DEPTH {
            return Err(FactorError::InvalidParameters(
                "landmark on the camera plane".to_string(),
            ));
        }
        let p = DVec2::new(pc.x / pc.z, pc.y / pc.z);
        let r2 = p.length_squared();
        let g = 1.0 + r2 * (calibration[1] + calibration[2] * r2);
        let uv = self.principal_point + calibration[0] * g * p;
        let inv_sigma = 1.0 / self.sigma;
        Ok(vec![
            (uv.x - self.uv.x) * inv_sigma,
            (uv.y - self.uv.y) * inv_sigma,
        ])
    }
}

impl Factor for ReprojectionFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        if params.len() != 3 {
            return Err(FactorError::DimensionMismatch {
                expected: 3,
                actual: params.len(),
            });
        }
        let residual = self.residual(params)?;
        let jacobian = if compute_jacobian {
            Some(numerical_jacobian(params, &Self::VAR_TYPES, 2, |p| {
                self.residual(p)
            })?)
        } else {
            None
        };
        Ok(LinearizationResult::new(residual, jacobian, 12))
    }

    fn residual_dim(&self) -> usize {
        2
    }

    fn num_variables(&self) -> usize {
        3
    }

    fn variable_local_dim(&self, idx: usize) -> usize {
        Self::VAR_TYPES[idx].local_dim()
    }
}

/// Soft anchor of a pose to a target.
///
/// Residual: `r = [log(q q0^-1), t - t0] / sigma`, consistent with the left
/// rotation update of the SE(3) parameterization.
struct PosePriorFactor {
    target: Pose3,
    sigma: f64,
}

impl PosePriorFactor {
    fn new(target: Pose3, sigma: f64) -> Self {
        Self { target, sigma }
    }

    fn residual(&self, x: &[f64]) -> Vec<f64> {
        let q = DQuat::from_xyzw(x[0], x[1], x[2], x[3]).normalize();
        let w = so3_log(q * self.target.rotation.inverse());
        let dt = DVec3::new(x[4], x[5], x[6]) - self.target.translation;
        let inv_sigma = 1.0 / self.sigma;
        vec![
            w.x * inv_sigma,
            w.y * inv_sigma,
            w.z * inv_sigma,
            dt.x * inv_sigma,
            dt.y * inv_sigma,
            dt.z * inv_sigma,
        ]
    }
}

impl Factor for PosePriorFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        if params.len() != 1 {
            return Err(FactorError::DimensionMismatch {
                expected: 1,
                actual: params.len(),
            });
        }
        let residual = self.residual(params[0]);
        let jacobian = if compute_jacobian {
            Some(numerical_jacobian(params, &[VariableType::SE3], 6, |p| {
                Ok(self.residual(p[0]))
            })?)
        } else {
            None
        };
        Ok(LinearizationResult::new(residual, jacobian, 6))
    }

    fn residual_dim(&self) -> usize {
        6
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        6
    }
}
