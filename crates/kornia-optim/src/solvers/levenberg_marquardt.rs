//! Levenberg-Marquardt optimizer for non-linear least squares optimization
//!
//! Each iteration solves the damped normal equations `(J^T J + λI) δ = -J^T r`
//! and applies `δ` through the manifold `plus` of every variable. Steps that do
//! not decrease the cost are reverted and the damping is increased.
//!
//! Variables marked with [`Problem::set_marginalized`] are eliminated with the
//! Schur complement, so only the reduced system over the remaining variables
//! is factored densely.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::linear_system::{LinearSystemBuilder, VariableLayout};
use crate::core::{FactorError, Problem, ProblemError};
use crate::param::ParamError;

/// Errors that can occur during optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Problem-related error
    #[error("Problem error: {0}")]
    Problem(#[from] ProblemError),

    /// Factor evaluation failed
    #[error("Factor evaluation failed: {0}")]
    Factor(#[from] FactorError),

    /// Linear system solve failed (singular matrix)
    #[error("Linear system solve failed: {0}")]
    SolveFailed(String),

    /// Numerical instability detected
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Parameter update failed
    #[error("Parameter update failed: {0}")]
    Param(#[from] ParamError),
}

/// Result of an optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerResult {
    /// Cost before the first iteration
    pub initial_cost: f64,
    /// Final cost (sum of squared residuals)
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Reason for termination
    pub termination_reason: TerminationReason,
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// Converged: cost change below tolerance
    CostConverged,
    /// Converged: gradient norm below tolerance
    GradientConverged,
    /// Maximum iterations reached
    MaxIterations,
    /// Lambda exceeded maximum (likely numerical issues)
    LambdaMaxExceeded,
    /// Optimization stopped early by user callback
    Interrupted,
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter
    pub lambda_init: f64,
    /// Maximum damping parameter
    pub lambda_max: f64,
    /// Factor for lambda adaptation
    pub lambda_factor: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence threshold for the relative cost change
    pub cost_tolerance: f64,
    /// Convergence threshold for gradient norm
    pub gradient_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 50,
            cost_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
        }
    }
}

/// Snapshot of the optimizer state for callbacks.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerState {
    /// Number of completed iterations.
    pub iteration: usize,
    /// Cost at the current variable values.
    pub cost: f64,
    /// Current damping.
    pub lambda: f64,
    /// Whether the last step was accepted, `None` before the first step.
    pub last_step_accepted: Option<bool>,
}

impl LevenbergMarquardt {
    /// Minimum step norm threshold. Steps smaller than this are considered zero.
    const STEP_SIZE_TOLERANCE: f64 = 1e-12;

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative cost and gradient convergence tolerances.
    pub fn with_tolerances(mut self, cost_tolerance: f64, gradient_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    /// Minimize the total cost of `problem`, updating its variables in place.
    pub fn optimize(&self, problem: &mut Problem) -> Result<OptimizerResult, OptimizerError> {
        self.optimize_with_callback(problem, |_problem, _state| true)
    }

    /// Like [`Self::optimize`], calling `callback` after every iteration.
    ///
    /// Returning `false` from the callback stops the optimization with
    /// [`TerminationReason::Interrupted`], keeping the current values.
    pub fn optimize_with_callback<F>(
        &self,
        problem: &mut Problem,
        mut callback: F,
    ) -> Result<OptimizerResult, OptimizerError>
    where
        F: FnMut(&Problem, &OptimizerState) -> bool,
    {
        if problem.get_variables().is_empty() {
            return Err(OptimizerError::NumericalInstability(
                "No variables in problem".to_string(),
            ));
        }
        if problem.get_factors().is_empty() {
            return Err(OptimizerError::NumericalInstability(
                "No factors in problem".to_string(),
            ));
        }

        let layout = VariableLayout::from_problem(problem);
        if layout.total_local_dim == 0 {
            return Err(OptimizerError::NumericalInstability(
                "Total parameter dimension is zero".to_string(),
            ));
        }

        let initial_cost = problem.compute_total_cost()?;
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "initial cost is not finite: {initial_cost}"
            )));
        }

        let mut current_cost = initial_cost;
        let mut lambda = self.lambda_init;
        let mut iterations = 0;

        let finish = |final_cost: f64, iterations: usize, termination_reason: TerminationReason| {
            OptimizerResult {
                initial_cost,
                final_cost,
                iterations,
                termination_reason,
            }
        };

        let init_state = OptimizerState {
            iteration: 0,
            cost: current_cost,
            lambda,
            last_step_accepted: None,
        };
        if !callback(problem, &init_state) {
            return Ok(finish(current_cost, iterations, TerminationReason::Interrupted));
        }

        loop {
            if iterations >= self.max_iterations {
                return Ok(finish(
                    current_cost,
                    iterations,
                    TerminationReason::MaxIterations,
                ));
            }

            let eqs = LinearSystemBuilder::build(problem, &layout)?;

            if eqs.gradient_norm() < self.gradient_tolerance {
                return Ok(finish(
                    current_cost,
                    iterations,
                    TerminationReason::GradientConverged,
                ));
            }

            let delta = eqs.solve_damped(&layout, lambda)?;

            let step_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
            if step_norm < Self::STEP_SIZE_TOLERANCE {
                return Ok(finish(
                    current_cost,
                    iterations,
                    TerminationReason::CostConverged,
                ));
            }

            let snapshot = self.apply_step(problem, &layout, &delta)?;
            let new_cost = problem.compute_total_cost()?;
            iterations += 1;

            let cost_change = current_cost - new_cost;
            let accepted = new_cost.is_finite() && cost_change > 0.0;

            if accepted {
                let relative_change = if current_cost > 0.0 {
                    cost_change / current_cost
                } else {
                    cost_change
                };
                current_cost = new_cost;
                if relative_change < self.cost_tolerance {
                    return Ok(finish(
                        current_cost,
                        iterations,
                        TerminationReason::CostConverged,
                    ));
                }
                lambda = (lambda / self.lambda_factor).max(1e-12);
            } else {
                self.revert_step(problem, &layout, snapshot)?;
                lambda *= self.lambda_factor;
                if lambda > self.lambda_max {
                    return Ok(finish(
                        current_cost,
                        iterations,
                        TerminationReason::LambdaMaxExceeded,
                    ));
                }
            }

            log::trace!(
                "lm iteration {iterations}: cost {current_cost:.6e}, lambda {lambda:.1e}, accepted {accepted}"
            );

            let state = OptimizerState {
                iteration: iterations,
                cost: current_cost,
                lambda,
                last_step_accepted: Some(accepted),
            };
            if !callback(problem, &state) {
                return Ok(finish(current_cost, iterations, TerminationReason::Interrupted));
            }
        }
    }

    /// Apply `delta` to every variable, returning the previous values.
    fn apply_step(
        &self,
        problem: &mut Problem,
        layout: &VariableLayout,
        delta: &[f64],
    ) -> Result<Vec<Vec<f64>>, OptimizerError> {
        let variables = problem.get_variables_mut();
        let mut snapshot = Vec::with_capacity(layout.var_names.len());

        for (idx, name) in layout.var_names.iter().enumerate() {
            let var = variables
                .get_mut(name)
                .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })?;
            snapshot.push(var.values.clone());

            let start = layout.local_starts[idx];
            let block = &delta[start..start + layout.local_dims[idx]];
            var.var_type.apply_plus(&mut var.values, block)?;
        }

        Ok(snapshot)
    }

    /// Revert the step to the previous values.
    fn revert_step(
        &self,
        problem: &mut Problem,
        layout: &VariableLayout,
        snapshot: Vec<Vec<f64>>,
    ) -> Result<(), OptimizerError> {
        let variables = problem.get_variables_mut();
        for (name, old_values) in layout.var_names.iter().zip(snapshot) {
            let var = variables
                .get_mut(name)
                .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })?;
            var.values = old_values;
        }
        Ok(())
    }
}
