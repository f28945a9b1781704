//! Residual blocks of the factor graph.

use thiserror::Error;

use super::variable::VariableType;
use crate::param::ParamError;

/// Errors raised while evaluating a factor.
#[derive(Debug, Error)]
pub enum FactorError {
    /// Invalid dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Provided dimension.
        actual: usize,
    },

    /// Jacobian computation failed
    #[error("Jacobian computation failed: {0}")]
    JacobianFailed(String),

    /// Invalid parameter values
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Perturbing a parameter block failed
    #[error("Parameter update failed: {0}")]
    Param(#[from] ParamError),
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Residual and optional Jacobian of one factor.
#[derive(Debug, Clone)]
pub struct LinearizationResult {
    /// Whitened residual.
    pub residual: Vec<f64>,
    /// Row-major `residual_dim x total_local_dim` Jacobian.
    pub jacobian: Option<Vec<f64>>,
    /// Number of Jacobian columns.
    pub total_local_dim: usize,
}

impl LinearizationResult {
    /// Create a new linearization result
    pub fn new(residual: Vec<f64>, jacobian: Option<Vec<f64>>, total_local_dim: usize) -> Self {
        Self {
            residual,
            jacobian,
            total_local_dim,
        }
    }

    /// Get the residual dimension
    pub fn residual_dim(&self) -> usize {
        self.residual.len()
    }

    /// Get a specific Jacobian element (row-major order)
    pub fn jacobian_element(&self, row: usize, col: usize) -> Option<f64> {
        self.jacobian
            .as_ref()
            .map(|j| j[row * self.total_local_dim + col])
    }

    /// Squared norm of the residual.
    pub fn squared_norm(&self) -> f64 {
        self.residual.iter().map(|r| r * r).sum()
    }
}

/// A residual block over one or more variables.
///
/// Implementations return residuals already whitened by their noise model, so the
/// solver minimizes the plain sum of squares. Jacobians are taken with respect to
/// the local parameterization of each variable, in the order the variables were
/// attached, and stored row-major.
///
/// Linearization runs on the rayon pool, hence the `Send + Sync` bound.
pub trait Factor: Send + Sync {
    /// Evaluate at `params`, one global parameter block per attached variable.
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult>;

    /// Length of the residual.
    fn residual_dim(&self) -> usize;

    /// Number of attached variables.
    fn num_variables(&self) -> usize;

    /// Tangent dimension of the attached variable `idx`.
    fn variable_local_dim(&self, idx: usize) -> usize;

    /// Number of Jacobian columns.
    fn total_local_dim(&self) -> usize {
        (0..self.num_variables())
            .map(|i| self.variable_local_dim(i))
            .sum()
    }
}

/// Compute a Jacobian by central differences on the local parameterization.
///
/// Every connected variable is perturbed through [`VariableType::plus`], so the
/// columns are derivatives with respect to the tangent space of each variable.
/// The result is row-major with shape `(residual_dim, sum of local dims)`.
pub fn numerical_jacobian<F>(
    params: &[&[f64]],
    var_types: &[VariableType],
    residual_dim: usize,
    residual_fn: F,
) -> FactorResult<Vec<f64>>
where
    F: Fn(&[&[f64]]) -> FactorResult<Vec<f64>>,
{
    const EPS: f64 = 1e-6;

    if params.len() != var_types.len() {
        return Err(FactorError::DimensionMismatch {
            expected: var_types.len(),
            actual: params.len(),
        });
    }

    let total_local_dim: usize = var_types.iter().map(|t| t.local_dim()).sum();
    let mut jacobian = vec![0.0f64; residual_dim * total_local_dim];
    let inv_2eps = 1.0 / (2.0 * EPS);

    let mut col = 0;
    for (var_idx, var_type) in var_types.iter().enumerate() {
        let local_dim = var_type.local_dim();
        let global_dim = var_type.global_dim();
        for k in 0..local_dim {
            let mut delta = vec![0.0f64; local_dim];

            delta[k] = EPS;
            let mut x_plus = vec![0.0f64; global_dim];
            var_type.plus(params[var_idx], &delta, &mut x_plus)?;

            delta[k] = -EPS;
            let mut x_minus = vec![0.0f64; global_dim];
            var_type.plus(params[var_idx], &delta, &mut x_minus)?;

            let mut views: Vec<&[f64]> = params.to_vec();
            views[var_idx] = &x_plus;
            let r_plus = residual_fn(&views)?;
            views[var_idx] = &x_minus;
            let r_minus = residual_fn(&views)?;

            if r_plus.len() != residual_dim || r_minus.len() != residual_dim {
                return Err(FactorError::DimensionMismatch {
                    expected: residual_dim,
                    actual: r_plus.len(),
                });
            }

            for row in 0..residual_dim {
                jacobian[row * total_local_dim + col] = (r_plus[row] - r_minus[row]) * inv_2eps;
            }
            col += 1;
        }
    }

    Ok(jacobian)
}

/// A prior factor that penalizes deviation of a Euclidean variable from a target value.
///
/// Residual: r = (x - target) / sigma
#[derive(Debug, Clone)]
pub struct PriorFactor {
    /// Target value
    pub target: Vec<f64>,
    /// Isotropic standard deviation
    pub sigma: f64,
}

impl PriorFactor {
    /// Create a new prior factor with unit standard deviation.
    pub fn new(target: Vec<f64>) -> Self {
        Self { target, sigma: 1.0 }
    }

    /// Create a new prior factor with an isotropic standard deviation.
    pub fn with_sigma(target: Vec<f64>, sigma: f64) -> Self {
        Self { target, sigma }
    }
}

impl Factor for PriorFactor {
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

        let x = params[0];
        if x.len() != self.target.len() {
            return Err(FactorError::DimensionMismatch {
                expected: self.target.len(),
                actual: x.len(),
            });
        }
        if self.sigma <= 0.0 {
            return Err(FactorError::InvalidParameters(format!(
                "prior sigma must be positive, got {}",
                self.sigma
            )));
        }

        let inv_sigma = 1.0 / self.sigma;
        let residual: Vec<f64> = x
            .iter()
            .zip(&self.target)
            .map(|(xi, ti)| (xi - ti) * inv_sigma)
            .collect();

        // Jacobian is a scaled identity
        let jacobian = if compute_jacobian {
            let n = x.len();
            let mut jac = vec![0.0f64; n * n];
            for i in 0..n {
                jac[i * n + i] = inv_sigma;
            }
            Some(jac)
        } else {
            None
        };

        Ok(LinearizationResult::new(residual, jacobian, x.len()))
    }

    fn residual_dim(&self) -> usize {
        self.target.len()
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        self.target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_prior_factor() {
        let factor = PriorFactor::new(vec![1.0, 2.0, 3.0]);
        let params = [1.5f64, 2.5, 3.5];

        let result = factor.linearize(&[&params[..]], true).unwrap();

        assert_eq!(result.residual.len(), 3);
        for r in &result.residual {
            assert_relative_eq!(*r, 0.5, epsilon = 1e-12);
        }

        let jac = result.jacobian.unwrap();
        assert_eq!(jac.len(), 9);
        assert_relative_eq!(jac[0], 1.0);
        assert_relative_eq!(jac[4], 1.0);
        assert_relative_eq!(jac[8], 1.0);
    }

    #[test]
    fn test_prior_factor_sigma_whitening() {
        let factor = PriorFactor::with_sigma(vec![0.0, 0.0], 0.1);
        let params = [1.0f64, -2.0];
        let result = factor.linearize(&[&params[..]], true).unwrap();
        assert_relative_eq!(result.residual[0], 10.0, epsilon = 1e-12);
        assert_relative_eq!(result.residual[1], -20.0, epsilon = 1e-12);
        assert_relative_eq!(result.squared_norm(), 500.0, epsilon = 1e-9);
        assert_relative_eq!(result.jacobian_element(1, 1).unwrap(), 10.0);
    }

    #[test]
    fn test_factor_dimensions() {
        let factor = PriorFactor::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(factor.residual_dim(), 3);
        assert_eq!(factor.num_variables(), 1);
        assert_eq!(factor.variable_local_dim(0), 3);
        assert_eq!(factor.total_local_dim(), 3);
    }

    #[test]
    fn test_numerical_jacobian_matches_analytic() {
        // r(a, b) = [a0 * b0, a1 + b0^2]
        let a = [2.0f64, -1.0];
        let b = [3.0f64];
        let jac = numerical_jacobian(
            &[&a[..], &b[..]],
            &[VariableType::Euclidean(2), VariableType::Euclidean(1)],
            2,
            |p| Ok(vec![p[0][0] * p[1][0], p[0][1] + p[1][0] * p[1][0]]),
        )
        .unwrap();

        let expected = [3.0, 0.0, 2.0, 0.0, 1.0, 6.0];
        for (j, e) in jac.iter().zip(expected.iter()) {
            assert_relative_eq!(*j, *e, epsilon = 1e-6);
        }
    }
}
