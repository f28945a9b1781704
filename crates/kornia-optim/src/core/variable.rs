use crate::param::{Param, ParamError, SE3Param, SO3Param};

/// Type of variable in the optimization problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    /// Euclidean space variable (e.g., 3 for a 3d point)
    Euclidean(usize),
    /// SE(3) - 3D rigid transformation (7 params, 6-dim tangent)
    SE3,
    /// SO(3) - 3D rotation (4 params quaternion, 3-dim tangent)
    SO3,
}

impl VariableType {
    /// Global storage dimension (length of the parameter block).
    pub fn global_dim(&self) -> usize {
        match self {
            VariableType::Euclidean(n) => *n,
            VariableType::SE3 => SE3Param::GLOBAL_SIZE,
            VariableType::SO3 => SO3Param::GLOBAL_SIZE,
        }
    }

    /// Local update (tangent space) dimension used by the optimizer.
    pub fn local_dim(&self) -> usize {
        match self {
            VariableType::Euclidean(n) => *n,
            VariableType::SE3 => SE3Param::LOCAL_SIZE,
            VariableType::SO3 => SO3Param::LOCAL_SIZE,
        }
    }

    /// Apply a local update to a global parameter block.
    pub fn plus(&self, x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError> {
        match self {
            VariableType::Euclidean(n) => {
                if x.len() < *n {
                    return Err(ParamError::WrongGlobalSize {
                        expected: *n,
                        got: x.len(),
                    });
                }
                if delta.len() < *n {
                    return Err(ParamError::WrongLocalSize {
                        expected: *n,
                        got: delta.len(),
                    });
                }
                if out.len() < *n {
                    return Err(ParamError::WrongOutSize {
                        expected: *n,
                        got: out.len(),
                    });
                }

                for i in 0..*n {
                    out[i] = x[i] + delta[i];
                }
                Ok(())
            }
            VariableType::SE3 => SE3Param::plus(x, delta, out),
            VariableType::SO3 => SO3Param::plus(x, delta, out),
        }
    }

    /// Apply a local update in-place.
    pub fn apply_plus(&self, values: &mut Vec<f64>, delta: &[f64]) -> Result<(), ParamError> {
        let mut out = vec![0.0f64; self.global_dim()];
        self.plus(values.as_slice(), delta, &mut out)?;
        *values = out;
        Ok(())
    }
}

/// A variable in an optimization problem.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Name of the variable (used for referencing in factors)
    pub name: String,
    /// Type of the variable
    pub var_type: VariableType,
    /// Current parameter values
    pub values: Vec<f64>,
}

impl Variable {
    /// Create a new variable.
    #[inline]
    pub fn new(name: impl Into<String>, var_type: VariableType, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            var_type,
            values,
        }
    }

    /// Create a new Euclidean variable initialized at zero.
    pub fn euclidean(name: impl Into<String>, dim: usize) -> Self {
        Self::new(name, VariableType::Euclidean(dim), vec![0.0; dim])
    }

    /// Create a rigid transform variable from `[qx, qy, qz, qw, tx, ty, tz]`.
    #[inline]
    pub fn se3(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(name, VariableType::SE3, values)
    }

    /// Global (storage) dimension.
    #[inline]
    pub fn global_dim(&self) -> usize {
        self.var_type.global_dim()
    }

    /// Local (tangent) dimension.
    #[inline]
    pub fn local_dim(&self) -> usize {
        self.var_type.local_dim()
    }
}
