#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Variables, factors and problems of a factor graph.
pub mod core;

/// Rotation group helpers used by the manifold parameterizations.
pub mod lie;

/// Local parameterizations for optimization on manifolds.
pub mod param;

/// Nonlinear least squares solvers.
pub mod solvers;

pub use crate::core::{
    numerical_jacobian, Factor, FactorEntry, FactorError, FactorResult, LinearizationResult,
    PriorFactor, Problem, ProblemError, Variable, VariableType,
};
pub use crate::solvers::{
    LevenbergMarquardt, OptimizerError, OptimizerResult, OptimizerState, TerminationReason,
};
