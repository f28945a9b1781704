mod factor;
mod problem;
mod variable;

pub use factor::{
    numerical_jacobian, Factor, FactorError, FactorResult, LinearizationResult, PriorFactor,
};
pub use problem::{FactorEntry, Problem, ProblemError};
pub use variable::{Variable, VariableType};
