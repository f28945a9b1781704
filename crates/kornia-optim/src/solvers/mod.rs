mod levenberg_marquardt;
mod linear_system;

pub use levenberg_marquardt::{
    LevenbergMarquardt, OptimizerError, OptimizerResult, OptimizerState, TerminationReason,
};
pub use linear_system::{LinearSystemBuilder, NormalEquations, VariableLayout};
