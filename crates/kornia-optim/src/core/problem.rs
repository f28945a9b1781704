//! Problem struct for factor graph optimization
//!
//! A Problem owns the variables being optimized and the factors that constrain them.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::factor::{Factor, FactorError};
use super::variable::Variable;

/// Errors that can occur when assembling or evaluating a problem.
#[derive(Debug, Error)]
pub enum ProblemError {
    /// Variable with this name already exists
    #[error("Variable '{name}' already exists")]
    DuplicateVariable {
        /// Offending variable name.
        name: String,
    },

    /// Variable with this name was not found
    #[error("Variable '{name}' not found")]
    VariableNotFound {
        /// Missing variable name.
        name: String,
    },

    /// Initial values do not match the variable storage size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Provided dimension.
        actual: usize,
    },

    /// A factor references a different number of variables than it declares
    #[error("Factor connects {declared} variables but {provided} names were given")]
    ArityMismatch {
        /// Number of variables the factor declares.
        declared: usize,
        /// Number of names supplied.
        provided: usize,
    },

    /// Two marginalized variables are connected by the same factor
    #[error("Marginalized variables '{first}' and '{second}' share a factor")]
    MarginalizedCoupling {
        /// First marginalized variable of the factor.
        first: String,
        /// Second marginalized variable of the factor.
        second: String,
    },

    /// Factor evaluation failed
    #[error("Factor evaluation failed: {0}")]
    FactorEvaluation(#[from] FactorError),
}

/// A boxed factor together with the names of the variables it connects.
pub type FactorEntry = (Box<dyn Factor>, Vec<String>);

/// An optimization problem containing variables and factors.
#[derive(Default)]
pub struct Problem {
    variables: HashMap<String, Variable>,
    factors: Vec<FactorEntry>,
    marginalized: HashSet<String>,
}

impl Problem {
    /// Create a new empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable and set its initial values.
    pub fn add_variable(
        &mut self,
        mut var: Variable,
        initial_values: Vec<f64>,
    ) -> Result<(), ProblemError> {
        if self.variables.contains_key(&var.name) {
            return Err(ProblemError::DuplicateVariable {
                name: var.name.clone(),
            });
        }
        if initial_values.len() != var.global_dim() {
            return Err(ProblemError::DimensionMismatch {
                expected: var.global_dim(),
                actual: initial_values.len(),
            });
        }
        var.values = initial_values;
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    /// Attach a factor to already registered variables.
    pub fn add_factor(
        &mut self,
        factor: Box<dyn Factor>,
        var_names: Vec<String>,
    ) -> Result<(), ProblemError> {
        if factor.num_variables() != var_names.len() {
            return Err(ProblemError::ArityMismatch {
                declared: factor.num_variables(),
                provided: var_names.len(),
            });
        }
        for name in &var_names {
            if !self.variables.contains_key(name) {
                return Err(ProblemError::VariableNotFound { name: name.clone() });
            }
        }
        self.factors.push((factor, var_names));
        Ok(())
    }

    /// Eliminate a variable with the Schur complement when solving.
    ///
    /// A marginalized variable may only share factors with variables that are
    /// not marginalized, so its block of the normal equations stays diagonal.
    pub fn set_marginalized(&mut self, name: &str) -> Result<(), ProblemError> {
        if !self.variables.contains_key(name) {
            return Err(ProblemError::VariableNotFound {
                name: name.to_string(),
            });
        }
        self.marginalized.insert(name.to_string());
        Ok(())
    }

    /// Whether `name` is eliminated with the Schur complement.
    pub fn is_marginalized(&self, name: &str) -> bool {
        self.marginalized.contains(name)
    }

    /// Variables indexed by name.
    pub fn get_variables(&self) -> &HashMap<String, Variable> {
        &self.variables
    }

    /// Mutable access to the variables.
    pub fn get_variables_mut(&mut self) -> &mut HashMap<String, Variable> {
        &mut self.variables
    }

    /// All factors with the names of their connected variables.
    pub fn get_factors(&self) -> &[FactorEntry] {
        &self.factors
    }

    /// Current values of a variable.
    pub fn variable_values(&self, name: &str) -> Result<&[f64], ProblemError> {
        self.variables
            .get(name)
            .map(|v| v.values.as_slice())
            .ok_or_else(|| ProblemError::VariableNotFound {
                name: name.to_string(),
            })
    }

    /// Gather the parameter blocks of the variables a factor connects.
    pub(crate) fn factor_params<'a>(
        &'a self,
        var_names: &[String],
    ) -> Result<Vec<&'a [f64]>, ProblemError> {
        var_names
            .iter()
            .map(|name| self.variable_values(name))
            .collect()
    }

    /// Sum of squared whitened residuals over all factors.
    pub fn compute_total_cost(&self) -> Result<f64, ProblemError> {
        let mut total_cost = 0.0;
        for (factor, var_names) in &self.factors {
            let params = self.factor_params(var_names)?;
            let result = factor.linearize(&params, false)?;
            total_cost += result.squared_norm();
        }
        Ok(total_cost)
    }
}
