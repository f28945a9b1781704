use std::collections::{BTreeMap, HashMap};

use faer::prelude::SpSolver;
use faer::Mat;
use rayon::prelude::*;

use super::OptimizerError;
use crate::core::{FactorError, LinearizationResult, Problem, ProblemError};

/// Deterministic variable ordering and tangent-space offsets.
///
/// Variables kept in the reduced system come first, followed by the
/// marginalized ones. Both groups are ordered by name so the same problem
/// always produces the same normal equations regardless of hash map iteration
/// order.
#[derive(Debug, Clone)]
pub struct VariableLayout {
    /// Variable names in solve order.
    pub var_names: Vec<String>,
    /// Position of each name in `var_names`.
    pub var_index_map: HashMap<String, usize>,
    /// Offset of each variable block in the stacked tangent vector.
    pub local_starts: Vec<usize>,
    /// Tangent dimension of each variable.
    pub local_dims: Vec<usize>,
    /// Sum of all tangent dimensions.
    pub total_local_dim: usize,
    /// Number of leading variables solved in the reduced system.
    pub num_reduced: usize,
    /// Tangent dimension of the reduced system.
    pub reduced_dim: usize,
}

impl VariableLayout {
    /// Compute the layout for the variables currently in `problem`.
    pub fn from_problem(problem: &Problem) -> Self {
        let variables = problem.get_variables();
        let (mut marginalized, mut reduced): (Vec<String>, Vec<String>) = variables
            .keys()
            .cloned()
            .partition(|name| problem.is_marginalized(name));
        reduced.sort();
        marginalized.sort();

        let num_reduced = reduced.len();
        let var_names: Vec<String> = reduced.into_iter().chain(marginalized).collect();

        let var_index_map: HashMap<String, usize> = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut total_local_dim = 0;
        let mut reduced_dim = 0;
        let mut local_dims = Vec::with_capacity(var_names.len());
        let mut local_starts = Vec::with_capacity(var_names.len());
        for (idx, name) in var_names.iter().enumerate() {
            local_starts.push(total_local_dim);
            let dim = variables[name].local_dim();
            local_dims.push(dim);
            total_local_dim += dim;
            if idx < num_reduced {
                reduced_dim = total_local_dim;
            }
        }

        Self {
            var_names,
            var_index_map,
            local_starts,
            local_dims,
            total_local_dim,
            num_reduced,
            reduced_dim,
        }
    }

    /// Number of variables eliminated with the Schur complement.
    pub fn num_marginalized(&self) -> usize {
        self.var_names.len() - self.num_reduced
    }
}

/// Gauss-Newton normal equations `J^T J` and `J^T r` in block form.
///
/// `J^T J` is split into a dense block over the reduced variables, one
/// diagonal block per marginalized variable and the sparse coupling blocks
/// between the two groups. Without marginalized variables `jtj` is the whole
/// matrix.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    /// `J^T J` over the reduced variables, `reduced_dim x reduced_dim`.
    pub jtj: Mat<f64>,
    /// Diagonal block of every marginalized variable, row-major.
    pub marginal_blocks: Vec<Vec<f64>>,
    /// Coupling blocks of every marginalized variable keyed by the index of the
    /// reduced variable, row-major `reduced dim x marginalized dim`.
    pub coupling: Vec<BTreeMap<usize, Vec<f64>>>,
    /// Gradient of half the cost over all variables.
    pub jtr: Vec<f64>,
}

/// Inverse of a damped marginalized block and its scaled coupling blocks.
struct Elimination {
    dim: usize,
    /// `D^-1`, row-major.
    inverse: Vec<f64>,
    /// `W_r D^-1` for every coupled reduced variable `r`.
    scaled: Vec<(usize, Vec<f64>)>,
    /// Right hand side `-J_m^T r` of the marginalized variable.
    rhs: Vec<f64>,
}

impl NormalEquations {
    /// Euclidean norm of the gradient.
    pub fn gradient_norm(&self) -> f64 {
        self.jtr.iter().map(|g| g * g).sum::<f64>().sqrt()
    }

    /// Solve `(J^T J + λI) δ = -J^T r` for the full step.
    ///
    /// Marginalized blocks are eliminated first, the reduced camera system
    /// `S δ_c = g_c` is solved densely and the marginalized steps are recovered
    /// by back-substitution.
    pub fn solve_damped(
        &self,
        layout: &VariableLayout,
        lambda: f64,
    ) -> Result<Vec<f64>, OptimizerError> {
        let n = layout.reduced_dim;
        let mut schur = self.jtj.clone();
        for i in 0..n {
            schur.write(i, i, schur.read(i, i) + lambda);
        }
        let mut rhs: Vec<f64> = self.jtr[..n].iter().map(|g| -g).collect();

        let eliminated: Vec<Elimination> = (0..layout.num_marginalized())
            .into_par_iter()
            .map(|m| self.eliminate(layout, m, lambda))
            .collect::<Result<_, _>>()?;

        // S = A - sum W D^-1 W^T, g_c = b_c - sum W D^-1 b_m
        for (elimination, coupling) in eliminated.iter().zip(&self.coupling) {
            let dim_m = elimination.dim;
            for (ra, scaled_a) in &elimination.scaled {
                let start_a = layout.local_starts[*ra];
                let dim_a = layout.local_dims[*ra];
                for i in 0..dim_a {
                    let row = &scaled_a[i * dim_m..(i + 1) * dim_m];
                    rhs[start_a + i] -= dot(row, &elimination.rhs);
                    for (rb, w_b) in coupling {
                        let start_b = layout.local_starts[*rb];
                        for j in 0..layout.local_dims[*rb] {
                            let (r, c) = (start_a + i, start_b + j);
                            let v = dot(row, &w_b[j * dim_m..(j + 1) * dim_m]);
                            schur.write(r, c, schur.read(r, c) - v);
                        }
                    }
                }
            }
        }

        let mut delta = vec![0.0f64; layout.total_local_dim];
        if n > 0 {
            let solution = schur
                .partial_piv_lu()
                .solve(Mat::<f64>::from_fn(n, 1, |i, _| rhs[i]));
            for (i, d) in delta.iter_mut().take(n).enumerate() {
                *d = solution.read(i, 0);
            }
        }

        // δ_m = D^-1 (b_m - W^T δ_c)
        for (m, (elimination, coupling)) in eliminated.iter().zip(&self.coupling).enumerate() {
            let dim_m = elimination.dim;
            let mut b = elimination.rhs.clone();
            for (r, w) in coupling {
                let start_r = layout.local_starts[*r];
                for i in 0..layout.local_dims[*r] {
                    let dc = delta[start_r + i];
                    for (k, bk) in b.iter_mut().enumerate() {
                        *bk -= w[i * dim_m + k] * dc;
                    }
                }
            }
            let start_m = layout.local_starts[layout.num_reduced + m];
            for k in 0..dim_m {
                delta[start_m + k] = dot(&elimination.inverse[k * dim_m..(k + 1) * dim_m], &b);
            }
        }

        if delta.iter().any(|d| !d.is_finite()) {
            return Err(OptimizerError::SolveFailed(
                "damped system produced a non-finite step".to_string(),
            ));
        }
        Ok(delta)
    }

    /// Invert the damped block of the `m`-th marginalized variable.
    fn eliminate(
        &self,
        layout: &VariableLayout,
        m: usize,
        lambda: f64,
    ) -> Result<Elimination, OptimizerError> {
        let idx = layout.num_reduced + m;
        let dim = layout.local_dims[idx];
        let start = layout.local_starts[idx];
        let block = &self.marginal_blocks[m];

        let damped = Mat::<f64>::from_fn(dim, dim, |i, j| {
            block[i * dim + j] + if i == j { lambda } else { 0.0 }
        });
        let identity = Mat::<f64>::from_fn(dim, dim, |i, j| if i == j { 1.0 } else { 0.0 });
        let inverse_mat = damped.partial_piv_lu().solve(identity);
        let inverse: Vec<f64> = (0..dim * dim)
            .map(|k| inverse_mat.read(k / dim, k % dim))
            .collect();
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::SolveFailed(format!(
                "singular block for '{}'",
                layout.var_names[idx]
            )));
        }

        let scaled = self.coupling[m]
            .iter()
            .map(|(&r, w)| {
                let dim_r = layout.local_dims[r];
                let mut out = vec![0.0f64; dim_r * dim];
                for i in 0..dim_r {
                    for k in 0..dim {
                        out[i * dim + k] = (0..dim)
                            .map(|l| w[i * dim + l] * inverse[l * dim + k])
                            .sum();
                    }
                }
                (r, out)
            })
            .collect();

        Ok(Elimination {
            dim,
            inverse,
            scaled,
            rhs: self.jtr[start..start + dim].iter().map(|g| -g).collect(),
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `J_a^T J_b` for two column blocks `(offset, dim)` of a row-major Jacobian.
fn block_product(
    jacobian: &[f64],
    rows: usize,
    cols: usize,
    (col_a, dim_a): (usize, usize),
    (col_b, dim_b): (usize, usize),
) -> Vec<f64> {
    let mut out = vec![0.0f64; dim_a * dim_b];
    for row in jacobian.chunks_exact(cols).take(rows) {
        for i in 0..dim_a {
            let a = row[col_a + i];
            if a == 0.0 {
                continue;
            }
            for j in 0..dim_b {
                out[i * dim_b + j] += a * row[col_b + j];
            }
        }
    }
    out
}

/// Builds normal equations from factors for a given layout.
pub struct LinearSystemBuilder;

impl LinearSystemBuilder {
    /// Linearize every factor and accumulate the block normal equations.
    ///
    /// Factors are linearized in parallel; accumulation runs in factor order so
    /// the floating point result does not depend on thread scheduling.
    pub fn build(
        problem: &Problem,
        layout: &VariableLayout,
    ) -> Result<NormalEquations, OptimizerError> {
        let factors = problem.get_factors();

        let linearized: Vec<LinearizationResult> = factors
            .par_iter()
            .map(|(factor, var_names)| {
                let params = problem.factor_params(var_names)?;
                factor
                    .linearize(&params, true)
                    .map_err(ProblemError::FactorEvaluation)
            })
            .collect::<Result<_, ProblemError>>()?;

        let n = layout.reduced_dim;
        let mut jtj = Mat::<f64>::zeros(n, n);
        let mut marginal_blocks: Vec<Vec<f64>> = layout.local_dims[layout.num_reduced..]
            .iter()
            .map(|dim| vec![0.0f64; dim * dim])
            .collect();
        let mut coupling: Vec<BTreeMap<usize, Vec<f64>>> =
            vec![BTreeMap::new(); layout.num_marginalized()];
        let mut jtr = vec![0.0f64; layout.total_local_dim];

        for ((_, var_names), result) in factors.iter().zip(&linearized) {
            let jacobian = result.jacobian.as_ref().ok_or_else(|| {
                FactorError::JacobianFailed("Jacobian required for optimization".to_string())
            })?;

            // (variable index, column offset in the factor Jacobian)
            let mut blocks: Vec<(usize, usize)> = Vec::with_capacity(var_names.len());
            let mut factor_col = 0;
            for name in var_names {
                let idx = *layout
                    .var_index_map
                    .get(name)
                    .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })?;
                blocks.push((idx, factor_col));
                factor_col += layout.local_dims[idx];
            }

            let cols = result.total_local_dim;
            if cols != factor_col {
                return Err(FactorError::DimensionMismatch {
                    expected: factor_col,
                    actual: cols,
                }
                .into());
            }
            let rows = result.residual_dim();
            if jacobian.len() != rows * cols {
                return Err(FactorError::DimensionMismatch {
                    expected: rows * cols,
                    actual: jacobian.len(),
                }
                .into());
            }
            if cols == 0 {
                continue;
            }

            for &(idx, col) in &blocks {
                let start = layout.local_starts[idx];
                for d in 0..layout.local_dims[idx] {
                    jtr[start + d] += jacobian
                        .chunks_exact(cols)
                        .zip(&result.residual)
                        .map(|(row, r)| row[col + d] * r)
                        .sum::<f64>();
                }
            }

            for &(idx_a, col_a) in &blocks {
                let dim_a = layout.local_dims[idx_a];
                for &(idx_b, col_b) in &blocks {
                    let dim_b = layout.local_dims[idx_b];
                    let reduced_a = idx_a < layout.num_reduced;
                    let reduced_b = idx_b < layout.num_reduced;
                    if !reduced_a && reduced_b {
                        // stored once as the transposed coupling block
                        continue;
                    }
                    if !reduced_a && idx_a != idx_b {
                        return Err(ProblemError::MarginalizedCoupling {
                            first: layout.var_names[idx_a].clone(),
                            second: layout.var_names[idx_b].clone(),
                        }
                        .into());
                    }

                    let product =
                        block_product(jacobian, rows, cols, (col_a, dim_a), (col_b, dim_b));
                    if reduced_a && reduced_b {
                        let start_a = layout.local_starts[idx_a];
                        let start_b = layout.local_starts[idx_b];
                        for i in 0..dim_a {
                            for j in 0..dim_b {
                                let (r, c) = (start_a + i, start_b + j);
                                jtj.write(r, c, jtj.read(r, c) + product[i * dim_b + j]);
                            }
                        }
                        continue;
                    }

                    let target = if reduced_a {
                        coupling[idx_b - layout.num_reduced]
                            .entry(idx_a)
                            .or_insert_with(|| vec![0.0f64; dim_a * dim_b])
                    } else {
                        &mut marginal_blocks[idx_a - layout.num_reduced]
                    };
                    for (t, p) in target.iter_mut().zip(&product) {
                        *t += p;
                    }
                }
            }
        }

        Ok(NormalEquations {
            jtj,
            marginal_blocks,
            coupling,
            jtr,
        })
    }
}
