/// Levenberg-Marquardt least squares with Marquardt diagonal scaling,
/// Nielsen damping updates and a per-problem feasibility projection.
/// All computations in f64.

use crate::types::FitFailure;

/// Convergence and failure policy for one solver call.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SolverConfig {
    /// Iteration cap; reaching it is a `NonConvergence` failure.
    pub max_iterations: usize,
    /// Converged once |step| / |params| drops below this.
    pub tolerance: f64,
    /// Starting damping factor.
    pub initial_damping: f64,
    /// Damping beyond this means no descent direction exists: `IllConditioned`.
    pub max_damping: f64,
    /// A 2D fit whose width exceeds `max_width_ratio` times the largest window
    /// dimension is rejected as `RunawayWidth`.
    pub max_width_ratio: f64,
    /// A 2D fit whose |amplitude| is at most this fraction of the window's
    /// largest |value| has no signal left to pin the center and widths, and is
    /// rejected as `IllConditioned`.
    pub min_amplitude_ratio: f64,
    /// Reject converged fits whose normal equations are numerically singular
    /// (parameter covariance cannot be estimated).
    pub check_conditioning: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_iterations: 100,
            tolerance: 1e-8,
            initial_damping: 1e-3,
            max_damping: 1e12,
            max_width_ratio: 1.0,
            min_amplitude_ratio: 1e-6,
            check_conditioning: true,
        }
    }
}

impl SolverConfig {
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol.abs();
        self
    }

    pub fn with_damping(mut self, initial: f64, max: f64) -> Self {
        self.initial_damping = initial.abs();
        self.max_damping = max.abs().max(self.initial_damping);
        self
    }

    pub fn with_max_width_ratio(mut self, ratio: f64) -> Self {
        self.max_width_ratio = ratio.abs();
        self
    }

    pub fn with_min_amplitude_ratio(mut self, ratio: f64) -> Self {
        self.min_amplitude_ratio = ratio.abs();
        self
    }

    pub fn without_conditioning_check(mut self) -> Self {
        self.check_conditioning = false;
        self
    }
}

/// Smallest pivot of the unit-diagonal normal matrix still considered regular.
const CONDITION_FLOOR: f64 = 1e-12;

/// A least squares problem over a fixed set of samples.
pub(crate) trait LeastSquares {
    fn num_params(&self) -> usize;

    fn num_samples(&self) -> usize;

    /// Fill `residuals` with observed - model and, when requested, `jacobian`
    /// (row-major, samples × params) with d(model)/d(param).
    fn evaluate(&self, params: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>);

    /// Pull a trial point back into the feasible region.
    fn constrain(&self, _trial: &mut [f64], _current: &[f64]) {}
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct SolveReport {
    pub iterations: usize,
    pub cost: f64,
}

/// Minimize the sum of squared residuals starting from `params`, which holds
/// the optimum on success. On failure `params` is left at the last accepted point.
pub(crate) fn levenberg_marquardt<P: LeastSquares>(
    problem: &P,
    params: &mut [f64],
    config: &SolverConfig,
) -> Result<SolveReport, FitFailure> {
    let np = problem.num_params();
    let n = problem.num_samples();
    if n < np {
        return Err(FitFailure::Underdetermined);
    }
    if params.iter().any(|p| !p.is_finite()) {
        return Err(FitFailure::NonFinite);
    }

    let mut residuals = vec![0.0_f64; n];
    let mut trial_residuals = vec![0.0_f64; n];
    let mut jac = vec![0.0_f64; n * np];
    problem.evaluate(params, &mut residuals, Some(&mut jac));
    let mut cost = sum_squares(&residuals);
    if !cost.is_finite() {
        return Err(FitFailure::NonFinite);
    }

    let mut lambda = config.initial_damping;
    let mut nu = 2.0_f64;

    // Scratch space for normal equations
    let mut jtj = vec![0.0_f64; np * np];
    let mut jtr = vec![0.0_f64; np];
    let mut mat = vec![0.0_f64; np * np];
    let mut trial = vec![0.0_f64; np];

    for iter in 1..=config.max_iterations {
        normal_equations(&jac, &residuals, np, &mut jtj, &mut jtr);
        if jtj.iter().chain(jtr.iter()).any(|v| !v.is_finite()) {
            return Err(FitFailure::NonFinite);
        }

        // Damped normal equations
        mat.copy_from_slice(&jtj);
        for p in 0..np {
            mat[p * np + p] += lambda * jtj[p * np + p].max(1e-12);
        }

        let delta = match cholesky_solve(&mat, &jtr, np) {
            Some(d) => d,
            None => {
                lambda *= nu;
                nu *= 2.0;
                if lambda > config.max_damping {
                    return Err(FitFailure::IllConditioned);
                }
                continue;
            }
        };

        for p in 0..np {
            trial[p] = params[p] + delta[p];
        }
        problem.constrain(&mut trial, params);
        problem.evaluate(&trial, &mut trial_residuals, None);
        let new_cost = sum_squares(&trial_residuals);

        // Nielsen gain ratio
        let predicted: f64 = delta
            .iter()
            .enumerate()
            .map(|(i, d)| d * (lambda * jtj[i * np + i].max(1e-12) * d + jtr[i]))
            .sum();

        let gain = if new_cost.is_finite() && predicted > 0.0 {
            (cost - new_cost) / predicted
        } else {
            -1.0
        };
        if gain > 0.0 {
            params.copy_from_slice(&trial);
            cost = new_cost;
            problem.evaluate(params, &mut residuals, Some(&mut jac));
            lambda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * gain - 1.0).powi(3));
            nu = 2.0;
        } else {
            lambda *= nu;
            nu *= 2.0;
            if lambda > config.max_damping {
                return Err(FitFailure::IllConditioned);
            }
        }

        // Convergence
        let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
        let delta_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        if delta_norm / param_norm.max(1e-12) < config.tolerance {
            if config.check_conditioning {
                normal_equations(&jac, &residuals, np, &mut jtj, &mut jtr);
                if !is_well_conditioned(&jtj, np) {
                    return Err(FitFailure::IllConditioned);
                }
            }
            return Ok(SolveReport {
                iterations: iter,
                cost,
            });
        }
    }

    Err(FitFailure::NonConvergence)
}

fn sum_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// J^T J and J^T r for a row-major Jacobian.
fn normal_equations(jac: &[f64], residuals: &[f64], np: usize, jtj: &mut [f64], jtr: &mut [f64]) {
    jtj.fill(0.0);
    jtr.fill(0.0);

    for (row, &r) in jac.chunks_exact(np).zip(residuals) {
        for p in 0..np {
            jtr[p] += row[p] * r;
            for q in p..np {
                jtj[p * np + q] += row[p] * row[q];
            }
        }
    }

    // Fill symmetric lower triangle
    for p in 0..np {
        for q in 0..p {
            jtj[p * np + q] = jtj[q * np + p];
        }
    }
}

/// Scale J^T J to unit diagonal and require every Cholesky pivot to stay
/// above `CONDITION_FLOOR`. A zero column (parameter with no influence)
/// fails immediately.
fn is_well_conditioned(jtj: &[f64], np: usize) -> bool {
    let scale: Vec<f64> = (0..np).map(|i| jtj[i * np + i].sqrt()).collect();
    if scale.iter().any(|s| !(*s > 0.0) || !s.is_finite()) {
        return false;
    }
    let mut unit = vec![0.0_f64; np * np];
    for i in 0..np {
        for j in 0..np {
            unit[i * np + j] = jtj[i * np + j] / (scale[i] * scale[j]);
        }
    }
    cholesky_factor(&unit, np, CONDITION_FLOOR).is_some()
}

/// Cholesky factor L (row-major, lower) of a symmetric matrix, or `None` if a
/// pivot falls to `floor` or below.
fn cholesky_factor(mat: &[f64], np: usize, floor: f64) -> Option<Vec<f64>> {
    let mut l = vec![0.0_f64; np * np];

    for i in 0..np {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i * np + k] * l[j * np + k];
            }
            if i == j {
                let diag = mat[i * np + i] - sum;
                if !(diag > floor) {
                    return None; // Not positive definite
                }
                l[i * np + j] = diag.sqrt();
            } else {
                l[i * np + j] = (mat[i * np + j] - sum) / l[j * np + j];
            }
        }
    }

    Some(l)
}

/// Solve a symmetric positive-definite system via Cholesky.
/// Matrix stored as flat array, row-major, size np×np.
fn cholesky_solve(mat: &[f64], rhs: &[f64], np: usize) -> Option<Vec<f64>> {
    let l = cholesky_factor(mat, np, 0.0)?;

    // Solve L * y = rhs (forward substitution)
    let mut y = vec![0.0_f64; np];
    for i in 0..np {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[i * np + j] * y[j];
        }
        y[i] = (rhs[i] - sum) / l[i * np + i];
    }

    // Solve L^T * x = y (back substitution)
    let mut x = vec![0.0_f64; np];
    for i in (0..np).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..np {
            sum += l[j * np + i] * x[j]; // L^T[i][j] = L[j][i]
        }
        x[i] = (y[i] - sum) / l[i * np + i];
    }

    Some(x)
}
