//! Levenberg-Marquardt minimization of `½ Σ r_i(p)²`.

use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};

use crate::error::FitFailure;

/// Damping bounds; once λ exceeds the upper bound no downhill step exists.
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;
/// Relative step for central-difference derivatives.
const DIFF_STEP: f64 = 1e-6;

/// A residual vector parameterized by a small dense parameter vector.
pub trait LeastSquaresProblem {
    fn n_params(&self) -> usize;
    fn n_residuals(&self) -> usize;
    /// Write the residuals at `params` into `out`.
    fn residuals(&self, params: &[f64], out: &mut [f64]);
    /// Project `params` back into the feasible region.
    fn constrain(&self, _params: &mut [f64]) {}
}

#[derive(Debug, Clone, Copy)]
pub struct LmConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub time_limit: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct LmSolution {
    pub params: Vec<f64>,
    /// `(JᵀJ)⁻¹` at the solution, unscaled.
    pub covariance: DMatrix<f64>,
    /// `½ Σ r²` at the solution.
    pub cost: f64,
    pub iterations: usize,
}

pub fn minimize<P: LeastSquaresProblem>(
    problem: &P,
    initial: &[f64],
    config: &LmConfig,
) -> Result<LmSolution, FitFailure> {
    let n = problem.n_params();
    let m = problem.n_residuals();
    if m < n {
        return Err(FitFailure::Underdetermined { points: m, params: n });
    }

    let start = Instant::now();
    let mut p = initial.to_vec();
    problem.constrain(&mut p);
    let mut r = vec![0.0; m];
    problem.residuals(&p, &mut r);
    let mut cost = half_sum_sq(&r);
    if !cost.is_finite() {
        return Err(FitFailure::NonFiniteMisfit);
    }

    let mut lambda = LAMBDA_INIT;
    let mut trial = vec![0.0; n];
    let mut trial_r = vec![0.0; m];

    for iteration in 1..=config.max_iterations {
        if let Some(limit) = config.time_limit {
            if start.elapsed() > limit {
                return Err(FitFailure::TimedOut { limit_ms: limit.as_millis() as u64 });
            }
        }

        let jac = jacobian(problem, &p, m)?;
        let jt = jac.transpose();
        let a = &jt * &jac;
        let g = &jt * DVector::from_column_slice(&r);
        if g.amax() <= config.tolerance * (1.0 + cost) {
            return finish(problem, p, cost, iteration);
        }

        let mut accepted = false;
        while lambda <= LAMBDA_MAX {
            let mut damped = a.clone();
            for i in 0..n {
                damped[(i, i)] += lambda * a[(i, i)];
            }
            let Some(chol) = damped.cholesky() else {
                if (0..n).any(|i| a[(i, i)] == 0.0) {
                    return Err(FitFailure::SingularJacobian);
                }
                lambda *= 10.0;
                continue;
            };
            let step = chol.solve(&(-&g));

            for i in 0..n {
                trial[i] = p[i] + step[i];
            }
            problem.constrain(&mut trial);
            problem.residuals(&trial, &mut trial_r);
            let trial_cost = half_sum_sq(&trial_r);

            if trial_cost.is_finite() && trial_cost < cost {
                let step_norm = norm(trial.iter().zip(&p).map(|(a, b)| a - b));
                let p_norm = norm(p.iter().copied());
                let reduction = (cost - trial_cost) / cost;

                p.copy_from_slice(&trial);
                r.copy_from_slice(&trial_r);
                cost = trial_cost;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);
                accepted = true;

                if step_norm <= config.tolerance * (p_norm + config.tolerance)
                    || reduction <= config.tolerance
                {
                    return finish(problem, p, cost, iteration);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // No damping yields a decrease: p is a (local) minimum.
            return finish(problem, p, cost, iteration);
        }
    }

    Err(FitFailure::NotConverged { iterations: config.max_iterations })
}

fn finish<P: LeastSquaresProblem>(
    problem: &P,
    params: Vec<f64>,
    cost: f64,
    iterations: usize,
) -> Result<LmSolution, FitFailure> {
    let jac = jacobian(problem, &params, problem.n_residuals())?;
    let a = jac.transpose() * &jac;
    let covariance = a.cholesky().ok_or(FitFailure::SingularJacobian)?.inverse();
    Ok(LmSolution { params, covariance, cost, iterations })
}

/// Central-difference Jacobian; falls back to a one-sided difference where
/// `constrain` clips the perturbed parameter.
fn jacobian<P: LeastSquaresProblem>(problem: &P, p: &[f64], m: usize) -> Result<DMatrix<f64>, FitFailure> {
    let n = p.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut plus = vec![0.0; m];
    let mut minus = vec![0.0; m];

    for j in 0..n {
        let h = DIFF_STEP * p[j].abs().max(1.0);
        let mut hi = p.to_vec();
        hi[j] += h;
        problem.constrain(&mut hi);
        let mut lo = p.to_vec();
        lo[j] -= h;
        problem.constrain(&mut lo);

        let span = hi[j] - lo[j];
        if span <= 0.0 {
            continue;
        }
        problem.residuals(&hi, &mut plus);
        problem.residuals(&lo, &mut minus);
        for i in 0..m {
            let d = (plus[i] - minus[i]) / span;
            if !d.is_finite() {
                return Err(FitFailure::NonFiniteMisfit);
            }
            jac[(i, j)] = d;
        }
    }
    Ok(jac)
}

fn half_sum_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// y = a · exp(−b x), observed exactly.
    struct Decay {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Decay {
        fn n_params(&self) -> usize {
            2
        }
        fn n_residuals(&self) -> usize {
            self.x.len()
        }
        fn residuals(&self, p: &[f64], out: &mut [f64]) {
            for (i, (x, y)) in self.x.iter().zip(&self.y).enumerate() {
                out[i] = y - p[0] * (-p[1] * x).exp();
            }
        }
        fn constrain(&self, p: &mut [f64]) {
            p[1] = p[1].max(0.0);
        }
    }

    fn config() -> LmConfig {
        LmConfig { max_iterations: 200, tolerance: 1e-12, time_limit: None }
    }

    #[test]
    fn recovers_exact_exponential() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let y = x.iter().map(|x| 3.0 * (-0.7 * x).exp()).collect();
        let sol = minimize(&Decay { x, y }, &[1.0, 0.1], &config()).unwrap();
        assert_relative_eq!(sol.params[0], 3.0, max_relative = 1e-6);
        assert_relative_eq!(sol.params[1], 0.7, max_relative = 1e-6);
        assert!(sol.cost < 1e-12);
    }

    #[test]
    fn too_few_residuals_is_underdetermined() {
        let problem = Decay { x: vec![1.0], y: vec![1.0] };
        assert_eq!(
            minimize(&problem, &[1.0, 1.0], &config()).unwrap_err(),
            FitFailure::Underdetermined { points: 1, params: 2 }
        );
    }

    #[test]
    fn insensitive_parameter_is_singular() {
        // All x = 0: the decay rate has no effect on the residuals.
        let problem = Decay { x: vec![0.0; 5], y: vec![2.0; 5] };
        assert_eq!(minimize(&problem, &[1.0, 0.5], &config()).unwrap_err(), FitFailure::SingularJacobian);
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let y = x.iter().map(|x| 3.0 * (-0.7 * x).exp()).collect();
        let tight = LmConfig { max_iterations: 1, ..config() };
        assert_eq!(
            minimize(&Decay { x, y }, &[1.0, 0.1], &tight).unwrap_err(),
            FitFailure::NotConverged { iterations: 1 }
        );
    }
}
