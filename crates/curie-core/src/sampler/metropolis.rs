use std::time::{Duration, Instant};

use nalgebra::{Matrix4, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Draw, Posterior};
use crate::error::{CurieError, FitFailure, Result};
use crate::fit::levenberg::LeastSquaresProblem;
use crate::fit::{fit_bouligand, BouligandProblem, FitConfig};
use crate::params::{ModelParameters, N_PARAMS};
use crate::spectrum::{Spectrum, WavenumberRange};

/// Iterations between time-limit checks.
const CLOCK_INTERVAL: usize = 64;
/// Acceptance rate the burn-in steers the covariance-shaped jumps towards.
const TARGET_ACCEPTANCE: f64 = 0.234;
/// `2.38 / sqrt(d)` for `d = 4` parameters.
const INITIAL_SCALE: f64 = 1.19;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetropolisConfig {
    /// Samples kept after burn-in.
    pub nsim: usize,
    /// Samples discarded before `nsim` are recorded.
    pub burnin: usize,
    /// Fixed standard deviation of an independent Gaussian jump per
    /// parameter; the chain then starts at the given initial parameters.
    ///
    /// When `None` the chain starts at the MAP fit and jumps follow its
    /// covariance, with an overall scale tuned during burn-in.
    pub step: Option<ModelParameters>,
    /// Temperature `T ≥ 1` for burn-in acceptance, `min(1, exp(Δ/T))`.
    pub burnin_temperature: f64,
}

impl Default for MetropolisConfig {
    fn default() -> Self {
        Self { nsim: 5000, burnin: 1000, step: None, burnin_temperature: 1.0 }
    }
}

impl MetropolisConfig {
    fn validate(&self) -> Result<()> {
        if self.nsim == 0 {
            return Err(CurieError::invalid_parameter("nsim", self.nsim, "must be positive"));
        }
        if let Some(step) = self.step {
            if step.to_array().iter().any(|s| !s.is_finite() || *s < 0.0) {
                return Err(CurieError::invalid_parameter(
                    "step",
                    format!("{step:?}"),
                    "jump scales must be finite and non-negative",
                ));
            }
        }
        if !self.burnin_temperature.is_finite() || self.burnin_temperature < 1.0 {
            return Err(CurieError::invalid_parameter(
                "burnin_temperature",
                self.burnin_temperature,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// How candidate states are drawn around the current one.
enum Proposal {
    Independent([f64; N_PARAMS]),
    /// `current + e^{log_scale} L z` with `L Lᵀ` the MAP covariance.
    Correlated { factor: Matrix4<f64>, log_scale: f64 },
}

impl Proposal {
    fn draw<R: Rng + ?Sized>(&self, current: &[f64; N_PARAMS], rng: &mut R) -> [f64; N_PARAMS] {
        let z: [f64; N_PARAMS] = std::array::from_fn(|_| rng.sample(StandardNormal));
        match self {
            Proposal::Independent(step) => std::array::from_fn(|j| current[j] + step[j] * z[j]),
            Proposal::Correlated { factor, log_scale } => {
                let jump = factor * Vector4::from(z) * log_scale.exp();
                std::array::from_fn(|j| current[j] + jump[j])
            }
        }
    }

    /// Robbins-Monro update of the jump scale from one acceptance probability.
    fn adapt(&mut self, alpha: f64, iteration: usize) {
        if let Proposal::Correlated { log_scale, .. } = self {
            *log_scale += (alpha - TARGET_ACCEPTANCE) / ((iteration + 1) as f64).sqrt();
        }
    }

    fn scale(&self) -> f64 {
        match self {
            Proposal::Independent(_) => 1.0,
            Proposal::Correlated { log_scale, .. } => log_scale.exp(),
        }
    }
}

/// Lower Cholesky factor of a fit covariance, or its marginal widths when
/// the matrix is not positive definite.
fn covariance_factor(covariance: &[[f64; N_PARAMS]; N_PARAMS]) -> Result<Matrix4<f64>> {
    if covariance.iter().flatten().any(|v| !v.is_finite()) {
        return Err(FitFailure::SingularJacobian.into());
    }
    let m = Matrix4::from_fn(|i, j| covariance[i][j]);
    if let Some(chol) = m.cholesky() {
        return Ok(chol.l());
    }
    if (0..N_PARAMS).any(|i| covariance[i][i] <= 0.0) {
        return Err(FitFailure::SingularJacobian.into());
    }
    Ok(Matrix4::from_fn(|i, j| if i == j { covariance[i][i].sqrt() } else { 0.0 }))
}

/// Random-walk Metropolis-Hastings over the Bouligand parameters.
///
/// The log-posterior is the Gaussian log-likelihood of the spectrum under
/// its per-bin errors plus the prior terms, whatever `config.weighted`
/// says; states outside the physical domain have zero density.
///
/// With [`MetropolisConfig::step`] unset the chain starts at the weighted
/// MAP fit from `initial` and proposes jumps shaped by the fit covariance.
/// With explicit steps it starts at `initial` and jumps independently.
pub fn metropolis_hastings(
    spectrum: &Spectrum,
    range: Option<&WavenumberRange>,
    initial: &ModelParameters,
    config: &FitConfig,
    mh: &MetropolisConfig,
    seed: u64,
) -> Result<Posterior> {
    mh.validate()?;
    config.priors.validate()?;
    config.quadrature.validate()?;
    let sub = match range {
        Some(r) => {
            r.validate()?;
            spectrum.restrict(r)
        }
        None => spectrum.clone(),
    };
    if sub.is_empty() {
        return Err(FitFailure::Underdetermined { points: 0, params: N_PARAMS }.into());
    }

    let weighted = FitConfig { weighted: true, ..*config };
    let problem = BouligandProblem::new(&sub, &weighted)?;
    let (mut current, mut proposal) = match mh.step {
        Some(step) => (initial.to_array(), Proposal::Independent(step.to_array())),
        None => {
            let map = fit_bouligand(&sub, None, initial, &weighted)?;
            let factor = covariance_factor(&map.covariance)?;
            (map.params.to_array(), Proposal::Correlated { factor, log_scale: INITIAL_SCALE.ln() })
        }
    };

    let mut scratch = vec![0.0; problem.n_residuals()];
    let mut current_lp = problem.log_posterior(&current, &mut scratch);
    if !current_lp.is_finite() {
        return Err(FitFailure::NonFiniteMisfit.into());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let start = Instant::now();
    let limit = config.time_limit_ms.map(Duration::from_millis);

    let mut draws = Vec::with_capacity(mh.nsim);
    let mut accepted = 0usize;

    for i in 0..mh.burnin + mh.nsim {
        if let Some(limit) = limit {
            if i % CLOCK_INTERVAL == 0 && start.elapsed() > limit {
                return Err(FitFailure::TimedOut { limit_ms: limit.as_millis() as u64 }.into());
            }
        }
        let sampling = i >= mh.burnin;
        let temperature = if sampling { 1.0 } else { mh.burnin_temperature };

        let candidate = proposal.draw(&current, &mut rng);
        let candidate_lp = problem.log_posterior(&candidate, &mut scratch);
        let delta = candidate_lp - current_lp;
        let u: f64 = rng.gen();
        if candidate_lp.is_finite() && u.ln() < delta / temperature {
            current = candidate;
            current_lp = candidate_lp;
            if sampling {
                accepted += 1;
            }
        }
        if sampling {
            draws.push(Draw::Bouligand(ModelParameters::from_array(current)));
        } else {
            // Tuned against the untempered acceptance probability.
            let alpha = if candidate_lp.is_finite() { delta.min(0.0).exp() } else { 0.0 };
            proposal.adapt(alpha, i);
        }
    }

    let acceptance_rate = accepted as f64 / mh.nsim as f64;
    debug!(
        nsim = mh.nsim,
        burnin = mh.burnin,
        acceptance_rate,
        scale = proposal.scale(),
        "metropolis chain done"
    );
    Ok(Posterior { draws, failures: 0, acceptance_rate: Some(acceptance_rate) })
}
