//! Parameter estimation against an observed spectrum.

pub mod levenberg;
pub mod linear;

pub use linear::{fit_line, fit_tanaka, fit_tanaka_centroid, fit_tanaka_top, LineFit, RegimeFit, TanakaFit};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use self::levenberg::{minimize, LeastSquaresProblem, LmConfig};
use crate::error::{CurieError, FitFailure, Result};
use crate::models::bouligand::{self, Quadrature};
use crate::params::{clamp_physical, CurieDepth, ModelParameters, Parameter, N_PARAMS};
use crate::spectrum::{Spectrum, WavenumberRange};

/// Prior on one model parameter.
///
/// A Gaussian prior adds one standardized residual to the misfit. A uniform
/// prior adds nothing inside its support and confines the parameter to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prior {
    Gaussian { mean: f64, std: f64 },
    Uniform { min: f64, max: f64 },
}

impl Prior {
    /// Gaussian `N(mean, std²)`.
    pub fn new(mean: f64, std: f64) -> Result<Self> {
        let prior = Prior::Gaussian { mean, std };
        prior.validate()?;
        Ok(prior)
    }

    /// Flat on `[min, max]`.
    pub fn uniform(min: f64, max: f64) -> Result<Self> {
        let prior = Prior::Uniform { min, max };
        prior.validate()?;
        Ok(prior)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Prior::Gaussian { mean, std } if !mean.is_finite() || !std.is_finite() || std <= 0.0 => {
                Err(CurieError::invalid_parameter(
                    "prior",
                    format!("N({mean}, {std})"),
                    "mean must be finite and std positive",
                ))
            }
            Prior::Uniform { min, max } if !min.is_finite() || !max.is_finite() || min >= max => {
                Err(CurieError::invalid_parameter(
                    "prior",
                    format!("U({min}, {max})"),
                    "bounds must be finite with min < max",
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn is_gaussian(&self) -> bool {
        matches!(self, Prior::Gaussian { .. })
    }

    /// Standardized residual `(value − mean) / std`; zero for a uniform prior.
    #[inline]
    pub fn residual(&self, value: f64) -> f64 {
        match *self {
            Prior::Gaussian { mean, std } => (value - mean) / std,
            Prior::Uniform { .. } => 0.0,
        }
    }

    /// Whether `value` has non-zero prior density.
    pub fn contains(&self, value: f64) -> bool {
        match *self {
            Prior::Gaussian { .. } => value.is_finite(),
            Prior::Uniform { min, max } => (min..=max).contains(&value),
        }
    }

    /// `value` moved into the support.
    pub fn clamp(&self, value: f64) -> f64 {
        match *self {
            Prior::Gaussian { .. } => value,
            Prior::Uniform { min, max } => value.clamp(min, max),
        }
    }
}

/// Optional prior per Bouligand parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Priors {
    pub beta: Option<Prior>,
    pub zt: Option<Prior>,
    pub dz: Option<Prior>,
    pub c: Option<Prior>,
}

impl Priors {
    pub fn get(&self, p: Parameter) -> Option<Prior> {
        match p {
            Parameter::Beta => self.beta,
            Parameter::Zt => self.zt,
            Parameter::Dz => self.dz,
            Parameter::C => self.c,
        }
    }

    pub fn set(&mut self, p: Parameter, prior: Option<Prior>) {
        let slot = match p {
            Parameter::Beta => &mut self.beta,
            Parameter::Zt => &mut self.zt,
            Parameter::Dz => &mut self.dz,
            Parameter::C => &mut self.c,
        };
        *slot = prior;
    }

    /// The attached priors in parameter order.
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, Prior)> + '_ {
        Parameter::ALL.into_iter().filter_map(|p| self.get(p).map(|prior| (p, prior)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validate(&self) -> Result<()> {
        self.iter().try_for_each(|(_, prior)| prior.validate())
    }

    /// Number of priors that add a residual to the misfit.
    pub fn gaussian_count(&self) -> usize {
        self.iter().filter(|(_, prior)| prior.is_gaussian()).count()
    }

    /// `Σ ((p − μ)/σ)²` over the Gaussian priors, or `∞` when a parameter
    /// lies outside a uniform prior's support.
    pub fn penalty(&self, params: &ModelParameters) -> f64 {
        let mut total = 0.0;
        for (p, prior) in self.iter() {
            let value = params.get(p);
            if !prior.contains(value) {
                return f64::INFINITY;
            }
            total += prior.residual(value).powi(2);
        }
        total
    }
}

/// Numeric policy and priors for a single fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub priors: Priors,
    /// Weight residuals by the inverse spectral error of each bin.
    pub weighted: bool,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub time_limit_ms: Option<u64>,
    pub quadrature: Quadrature,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            priors: Priors::default(),
            weighted: false,
            max_iterations: 200,
            tolerance: 1e-10,
            time_limit_ms: None,
            quadrature: Quadrature::default(),
        }
    }
}

impl FitConfig {
    pub fn with_priors(self, priors: Priors) -> Self {
        Self { priors, ..self }
    }

    /// Detach every prior.
    pub fn reset_priors(&mut self) {
        self.priors = Priors::default();
    }

    fn validate(&self) -> Result<()> {
        self.priors.validate()?;
        self.quadrature.validate()?;
        if self.max_iterations == 0 {
            return Err(CurieError::invalid_parameter("max_iterations", 0, "must be positive"));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(CurieError::invalid_parameter("tolerance", self.tolerance, "must be positive"));
        }
        Ok(())
    }

    fn lm_config(&self) -> LmConfig {
        LmConfig {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            time_limit: self.time_limit_ms.map(Duration::from_millis),
        }
    }
}

/// Which forward model to fit and over which wavenumbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FitModel {
    /// Full Bouligand fit; the whole spectrum when `range` is `None`.
    Bouligand {
        #[serde(default)]
        range: Option<WavenumberRange>,
        #[serde(default)]
        initial: ModelParameters,
    },
    /// Two independent Tanaka line fits.
    Tanaka {
        top: WavenumberRange,
        centroid: WavenumberRange,
    },
}

impl Default for FitModel {
    fn default() -> Self {
        FitModel::Bouligand { range: None, initial: ModelParameters::default() }
    }
}

/// Best-fit Bouligand parameters with their uncertainties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BouligandFit {
    pub params: ModelParameters,
    pub std_errors: ModelParameters,
    /// Parameter covariance in `[β, z_t, Δz, C]` order.
    pub covariance: [[f64; N_PARAMS]; N_PARAMS],
    /// `½ Σ r²` including prior terms.
    pub misfit: f64,
    pub iterations: usize,
    pub points: usize,
}

impl BouligandFit {
    /// `z_t + Δz` with error `sqrt(σ_t² + σ_Δz² + 2 cov)`.
    pub fn curie_depth(&self) -> CurieDepth {
        let (t, d) = (Parameter::Zt.index(), Parameter::Dz.index());
        let var = self.covariance[t][t] + self.covariance[d][d] + 2.0 * self.covariance[t][d];
        CurieDepth { depth: self.params.curie_depth(), error: var.max(0.0).sqrt() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FitOutcome {
    Bouligand(BouligandFit),
    Tanaka(TanakaFit),
}

impl FitOutcome {
    pub fn curie_depth(&self) -> CurieDepth {
        match self {
            FitOutcome::Bouligand(f) => f.curie_depth(),
            FitOutcome::Tanaka(f) => f.curie_depth(),
        }
    }

    pub fn bouligand_params(&self) -> Option<&ModelParameters> {
        match self {
            FitOutcome::Bouligand(f) => Some(&f.params),
            FitOutcome::Tanaka(_) => None,
        }
    }
}

/// Fit `model` to `spectrum`. Priors apply to the Bouligand model only.
pub fn fit(spectrum: &Spectrum, model: &FitModel, config: &FitConfig) -> Result<FitOutcome> {
    match model {
        FitModel::Bouligand { range, initial } => {
            fit_bouligand(spectrum, range.as_ref(), initial, config).map(FitOutcome::Bouligand)
        }
        FitModel::Tanaka { top, centroid } => {
            fit_tanaka(spectrum, top, centroid, config.weighted).map(FitOutcome::Tanaka)
        }
    }
}

/// Residuals of the Bouligand model: one per bin, one per Gaussian prior.
pub(crate) struct BouligandProblem<'a> {
    pub k: &'a [f64],
    pub observed: &'a [f64],
    /// Per-bin σ, or `None` for an unweighted fit.
    pub sigma: Option<&'a [f64]>,
    pub priors: Vec<(usize, Prior)>,
    /// Uniform priors, enforced by `constrain` and `log_posterior`.
    pub bounds: Vec<(usize, Prior)>,
    pub quadrature: Quadrature,
}

impl<'a> BouligandProblem<'a> {
    pub fn new(sub: &'a Spectrum, config: &FitConfig) -> Result<Self> {
        if let Some(bin) = config.weighted.then(|| sub.error().iter().position(|e| *e <= 0.0)).flatten() {
            return Err(FitFailure::NonPositiveError { bin }.into());
        }
        let (priors, bounds): (Vec<_>, Vec<_>) = config
            .priors
            .iter()
            .map(|(p, prior)| (p.index(), prior))
            .partition(|(_, prior)| prior.is_gaussian());
        Ok(Self {
            k: sub.k(),
            observed: sub.power(),
            sigma: config.weighted.then(|| sub.error()),
            priors,
            bounds,
            quadrature: config.quadrature,
        })
    }

    /// `−½ Σ r²`, or `−∞` outside the physical domain or a uniform prior.
    pub fn log_posterior(&self, params: &[f64], scratch: &mut [f64]) -> f64 {
        if !ModelParameters::from_array([params[0], params[1], params[2], params[3]]).is_physical() {
            return f64::NEG_INFINITY;
        }
        if self.bounds.iter().any(|(idx, prior)| !prior.contains(params[*idx])) {
            return f64::NEG_INFINITY;
        }
        self.residuals(params, scratch);
        let cost = 0.5 * scratch.iter().map(|r| r * r).sum::<f64>();
        if cost.is_finite() {
            -cost
        } else {
            f64::NEG_INFINITY
        }
    }
}

impl LeastSquaresProblem for BouligandProblem<'_> {
    fn n_params(&self) -> usize {
        N_PARAMS
    }

    fn n_residuals(&self) -> usize {
        self.k.len() + self.priors.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        let mp = ModelParameters::from_array([params[0], params[1], params[2], params[3]]);
        let model = bouligand::evaluate(self.k, &mp, &self.quadrature);
        let n = self.k.len();
        for i in 0..n {
            let r = self.observed[i] - model[i];
            out[i] = match self.sigma {
                Some(s) => r / s[i],
                None => r,
            };
        }
        for (j, (idx, prior)) in self.priors.iter().enumerate() {
            out[n + j] = prior.residual(params[*idx]);
        }
    }

    fn constrain(&self, params: &mut [f64]) {
        for (idx, prior) in &self.bounds {
            params[*idx] = prior.clamp(params[*idx]);
        }
        clamp_physical(params);
    }
}

/// Maximum-a-posteriori Bouligand fit over `range` (the whole spectrum when
/// `None`).
///
/// Fails with [`FitFailure::Underdetermined`] when fewer bins than free
/// parameters remain, or exactly as many with no prior to add a degree of
/// freedom.
pub fn fit_bouligand(
    spectrum: &Spectrum,
    range: Option<&WavenumberRange>,
    initial: &ModelParameters,
    config: &FitConfig,
) -> Result<BouligandFit> {
    config.validate()?;
    if let Some(r) = range {
        r.validate()?;
    }
    if !initial.is_finite() {
        return Err(CurieError::invalid_parameter("initial", format!("{initial:?}"), "must be finite"));
    }

    let sub = match range {
        Some(r) => spectrum.restrict(r),
        None => spectrum.clone(),
    };
    let points = sub.len();
    if points < N_PARAMS || (points == N_PARAMS && config.priors.gaussian_count() == 0) {
        return Err(FitFailure::Underdetermined { points, params: N_PARAMS }.into());
    }

    let problem = BouligandProblem::new(&sub, config)?;
    let solution = minimize(&problem, &initial.to_array(), &config.lm_config())?;

    let rows = problem.n_residuals();
    let scale = if config.weighted { 1.0 } else { 2.0 * solution.cost / (rows - N_PARAMS) as f64 };
    let mut covariance = [[0.0; N_PARAMS]; N_PARAMS];
    for (i, row) in covariance.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = solution.covariance[(i, j)] * scale;
        }
    }
    let std = |i: usize| covariance[i][i].max(0.0).sqrt();
    let params = ModelParameters::from_array([
        solution.params[0],
        solution.params[1],
        solution.params[2],
        solution.params[3],
    ]);

    debug!(
        beta = params.beta,
        zt = params.zt,
        dz = params.dz,
        c = params.c,
        misfit = solution.cost,
        iterations = solution.iterations,
        points,
        "bouligand fit"
    );

    Ok(BouligandFit {
        params,
        std_errors: ModelParameters::from_array([std(0), std(1), std(2), std(3)]),
        covariance,
        misfit: solution.cost,
        iterations: solution.iterations,
        points,
    })
}
