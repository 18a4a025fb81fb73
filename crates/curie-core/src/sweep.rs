//! Spatial sweep: one estimate per centroid across a grid.
//!
//! Centroids are independent, so they run through the `parallel` shim.
//! Each task reads the shared grid and returns its own cell; recoverable
//! failures become empty cells with a recorded reason.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CurieError, Result};
use crate::fit::{Prior, Priors};
use crate::grid::MagneticGrid;
use crate::parallel::*;
use crate::params::{CurieDepth, ModelParameters, Parameter};
use crate::pipeline::Pipeline;
use crate::sampler::{Draw, SamplingMethod, Summary};

/// Where to place windows and whether to sample each one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Window size in metres.
    pub window: f64,
    /// Centroid spacing along x; every interior node when `None`.
    #[serde(default)]
    pub spacing_x: Option<f64>,
    #[serde(default)]
    pub spacing_y: Option<f64>,
    /// Sample the posterior at every centroid instead of a single fit.
    #[serde(default)]
    pub uncertainty: Option<SamplingMethod>,
    #[serde(default)]
    pub seed: u64,
}

impl SweepConfig {
    pub fn new(window: f64, spacing: f64) -> Self {
        Self { window, spacing_x: Some(spacing), spacing_y: Some(spacing), uncertainty: None, seed: 0 }
    }
}

/// Depth estimate of one centroid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellEstimate {
    pub x: f64,
    pub y: f64,
    /// Fitted depth and its error, or the posterior mean and std.
    pub depth: CurieDepth,
    /// Bouligand parameters (posterior means when sampling).
    pub params: Option<ModelParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellFailure {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub reason: String,
}

/// Sweep output on the centroid lattice, rows along y.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultField {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    /// Row-major; `None` where the centroid failed.
    pub cells: Vec<Option<CellEstimate>>,
    pub failures: Vec<CellFailure>,
}

impl ResultField {
    pub fn nx(&self) -> usize {
        self.xs.len()
    }

    pub fn ny(&self) -> usize {
        self.ys.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&CellEstimate> {
        self.cells.get(row * self.nx() + col).and_then(Option::as_ref)
    }

    /// Depths as a row-major array, NaN for failed cells.
    pub fn depth_grid(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.map_or(f64::NAN, |c| c.depth.depth)).collect()
    }

    /// Depth errors as a row-major array, NaN for failed cells.
    pub fn error_grid(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.map_or(f64::NAN, |c| c.depth.error)).collect()
    }

    pub fn fitted_count(&self) -> usize {
        self.cells.iter().flatten().count()
    }

    /// Mean and spread of the fitted depths.
    pub fn depth_stats(&self) -> Option<Summary> {
        let depths: Vec<f64> = self.cells.iter().flatten().map(|c| c.depth.depth).collect();
        Summary::of(&depths)
    }

    /// Gaussian priors from the spread of the fitted Bouligand parameters.
    ///
    /// Parameters that did not vary between cells get no prior.
    pub fn derived_priors(&self) -> Result<Priors> {
        let params: Vec<ModelParameters> = self.cells.iter().flatten().filter_map(|c| c.params).collect();
        if params.len() < 2 {
            return Err(CurieError::invalid_parameter(
                "cells",
                params.len(),
                "deriving priors needs at least two fitted Bouligand cells",
            ));
        }
        let mut priors = Priors::default();
        for p in Parameter::ALL {
            let values: Vec<f64> = params.iter().map(|m| m.get(p)).collect();
            if let Some(s) = Summary::of(&values).filter(|s| s.std > 0.0 && s.std.is_finite()) {
                priors.set(p, Some(Prior::new(s.mean, s.std)?));
            }
        }
        Ok(priors)
    }
}

/// Run `pipeline` at every centroid of `grid`.
///
/// Fit failures and degenerate spectra are recorded per cell; any other
/// error aborts the sweep.
pub fn sweep(grid: &MagneticGrid, pipeline: &Pipeline, config: &SweepConfig) -> Result<ResultField> {
    let centroids = grid.centroid_list(config.window, config.spacing_x, config.spacing_y)?;
    info!(
        centroids = centroids.len(),
        window = config.window,
        sampling = config.uncertainty.is_some(),
        "sweep started"
    );

    let outcomes: Vec<Result<CellEstimate>> = (0..centroids.len())
        .into_par_iter()
        .map(|i| {
            let (x, y) = centroids.get(i);
            estimate_cell(grid, pipeline, config, x, y, task_seed(config.seed, i))
        })
        .collect();

    let mut cells = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(cell) => cells.push(Some(cell)),
            Err(e) if e.is_recoverable() => {
                let (x, y) = centroids.get(index);
                warn!(index, x, y, error = %e, "centroid left empty");
                failures.push(CellFailure { index, x, y, reason: e.to_string() });
                cells.push(None);
            }
            Err(e) => return Err(e),
        }
    }

    let field = ResultField { xs: centroids.xs, ys: centroids.ys, cells, failures };
    info!(fitted = field.fitted_count(), failed = field.failures.len(), "sweep finished");
    Ok(field)
}

/// Sweep without priors, derive priors from the result, then sweep again
/// with them. Returns both passes.
pub fn two_pass_sweep(
    grid: &MagneticGrid,
    pipeline: &Pipeline,
    config: &SweepConfig,
) -> Result<(ResultField, ResultField)> {
    let first_pipeline = pipeline.without_priors();
    let first = sweep(grid, &first_pipeline, config)?;
    let priors = first.derived_priors()?;
    info!(priors = priors.len(), "second pass with derived priors");
    let second_pipeline = Pipeline { fit: first_pipeline.fit.with_priors(priors), ..first_pipeline };
    let second = sweep(grid, &second_pipeline, config)?;
    Ok((first, second))
}

fn estimate_cell(
    grid: &MagneticGrid,
    pipeline: &Pipeline,
    config: &SweepConfig,
    x: f64,
    y: f64,
    seed: u64,
) -> Result<CellEstimate> {
    match &config.uncertainty {
        None => {
            let outcome = pipeline.fit_at(grid, config.window, x, y)?;
            Ok(CellEstimate { x, y, depth: outcome.curie_depth(), params: outcome.bouligand_params().copied() })
        }
        Some(method) => {
            let posterior = pipeline.sample_at(grid, config.window, x, y, method, seed)?;
            let depth = Summary::of(&posterior.curie_depths())
                .map(|s| CurieDepth { depth: s.mean, error: s.std })
                .ok_or_else(|| CurieError::invalid_parameter("posterior", "empty", "sampler returned no draws"))?;
            Ok(CellEstimate { x, y, depth, params: mean_parameters(&posterior.draws) })
        }
    }
}

fn mean_parameters(draws: &[Draw]) -> Option<ModelParameters> {
    let mut sum = [0.0; 4];
    let mut count = 0usize;
    for d in draws {
        if let Draw::Bouligand(p) = d {
            for (s, v) in sum.iter_mut().zip(p.to_array()) {
                *s += v;
            }
            count += 1;
        }
    }
    (count > 0).then(|| ModelParameters::from_array(sum.map(|s| s / count as f64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{FitConfig, FitModel};
    use crate::models::Quadrature;
    use crate::spectrum::{Taper, WavenumberRange};
    use crate::synthetic::{bouligand_grid, noisy_bouligand_grid};

    const PERIOD: usize = 65;

    /// A 65-node periodic Bouligand tile repeated 3 × 3. Every 64 km window
    /// then holds exactly one period, so untapered spectra agree everywhere.
    fn tiled_grid() -> MagneticGrid {
        let truth = ModelParameters::new(3.0, 0.5, 10.0, 0.0);
        let tile = bouligand_grid(PERIOD, 1000.0, &truth, &Quadrature { intervals: 128 }, 5).unwrap();
        let n = 3 * PERIOD;
        let mut data = Vec::with_capacity(n * n);
        for r in 0..n {
            for c in 0..n {
                data.push(tile.get(r % PERIOD, c % PERIOD));
            }
        }
        let extent = (n - 1) as f64 * 1000.0;
        MagneticGrid::new(data, n, n, 0.0, extent, 0.0, extent).unwrap()
    }

    fn untapered() -> Pipeline {
        Pipeline {
            taper: Taper::None,
            fit: FitConfig { quadrature: Quadrature { intervals: 128 }, ..FitConfig::default() },
            ..Pipeline::default()
        }
    }

    /// 3 × 3 independent 65-node tiles whose log-periodograms scatter by
    /// `sigma`. A 64 km window at 65 km spacing lands on exactly one tile.
    fn noisy_tiles(sigma: f64) -> MagneticGrid {
        let truth = ModelParameters::new(3.0, 0.5, 10.0, 0.0);
        let quad = Quadrature { intervals: 128 };
        let tiles: Vec<MagneticGrid> = (0..9)
            .map(|seed| noisy_bouligand_grid(PERIOD, 1000.0, &truth, &quad, sigma, 40 + seed).unwrap())
            .collect();
        let n = 3 * PERIOD;
        let mut data = Vec::with_capacity(n * n);
        for r in 0..n {
            for c in 0..n {
                data.push(tiles[(r / PERIOD) * 3 + c / PERIOD].get(r % PERIOD, c % PERIOD));
            }
        }
        let extent = (n - 1) as f64 * 1000.0;
        MagneticGrid::new(data, n, n, 0.0, extent, 0.0, extent).unwrap()
    }

    #[test]
    fn depth_spread_is_bounded_by_injected_noise() {
        let config = SweepConfig::new(64_000.0, 65_000.0);
        let mut spreads = Vec::new();
        for sigma in [0.02, 0.05] {
            let field = sweep(&noisy_tiles(sigma), &untapered(), &config).unwrap();
            assert_eq!((field.nx(), field.ny()), (3, 3));
            assert_eq!(field.fitted_count(), 9, "sigma = {sigma}");
            let stats = field.depth_stats().unwrap();
            // About 9 km of depth scatter per unit of log-power noise.
            assert!(stats.std > 0.0 && stats.std < 25.0 * sigma, "sigma = {sigma}: {stats:?}");
            assert!((stats.mean - 10.5).abs() < 0.5 + 10.0 * sigma, "sigma = {sigma}: {stats:?}");
            spreads.push(stats.std);
        }
        assert!(spreads[1] > spreads[0], "{spreads:?}");
    }

    #[test]
    fn uniform_field_gives_uniform_depths() {
        let grid = tiled_grid();
        let field = sweep(&grid, &untapered(), &SweepConfig::new(64_000.0, 16_000.0)).unwrap();
        assert_eq!((field.nx(), field.ny()), (9, 9));
        assert_eq!(field.fitted_count(), 81);
        assert!(field.failures.is_empty());

        let stats = field.depth_stats().unwrap();
        assert!(stats.std < 0.01, "{stats:?}");
        assert!((stats.mean - 10.5).abs() < 0.5, "{stats:?}");
    }

    #[test]
    fn failed_cells_are_recorded_not_fatal() {
        let grid = tiled_grid();
        // At most two bins fall in range, too few for four parameters.
        let pipeline = Pipeline {
            model: FitModel::Bouligand {
                range: Some(WavenumberRange::new(0.1, 0.25).unwrap()),
                initial: ModelParameters::default(),
            },
            ..untapered()
        };
        let field = sweep(&grid, &pipeline, &SweepConfig::new(64_000.0, 64_000.0)).unwrap();
        assert_eq!(field.cells.len(), 9);
        assert_eq!(field.fitted_count(), 0);
        assert_eq!(field.failures.len(), field.cells.len());
        assert!(field.depth_grid().iter().all(|d| d.is_nan()));
        assert!(field.derived_priors().is_err());
    }

    #[test]
    fn oversized_window_aborts() {
        let grid = tiled_grid();
        let err = sweep(&grid, &untapered(), &SweepConfig::new(400_000.0, 10_000.0)).unwrap_err();
        assert!(matches!(err, CurieError::InvalidParameter { name: "window", .. }));
    }

    #[test]
    fn derived_priors_follow_cell_spread() {
        let cell = |zt: f64, dz: f64| {
            Some(CellEstimate {
                x: 0.0,
                y: 0.0,
                depth: CurieDepth { depth: zt + dz, error: 0.1 },
                params: Some(ModelParameters::new(3.0, zt, dz, 1.0)),
            })
        };
        let field = ResultField {
            xs: vec![0.0, 1.0, 2.0],
            ys: vec![0.0],
            cells: vec![cell(1.0, 10.0), cell(2.0, 12.0), None],
            failures: Vec::new(),
        };
        let priors = field.derived_priors().unwrap();
        assert!(priors.beta.is_none());
        assert!(priors.c.is_none());
        let zt = priors.zt.unwrap();
        let Prior::Gaussian { mean, std } = zt else { panic!("expected a Gaussian prior, got {zt:?}") };
        assert!((mean - 1.5).abs() < 1e-12);
        assert!((std - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert!(priors.dz.is_some());

        let grid = field.depth_grid();
        assert_eq!(grid[..2], [11.0, 14.0]);
        assert!(grid[2].is_nan());
    }

    #[test]
    fn sampled_sweep_reports_posterior_spread() {
        let grid = tiled_grid();
        let config = SweepConfig {
            uncertainty: Some(SamplingMethod::Sensitivity { nsim: 6 }),
            seed: 3,
            ..SweepConfig::new(64_000.0, 128_000.0)
        };
        let field = sweep(&grid, &untapered(), &config).unwrap();
        assert_eq!(field.fitted_count(), 4);
        for cell in field.cells.iter().flatten() {
            assert!(cell.depth.error > 0.0);
            assert!(cell.params.is_some());
        }
        let again = sweep(&grid, &untapered(), &config).unwrap();
        assert_eq!(field, again);
    }

    #[test]
    fn two_pass_attaches_priors_on_second_pass() {
        let grid = tiled_grid();
        let config = SweepConfig {
            uncertainty: Some(SamplingMethod::Sensitivity { nsim: 4 }),
            ..SweepConfig::new(64_000.0, 128_000.0)
        };
        let (first, second) = two_pass_sweep(&grid, &untapered(), &config).unwrap();
        assert_eq!(first.fitted_count(), 4);
        assert_eq!(second.cells.len(), 4);
    }
}
