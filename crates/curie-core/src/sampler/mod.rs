//! Posterior sampling of model parameters.
//!
//! Two strategies share one output type: repeated perturbed MAP fits
//! ([`sensitivity`]) and a random-walk Metropolis-Hastings chain
//! ([`metropolis`]).

pub mod metropolis;
pub mod sensitivity;

pub use metropolis::{metropolis_hastings, MetropolisConfig};
pub use sensitivity::sensitivity;

use serde::{Deserialize, Serialize};

use crate::error::{CurieError, Result};
use crate::fit::{FitConfig, FitModel};
use crate::grid::MagneticGrid;
use crate::models::compute_tanaka;
use crate::params::{ModelParameters, Parameter};
use crate::pipeline::Pipeline;
use crate::spectrum::Spectrum;

/// How to sample the posterior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SamplingMethod {
    /// `nsim` perturbed refits.
    Sensitivity { nsim: usize },
    /// Metropolis-Hastings; Bouligand model only.
    Metropolis(MetropolisConfig),
}

/// One posterior sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Draw {
    Bouligand(ModelParameters),
    Tanaka { zt: f64, zo: f64 },
}

impl Draw {
    pub fn curie_depth(&self) -> f64 {
        match self {
            Draw::Bouligand(p) => p.curie_depth(),
            Draw::Tanaka { zt, zo } => compute_tanaka(*zt, 0.0, *zo, 0.0).depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Posterior {
    pub draws: Vec<Draw>,
    /// Repetitions that failed and were skipped (sensitivity only).
    pub failures: usize,
    /// Fraction of accepted proposals (Metropolis only).
    pub acceptance_rate: Option<f64>,
}

/// Mean and sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
}

impl Summary {
    /// `None` for an empty sample; a single value has zero spread.
    pub fn of(values: &[f64]) -> Option<Summary> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Some(Summary { mean, std })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosteriorSummary {
    pub curie_depth: Summary,
    /// Per-parameter summaries, by name.
    pub parameters: Vec<(&'static str, Summary)>,
}

impl Posterior {
    pub fn curie_depths(&self) -> Vec<f64> {
        self.draws.iter().map(Draw::curie_depth).collect()
    }

    pub fn summary(&self) -> Option<PosteriorSummary> {
        let curie_depth = Summary::of(&self.curie_depths())?;
        let bouligand: Vec<ModelParameters> = self
            .draws
            .iter()
            .filter_map(|d| match d {
                Draw::Bouligand(p) => Some(*p),
                Draw::Tanaka { .. } => None,
            })
            .collect();

        let mut parameters = Vec::new();
        if bouligand.is_empty() {
            let column = |f: fn(&Draw) -> Option<f64>| -> Vec<f64> { self.draws.iter().filter_map(f).collect() };
            let zt = column(|d| match d {
                Draw::Tanaka { zt, .. } => Some(*zt),
                Draw::Bouligand(_) => None,
            });
            let zo = column(|d| match d {
                Draw::Tanaka { zo, .. } => Some(*zo),
                Draw::Bouligand(_) => None,
            });
            parameters.extend(Summary::of(&zt).map(|s| ("zt", s)));
            parameters.extend(Summary::of(&zo).map(|s| ("zo", s)));
        } else {
            for p in Parameter::ALL {
                let values: Vec<f64> = bouligand.iter().map(|b| b.get(p)).collect();
                parameters.extend(Summary::of(&values).map(|s| (p.name(), s)));
            }
        }
        Some(PosteriorSummary { curie_depth, parameters })
    }
}

/// Sample the posterior of `model` given an observed spectrum.
pub fn sample_spectrum(
    spectrum: &Spectrum,
    model: &FitModel,
    config: &FitConfig,
    method: &SamplingMethod,
    seed: u64,
) -> Result<Posterior> {
    match (method, model) {
        (SamplingMethod::Sensitivity { nsim }, _) => sensitivity(spectrum, model, config, *nsim, seed),
        (SamplingMethod::Metropolis(mh), FitModel::Bouligand { range, initial }) => {
            metropolis_hastings(spectrum, range.as_ref(), initial, config, mh, seed)
        }
        (SamplingMethod::Metropolis(_), FitModel::Tanaka { .. }) => Err(CurieError::invalid_parameter(
            "method",
            "metropolis",
            "Metropolis-Hastings sampling needs the Bouligand model",
        )),
    }
}

/// Window the grid at `centroid`, estimate its spectrum and sample the
/// posterior with the pipeline's model and fit settings.
pub fn sample_posterior(
    grid: &MagneticGrid,
    centroid: (f64, f64),
    window: f64,
    pipeline: &Pipeline,
    method: &SamplingMethod,
    seed: u64,
) -> Result<Posterior> {
    let spectrum = pipeline.spectrum_at(grid, window, centroid.0, centroid.1)?;
    sample_spectrum(&spectrum, &pipeline.model, &pipeline.fit, method, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn summary_uses_sample_std() {
        let s = Summary::of(&[1.0, 2.0, 3.0]).unwrap();
        assert_relative_eq!(s.mean, 2.0);
        assert_relative_eq!(s.std, 1.0);
        assert_eq!(Summary::of(&[5.0]).unwrap().std, 0.0);
        assert!(Summary::of(&[]).is_none());
    }

    #[test]
    fn posterior_summary_reports_every_parameter() {
        let posterior = Posterior {
            draws: vec![
                Draw::Bouligand(ModelParameters::new(3.0, 1.0, 10.0, 0.0)),
                Draw::Bouligand(ModelParameters::new(3.0, 2.0, 12.0, 0.0)),
            ],
            failures: 0,
            acceptance_rate: None,
        };
        let s = posterior.summary().unwrap();
        assert_relative_eq!(s.curie_depth.mean, 12.5);
        assert_eq!(s.parameters.len(), 4);
        assert_eq!(s.parameters[1].0, "zt");
        assert_relative_eq!(s.parameters[1].1.mean, 1.5);
    }

    #[test]
    fn tanaka_draws_use_centroid_formula() {
        let d = Draw::Tanaka { zt: 2.0, zo: 5.0 };
        assert_relative_eq!(d.curie_depth(), 8.0);
        let posterior = Posterior { draws: vec![d], failures: 1, acceptance_rate: None };
        let s = posterior.summary().unwrap();
        assert_eq!(s.parameters.iter().map(|p| p.0).collect::<Vec<_>>(), vec!["zt", "zo"]);
    }

    #[test]
    fn metropolis_requires_bouligand_model() {
        let spectrum = Spectrum::new(vec![0.1, 0.2, 0.3], vec![1.0, 0.5, 0.0], vec![0.1; 3]).unwrap();
        let model = FitModel::Tanaka {
            top: crate::spectrum::WavenumberRange::new(0.1, 0.3).unwrap(),
            centroid: crate::spectrum::WavenumberRange::new(0.1, 0.3).unwrap(),
        };
        let method = SamplingMethod::Metropolis(MetropolisConfig::default());
        assert!(matches!(
            sample_spectrum(&spectrum, &model, &FitConfig::default(), &method, 0),
            Err(CurieError::InvalidParameter { .. })
        ));
    }
}
