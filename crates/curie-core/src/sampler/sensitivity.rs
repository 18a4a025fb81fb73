use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, warn};

use super::{Draw, Posterior};
use crate::error::{CurieError, FitFailure, Result};
use crate::fit::{fit, FitConfig, FitModel, FitOutcome, Prior, Priors};
use crate::parallel::*;
use crate::params::Parameter;
use crate::spectrum::Spectrum;

/// Posterior by repeated perturbed fits.
///
/// Each of `nsim` repetitions adds `N(0, σ_i)` noise to every bin, shifts
/// each Gaussian prior mean by one draw of `N(0, std)`, and refits. Uniform
/// priors are kept as they are. Repetitions whose
/// fit fails are skipped and counted; any other error aborts the run.
pub fn sensitivity(
    spectrum: &Spectrum,
    model: &FitModel,
    config: &FitConfig,
    nsim: usize,
    seed: u64,
) -> Result<Posterior> {
    if nsim == 0 {
        return Err(CurieError::invalid_parameter("nsim", nsim, "must be positive"));
    }
    config.priors.validate()?;

    let outcomes: Vec<Result<FitOutcome>> = (0..nsim)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(task_seed(seed, i));
            let perturbed = spectrum.perturbed(&mut rng);
            let config = FitConfig { priors: perturb_priors(&config.priors, &mut rng), ..*config };
            fit(&perturbed, model, &config)
        })
        .collect();

    let mut draws = Vec::with_capacity(nsim);
    let mut failures = 0;
    for (i, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(FitOutcome::Bouligand(f)) => draws.push(Draw::Bouligand(f.params)),
            Ok(FitOutcome::Tanaka(t)) => draws.push(Draw::Tanaka { zt: t.top.depth, zo: t.centroid.depth }),
            Err(CurieError::Fit(reason)) => {
                warn!(repetition = i, %reason, "sensitivity repetition failed");
                failures += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if draws.is_empty() {
        return Err(FitFailure::AllRepetitionsFailed { attempts: nsim }.into());
    }
    debug!(draws = draws.len(), failures, "sensitivity sampling done");
    Ok(Posterior { draws, failures, acceptance_rate: None })
}

fn perturb_priors<R: Rng + ?Sized>(priors: &Priors, rng: &mut R) -> Priors {
    let mut out = *priors;
    for p in Parameter::ALL {
        if let Some(Prior::Gaussian { mean, std }) = priors.get(p) {
            let z: f64 = rng.sample(StandardNormal);
            out.set(p, Some(Prior::Gaussian { mean: mean + std * z, std }));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{bouligand2009, Quadrature};
    use crate::params::ModelParameters;
    use crate::spectrum::WavenumberRange;

    fn synthetic(sigma: f64) -> Spectrum {
        let k: Vec<f64> = (1..=40).map(|i| i as f64 * 0.05).collect();
        let truth = ModelParameters::new(3.0, 0.5, 10.0, 1.0);
        let power = bouligand2009(&k, &truth, &Quadrature { intervals: 128 }).unwrap();
        Spectrum::new(k, power, vec![sigma; 40]).unwrap()
    }

    fn config() -> FitConfig {
        FitConfig { quadrature: Quadrature { intervals: 128 }, ..FitConfig::default() }
    }

    #[test]
    fn same_seed_gives_same_draws() {
        let s = synthetic(0.05);
        let model = FitModel::default();
        let a = sensitivity(&s, &model, &config(), 8, 17).unwrap();
        let b = sensitivity(&s, &model, &config(), 8, 17).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.draws.len() + a.failures, 8);
    }

    #[test]
    fn spread_grows_with_spectral_error() {
        let model = FitModel::default();
        let narrow = sensitivity(&synthetic(0.01), &model, &config(), 20, 3).unwrap();
        let wide = sensitivity(&synthetic(0.1), &model, &config(), 20, 3).unwrap();
        let sd = |p: &Posterior| p.summary().unwrap().curie_depth.std;
        assert!(sd(&narrow) < sd(&wide));
    }

    #[test]
    fn priors_are_shifted_by_their_width() {
        let mut priors = Priors::default();
        priors.set(Parameter::Zt, Some(Prior::new(1.0, 0.5).unwrap()));
        priors.set(Parameter::Dz, Some(Prior::uniform(5.0, 20.0).unwrap()));
        let mut rng = StdRng::seed_from_u64(0);
        let shifted = perturb_priors(&priors, &mut rng);
        match shifted.zt {
            Some(Prior::Gaussian { mean, std }) => {
                assert_ne!(mean, 1.0);
                assert_eq!(std, 0.5);
            }
            other => panic!("expected a Gaussian prior, got {other:?}"),
        }
        assert_eq!(shifted.dz, priors.dz);
        assert!(shifted.beta.is_none());
    }

    #[test]
    fn all_failed_repetitions_are_reported() {
        // Too few bins for any repetition to fit.
        let s = synthetic(0.05);
        let model = FitModel::Bouligand {
            range: Some(WavenumberRange::new(0.1, 0.15).unwrap()),
            initial: ModelParameters::default(),
        };
        assert_eq!(
            sensitivity(&s, &model, &config(), 4, 1).unwrap_err(),
            CurieError::Fit(FitFailure::AllRepetitionsFailed { attempts: 4 })
        );
    }
}
