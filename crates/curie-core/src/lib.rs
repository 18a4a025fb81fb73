//! Curie-point depth estimation from gridded magnetic anomaly data.
//!
//! The pipeline runs window → spectrum → fit → (sample) at one centroid, or
//! across a whole grid with [`sweep`]:
//!
//! 1. [`windowed_subgrid`] cuts a square window from a [`MagneticGrid`].
//! 2. [`radial_spectrum`] / [`azimuthal_spectrum`] estimate its log-power.
//! 3. [`fit`] matches the Bouligand (2009) or Tanaka (1999) model.
//! 4. [`sample_posterior`] repeats the fit under perturbation, or runs a
//!    Metropolis-Hastings chain, to give a distribution of depths.
//!
//! Lengths on the grid are metres; with the default
//! [`SpectralConfig::scale`] wavenumbers are rad/km and depths km.

pub mod error;
pub mod fft;
pub mod filters;
pub mod fit;
pub mod grid;
pub mod models;
mod parallel;
pub mod params;
pub mod pipeline;
pub mod sampler;
pub mod spectrum;
pub mod sweep;
pub mod synthetic;

pub use error::{CurieError, FitFailure, Result};
pub use fit::{fit, FitConfig, FitModel, FitOutcome, Prior, Priors};
pub use grid::{windowed_subgrid, CentroidList, Direction, MagneticGrid, Window};
pub use models::{bouligand2009, compute_tanaka, maus1995, tanaka_centroid, tanaka_top, Quadrature};
pub use params::{CurieDepth, ModelParameters, Parameter};
pub use pipeline::Pipeline;
pub use sampler::{sample_posterior, MetropolisConfig, Posterior, SamplingMethod};
pub use spectrum::{
    azimuthal_spectrum, radial_spectrum, AzimuthalSpectrum, SpectralConfig, Spectrum, Taper, WavenumberRange,
};
pub use sweep::{sweep, two_pass_sweep, ResultField, SweepConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectral_defaults_are_documented_values() {
        let c = SpectralConfig::default();
        assert_eq!(c.scale, 0.001);
        assert_eq!(c.bin_width, None);
        assert_eq!(c.min_bin_count, 2);
        assert!(!c.detrend);
        assert_eq!(Quadrature::default().intervals, 512);
        assert_eq!(MetropolisConfig::default().burnin_temperature, 1.0);
    }

    #[test]
    fn single_centroid_round_trip() {
        let truth = ModelParameters::new(3.0, 0.5, 10.0, 0.0);
        let quadrature = Quadrature { intervals: 128 };
        let grid = synthetic::bouligand_grid(65, 1000.0, &truth, &quadrature, 2).unwrap();
        let window = windowed_subgrid(&grid, 64_000.0, 32_000.0, 32_000.0).unwrap();
        let spectrum = radial_spectrum(&window, &Taper::None, &SpectralConfig::default()).unwrap();
        let config = FitConfig { quadrature, ..FitConfig::default() };
        let outcome = fit(&spectrum, &FitModel::default(), &config).unwrap();
        assert!((outcome.curie_depth().depth - 10.5).abs() < 0.5);
    }
}
