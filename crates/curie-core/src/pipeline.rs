//! Per-centroid orchestrator: window → spectrum → fit or sample.
//!
//! A [`Pipeline`] is a plain value holding every policy of one analysis run.
//! The sweep, the sampler and the CLI all route through it so a single JSON
//! document describes the whole analysis.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::fit::{fit, FitConfig, FitModel, FitOutcome};
use crate::grid::MagneticGrid;
use crate::sampler::{sample_spectrum, Posterior, SamplingMethod};
use crate::spectrum::{azimuthal_spectrum, radial_spectrum, AzimuthalSpectrum, SpectralConfig, Spectrum, Taper};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Analysis policies applied at every centroid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub taper: Taper,
    pub spectral: SpectralConfig,
    pub model: FitModel,
    pub fit: FitConfig,
}

// ── Stages ────────────────────────────────────────────────────────────────────

impl Pipeline {
    /// Radial spectrum of the window of size `window` centred at `(x, y)`.
    pub fn spectrum_at(&self, grid: &MagneticGrid, window: f64, x: f64, y: f64) -> Result<Spectrum> {
        let w = grid.subgrid(window, x, y)?;
        radial_spectrum(&w, &self.taper, &self.spectral)
    }

    /// Direction-resolved spectrum with sectors of `sector_width` degrees.
    pub fn azimuthal_at(
        &self,
        grid: &MagneticGrid,
        window: f64,
        x: f64,
        y: f64,
        sector_width: f64,
    ) -> Result<AzimuthalSpectrum> {
        let w = grid.subgrid(window, x, y)?;
        azimuthal_spectrum(&w, &self.taper, sector_width, &self.spectral)
    }

    /// Fit the configured model to an already estimated spectrum.
    pub fn fit_spectrum(&self, spectrum: &Spectrum) -> Result<FitOutcome> {
        fit(spectrum, &self.model, &self.fit)
    }

    /// Spectrum plus fit at one centroid.
    pub fn fit_at(&self, grid: &MagneticGrid, window: f64, x: f64, y: f64) -> Result<FitOutcome> {
        let spectrum = self.spectrum_at(grid, window, x, y)?;
        let outcome = self.fit_spectrum(&spectrum)?;
        debug!(x, y, depth = outcome.curie_depth().depth, "centroid fitted");
        Ok(outcome)
    }

    /// Spectrum plus posterior sampling at one centroid.
    pub fn sample_at(
        &self,
        grid: &MagneticGrid,
        window: f64,
        x: f64,
        y: f64,
        method: &SamplingMethod,
        seed: u64,
    ) -> Result<Posterior> {
        let spectrum = self.spectrum_at(grid, window, x, y)?;
        sample_spectrum(&spectrum, &self.model, &self.fit, method, seed)
    }

    /// Copy of this pipeline with every prior removed.
    pub fn without_priors(&self) -> Pipeline {
        let mut out = self.clone();
        out.fit.reset_priors();
        out
    }
}
