//! Power-spectrum estimation for square windows.
//!
//! Both estimators share one periodogram: the window is optionally
//! detrended, its mean removed, a separable taper applied, and the 2D FFT
//! power normalized by the taper energy. The radial estimator bins samples
//! by |k|; the azimuthal estimator additionally splits them by direction.

pub mod azimuthal;
pub mod radial;
pub mod taper;

pub use azimuthal::{azimuthal_spectrum, AzimuthalSpectrum};
pub use radial::radial_spectrum;
pub use taper::{CustomTaper, Taper};

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CurieError, Result};
use crate::fft::{forward2, wavenumbers};
use crate::grid::Window;

/// Factor converting grid coordinates to the wavenumber unit; 0.001 turns
/// metres into rad/km.
pub const DEFAULT_SCALE: f64 = 0.001;

/// Guards against floor() landing one bin low for |k| on a bin edge.
const BIN_EDGE_EPS: f64 = 1e-9;

/// Options shared by the radial and azimuthal estimators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Multiplier applied to the node spacing before computing wavenumbers.
    pub scale: f64,
    /// Radial bin width in wavenumber units. Defaults to the fundamental
    /// wavenumber of the window.
    pub bin_width: Option<f64>,
    /// Bins with fewer samples are dropped.
    pub min_bin_count: usize,
    /// Remove the least-squares plane before tapering.
    pub detrend: bool,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { scale: DEFAULT_SCALE, bin_width: None, min_bin_count: 2, detrend: false }
    }
}

impl SpectralConfig {
    fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(CurieError::invalid_parameter("scale", self.scale, "must be positive"));
        }
        if let Some(w) = self.bin_width {
            if !w.is_finite() || w <= 0.0 {
                return Err(CurieError::invalid_parameter("bin_width", w, "must be positive"));
            }
        }
        if self.min_bin_count < 2 {
            return Err(CurieError::invalid_parameter(
                "min_bin_count",
                self.min_bin_count,
                "a standard error needs at least 2 samples",
            ));
        }
        Ok(())
    }
}

/// Closed interval of wavenumbers used to restrict a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavenumberRange {
    pub min: f64,
    pub max: f64,
}

impl WavenumberRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min < 0.0 || self.max < self.min {
            return Err(CurieError::invalid_parameter(
                "wavenumber range",
                format!("[{}, {}]", self.min, self.max),
                "must satisfy 0 <= min <= max",
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn contains(&self, k: f64) -> bool {
        k >= self.min && k <= self.max
    }
}

/// One radial (or sector) bin of the log-power spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectralBin {
    /// Mean |k| of the samples in the bin.
    pub k: f64,
    /// Mean log-power.
    pub power: f64,
    /// Standard error of the mean log-power.
    pub error: f64,
    pub count: usize,
}

/// A 1D log-power spectrum: parallel arrays ordered by increasing k.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spectrum {
    k: Vec<f64>,
    power: Vec<f64>,
    error: Vec<f64>,
}

impl Spectrum {
    /// Validate and wrap spectrum arrays, e.g. ones computed elsewhere.
    pub fn new(k: Vec<f64>, power: Vec<f64>, error: Vec<f64>) -> Result<Self> {
        if k.len() != power.len() || k.len() != error.len() {
            return Err(CurieError::invalid_parameter(
                "spectrum",
                format!("{}/{}/{}", k.len(), power.len(), error.len()),
                "k, power and error must have equal lengths",
            ));
        }
        if let Some(i) = k.iter().position(|v| !v.is_finite() || *v <= 0.0) {
            return Err(CurieError::invalid_parameter("k", k[i], "wavenumbers must be positive"));
        }
        if k.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CurieError::invalid_parameter("k", "unsorted", "wavenumbers must increase strictly"));
        }
        if let Some(i) = power.iter().position(|v| !v.is_finite()) {
            return Err(CurieError::invalid_parameter("power", power[i], "must be finite"));
        }
        if let Some(i) = error.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(CurieError::invalid_parameter("error", error[i], "must be finite and non-negative"));
        }
        Ok(Self { k, power, error })
    }

    fn from_bins(bins: impl IntoIterator<Item = SpectralBin>) -> Self {
        let mut s = Self { k: Vec::new(), power: Vec::new(), error: Vec::new() };
        for b in bins {
            s.k.push(b.k);
            s.power.push(b.power);
            s.error.push(b.error);
        }
        s
    }

    pub fn k(&self) -> &[f64] {
        &self.k
    }

    pub fn power(&self) -> &[f64] {
        &self.power
    }

    pub fn error(&self) -> &[f64] {
        &self.error
    }

    pub fn len(&self) -> usize {
        self.k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    /// The bins whose wavenumber lies inside `range`.
    pub fn restrict(&self, range: &WavenumberRange) -> Spectrum {
        let keep: Vec<usize> = (0..self.len()).filter(|&i| range.contains(self.k[i])).collect();
        Spectrum {
            k: keep.iter().map(|&i| self.k[i]).collect(),
            power: keep.iter().map(|&i| self.power[i]).collect(),
            error: keep.iter().map(|&i| self.error[i]).collect(),
        }
    }

    /// A copy with each power value displaced by `N(0, error_i)`.
    pub fn perturbed<R: Rng + ?Sized>(&self, rng: &mut R) -> Spectrum {
        let power = self
            .power
            .iter()
            .zip(&self.error)
            .map(|(&p, &e)| {
                let z: f64 = rng.sample(StandardNormal);
                p + e * z
            })
            .collect();
        Spectrum { k: self.k.clone(), power, error: self.error.clone() }
    }
}

/// One non-DC sample of the 2D periodogram.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PowerSample {
    pub k: f64,
    /// Direction of the wave vector, folded into [0, 180) degrees.
    pub azimuth: f64,
    pub log_power: f64,
}

pub(crate) struct Periodogram {
    pub samples: Vec<PowerSample>,
    pub fundamental: f64,
    pub nyquist: f64,
}

impl Periodogram {
    /// Bin width and number of complete radial bins below Nyquist.
    pub fn radial_bins(&self, config: &SpectralConfig) -> Result<(f64, usize)> {
        let width = config.bin_width.unwrap_or(self.fundamental);
        let edges = (self.nyquist / width + BIN_EDGE_EPS).floor() as usize;
        if edges < 2 {
            return Err(CurieError::DegenerateSpectrum(format!(
                "bin width {width} leaves no radial bin below Nyquist {}",
                self.nyquist
            )));
        }
        Ok((width, edges - 1))
    }
}

/// Radial bin of a sample, or `None` for the DC cell and past Nyquist.
#[inline]
pub(crate) fn bin_index(k: f64, width: f64, nbins: usize) -> Option<usize> {
    let idx = (k / width + BIN_EDGE_EPS).floor() as usize;
    (idx >= 1 && idx <= nbins).then(|| idx - 1)
}

pub(crate) fn periodogram(window: &Window, taper: &Taper, config: &SpectralConfig) -> Result<Periodogram> {
    config.validate()?;
    let n = window.size();

    let mut data = if config.detrend {
        window.detrended()?.data().to_vec()
    } else {
        window.data().to_vec()
    };
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    data.iter_mut().for_each(|v| *v -= mean);
    if data.iter().all(|v| v.abs() <= f64::EPSILON * mean.abs().max(1.0)) {
        return Err(CurieError::DegenerateSpectrum("window has no variation".into()));
    }

    let weights = taper.weights(n)?;
    let energy = {
        let s: f64 = weights.iter().map(|w| w * w).sum::<f64>() / n as f64;
        s * s
    };
    if energy <= 0.0 || !energy.is_finite() {
        return Err(CurieError::DegenerateSpectrum("taper has zero energy".into()));
    }
    for r in 0..n {
        for c in 0..n {
            data[r * n + c] *= weights[r] * weights[c];
        }
    }

    let spectrum = forward2(&data, n, n);
    let kx = wavenumbers(n, window.dx() * config.scale);
    let ky = wavenumbers(n, window.dy() * config.scale);
    let norm = 1.0 / ((n * n) as f64 * energy);

    let mut samples = Vec::with_capacity(n * n - 1);
    for r in 0..n {
        for c in 0..n {
            if r == 0 && c == 0 {
                continue;
            }
            let k = kx[c].hypot(ky[r]);
            let power = spectrum[r * n + c].norm_sqr() * norm;
            if power <= 0.0 || !power.is_finite() {
                return Err(CurieError::DegenerateSpectrum(format!("power at k = {k:.4} is {power}")));
            }
            let azimuth = ky[r].atan2(kx[c]).to_degrees().rem_euclid(180.0);
            samples.push(PowerSample { k, azimuth, log_power: power.ln() });
        }
    }

    let fundamental = kx[1].abs().min(ky[1].abs());
    let nyquist = std::f64::consts::PI / (window.dx().max(window.dy()) * config.scale);
    trace!(n, fundamental, nyquist, "periodogram computed");
    Ok(Periodogram { samples, fundamental, nyquist })
}

/// Mean |k|, mean log-power and its standard error for one bin.
pub(crate) fn summarize(samples: &[(f64, f64)]) -> SpectralBin {
    let count = samples.len();
    let nf = count as f64;
    let k = samples.iter().map(|s| s.0).sum::<f64>() / nf;
    let power = samples.iter().map(|s| s.1).sum::<f64>() / nf;
    let error = if count > 1 {
        let var = samples.iter().map(|s| (s.1 - power).powi(2)).sum::<f64>() / (nf - 1.0);
        (var / nf).sqrt()
    } else {
        0.0
    };
    SpectralBin { k, power, error, count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn new_rejects_unsorted_and_mismatched_inputs() {
        assert!(Spectrum::new(vec![0.1, 0.2], vec![1.0], vec![0.1, 0.1]).is_err());
        assert!(Spectrum::new(vec![0.2, 0.1], vec![1.0, 1.0], vec![0.1, 0.1]).is_err());
        assert!(Spectrum::new(vec![0.1, 0.2], vec![1.0, 1.0], vec![0.1, -0.1]).is_err());
        assert!(Spectrum::new(vec![0.0, 0.2], vec![1.0, 1.0], vec![0.1, 0.1]).is_err());
        assert!(Spectrum::new(vec![0.1, 0.2], vec![1.0, 1.0], vec![0.0, 0.1]).is_ok());
    }

    #[test]
    fn restrict_is_inclusive() {
        let s = Spectrum::new(vec![0.1, 0.2, 0.3, 0.4], vec![4.0, 3.0, 2.0, 1.0], vec![0.1; 4]).unwrap();
        let r = s.restrict(&WavenumberRange::new(0.2, 0.3).unwrap());
        assert_eq!(r.k(), &[0.2, 0.3]);
        assert_eq!(r.power(), &[3.0, 2.0]);
    }

    #[test]
    fn perturbation_respects_zero_errors() {
        let s = Spectrum::new(vec![0.1, 0.2], vec![1.0, 2.0], vec![0.0, 0.5]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let p = s.perturbed(&mut rng);
        assert_eq!(p.power()[0], 1.0);
        assert_ne!(p.power()[1], 2.0);
        assert_eq!(p.k(), s.k());
    }

    #[test]
    fn bin_index_skips_dc_and_beyond_nyquist() {
        assert_eq!(bin_index(0.5, 1.0, 3), None);
        assert_eq!(bin_index(1.0, 1.0, 3), Some(0));
        assert_eq!(bin_index(3.99, 1.0, 3), Some(2));
        assert_eq!(bin_index(4.0, 1.0, 3), None);
    }

    #[test]
    fn summarize_uses_sample_standard_error() {
        let bin = summarize(&[(1.0, 1.0), (2.0, 3.0)]);
        assert_eq!(bin.count, 2);
        assert!((bin.k - 1.5).abs() < 1e-12);
        assert!((bin.power - 2.0).abs() < 1e-12);
        // std (ddof = 1) is sqrt(2); divided by sqrt(2).
        assert!((bin.error - 1.0).abs() < 1e-12);
    }
}
