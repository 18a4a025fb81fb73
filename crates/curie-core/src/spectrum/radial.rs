use tracing::debug;

use super::{bin_index, periodogram, summarize, SpectralConfig, Spectrum, Taper};
use crate::error::{CurieError, Result};
use crate::grid::Window;

/// Radially averaged log-power spectrum of a square window.
///
/// Samples are binned by |k| into annuli of width `config.bin_width`
/// (default: the fundamental wavenumber), starting at one bin width and
/// stopping below Nyquist. Each bin reports the mean |k|, the mean of
/// `ln P`, and the standard error of that mean. Bins with fewer than
/// `config.min_bin_count` samples are dropped.
pub fn radial_spectrum(window: &Window, taper: &Taper, config: &SpectralConfig) -> Result<Spectrum> {
    let pg = periodogram(window, taper, config)?;
    let (width, nbins) = pg.radial_bins(config)?;

    let mut bins: Vec<Vec<(f64, f64)>> = vec![Vec::new(); nbins];
    for s in &pg.samples {
        if let Some(b) = bin_index(s.k, width, nbins) {
            bins[b].push((s.k, s.log_power));
        }
    }

    let kept: Vec<_> = bins
        .iter()
        .filter(|b| b.len() >= config.min_bin_count)
        .map(|b| summarize(b))
        .collect();
    if kept.is_empty() {
        return Err(CurieError::DegenerateSpectrum("no radial bin has enough samples".into()));
    }

    debug!(
        size = window.size(),
        bins = kept.len(),
        dropped = nbins - kept.len(),
        width,
        "radial spectrum"
    );
    Ok(Spectrum::from_bins(kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_window(n: usize, seed: u64) -> Window {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Window::new(data, n, 1000.0, 1000.0).unwrap()
    }

    fn every_taper() -> Vec<Taper> {
        vec![
            Taper::None,
            Taper::Hann,
            Taper::Hamming,
            Taper::Tukey { alpha: 0.5 },
            Taper::custom(|n| (0..n).map(|i| 1.0 - 0.5 * (2.0 * i as f64 / (n - 1) as f64 - 1.0).abs()).collect()),
        ]
    }

    #[test]
    fn bins_increase_and_stay_below_nyquist_for_every_taper() {
        let w = noise_window(33, 1);
        let config = SpectralConfig::default();
        let reference = radial_spectrum(&w, &Taper::Hann, &config).unwrap();
        assert!(reference.len() > 10);
        for taper in every_taper() {
            let s = radial_spectrum(&w, &taper, &config).unwrap();
            assert_eq!(s.k(), reference.k(), "{taper:?}");
            assert!(s.k()[0] > 0.0, "{taper:?}");
            assert!(s.k().windows(2).all(|p| p[1] > p[0]), "{taper:?}");
            assert!(*s.k().last().unwrap() < std::f64::consts::PI, "{taper:?}");
            assert!(s.error().iter().all(|e| *e > 0.0), "{taper:?}");
        }
    }

    #[test]
    fn white_noise_spectrum_is_roughly_flat() {
        let w = noise_window(65, 7);
        let s = radial_spectrum(&w, &Taper::None, &SpectralConfig::default()).unwrap();
        let n = s.len();
        let low: f64 = s.power()[n / 4..n / 2].iter().sum::<f64>() / (n / 4) as f64;
        let high: f64 = s.power()[n / 2..3 * n / 4].iter().sum::<f64>() / (n / 4) as f64;
        assert!((low - high).abs() < 0.3, "low {low} high {high}");
    }

    #[test]
    fn constant_window_is_degenerate() {
        let w = Window::new(vec![4.2; 81], 9, 1000.0, 1000.0).unwrap();
        assert!(matches!(
            radial_spectrum(&w, &Taper::Hann, &SpectralConfig::default()),
            Err(CurieError::DegenerateSpectrum(_))
        ));
    }

    #[test]
    fn wide_bins_reduce_bin_count() {
        let w = noise_window(33, 2);
        let base = radial_spectrum(&w, &Taper::Hann, &SpectralConfig::default()).unwrap();
        let config = SpectralConfig { bin_width: Some(0.4), ..SpectralConfig::default() };
        let wide = radial_spectrum(&w, &Taper::Hann, &config).unwrap();
        assert!(wide.len() < base.len());
        assert!(wide.len() >= 6);
    }

    #[test]
    fn bin_wider_than_nyquist_is_degenerate() {
        let w = noise_window(9, 3);
        let config = SpectralConfig { bin_width: Some(10.0), ..SpectralConfig::default() };
        assert!(matches!(
            radial_spectrum(&w, &Taper::Hann, &config),
            Err(CurieError::DegenerateSpectrum(_))
        ));
    }
}
