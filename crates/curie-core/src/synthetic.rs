//! Synthetic magnetic fields and spectra with a known Bouligand model.
//!
//! `bouligand_grid` draws random phases and sets every Fourier amplitude so
//! that the untapered periodogram equals `exp Φ(|k|)` exactly; the grid is
//! then periodic with period `n` in both directions. `noisy_bouligand_grid`
//! adds Gaussian scatter of a given standard deviation to each log-power.

use std::collections::BTreeMap;
use std::f64::consts::{PI, TAU};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rustfft::num_complex::Complex64;
use tracing::debug;

use crate::error::{CurieError, Result};
use crate::fft::{inverse2, wavenumbers};
use crate::grid::MagneticGrid;
use crate::models::{bouligand2009, Quadrature};
use crate::params::ModelParameters;
use crate::spectrum::{Spectrum, DEFAULT_SCALE};

/// Square `n × n` grid with node spacing `spacing` metres whose periodogram
/// follows the Bouligand model for `params`.
///
/// Wavenumbers use [`DEFAULT_SCALE`], so depths in `params` are in km when
/// `spacing` is in metres.
pub fn bouligand_grid(
    n: usize,
    spacing: f64,
    params: &ModelParameters,
    quadrature: &Quadrature,
    seed: u64,
) -> Result<MagneticGrid> {
    noisy_bouligand_grid(n, spacing, params, quadrature, 0.0, seed)
}

/// As [`bouligand_grid`], with the log-periodogram at every frequency
/// displaced by an independent `N(0, sigma²)` draw.
pub fn noisy_bouligand_grid(
    n: usize,
    spacing: f64,
    params: &ModelParameters,
    quadrature: &Quadrature,
    sigma: f64,
    seed: u64,
) -> Result<MagneticGrid> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(CurieError::invalid_parameter("sigma", sigma, "must be finite and non-negative"));
    }
    if n < 3 {
        return Err(CurieError::invalid_parameter("n", n, "need at least 3 nodes per side"));
    }
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(CurieError::invalid_parameter("spacing", spacing, "must be positive"));
    }

    let k = wavenumbers(n, spacing * DEFAULT_SCALE);
    let signed = |i: usize| if i <= (n - 1) / 2 { i as i64 } else { i as i64 - n as i64 };

    // |k| depends only on i² + j², so the model is evaluated once per radius.
    let mut radii: BTreeMap<u64, f64> = BTreeMap::new();
    for r in 0..n {
        for c in 0..n {
            let (i, j) = (signed(r), signed(c));
            let key = (i * i + j * j) as u64;
            if key > 0 {
                radii.entry(key).or_insert_with(|| k[c].hypot(k[r]));
            }
        }
    }
    let radial_k: Vec<f64> = radii.values().copied().collect();
    let phi = bouligand2009(&radial_k, params, quadrature)?;
    let log_power: BTreeMap<u64, f64> = radii.keys().copied().zip(phi).collect();

    let total = (n * n) as f64;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coeffs = vec![Complex64::new(0.0, 0.0); n * n];
    for r in 0..n {
        for c in 0..n {
            let (pr, pc) = ((n - r) % n, (n - c) % n);
            let (idx, partner) = (r * n + c, pr * n + pc);
            // The conjugate partner was filled together with an earlier cell.
            if idx == 0 || partner < idx {
                continue;
            }
            let (i, j) = (signed(r), signed(c));
            let phi = log_power[&((i * i + j * j) as u64)];
            let sign_or_phase: f64 = if partner == idx {
                if rng.gen::<bool>() { 0.0 } else { PI }
            } else {
                rng.gen_range(0.0..TAU)
            };
            let scatter = if sigma > 0.0 { sigma * rng.sample::<f64, _>(StandardNormal) } else { 0.0 };
            let z = Complex64::from_polar((total * (phi + scatter).exp()).sqrt(), sign_or_phase);
            if partner == idx {
                coeffs[idx] = Complex64::new(z.re, 0.0);
            } else {
                coeffs[idx] = z;
                coeffs[partner] = z.conj();
            }
        }
    }

    let data: Vec<f64> = inverse2(coeffs, n, n).into_iter().map(|z| z.re).collect();
    let extent = (n - 1) as f64 * spacing;
    debug!(n, spacing, sigma, radii = radial_k.len(), seed, "synthetic bouligand grid");
    MagneticGrid::new(data, n, n, 0.0, extent, 0.0, extent)
}

/// Noiseless model spectrum on `k` with a uniform error of `sigma`.
pub fn bouligand_spectrum(
    k: &[f64],
    params: &ModelParameters,
    quadrature: &Quadrature,
    sigma: f64,
) -> Result<Spectrum> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(CurieError::invalid_parameter("sigma", sigma, "must be finite and non-negative"));
    }
    let power = bouligand2009(k, params, quadrature)?;
    Spectrum::new(k.to_vec(), power, vec![sigma; k.len()])
}

/// `spectrum` with each bin displaced by one draw of its own error.
pub fn noisy(spectrum: &Spectrum, seed: u64) -> Spectrum {
    spectrum.perturbed(&mut StdRng::seed_from_u64(seed))
}
