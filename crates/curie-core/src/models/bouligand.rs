use std::f64::consts::{FRAC_PI_2, LN_2};

use serde::{Deserialize, Serialize};

use super::check_wavenumbers;
use crate::error::{CurieError, Result};
use crate::params::ModelParameters;

/// Composite Simpson rule for the Bouligand depth integral.
///
/// The integral over `u ∈ [0, ∞)` is mapped onto `θ ∈ [0, π/2]` with
/// `u = tan θ`, where the weight `(1 + u²)^(-1-β/2) du` becomes
/// `cos^β θ dθ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quadrature {
    /// Number of Simpson intervals; must be even.
    pub intervals: usize,
}

impl Default for Quadrature {
    fn default() -> Self {
        Self { intervals: 512 }
    }
}

impl Quadrature {
    pub fn validate(&self) -> Result<()> {
        if self.intervals < 2 || self.intervals % 2 != 0 {
            return Err(CurieError::invalid_parameter(
                "intervals",
                self.intervals,
                "must be an even number of at least 2",
            ));
        }
        Ok(())
    }

    /// `(tan θ / 2, weight)` pairs for exponent `beta`.
    fn nodes(&self, beta: f64) -> Vec<(f64, f64)> {
        let n = self.intervals;
        let h = FRAC_PI_2 / n as f64;
        (0..=n)
            .map(|j| {
                let coef = if j == 0 || j == n {
                    1.0
                } else if j % 2 == 1 {
                    4.0
                } else {
                    2.0
                };
                let theta = j as f64 * h;
                // cos(π/2) evaluates to ~6e-17, not 0; clamp so β = 0 stays finite.
                let weight = coef * h / 3.0 * theta.cos().max(0.0).powf(beta);
                (0.5 * theta.tan(), weight)
            })
            .collect()
    }
}

/// Radial log-power spectrum of a fractally magnetized layer
/// (Bouligand et al., 2009, eq. 4).
///
/// ```text
/// Φ(k) = C − 2 k z_t − (β − 1) ln k − ln 2
///        + ln ∫₀^∞ [ (1 − e^{−kΔz})² + 4 e^{−kΔz} sin²(kΔz u / 2) ] (1 + u²)^{−1−β/2} du
/// ```
///
/// This is the closed form with its `cosh(kΔz)` and Bessel terms combined
/// analytically, so it stays finite for any `kΔz`.
pub fn bouligand2009(k: &[f64], params: &ModelParameters, quadrature: &Quadrature) -> Result<Vec<f64>> {
    check_wavenumbers(k, "bouligand2009")?;
    quadrature.validate()?;
    let domain = |reason: String| CurieError::Domain { model: "bouligand2009", reason };
    if !params.is_finite() {
        return Err(domain(format!("parameters {params:?} are not finite")));
    }
    if params.beta < 0.0 {
        return Err(domain(format!("beta = {} must be non-negative", params.beta)));
    }
    if params.dz <= 0.0 {
        return Err(domain(format!("thickness dz = {} must be positive", params.dz)));
    }

    let phi = evaluate(k, params, quadrature);
    if phi.iter().any(|v| !v.is_finite()) {
        return Err(domain("log-power is not finite".into()));
    }
    Ok(phi)
}

/// Unchecked model evaluation for the fitting loops. May contain
/// non-finite values outside the physical domain.
pub(crate) fn evaluate(k: &[f64], params: &ModelParameters, quadrature: &Quadrature) -> Vec<f64> {
    let nodes = quadrature.nodes(params.beta);
    let total: f64 = nodes.iter().map(|n| n.1).sum();

    k.iter()
        .map(|&kh| {
            let x = kh * params.dz;
            let a = (-x).exp_m1();
            let e = (-x).exp();
            let mut integral = a * a * total;
            if 4.0 * e > 1e-17 * a * a {
                let oscillating: f64 = nodes
                    .iter()
                    .map(|&(half_tan, w)| {
                        let s = (x * half_tan).sin();
                        w * s * s
                    })
                    .sum();
                integral += 4.0 * e * oscillating;
            }
            params.c - 2.0 * kh * params.zt - (params.beta - 1.0) * kh.ln() - LN_2 + integral.ln()
        })
        .collect()
}

/// Infinite-thickness limit of the fractal spectrum (Maus and Dimri, 1995):
/// `Φ = C − 2 k z_t − (β − 1) ln k`.
pub fn maus1995(k: &[f64], beta: f64, zt: f64, c: f64) -> Result<Vec<f64>> {
    check_wavenumbers(k, "maus1995")?;
    if ![beta, zt, c].iter().all(|v| v.is_finite()) {
        return Err(CurieError::Domain {
            model: "maus1995",
            reason: "parameters must be finite".into(),
        });
    }
    Ok(k.iter().map(|&kh| c - 2.0 * kh * zt - (beta - 1.0) * kh.ln()).collect())
}
