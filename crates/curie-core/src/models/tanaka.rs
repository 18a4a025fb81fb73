//! Linear spectral-depth models of Tanaka et al. (1999) and Li et al. (2013).
//!
//! Both work in amplitude space, `ln Φ^{1/2} = Φ / 2` for a log-power `Φ`.

use super::check_wavenumbers;
use crate::error::{CurieError, Result};
use crate::params::CurieDepth;

/// Short-wavelength regime: `ln Φ^{1/2} = ln B − k z_t`.
pub fn tanaka_top(k: &[f64], zt: f64, ln_b: f64) -> Result<Vec<f64>> {
    check_wavenumbers(k, "tanaka_top")?;
    finite("tanaka_top", &[zt, ln_b])?;
    Ok(k.iter().map(|&kh| ln_b - kh * zt).collect())
}

/// Long-wavelength regime: `ln(Φ^{1/2} / k) = ln D − k z_o`.
pub fn tanaka_centroid(k: &[f64], zo: f64, ln_d: f64) -> Result<Vec<f64>> {
    check_wavenumbers(k, "tanaka_centroid")?;
    finite("tanaka_centroid", &[zo, ln_d])?;
    Ok(k.iter().map(|&kh| ln_d - kh * zo).collect())
}

/// Curie depth from the top and centroid depths, `Z_b = 2 z_o − z_t`, with
/// the errors combined in quadrature: `σ_b² = (2 σ_o)² + σ_t²`.
pub fn compute_tanaka(zt: f64, zt_error: f64, zo: f64, zo_error: f64) -> CurieDepth {
    CurieDepth {
        depth: 2.0 * zo - zt,
        error: (4.0 * zo_error * zo_error + zt_error * zt_error).sqrt(),
    }
}

fn finite(model: &'static str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CurieError::Domain { model, reason: "parameters must be finite".into() })
    }
}
