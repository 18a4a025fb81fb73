//! Straight-line fits for the Tanaka spectral-depth regimes.

use serde::Serialize;
use tracing::debug;

use crate::error::{FitFailure, Result};
use crate::models::compute_tanaka;
use crate::params::CurieDepth;
use crate::spectrum::{Spectrum, WavenumberRange};

/// Weighted ordinary least-squares line `y = intercept + slope · x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    pub slope_error: f64,
    pub intercept_error: f64,
    pub points: usize,
}

/// Fit a line through `(x, y)`.
///
/// With `sigma`, points are weighted by `1/σ²` and the errors follow from the
/// stated σ. Without it the errors are scaled by the residual variance,
/// which needs at least three points.
pub fn fit_line(x: &[f64], y: &[f64], sigma: Option<&[f64]>) -> std::result::Result<LineFit, FitFailure> {
    let n = x.len();
    let min_points = if sigma.is_some() { 2 } else { 3 };
    if n < min_points {
        return Err(FitFailure::Underdetermined { points: n, params: 2 });
    }

    let weights: Vec<f64> = match sigma {
        Some(s) => s
            .iter()
            .enumerate()
            .map(|(bin, &e)| if e > 0.0 { Ok(1.0 / (e * e)) } else { Err(FitFailure::NonPositiveError { bin }) })
            .collect::<std::result::Result<_, _>>()?,
        None => vec![1.0; n],
    };

    let (mut s, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for i in 0..n {
        let w = weights[i];
        s += w;
        sx += w * x[i];
        sy += w * y[i];
        sxx += w * x[i] * x[i];
        sxy += w * x[i] * y[i];
    }
    let denom = s * sxx - sx * sx;
    if denom <= 1e-12 * s * sxx || !denom.is_finite() {
        return Err(FitFailure::SingularJacobian);
    }

    let slope = (s * sxy - sx * sy) / denom;
    let intercept = (sxx * sy - sx * sxy) / denom;

    let scale = if sigma.is_some() {
        1.0
    } else {
        let ssr: f64 = (0..n).map(|i| (y[i] - intercept - slope * x[i]).powi(2)).sum();
        ssr / (n - 2) as f64
    };

    Ok(LineFit {
        slope,
        intercept,
        slope_error: (scale * s / denom).sqrt(),
        intercept_error: (scale * sxx / denom).sqrt(),
        points: n,
    })
}

/// Depth from one linear regime, with the line's intercept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeFit {
    pub depth: f64,
    pub error: f64,
    /// `ln B` (top) or `ln D` (centroid).
    pub intercept: f64,
    pub points: usize,
}

/// Top depth from the slope of `ln Φ^{1/2}` against k.
pub fn fit_tanaka_top(spectrum: &Spectrum, range: &WavenumberRange, weighted: bool) -> Result<RegimeFit> {
    range.validate()?;
    let sub = spectrum.restrict(range);
    let y: Vec<f64> = sub.power().iter().map(|p| 0.5 * p).collect();
    regime(&sub, &y, weighted, "top")
}

/// Centroid depth from the slope of `ln(Φ^{1/2}/k)` against k.
pub fn fit_tanaka_centroid(spectrum: &Spectrum, range: &WavenumberRange, weighted: bool) -> Result<RegimeFit> {
    range.validate()?;
    let sub = spectrum.restrict(range);
    let y: Vec<f64> = sub.power().iter().zip(sub.k()).map(|(p, k)| 0.5 * p - k.ln()).collect();
    regime(&sub, &y, weighted, "centroid")
}

fn regime(sub: &Spectrum, y: &[f64], weighted: bool, label: &str) -> Result<RegimeFit> {
    let sigma: Option<Vec<f64>> = weighted.then(|| sub.error().iter().map(|e| 0.5 * e).collect());
    let line = fit_line(sub.k(), y, sigma.as_deref())?;
    debug!(regime = label, depth = -line.slope, points = line.points, "tanaka line fit");
    Ok(RegimeFit {
        depth: -line.slope,
        error: line.slope_error,
        intercept: line.intercept,
        points: line.points,
    })
}

/// Both Tanaka regimes and the Curie depth they imply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TanakaFit {
    pub top: RegimeFit,
    pub centroid: RegimeFit,
}

impl TanakaFit {
    pub fn curie_depth(&self) -> CurieDepth {
        compute_tanaka(self.top.depth, self.top.error, self.centroid.depth, self.centroid.error)
    }
}

pub fn fit_tanaka(
    spectrum: &Spectrum,
    top: &WavenumberRange,
    centroid: &WavenumberRange,
    weighted: bool,
) -> Result<TanakaFit> {
    Ok(TanakaFit {
        top: fit_tanaka_top(spectrum, top, weighted)?,
        centroid: fit_tanaka_centroid(spectrum, centroid, weighted)?,
    })
}
