use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CurieError, Result};

/// 1D taper applied separably along rows and columns before the FFT.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Taper {
    /// Rectangular window.
    None,
    #[default]
    Hann,
    Hamming,
    /// Tapered cosine; `alpha = 0` is rectangular, `alpha = 1` is Hann.
    Tukey { alpha: f64 },
    #[serde(skip)]
    Custom(CustomTaper),
}

/// Caller-supplied taper: given a length, return that many weights.
#[derive(Clone)]
pub struct CustomTaper(Arc<dyn Fn(usize) -> Vec<f64> + Send + Sync>);

impl fmt::Debug for CustomTaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomTaper(..)")
    }
}

impl fmt::Debug for Taper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Taper::None => f.write_str("None"),
            Taper::Hann => f.write_str("Hann"),
            Taper::Hamming => f.write_str("Hamming"),
            Taper::Tukey { alpha } => f.debug_struct("Tukey").field("alpha", alpha).finish(),
            Taper::Custom(c) => c.fmt(f),
        }
    }
}

impl Taper {
    pub fn custom(f: impl Fn(usize) -> Vec<f64> + Send + Sync + 'static) -> Self {
        Taper::Custom(CustomTaper(Arc::new(f)))
    }

    /// Weights for a window of `n` samples (numpy's symmetric definitions).
    pub fn weights(&self, n: usize) -> Result<Vec<f64>> {
        if n < 2 {
            return Err(CurieError::invalid_parameter("taper length", n, "must be at least 2"));
        }
        let denom = (n - 1) as f64;
        let w = match self {
            Taper::None => vec![1.0; n],
            Taper::Hann => (0..n).map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos()).collect(),
            Taper::Hamming => (0..n).map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos()).collect(),
            Taper::Tukey { alpha } => tukey(n, *alpha)?,
            Taper::Custom(CustomTaper(f)) => {
                let w = f(n);
                if w.len() != n {
                    return Err(CurieError::invalid_parameter(
                        "taper",
                        w.len(),
                        format!("custom taper returned the wrong length for {n} samples"),
                    ));
                }
                w
            }
        };
        if w.iter().any(|v| !v.is_finite()) {
            return Err(CurieError::invalid_parameter("taper", "non-finite", "weights must be finite"));
        }
        Ok(w)
    }
}

fn tukey(n: usize, alpha: f64) -> Result<Vec<f64>> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(CurieError::invalid_parameter("alpha", alpha, "must lie in [0, 1]"));
    }
    if alpha == 0.0 {
        return Ok(vec![1.0; n]);
    }
    let m = (n - 1) as f64;
    let width = (alpha * m / 2.0).floor() as usize;
    Ok((0..n)
        .map(|i| {
            let x = i as f64;
            if i <= width {
                0.5 * (1.0 + (PI * (-1.0 + 2.0 * x / alpha / m)).cos())
            } else if i < n - width - 1 {
                1.0
            } else {
                0.5 * (1.0 + (PI * (-2.0 / alpha + 1.0 + 2.0 * x / alpha / m)).cos())
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hann_is_zero_at_ends_and_one_in_middle() {
        let w = Taper::Hann.weights(5).unwrap();
        assert_relative_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(w[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[4], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn tukey_limits_match_rectangular_and_hann() {
        let n = 9;
        let hann = Taper::Hann.weights(n).unwrap();
        let t1 = Taper::Tukey { alpha: 1.0 }.weights(n).unwrap();
        for (a, b) in hann.iter().zip(&t1) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        assert_eq!(Taper::Tukey { alpha: 0.0 }.weights(n).unwrap(), vec![1.0; n]);
        let mid = Taper::Tukey { alpha: 0.5 }.weights(n).unwrap();
        assert_relative_eq!(mid[4], 1.0);
        assert!(Taper::Tukey { alpha: 1.5 }.weights(n).is_err());
    }

    #[test]
    fn custom_taper_length_is_checked() {
        let ok = Taper::custom(|n| vec![0.5; n]);
        assert_eq!(ok.weights(3).unwrap(), vec![0.5; 3]);
        let bad = Taper::custom(|_| vec![1.0; 2]);
        assert!(bad.weights(4).is_err());
    }

    #[test]
    fn taper_deserializes_from_tagged_json() {
        let t: Taper = serde_json::from_str(r#"{"kind":"tukey","alpha":0.25}"#).unwrap();
        assert!(matches!(t, Taper::Tukey { alpha } if alpha == 0.25));
        let t: Taper = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert!(matches!(t, Taper::None));
    }
}
