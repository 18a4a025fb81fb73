//! Forward models of the log-power spectrum of a magnetized layer.

pub mod bouligand;
pub mod tanaka;

pub use bouligand::{bouligand2009, maus1995, Quadrature};
pub use tanaka::{compute_tanaka, tanaka_centroid, tanaka_top};

use crate::error::{CurieError, Result};

/// All forward models require strictly positive, finite wavenumbers.
pub(crate) fn check_wavenumbers(k: &[f64], model: &'static str) -> Result<()> {
    match k.iter().find(|v| !v.is_finite() || **v <= 0.0) {
        Some(v) => Err(CurieError::Domain {
            model,
            reason: format!("wavenumber {v} is not positive"),
        }),
        None => Ok(()),
    }
}
