//! Error types shared by every stage of the Curie-depth pipeline.

use thiserror::Error;

/// Reasons a least-squares fit can fail.
///
/// Kept separate from [`CurieError`] so the spatial sweep can match on it and
/// record an empty cell instead of aborting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitFailure {
    #[error("{points} data points cannot constrain {params} free parameters")]
    Underdetermined { points: usize, params: usize },

    #[error("normal equations are singular")]
    SingularJacobian,

    #[error("no convergence after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("misfit is not finite at the starting point")]
    NonFiniteMisfit,

    #[error("spectral error of bin {bin} is not positive")]
    NonPositiveError { bin: usize },

    #[error("fit exceeded its time limit of {limit_ms} ms")]
    TimedOut { limit_ms: u64 },

    #[error("all {attempts} repetitions failed")]
    AllRepetitionsFailed { attempts: usize },
}

/// Main error type for Curie-depth operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurieError {
    #[error("window of {window} m at ({x}, {y}) extends past the grid extent")]
    OutOfBounds { x: f64, y: f64, window: f64 },

    #[error("{model}: {reason}")]
    Domain { model: &'static str, reason: String },

    #[error("fit failed: {0}")]
    Fit(#[from] FitFailure),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("degenerate spectrum: {0}")]
    DegenerateSpectrum(String),
}

impl CurieError {
    /// Whether a spatial sweep may record this error as an empty cell and
    /// move on to the next centroid.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CurieError::Fit(_) | CurieError::DegenerateSpectrum(_))
    }

    pub(crate) fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        CurieError::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Curie-depth operations.
pub type Result<T> = std::result::Result<T, CurieError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_and_degenerate_errors_are_recoverable() {
        assert!(CurieError::Fit(FitFailure::SingularJacobian).is_recoverable());
        assert!(CurieError::DegenerateSpectrum("flat".into()).is_recoverable());
        assert!(!CurieError::OutOfBounds { x: 0.0, y: 0.0, window: 1.0 }.is_recoverable());
        assert!(!CurieError::Domain { model: "tanaka", reason: "k <= 0".into() }.is_recoverable());
    }

    #[test]
    fn fit_failure_converts_into_curie_error() {
        let err: CurieError = FitFailure::NotConverged { iterations: 7 }.into();
        assert_eq!(err.to_string(), "fit failed: no convergence after 7 iterations");
    }
}
