//! Wavenumber-domain grid filters and plane detrending.

use nalgebra::{Matrix3, Vector3};
use rustfft::num_complex::Complex64;

use crate::error::{CurieError, Result};
use crate::fft::{forward2, inverse2, wavenumbers};
use crate::grid::{Direction, MagneticGrid};

/// Remove the least-squares plane `a + b x + c y` from row-major data.
///
/// Coordinates are normalized to [-1, 1] on both axes before solving.
pub fn remove_linear_trend(data: &[f64], rows: usize, cols: usize) -> Result<Vec<f64>> {
    let [a, b, c] = linear_trend(data, rows, cols)?;
    Ok(data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let (x, y) = normalized(i % cols, cols, i / cols, rows);
            v - (a + b * x + c * y)
        })
        .collect())
}

/// Coefficients `[a, b, c]` of the best-fitting plane in normalized coordinates.
pub fn linear_trend(data: &[f64], rows: usize, cols: usize) -> Result<[f64; 3]> {
    if rows < 2 || cols < 2 || data.len() != rows * cols {
        return Err(CurieError::InvalidGrid(format!(
            "cannot fit a plane to {} values on a {rows}x{cols} grid",
            data.len()
        )));
    }

    let mut ata = Matrix3::<f64>::zeros();
    let mut atz = Vector3::<f64>::zeros();
    for (i, &z) in data.iter().enumerate() {
        let (x, y) = normalized(i % cols, cols, i / cols, rows);
        let row = Vector3::new(1.0, x, y);
        ata += row * row.transpose();
        atz += row * z;
    }

    let coeffs = ata
        .cholesky()
        .map(|chol| chol.solve(&atz))
        .ok_or_else(|| CurieError::InvalidGrid("plane normal equations are singular".into()))?;
    Ok([coeffs[0], coeffs[1], coeffs[2]])
}

#[inline]
fn normalized(col: usize, cols: usize, row: usize, rows: usize) -> (f64, f64) {
    (
        2.0 * col as f64 / (cols - 1) as f64 - 1.0,
        2.0 * row as f64 / (rows - 1) as f64 - 1.0,
    )
}

/// Continue the field upward by `height` metres: `F{h_up} = F{h} e^{-height |k|}`.
pub fn upward_continuation(grid: &MagneticGrid, height: f64) -> Result<Vec<f64>> {
    if !height.is_finite() || height <= 0.0 {
        return Err(CurieError::invalid_parameter(
            "height",
            height,
            "must be positive; downward continuation is unstable",
        ));
    }
    apply_filter(grid, |kx, ky| {
        let k = kx.hypot(ky);
        Complex64::new((-height * k).exp(), 0.0)
    })
}

/// Reduce total-field anomaly data to the pole.
///
/// Grid x is taken as east and grid y as north. The zero-wavenumber term is
/// removed.
pub fn reduce_to_pole(grid: &MagneticGrid, field: Direction, magnetization: Direction) -> Result<Vec<f64>> {
    let f = unit_vector(field)?;
    let m = unit_vector(magnetization)?;

    // Components are (north, east, down).
    let a1 = m[2] * f[2] - m[0] * f[0];
    let a2 = m[2] * f[2] - m[1] * f[1];
    let a3 = -m[1] * f[0] - m[0] * f[1];
    let b1 = m[0] * f[2] + m[2] * f[0];
    let b2 = m[1] * f[2] + m[2] * f[1];

    apply_filter(grid, |k_east, k_north| {
        let k2 = k_east * k_east + k_north * k_north;
        if k2 == 0.0 {
            return Complex64::new(0.0, 0.0);
        }
        let denom = Complex64::new(
            a1 * k_north * k_north + a2 * k_east * k_east + a3 * k_north * k_east,
            k2.sqrt() * (b1 * k_north + b2 * k_east),
        );
        if denom.norm() == 0.0 {
            Complex64::new(0.0, 0.0)
        } else {
            Complex64::new(k2, 0.0) / denom
        }
    })
}

fn unit_vector(d: Direction) -> Result<[f64; 3]> {
    if !d.inclination.is_finite() || !d.declination.is_finite() {
        return Err(CurieError::invalid_parameter(
            "direction",
            format!("({}, {})", d.inclination, d.declination),
            "inclination and declination must be finite",
        ));
    }
    let (inc, dec) = (d.inclination.to_radians(), d.declination.to_radians());
    Ok([inc.cos() * dec.cos(), inc.cos() * dec.sin(), inc.sin()])
}

/// Multiply the grid spectrum by `filter(kx, ky)` (rad/m) and transform back.
fn apply_filter(grid: &MagneticGrid, filter: impl Fn(f64, f64) -> Complex64) -> Result<Vec<f64>> {
    let (rows, cols) = (grid.ny(), grid.nx());
    let kx = wavenumbers(cols, grid.dx());
    let ky = wavenumbers(rows, grid.dy());

    let mut spectrum = forward2(grid.data(), rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            spectrum[r * cols + c] *= filter(kx[c], ky[r]);
        }
    }
    let out: Vec<f64> = inverse2(spectrum, rows, cols).into_iter().map(|v| v.re).collect();
    if out.iter().any(|v| !v.is_finite()) {
        return Err(CurieError::DegenerateSpectrum("filtered grid is not finite".into()));
    }
    Ok(out)
}
