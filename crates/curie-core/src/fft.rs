//! 2D FFT helpers on row-major buffers.
//!
//! Same convention as numpy: the forward transform is unnormalized and the
//! inverse divides by `rows * cols`.

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};

/// Forward 2D FFT of real row-major data.
pub fn forward2(data: &[f64], rows: usize, cols: usize) -> Vec<Complex64> {
    let mut buf: Vec<Complex64> = data.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    transform2(&mut buf, rows, cols, FftDirection::Forward);
    buf
}

/// Inverse 2D FFT, normalized by `1 / (rows * cols)`.
pub fn inverse2(mut spectrum: Vec<Complex64>, rows: usize, cols: usize) -> Vec<Complex64> {
    transform2(&mut spectrum, rows, cols, FftDirection::Inverse);
    let norm = 1.0 / (rows * cols) as f64;
    for v in spectrum.iter_mut() {
        *v *= norm;
    }
    spectrum
}

fn transform2(buf: &mut [Complex64], rows: usize, cols: usize, direction: FftDirection) {
    debug_assert_eq!(buf.len(), rows * cols);
    let mut planner = FftPlanner::new();

    // Rows are contiguous; rustfft processes every `cols`-long chunk.
    planner.plan_fft(cols, direction).process(buf);

    let mut transposed = vec![Complex64::new(0.0, 0.0); rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            transposed[c * rows + r] = buf[r * cols + c];
        }
    }
    planner.plan_fft(rows, direction).process(&mut transposed);
    for c in 0..cols {
        for r in 0..rows {
            buf[r * cols + c] = transposed[c * rows + r];
        }
    }
}

/// Sample frequencies of an `n`-point transform with sample spacing `d`,
/// in the order produced by the FFT (numpy's `fftfreq`).
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * d);
    (0..n)
        .map(|i| {
            let signed = if i <= (n - 1) / 2 { i as f64 } else { i as f64 - n as f64 };
            signed * scale
        })
        .collect()
}

/// Angular wavenumbers `2π f` for an `n`-point transform.
pub fn wavenumbers(n: usize, d: f64) -> Vec<f64> {
    fftfreq(n, d).into_iter().map(|f| 2.0 * PI * f).collect()
}
