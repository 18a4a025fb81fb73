use std::f64::consts::PI;

use serde::Serialize;
use tracing::debug;

use super::{bin_index, periodogram, summarize, SpectralBin, SpectralConfig, Spectrum, Taper};
use crate::error::{CurieError, Result};
use crate::grid::Window;

/// Log-power on a (direction, |k|) lattice.
///
/// Directions are folded into [0°, 180°) since the spectrum of a real
/// field is symmetric. Cells with fewer than `min_bin_count` samples are
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AzimuthalSpectrum {
    /// Lower edge of each sector, degrees from the x axis.
    pub sectors: Vec<f64>,
    pub sector_width: f64,
    /// Nominal centre of each radial bin.
    pub wavenumbers: Vec<f64>,
    cells: Vec<Option<SpectralBin>>,
}

impl AzimuthalSpectrum {
    pub fn n_sectors(&self) -> usize {
        self.sectors.len()
    }

    pub fn n_bins(&self) -> usize {
        self.wavenumbers.len()
    }

    pub fn cell(&self, sector: usize, bin: usize) -> Option<&SpectralBin> {
        self.cells.get(sector * self.n_bins() + bin).and_then(Option::as_ref)
    }

    /// Row-major cells, one row per sector.
    pub fn cells(&self) -> &[Option<SpectralBin>] {
        &self.cells
    }

    /// The filled cells of one sector as a 1D spectrum.
    pub fn sector_spectrum(&self, sector: usize) -> Result<Spectrum> {
        if sector >= self.n_sectors() {
            return Err(CurieError::invalid_parameter(
                "sector",
                sector,
                format!("only {} sectors", self.n_sectors()),
            ));
        }
        let nb = self.n_bins();
        let row = &self.cells[sector * nb..(sector + 1) * nb];
        Ok(Spectrum::from_bins(row.iter().flatten().copied()))
    }
}

/// Direction-resolved spectrum with sectors of `sector_width` degrees.
pub fn azimuthal_spectrum(
    window: &Window,
    taper: &Taper,
    sector_width: f64,
    config: &SpectralConfig,
) -> Result<AzimuthalSpectrum> {
    if !sector_width.is_finite() || sector_width <= 0.0 || sector_width > 180.0 {
        return Err(CurieError::invalid_parameter(
            "sector_width",
            sector_width,
            "must lie in (0, 180] degrees",
        ));
    }
    // Angle subtended by one wavenumber cell at Nyquist.
    let resolution = 360.0 / (PI * window.size() as f64);
    if sector_width < resolution {
        return Err(CurieError::invalid_parameter(
            "sector_width",
            sector_width,
            format!("finer than the {resolution:.2}° angular resolution of a {}-node window", window.size()),
        ));
    }
    let pg = periodogram(window, taper, config)?;
    let (width, nbins) = pg.radial_bins(config)?;
    let n_sectors = (180.0 / sector_width - 1e-9).ceil() as usize;

    let mut lattice: Vec<Vec<(f64, f64)>> = vec![Vec::new(); n_sectors * nbins];
    for s in &pg.samples {
        let Some(b) = bin_index(s.k, width, nbins) else { continue };
        let sector = ((s.azimuth / sector_width) as usize).min(n_sectors - 1);
        lattice[sector * nbins + b].push((s.k, s.log_power));
    }

    let cells: Vec<Option<SpectralBin>> = lattice
        .iter()
        .map(|c| (c.len() >= config.min_bin_count).then(|| summarize(c)))
        .collect();
    let filled = cells.iter().filter(|c| c.is_some()).count();
    if filled == 0 {
        return Err(CurieError::DegenerateSpectrum("no azimuthal cell has enough samples".into()));
    }
    debug!(n_sectors, nbins, filled, "azimuthal spectrum");

    Ok(AzimuthalSpectrum {
        sectors: (0..n_sectors).map(|i| i as f64 * sector_width).collect(),
        sector_width,
        wavenumbers: (0..nbins).map(|i| (i as f64 + 1.5) * width).collect(),
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::radial_spectrum;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn window(n: usize, mut f: impl FnMut(usize, usize) -> f64) -> Window {
        let data = (0..n * n).map(|i| f(i / n, i % n)).collect();
        Window::new(data, n, 1000.0, 1000.0).unwrap()
    }

    #[test]
    fn sector_count_covers_half_circle() {
        let mut rng = StdRng::seed_from_u64(11);
        let w = window(33, |_, _| rng.gen_range(-1.0..1.0));
        let az = azimuthal_spectrum(&w, &Taper::Hann, 30.0, &SpectralConfig::default()).unwrap();
        assert_eq!(az.n_sectors(), 6);
        assert_eq!(az.sectors[5], 150.0);
        let odd = azimuthal_spectrum(&w, &Taper::Hann, 40.0, &SpectralConfig::default()).unwrap();
        assert_eq!(odd.n_sectors(), 5);
    }

    #[test]
    fn striped_field_concentrates_power_across_stripes() {
        // Periodic stripes varying along x only, over a faint noise floor.
        let mut rng = StdRng::seed_from_u64(5);
        let w = window(32, |_, c| (2.0 * PI * 4.0 * c as f64 / 32.0).sin() + 1e-6 * rng.gen_range(-1.0..1.0));
        let az = azimuthal_spectrum(&w, &Taper::None, 45.0, &SpectralConfig::default()).unwrap();

        let along_x = az.sector_spectrum(0).unwrap();
        let along_y = az.sector_spectrum(2).unwrap();
        let peak = |s: &Spectrum| s.power().iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(peak(&along_x) > peak(&along_y) + 5.0);
    }

    #[test]
    fn single_sector_matches_radial_spectrum() {
        let mut rng = StdRng::seed_from_u64(9);
        let w = window(17, |_, _| rng.gen_range(-1.0..1.0));
        let config = SpectralConfig::default();
        let az = azimuthal_spectrum(&w, &Taper::Hann, 180.0, &config).unwrap();
        let radial = radial_spectrum(&w, &Taper::Hann, &config).unwrap();
        let sector = az.sector_spectrum(0).unwrap();
        assert_eq!(sector.len(), radial.len());
        for (a, b) in sector.power().iter().zip(radial.power()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn invalid_sector_width_is_rejected() {
        let w = window(9, |r, c| (r * c) as f64);
        assert!(azimuthal_spectrum(&w, &Taper::Hann, 0.0, &SpectralConfig::default()).is_err());
        assert!(azimuthal_spectrum(&w, &Taper::Hann, 200.0, &SpectralConfig::default()).is_err());
    }

    #[test]
    fn sectors_finer_than_angular_resolution_are_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let w = window(33, |_, _| rng.gen_range(-1.0..1.0));
        for width in [1e-9, 1.0, 3.0] {
            assert!(matches!(
                azimuthal_spectrum(&w, &Taper::Hann, width, &SpectralConfig::default()),
                Err(CurieError::InvalidParameter { name: "sector_width", .. })
            ));
        }
        assert!(azimuthal_spectrum(&w, &Taper::Hann, 4.0, &SpectralConfig::default()).is_ok());
    }
}
