use serde::{Deserialize, Serialize};

/// Number of free parameters in the Bouligand forward model.
pub const N_PARAMS: usize = 4;

/// Smallest layer thickness (km) accepted by the fitting routines.
/// The Bouligand integrand vanishes identically at Δz = 0.
pub const MIN_THICKNESS: f64 = 1e-3;

/// One of the four unknowns of the Bouligand model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Beta,
    Zt,
    Dz,
    C,
}

impl Parameter {
    pub const ALL: [Parameter; N_PARAMS] = [Parameter::Beta, Parameter::Zt, Parameter::Dz, Parameter::C];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Parameter::Beta => 0,
            Parameter::Zt => 1,
            Parameter::Dz => 2,
            Parameter::C => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Parameter::Beta => "beta",
            Parameter::Zt => "zt",
            Parameter::Dz => "dz",
            Parameter::C => "c",
        }
    }
}

/// Physical parameters of the fractal magnetization model.
/// Depths are in km, matching wavenumbers in rad/km.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Fractal exponent β.
    pub beta: f64,
    /// Depth to the top of the magnetic layer.
    pub zt: f64,
    /// Thickness of the magnetic layer.
    pub dz: f64,
    /// Field constant (log-power offset).
    pub c: f64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self { beta: 3.0, zt: 1.0, dz: 10.0, c: 5.0 }
    }
}

impl ModelParameters {
    pub fn new(beta: f64, zt: f64, dz: f64, c: f64) -> Self {
        Self { beta, zt, dz, c }
    }

    pub fn from_array(p: [f64; N_PARAMS]) -> Self {
        Self { beta: p[0], zt: p[1], dz: p[2], c: p[3] }
    }

    pub fn to_array(self) -> [f64; N_PARAMS] {
        [self.beta, self.zt, self.dz, self.c]
    }

    pub fn get(&self, p: Parameter) -> f64 {
        self.to_array()[p.index()]
    }

    /// Depth to the bottom of the magnetic layer, z_t + Δz.
    pub fn curie_depth(&self) -> f64 {
        self.zt + self.dz
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// True when the parameters lie inside the physical domain used for
    /// fitting: β ≥ 0, z_t ≥ 0, Δz ≥ [`MIN_THICKNESS`].
    pub fn is_physical(&self) -> bool {
        self.is_finite() && self.beta >= 0.0 && self.zt >= 0.0 && self.dz >= MIN_THICKNESS
    }
}

/// Project a raw `[β, z_t, Δz, C]` vector onto the physical domain.
pub(crate) fn clamp_physical(p: &mut [f64]) {
    p[0] = p[0].max(0.0);
    p[1] = p[1].max(0.0);
    p[2] = p[2].max(MIN_THICKNESS);
}

/// A Curie-point depth estimate with its one-sigma uncertainty (km).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurieDepth {
    pub depth: f64,
    pub error: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_roundtrip_keeps_parameter_order() {
        let p = ModelParameters::new(2.5, 0.3, 12.0, -1.0);
        assert_eq!(p.to_array(), [2.5, 0.3, 12.0, -1.0]);
        for param in Parameter::ALL {
            assert_eq!(p.get(param), p.to_array()[param.index()]);
        }
    }

    #[test]
    fn clamp_moves_values_onto_physical_bounds() {
        let mut raw = [-1.0, -0.2, 0.0, -7.0];
        clamp_physical(&mut raw);
        let p = ModelParameters::from_array(raw);
        assert!(p.is_physical());
        assert_eq!(p.c, -7.0);
        assert_eq!(p.dz, MIN_THICKNESS);
    }

    #[test]
    fn curie_depth_is_top_plus_thickness() {
        let p = ModelParameters::new(3.0, 0.305, 10.0, 0.0);
        assert!((p.curie_depth() - 10.305).abs() < 1e-12);
    }
}
