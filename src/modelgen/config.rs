//! Build configuration: one boolean per derivation stage plus the optional
//! constant mass matrix for the Rosenbrock-W stages.
//!
//! Stage selection is always explicit. A disabled stage is never attempted,
//! which is observably different from an attempted stage that failed: both
//! leave the existence flag false, but only the latter logs a diagnostic.

#![allow(non_snake_case)]

use nalgebra::DMatrix;

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub build_tgrad: bool,
    pub build_jac: bool,
    pub build_expjac: bool,
    pub build_invjac: bool,
    pub build_invW: bool,
    pub build_invW_t: bool,
    pub build_hes: bool,
    pub build_invhes: bool,
    pub build_dpfuncs: bool,
    /// Constant mass matrix for the W derivations; identity when `None`.
    pub mass_matrix: Option<DMatrix<f64>>,
    /// "debug" | "info" | "warn" | "error"; `None` leaves logging untouched.
    pub loglevel: Option<String>,
}

impl Default for BuildConfig {
    /// Jacobian, time-gradient and parameter functions on; the symbolic
    /// inverses and the matrix exponential are opt-in.
    fn default() -> Self {
        Self {
            build_tgrad: true,
            build_jac: true,
            build_expjac: false,
            build_invjac: false,
            build_invW: false,
            build_invW_t: false,
            build_hes: false,
            build_invhes: false,
            build_dpfuncs: true,
            mass_matrix: None,
            loglevel: None,
        }
    }
}

impl BuildConfig {
    /// Everything on except the matrix exponential.
    pub fn all() -> Self {
        Self {
            build_tgrad: true,
            build_jac: true,
            build_expjac: false,
            build_invjac: true,
            build_invW: true,
            build_invW_t: true,
            build_hes: true,
            build_invhes: true,
            build_dpfuncs: true,
            mass_matrix: None,
            loglevel: None,
        }
    }

    pub fn with_mass_matrix(mut self, m: DMatrix<f64>) -> Self {
        self.mass_matrix = Some(m);
        self
    }

    pub fn with_loglevel(mut self, level: &str) -> Self {
        self.loglevel = Some(level.to_string());
        self
    }
}
