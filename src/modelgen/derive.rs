//! Derivation driver: runs every enabled symbolic stage over the scoped
//! right-hand side and records a per-stage outcome.
//!
//! Each stage runs behind its own failure boundary. A stage that fails (a
//! singular matrix, an unsupported derivation) downgrades exactly that
//! artifact and everything that depends on it; the right-hand side and the
//! remaining stages are untouched.

use log::{debug, warn};
use rayon::prelude::*;

use crate::modelgen::classifier::{SymbolTable, DERIV_MARKER};
use crate::modelgen::config::BuildConfig;
use crate::modelgen::error::ModelError;
use crate::modelgen::rewriter::SymbolScope;
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_vectors::{ExprMatrix, ExprVector};

/// Outcome of one derivation stage.
#[derive(Debug, Clone)]
pub enum Stage<T> {
    /// Not requested by the build configuration.
    Disabled,
    Built(T),
    /// Requested but the derivation failed; the diagnostic is retained.
    Failed(ModelError),
}

impl<T> Stage<T> {
    pub fn exists(&self) -> bool {
        matches!(self, Stage::Built(_))
    }

    pub fn as_built(&self) -> Option<&T> {
        match self {
            Stage::Built(v) => Some(v),
            _ => None,
        }
    }

    fn record(name: &str, r: Result<T, ModelError>) -> Self {
        match r {
            Ok(v) => {
                debug!("derived {}", name);
                Stage::Built(v)
            }
            Err(e) => {
                warn!("{} unavailable: {}", name, e);
                Stage::Failed(e)
            }
        }
    }
}

/// All symbolic artifacts of one compilation, each behind its own outcome.
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct DerivedArtifacts {
    pub tgrad: Stage<ExprVector>,
    pub jac: Stage<ExprMatrix>,
    pub expjac: Stage<ExprMatrix>,
    pub invjac: Stage<ExprMatrix>,
    pub invW: Stage<ExprMatrix>,
    pub invW_t: Stage<ExprMatrix>,
    pub hes: Stage<ExprMatrix>,
    pub invhes: Stage<ExprMatrix>,
    pub paramjac: Stage<ExprMatrix>,
}

fn unavailable(artifact: &str, missing: &str) -> ModelError {
    ModelError::symbolic(artifact, format!("requires the {} artifact", missing))
}

/// Differentiate the right-hand side against every state symbol, in parallel
/// over the rows.
fn jacobian(rhs: &ExprVector, state_syms: &[String]) -> ExprMatrix {
    let rows: Vec<Vec<Expr>> = rhs
        .data
        .par_iter()
        .map(|f| {
            state_syms
                .iter()
                .map(|s| f.diff(s).simplify())
                .collect::<Vec<Expr>>()
        })
        .collect();
    ExprMatrix::new(rows)
}

/// Per-component second derivative: entry `(i, j)` is the derivative of the
/// Jacobian entry `(i, j)` against state `j` again.
fn hessian_slice(jac: &ExprMatrix, state_syms: &[String]) -> ExprMatrix {
    let rows: Vec<Vec<Expr>> = jac
        .data
        .par_iter()
        .map(|row| {
            row.iter()
                .zip(state_syms)
                .map(|(e, s)| e.diff(s).simplify())
                .collect::<Vec<Expr>>()
        })
        .collect();
    ExprMatrix::new(rows)
}

fn invert(artifact: &str, m: &ExprMatrix) -> Result<ExprMatrix, ModelError> {
    m.inverse().map_err(|e| ModelError::symbolic(artifact, e))
}

/// Run every enabled stage. Every failure is confined to its stage; nothing
/// here aborts the compilation. A mass matrix of the wrong shape fails the
/// two W stages and only those.
pub fn derive_system(
    rhs: &ExprVector,
    table: &SymbolTable,
    scope: &SymbolScope,
    config: &BuildConfig,
) -> DerivedArtifacts {
    let n = table.n_states();
    let mass_shape: Result<(), ModelError> = match &config.mass_matrix {
        Some(m) if m.nrows() != n || m.ncols() != n => Err(ModelError::DimensionMismatch {
            got_rows: m.nrows(),
            got_cols: m.ncols(),
            expected: n,
        }),
        _ => Ok(()),
    };

    let state_syms: Vec<String> = table
        .state_names
        .iter()
        .map(|s| scope.scoped(s))
        .collect();
    let d_syms: Vec<String> = table
        .state_names
        .iter()
        .map(|s| scope.scoped(&format!("{}{}", DERIV_MARKER, s)))
        .collect();
    let indep_sym = scope.scoped(&table.indep_var);
    let gamma = Expr::Var(scope.gamma());

    // Close derivative references before differentiating: each d<state>
    // symbol is replaced by the component it names, in declaration order, so
    // the artifacts are derived from a self-contained right-hand side.
    let mut closed: Vec<Expr> = Vec::with_capacity(n);
    for f in rhs.iter() {
        let mut e = f.clone();
        for (j, d_sym) in d_syms.iter().enumerate() {
            if j < closed.len() && e.contains_variable(d_sym) {
                e = e.substitute_variable(d_sym, &closed[j]);
            }
        }
        closed.push(e.simplify());
    }
    // a self- or forward-reference cannot be closed; the stages that would
    // differentiate it fail with a diagnostic instead
    let mut unresolved: Option<String> = None;
    'scan: for (i, e) in closed.iter().enumerate() {
        for (j, d_sym) in d_syms.iter().enumerate() {
            if e.contains_variable(d_sym) {
                unresolved = Some(format!(
                    "component '{}' references '{}{}' before it is defined",
                    table.state_names[i], DERIV_MARKER, table.state_names[j]
                ));
                break 'scan;
            }
        }
    }
    let closed_rhs = ExprVector::new(closed);

    let tgrad = if !config.build_tgrad {
        Stage::Disabled
    } else if let Some(reason) = &unresolved {
        Stage::record("tgrad", Err(ModelError::symbolic("tgrad", reason.clone())))
    } else {
        Stage::record("tgrad", Ok(closed_rhs.diff(&indep_sym)))
    };

    let jac = if !config.build_jac {
        Stage::Disabled
    } else if let Some(reason) = &unresolved {
        Stage::record("jac", Err(ModelError::symbolic("jac", reason.clone())))
    } else {
        Stage::record("jac", Ok(jacobian(&closed_rhs, &state_syms)))
    };

    // no closed symbolic form for the matrix exponential in this engine
    let expjac = if config.build_expjac {
        Stage::record(
            "expjac",
            Err(ModelError::symbolic(
                "expjac",
                "symbolic matrix exponential is not supported",
            )),
        )
    } else {
        Stage::Disabled
    };

    let with_jac = |artifact: &str,
                    enabled: bool,
                    f: &dyn Fn(&ExprMatrix) -> Result<ExprMatrix, ModelError>|
     -> Stage<ExprMatrix> {
        if !enabled {
            return Stage::Disabled;
        }
        match jac.as_built() {
            Some(j) => Stage::record(artifact, f(j)),
            None => Stage::record(artifact, Err(unavailable(artifact, "jac"))),
        }
    };

    let invjac = with_jac("invjac", config.build_invjac, &|j| invert("invjac", j));

    let mass_sym = match &config.mass_matrix {
        Some(m) if mass_shape.is_ok() => ExprMatrix::from_dmatrix(m),
        _ => ExprMatrix::identity(n),
    };

    let invW = with_jac("invW", config.build_invW, &|j| {
        mass_shape.clone()?;
        // W = M - gamma * J
        let w = mass_sym.clone() - j.clone().scale(&gamma);
        invert("invW", &w)
    });

    let invW_t = with_jac("invW_t", config.build_invW_t, &|j| {
        mass_shape.clone()?;
        // W_t = M / gamma - J
        let scaled = mass_sym.map(|e| (e.clone() / gamma.clone()).simplify());
        let w = scaled - j.clone();
        invert("invW_t", &w)
    });

    let hes = with_jac("hes", config.build_hes, &|j| {
        Ok(hessian_slice(j, &state_syms))
    });

    let invhes = if !config.build_invhes {
        Stage::Disabled
    } else {
        match hes.as_built() {
            Some(h) => Stage::record("invhes", invert("invhes", h)),
            None => Stage::record("invhes", Err(unavailable("invhes", "hes"))),
        }
    };

    let paramjac = if !config.build_dpfuncs {
        Stage::Disabled
    } else if let Some(reason) = &unresolved {
        Stage::record(
            "paramjac",
            Err(ModelError::symbolic("paramjac", reason.clone())),
        )
    } else {
        let param_syms: Vec<String> = table
            .param_names
            .iter()
            .map(|s| scope.scoped(s))
            .collect();
        let rows: Vec<Vec<Expr>> = closed_rhs
            .data
            .par_iter()
            .map(|f| {
                param_syms
                    .iter()
                    .map(|s| f.diff(s).simplify())
                    .collect::<Vec<Expr>>()
            })
            .collect();
        Stage::record("paramjac", Ok(ExprMatrix::new(rows)))
    };

    DerivedArtifacts {
        tgrad,
        jac,
        expjac,
        invjac,
        invW,
        invW_t,
        hes,
        invhes,
        paramjac,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modelgen::classifier::{classify, EquationSpec};
    use crate::modelgen::rewriter::Rewriter;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn scoped_system(spec: &EquationSpec) -> (ExprVector, SymbolTable, SymbolScope) {
        let table = classify(spec).unwrap();
        let scope = SymbolScope::new();
        let rw = Rewriter::new(&table, &scope);
        let mut scoped = Vec::new();
        for (name, rhs) in table.state_names.iter().zip(&table.components) {
            let (_, sym) = rw.rewrite(rhs, name).unwrap();
            scoped.push(sym);
        }
        (ExprVector::new(scoped), table, scope)
    }

    fn lotka() -> (ExprVector, SymbolTable, SymbolScope) {
        let (x, y) = (Expr::Var("x".to_string()), Expr::Var("y".to_string()));
        let (a, b) = (Expr::Var("a".to_string()), Expr::Var("b".to_string()));
        let (c, d) = (Expr::Var("c".to_string()), Expr::Var("d".to_string()));
        let spec = EquationSpec::new()
            .eq("dx", a * x.clone() - b * x.clone() * y.clone())
            .eq("dy", Expr::Const(0.0) - c * y.clone() + d * x * y)
            .param("a", 1.5)
            .param("b", 1.0)
            .param("c", 3.0)
            .param("d", 1.0);
        scoped_system(&spec)
    }

    fn eval_jac(j: &ExprMatrix, scope: &SymbolScope, x: f64, y: f64) -> DMatrix<f64> {
        let names: Vec<String> = ["x", "y", "a", "b", "c", "d"]
            .iter()
            .map(|s| scope.scoped(s))
            .collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        j.evaluate(&refs, &[x, y, 1.5, 1.0, 3.0, 1.0])
    }

    #[test]
    fn test_jacobian_entries() {
        let (rhs, table, scope) = lotka();
        let arts = derive_system(&rhs, &table, &scope, &BuildConfig::default());
        let j = arts.jac.as_built().unwrap();
        // J = [[a - b*y, -b*x], [d*y, -c + d*x]]
        let numeric = eval_jac(j, &scope, 1.0, 1.0);
        assert_relative_eq!(numeric[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(numeric[(0, 1)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(numeric[(1, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(numeric[(1, 1)], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tgrad_of_autonomous_system_is_zero() {
        let (rhs, table, scope) = lotka();
        let arts = derive_system(&rhs, &table, &scope, &BuildConfig::default());
        let tg = arts.tgrad.as_built().unwrap();
        for e in tg.iter() {
            assert!(e.is_zero());
        }
    }

    #[test]
    fn test_disabled_stage_is_disabled_not_failed() {
        let (rhs, table, scope) = lotka();
        let config = BuildConfig {
            build_jac: false,
            ..BuildConfig::default()
        };
        let arts = derive_system(&rhs, &table, &scope, &config);
        assert!(matches!(arts.jac, Stage::Disabled));
        assert!(!arts.jac.exists());
    }

    #[test]
    fn test_dependent_stage_downgraded_when_jac_disabled() {
        let (rhs, table, scope) = lotka();
        let config = BuildConfig {
            build_jac: false,
            build_invjac: true,
            ..BuildConfig::default()
        };
        let arts = derive_system(&rhs, &table, &scope, &config);
        assert!(matches!(arts.invjac, Stage::Failed(_)));
    }

    #[test]
    fn test_expjac_always_fails_when_enabled() {
        let (rhs, table, scope) = lotka();
        let config = BuildConfig {
            build_expjac: true,
            ..BuildConfig::default()
        };
        let arts = derive_system(&rhs, &table, &scope, &config);
        assert!(matches!(arts.expjac, Stage::Failed(_)));
    }

    #[test]
    fn test_mass_matrix_shape_fails_w_stages_only() {
        let (rhs, table, scope) = lotka();
        let config = BuildConfig::all().with_mass_matrix(DMatrix::zeros(3, 3));
        let arts = derive_system(&rhs, &table, &scope, &config);
        assert!(matches!(
            arts.invW,
            Stage::Failed(ModelError::DimensionMismatch { expected: 2, .. })
        ));
        assert!(matches!(
            arts.invW_t,
            Stage::Failed(ModelError::DimensionMismatch { .. })
        ));
        // every stage that does not use the mass matrix is untouched
        assert!(arts.tgrad.exists());
        assert!(arts.jac.exists());
        assert!(arts.invjac.exists());
        assert!(arts.hes.exists());
        assert!(arts.paramjac.exists());
    }

    #[test]
    fn test_invjac_times_jac_is_identity() {
        let (rhs, table, scope) = lotka();
        let arts = derive_system(&rhs, &table, &scope, &BuildConfig::all());
        let j = arts.jac.as_built().unwrap().clone();
        let inv = arts.invjac.as_built().unwrap().clone();
        let product = inv * j;
        let names: Vec<String> = ["x", "y", "a", "b", "c", "d"]
            .iter()
            .map(|s| scope.scoped(s))
            .collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let numeric = product.evaluate(&refs, &[1.3, 0.7, 1.5, 1.0, 3.0, 1.0]);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(numeric[(i, j)], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_paramjac_first_column() {
        let (rhs, table, scope) = lotka();
        let arts = derive_system(&rhs, &table, &scope, &BuildConfig::default());
        let pj = arts.paramjac.as_built().unwrap();
        // d f / d a = [x, 0]
        let x_sym = scope.scoped("x");
        assert_eq!(pj[(0, 0)], Expr::Var(x_sym));
        assert!(pj[(1, 0)].is_zero());
    }

    #[test]
    fn test_derivative_reference_closed_before_differentiation() {
        // dx = a*x, dy = dx*x: dy differentiates as a*x^2
        let x = Expr::Var("x".to_string());
        let a = Expr::Var("a".to_string());
        let spec = EquationSpec::new()
            .eq("dx", a.clone() * x.clone())
            .eq("dy", Expr::Var("dx".to_string()) * x.clone())
            .param("a", 1.5);
        let (rhs, table, scope) = scoped_system(&spec);
        let arts = derive_system(&rhs, &table, &scope, &BuildConfig::default());
        let j = arts.jac.as_built().unwrap();
        let names: Vec<String> = ["x", "y", "a"].iter().map(|s| scope.scoped(s)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        // J = [[a, 0], [2*a*x, 0]]
        let numeric = j.evaluate(&refs, &[2.0, 0.3, 1.5]);
        assert_relative_eq!(numeric[(0, 0)], 1.5, epsilon = 1e-12);
        assert_relative_eq!(numeric[(1, 0)], 6.0, epsilon = 1e-12);
        assert_relative_eq!(numeric[(1, 1)], 0.0, epsilon = 1e-12);
        // d f / d a = [x, x^2]
        let pj = arts.paramjac.as_built().unwrap();
        let numeric = pj.evaluate(&refs, &[2.0, 0.3, 1.5]);
        assert_relative_eq!(numeric[(0, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(numeric[(1, 0)], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_forward_derivative_reference_downgrades_derived_stages() {
        // dx refers to dy, which is defined after it
        let x = Expr::Var("x".to_string());
        let spec = EquationSpec::new()
            .eq("dx", Expr::Var("dy".to_string()) + x.clone())
            .eq("dy", x);
        let (rhs, table, scope) = scoped_system(&spec);
        let arts = derive_system(&rhs, &table, &scope, &BuildConfig::default());
        assert!(matches!(arts.tgrad, Stage::Failed(_)));
        assert!(matches!(arts.jac, Stage::Failed(_)));
        assert!(matches!(arts.paramjac, Stage::Failed(_)));
    }
}
