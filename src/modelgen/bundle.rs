//! Model assembly: lowers the derived artifacts and packages them behind a
//! typed call surface.
//!
//! The compiled model owns a mode-keyed dispatch table. Every mode the build
//! configuration enabled has an entry: either the lowered evaluator or a stub
//! carrying the diagnostic of the failed derivation. Disabled modes have no
//! entry at all. Invoking a mode without a live evaluator returns
//! [`ModelError::Invocation`]; it never panics.

use std::collections::HashMap;

use log::info;
use nalgebra::{DMatrix, DVector};
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::modelgen::classifier::{classify, EquationSpec, SymbolTable};
use crate::modelgen::config::BuildConfig;
use crate::modelgen::derive::{derive_system, Stage};
use crate::modelgen::error::ModelError;
use crate::modelgen::rewriter::{scoped_leaves, NumExpr, Rewriter, SymbolScope};
use crate::modelgen::synthesize::{
    lower_matrix, lower_vector, CompiledMatrix, CompiledVector,
};
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_vectors::{ExprMatrix, ExprVector};

/// Every callable mode of a compiled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ModeTag {
    #[strum(serialize = "rhs")]
    Rhs,
    #[strum(serialize = "tgrad")]
    Tgrad,
    #[strum(serialize = "jac")]
    Jac,
    #[strum(serialize = "expjac")]
    Expjac,
    #[strum(serialize = "invjac")]
    Invjac,
    #[strum(serialize = "invW")]
    InvW,
    #[strum(serialize = "invW_t")]
    InvWt,
    #[strum(serialize = "hes")]
    Hes,
    #[strum(serialize = "invhes")]
    Invhes,
    #[strum(serialize = "paramjac")]
    Paramjac,
}

/// One dispatch-table entry.
#[derive(Debug, Clone)]
pub enum CompiledOp {
    Vector(CompiledVector),
    Matrix(CompiledMatrix),
    /// The stage was enabled but derivation failed; calls surface the
    /// retained diagnostic.
    Stub(ModelError),
}

/// A compiled model bundle.
///
/// Holds the mutable parameter vector, the retained input for recompilation
/// and introspection, and the dispatch table of lowered evaluators.
pub struct OdeModel {
    spec: EquationSpec,
    config: BuildConfig,
    pub state_names: Vec<String>,
    pub param_names: Vec<String>,
    params: Vec<f64>,
    /// Right-hand sides as written, in state order.
    pub components: Vec<Expr>,
    /// Jacobian entries rendered with the user's variable names, when the
    /// stage was built.
    readable_jac: Option<Vec<Vec<String>>>,
    ops: HashMap<ModeTag, CompiledOp>,
    n: usize,
}

fn lower_vector_stage(
    tag: ModeTag,
    stage: &Stage<ExprVector>,
    leaves: &HashMap<String, NumExpr>,
    ops: &mut HashMap<ModeTag, CompiledOp>,
) {
    match stage {
        Stage::Disabled => {}
        Stage::Built(v) => match lower_vector(v, leaves) {
            Ok(cv) => {
                ops.insert(tag, CompiledOp::Vector(cv));
            }
            Err(reason) => {
                ops.insert(
                    tag,
                    CompiledOp::Stub(ModelError::symbolic(&tag.to_string(), reason)),
                );
            }
        },
        Stage::Failed(e) => {
            ops.insert(tag, CompiledOp::Stub(e.clone()));
        }
    }
}

fn lower_matrix_stage(
    tag: ModeTag,
    stage: &Stage<ExprMatrix>,
    leaves: &HashMap<String, NumExpr>,
    ops: &mut HashMap<ModeTag, CompiledOp>,
) {
    match stage {
        Stage::Disabled => {}
        Stage::Built(m) => match lower_matrix(m, leaves) {
            Ok(cm) => {
                ops.insert(tag, CompiledOp::Matrix(cm));
            }
            Err(reason) => {
                ops.insert(
                    tag,
                    CompiledOp::Stub(ModelError::symbolic(&tag.to_string(), reason)),
                );
            }
        },
        Stage::Failed(e) => {
            ops.insert(tag, CompiledOp::Stub(e.clone()));
        }
    }
}

fn init_logging(loglevel: &str) -> Result<(), ModelError> {
    let level = match loglevel {
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        other => {
            return Err(ModelError::Parse(format!(
                "loglevel must be debug, info, warn or error, got '{}'",
                other
            )));
        }
    };
    // Err here just means a logger is already installed
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
    Ok(())
}

/// Compile an equation block into a model bundle.
pub fn compile(spec: &EquationSpec, config: BuildConfig) -> Result<OdeModel, ModelError> {
    if let Some(level) = &config.loglevel {
        init_logging(level)?;
    }
    let spec = spec.clone();
    let table: SymbolTable = classify(&spec)?;
    let scope = SymbolScope::new();
    let rewriter = Rewriter::new(&table, &scope);

    let mut numeric = Vec::with_capacity(table.n_states());
    let mut scoped = Vec::with_capacity(table.n_states());
    for (name, rhs) in table.state_names.iter().zip(&table.components) {
        let (num, sym) = rewriter.rewrite(rhs, name)?;
        numeric.push(num);
        scoped.push(sym);
    }
    let scoped_rhs = ExprVector::new(scoped);

    let artifacts = derive_system(&scoped_rhs, &table, &scope, &config);
    let leaves = scoped_leaves(&table, &scope);

    let mut ops: HashMap<ModeTag, CompiledOp> = HashMap::new();
    ops.insert(
        ModeTag::Rhs,
        CompiledOp::Vector(CompiledVector { entries: numeric }),
    );
    lower_vector_stage(ModeTag::Tgrad, &artifacts.tgrad, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::Jac, &artifacts.jac, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::Expjac, &artifacts.expjac, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::Invjac, &artifacts.invjac, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::InvW, &artifacts.invW, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::InvWt, &artifacts.invW_t, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::Hes, &artifacts.hes, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::Invhes, &artifacts.invhes, &leaves, &mut ops);
    lower_matrix_stage(ModeTag::Paramjac, &artifacts.paramjac, &leaves, &mut ops);

    let readable_jac = artifacts.jac.as_built().map(|j| {
        j.to_strings()
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|s| s.replace(scope.prefix(), ""))
                    .collect()
            })
            .collect()
    });

    info!(
        "compiled model: {} states, {} params, modes [{}]",
        table.n_states(),
        table.n_params(),
        itertools::Itertools::join(
            &mut ModeTag::iter().filter(|m| matches!(
                ops.get(m),
                Some(CompiledOp::Vector(_)) | Some(CompiledOp::Matrix(_))
            )),
            ", "
        )
    );

    Ok(OdeModel {
        spec,
        config,
        state_names: table.state_names.clone(),
        param_names: table.param_names.clone(),
        params: table.param_defaults.clone(),
        components: table.components.clone(),
        readable_jac,
        ops,
        n: table.n_states(),
    })
}

impl OdeModel {
    pub fn n_states(&self) -> usize {
        self.n
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    /// Current parameter values, in declaration order.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<f64> {
        self.param_names
            .iter()
            .position(|p| p == name)
            .map(|i| self.params[i])
    }

    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        match self.param_names.iter().position(|p| p == name) {
            Some(i) => {
                self.params[i] = value;
                Ok(())
            }
            None => Err(ModelError::Parse(format!(
                "no symbolic parameter named '{}'",
                name
            ))),
        }
    }

    pub fn set_params(&mut self, values: &[f64]) -> Result<(), ModelError> {
        if values.len() != self.params.len() {
            return Err(ModelError::Parse(format!(
                "expected {} parameter values, got {}",
                self.params.len(),
                values.len()
            )));
        }
        self.params.copy_from_slice(values);
        Ok(())
    }

    /// Right-hand sides as written, in state order.
    pub fn component_exprs(&self) -> &[Expr] {
        &self.components
    }

    /// Jacobian entries as printable strings in the user's variable names;
    /// `None` when the stage was not built.
    pub fn readable_jacobian(&self) -> Option<&Vec<Vec<String>>> {
        self.readable_jac.as_ref()
    }

    /// Modes with a live evaluator, in declaration order.
    pub fn available_modes(&self) -> Vec<ModeTag> {
        ModeTag::iter()
            .filter(|m| {
                matches!(
                    self.ops.get(m),
                    Some(CompiledOp::Vector(_)) | Some(CompiledOp::Matrix(_))
                )
            })
            .collect()
    }

    pub fn has(&self, tag: ModeTag) -> bool {
        matches!(
            self.ops.get(&tag),
            Some(CompiledOp::Vector(_)) | Some(CompiledOp::Matrix(_))
        )
    }

    pub fn has_jac(&self) -> bool {
        self.has(ModeTag::Jac)
    }

    pub fn has_tgrad(&self) -> bool {
        self.has(ModeTag::Tgrad)
    }

    pub fn has_expjac(&self) -> bool {
        self.has(ModeTag::Expjac)
    }

    pub fn has_invjac(&self) -> bool {
        self.has(ModeTag::Invjac)
    }

    #[allow(non_snake_case)]
    pub fn has_invW(&self) -> bool {
        self.has(ModeTag::InvW)
    }

    #[allow(non_snake_case)]
    pub fn has_invW_t(&self) -> bool {
        self.has(ModeTag::InvWt)
    }

    pub fn has_hes(&self) -> bool {
        self.has(ModeTag::Hes)
    }

    pub fn has_invhes(&self) -> bool {
        self.has(ModeTag::Invhes)
    }

    pub fn has_paramjac(&self) -> bool {
        self.has(ModeTag::Paramjac)
    }

    fn op(&self, tag: ModeTag) -> Result<&CompiledOp, ModelError> {
        match self.ops.get(&tag) {
            Some(CompiledOp::Stub(e)) => Err(ModelError::Invocation(
                tag.to_string(),
                format!("derivation failed: {}", e),
            )),
            Some(op) => Ok(op),
            None => Err(ModelError::Invocation(
                tag.to_string(),
                "disabled by the build configuration".to_string(),
            )),
        }
    }

    fn matrix_op(&self, tag: ModeTag) -> Result<&CompiledMatrix, ModelError> {
        match self.op(tag)? {
            CompiledOp::Matrix(m) => Ok(m),
            _ => Err(ModelError::Invocation(
                tag.to_string(),
                "mode is not matrix-valued".to_string(),
            )),
        }
    }

    fn vector_op(&self, tag: ModeTag) -> Result<&CompiledVector, ModelError> {
        match self.op(tag)? {
            CompiledOp::Vector(v) => Ok(v),
            _ => Err(ModelError::Invocation(
                tag.to_string(),
                "mode is not vector-valued".to_string(),
            )),
        }
    }

    fn rhs_with(&self, t: f64, y: &[f64], p: &[f64]) -> Result<DVector<f64>, ModelError> {
        let rhs = self.vector_op(ModeTag::Rhs)?;
        // components are evaluated in order so a derivative reference sees
        // every component already computed in this call
        let mut buf = vec![0.0; rhs.len()];
        for (i, e) in rhs.entries.iter().enumerate() {
            let v = e.eval(t, y, p, &buf, 0.0);
            buf[i] = v;
        }
        Ok(DVector::from_vec(buf))
    }

    /// Evaluate the right-hand side with the stored parameters.
    pub fn rhs(&self, t: f64, y: &[f64]) -> Result<DVector<f64>, ModelError> {
        self.rhs_with(t, y, &self.params)
    }

    /// Evaluate the right-hand side with an explicit parameter vector,
    /// leaving the stored parameters untouched.
    pub fn rhs_with_params(
        &self,
        t: f64,
        y: &[f64],
        p: &[f64],
    ) -> Result<DVector<f64>, ModelError> {
        if p.len() != self.params.len() {
            return Err(ModelError::Parse(format!(
                "expected {} parameter values, got {}",
                self.params.len(),
                p.len()
            )));
        }
        self.rhs_with(t, y, p)
    }

    /// Evaluate the right-hand side into caller-provided storage.
    pub fn rhs_in_place(
        &self,
        t: f64,
        y: &[f64],
        out: &mut DVector<f64>,
    ) -> Result<(), ModelError> {
        let v = self.rhs(t, y)?;
        out.copy_from(&v);
        Ok(())
    }

    pub fn tgrad(&self, t: f64, y: &[f64]) -> Result<DVector<f64>, ModelError> {
        Ok(self
            .vector_op(ModeTag::Tgrad)?
            .eval(t, y, &self.params, &[], 0.0))
    }

    pub fn jac(&self, t: f64, y: &[f64]) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::Jac)?
            .eval(t, y, &self.params, &[], 0.0))
    }

    pub fn expjac(&self, t: f64, y: &[f64], gamma: f64) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::Expjac)?
            .eval(t, y, &self.params, &[], gamma))
    }

    pub fn invjac(&self, t: f64, y: &[f64]) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::Invjac)?
            .eval(t, y, &self.params, &[], 0.0))
    }

    /// `inv(M - gamma * J)` with `gamma` bound at call time.
    #[allow(non_snake_case)]
    pub fn invW(&self, t: f64, y: &[f64], gamma: f64) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::InvW)?
            .eval(t, y, &self.params, &[], gamma))
    }

    /// `inv(M / gamma - J)` with `gamma` bound at call time.
    #[allow(non_snake_case)]
    pub fn invW_t(&self, t: f64, y: &[f64], gamma: f64) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::InvWt)?
            .eval(t, y, &self.params, &[], gamma))
    }

    pub fn hes(&self, t: f64, y: &[f64]) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::Hes)?
            .eval(t, y, &self.params, &[], 0.0))
    }

    pub fn invhes(&self, t: f64, y: &[f64]) -> Result<DMatrix<f64>, ModelError> {
        Ok(self
            .matrix_op(ModeTag::Invhes)?
            .eval(t, y, &self.params, &[], 0.0))
    }

    /// Jacobian of the right-hand side against the given parameter vector.
    pub fn paramjac(&self, t: f64, y: &[f64], p: &[f64]) -> Result<DMatrix<f64>, ModelError> {
        if p.len() != self.params.len() {
            return Err(ModelError::Parse(format!(
                "expected {} parameter values, got {}",
                self.params.len(),
                p.len()
            )));
        }
        Ok(self.matrix_op(ModeTag::Paramjac)?.eval(t, y, p, &[], 0.0))
    }

    fn param_index(&self, name: &str) -> Result<usize, ModelError> {
        self.param_names
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| {
                ModelError::Parse(format!("no symbolic parameter named '{}'", name))
            })
    }

    /// Right-hand side with the named parameter overridden for this call.
    pub fn param_func(
        &self,
        name: &str,
        value: f64,
        t: f64,
        y: &[f64],
    ) -> Result<DVector<f64>, ModelError> {
        let k = self.param_index(name)?;
        let mut p = self.params.clone();
        p[k] = value;
        self.rhs_with(t, y, &p)
    }

    /// Derivative of the right-hand side against the named parameter,
    /// evaluated with that parameter overridden for this call: the
    /// corresponding column of the parameter Jacobian.
    pub fn param_deriv(
        &self,
        name: &str,
        value: f64,
        t: f64,
        y: &[f64],
    ) -> Result<DVector<f64>, ModelError> {
        let k = self.param_index(name)?;
        let mut p = self.params.clone();
        p[k] = value;
        let pj = self.paramjac(t, y, &p)?;
        Ok(pj.column(k).into_owned())
    }

    /// Enum-keyed in-place dispatch for the vector-valued modes. `Rhs`
    /// evaluates with the stored parameters.
    pub fn call_vector(
        &self,
        tag: ModeTag,
        t: f64,
        y: &[f64],
        out: &mut DVector<f64>,
    ) -> Result<(), ModelError> {
        match tag {
            ModeTag::Rhs => {
                let v = self.rhs(t, y)?;
                out.copy_from(&v);
                Ok(())
            }
            _ => {
                let op = self.vector_op(tag)?;
                op.eval_into(out, t, y, &self.params, &[], 0.0);
                Ok(())
            }
        }
    }

    /// Enum-keyed in-place dispatch for the matrix-valued modes. `gamma` is
    /// only read by the modes whose artifact references it.
    pub fn call_matrix(
        &self,
        tag: ModeTag,
        t: f64,
        y: &[f64],
        gamma: f64,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError> {
        let op = self.matrix_op(tag)?;
        op.eval_into(out, t, y, &self.params, &[], gamma);
        Ok(())
    }

    /// Recompile from the retained input and configuration. The result is
    /// behaviorally identical to `self`; symbol scoping is fresh.
    pub fn recompile(&self) -> Result<OdeModel, ModelError> {
        let mut model = compile(&self.spec, self.config.clone())?;
        model.set_params(&self.params)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lotka_spec() -> EquationSpec {
        let (x, y) = (Expr::Var("x".to_string()), Expr::Var("y".to_string()));
        let (a, b) = (Expr::Var("a".to_string()), Expr::Var("b".to_string()));
        let (c, d) = (Expr::Var("c".to_string()), Expr::Var("d".to_string()));
        EquationSpec::new()
            .eq("dx", a * x.clone() - b * x.clone() * y.clone())
            .eq("dy", Expr::Const(0.0) - c * y.clone() + d * x * y)
            .param("a", 1.5)
            .param("b", 1.0)
            .param("c", 3.0)
            .param("d", 1.0)
    }

    #[test]
    fn test_lotka_rhs_values() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let f = model.rhs(0.0, &[1.0, 1.0]).unwrap();
        assert_relative_eq!(f[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(f[1], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let (t, y) = (0.0, [1.3, 0.7]);
        let j = model.jac(t, &y).unwrap();
        let h = 1e-6;
        for col in 0..2 {
            let mut y_hi = y;
            let mut y_lo = y;
            y_hi[col] += h;
            y_lo[col] -= h;
            let f_hi = model.rhs(t, &y_hi).unwrap();
            let f_lo = model.rhs(t, &y_lo).unwrap();
            for row in 0..2 {
                let fd = (f_hi[row] - f_lo[row]) / (2.0 * h);
                assert_relative_eq!(j[(row, col)], fd, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_invjac_times_jac_is_identity() {
        let model = compile(&lotka_spec(), BuildConfig::all()).unwrap();
        let (t, y) = (0.0, [1.3, 0.7]);
        let j = model.jac(t, &y).unwrap();
        let inv = model.invjac(t, &y).unwrap();
        let product = inv * j;
        for i in 0..2 {
            for k in 0..2 {
                let expected = if i == k { 1.0 } else { 0.0 };
                assert_relative_eq!(product[(i, k)], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_param_deriv_against_a() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let d = model.param_deriv("a", 1.5, 0.0, &[2.5, 0.4]).unwrap();
        // d f / d a = [x, 0], independent of a itself
        assert_relative_eq!(d[0], 2.5, epsilon = 1e-12);
        assert_relative_eq!(d[1], 0.0, epsilon = 1e-12);
        let d2 = model.param_deriv("a", 9.0, 0.0, &[2.5, 0.4]).unwrap();
        assert_relative_eq!(d2[0], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_param_func_overrides_without_mutation() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let f = model.param_func("a", 3.0, 0.0, &[1.0, 1.0]).unwrap();
        assert_relative_eq!(f[0], 2.0, epsilon = 1e-12);
        // stored parameter unchanged
        assert_relative_eq!(model.param("a").unwrap(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_disabled_jac_surfaces_invocation_error() {
        let config = BuildConfig {
            build_jac: false,
            ..BuildConfig::default()
        };
        let model = compile(&lotka_spec(), config).unwrap();
        assert!(!model.has_jac());
        match model.jac(0.0, &[1.0, 1.0]) {
            Err(ModelError::Invocation(mode, _)) => assert_eq!(mode, "jac"),
            other => panic!("expected Invocation error, got {:?}", other),
        }
        // stages that do not depend on the Jacobian are untouched
        assert!(model.has_tgrad());
        assert!(model.has_paramjac());
        assert!(model.rhs(0.0, &[1.0, 1.0]).is_ok());
    }

    #[test]
    fn test_enabled_but_failed_stage_keeps_diagnostic() {
        let config = BuildConfig {
            build_expjac: true,
            ..BuildConfig::default()
        };
        let model = compile(&lotka_spec(), config).unwrap();
        assert!(!model.has_expjac());
        match model.expjac(0.0, &[1.0, 1.0], 0.5) {
            Err(ModelError::Invocation(mode, reason)) => {
                assert_eq!(mode, "expjac");
                assert!(reason.contains("matrix exponential"));
            }
            other => panic!("expected Invocation error, got {:?}", other),
        }
    }

    #[test]
    fn test_w_inverse_matches_numeric_inverse() {
        let model = compile(&lotka_spec(), BuildConfig::all()).unwrap();
        let states = [[1.3, 0.7], [2.0, 2.5], [0.6, 2.2], [1.1, 2.8], [2.4, 0.5]];
        let gammas = [0.1, 0.25, 0.5, 1.0, 2.0];
        for (y, gamma) in states.iter().zip(gammas) {
            let t = 0.0;
            let j = model.jac(t, y).unwrap();
            let expected = (DMatrix::identity(2, 2) - gamma * &j).try_inverse().unwrap();
            let got = model.invW(t, y, gamma).unwrap();
            for i in 0..2 {
                for k in 0..2 {
                    assert_relative_eq!(got[(i, k)], expected[(i, k)], epsilon = 1e-9);
                }
            }
            let expected_t = (DMatrix::identity(2, 2) / gamma - &j).try_inverse().unwrap();
            let got_t = model.invW_t(t, y, gamma).unwrap();
            for i in 0..2 {
                for k in 0..2 {
                    assert_relative_eq!(got_t[(i, k)], expected_t[(i, k)], epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_set_param_changes_rhs() {
        let mut model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        model.set_param("a", 2.5).unwrap();
        let f = model.rhs(0.0, &[1.0, 1.0]).unwrap();
        assert_relative_eq!(f[0], 1.5, epsilon = 1e-12);
        assert!(model.set_param("nope", 1.0).is_err());
    }

    #[test]
    fn test_recompilation_is_deterministic() {
        let model = compile(&lotka_spec(), BuildConfig::all()).unwrap();
        let again = model.recompile().unwrap();
        let (t, y) = (0.3, [0.9, 1.4]);
        assert_eq!(model.rhs(t, &y).unwrap(), again.rhs(t, &y).unwrap());
        assert_eq!(model.jac(t, &y).unwrap(), again.jac(t, &y).unwrap());
        assert_eq!(model.available_modes(), again.available_modes());
        // the lowered bodies themselves are identical, not just their values
        match (model.ops.get(&ModeTag::Rhs), again.ops.get(&ModeTag::Rhs)) {
            (Some(CompiledOp::Vector(a)), Some(CompiledOp::Vector(b))) => {
                assert_eq!(a.entries, b.entries);
            }
            _ => panic!("rhs missing from dispatch table"),
        }
        match (model.ops.get(&ModeTag::Jac), again.ops.get(&ModeTag::Jac)) {
            (Some(CompiledOp::Matrix(a)), Some(CompiledOp::Matrix(b))) => {
                assert_eq!(a.triples, b.triples);
            }
            _ => panic!("jac missing from dispatch table"),
        }
    }

    #[test]
    fn test_enum_keyed_dispatch_in_place() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let (t, y) = (0.0, [1.0, 1.0]);
        let mut out = DVector::zeros(2);
        model.call_vector(ModeTag::Rhs, t, &y, &mut out).unwrap();
        assert_relative_eq!(out[0], 0.5, epsilon = 1e-12);
        let mut jm = DMatrix::zeros(2, 2);
        model.call_matrix(ModeTag::Jac, t, &y, 0.0, &mut jm).unwrap();
        assert_relative_eq!(jm[(0, 0)], 0.5, epsilon = 1e-12);
        let mut im = DMatrix::zeros(2, 2);
        assert!(model
            .call_matrix(ModeTag::Invjac, t, &y, 0.0, &mut im)
            .is_err());
    }

    #[test]
    fn test_derivative_reference_on_rhs() {
        // dy reuses dx computed earlier in the same call
        let x = Expr::Var("x".to_string());
        let a = Expr::Var("a".to_string());
        let spec = EquationSpec::new()
            .eq("dx", a.clone() * x.clone())
            .eq("dy", Expr::Var("dx".to_string()) + Expr::Var("y".to_string()))
            .param("a", 2.0);
        let model = compile(&spec, BuildConfig::default()).unwrap();
        let f = model.rhs(0.0, &[3.0, 1.0]).unwrap();
        assert_relative_eq!(f[0], 6.0, epsilon = 1e-12);
        assert_relative_eq!(f[1], 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_derived_artifacts_with_derivative_reference() {
        // dy = dx*x closes to a*x^2 inside every derived artifact
        let x = Expr::Var("x".to_string());
        let a = Expr::Var("a".to_string());
        let spec = EquationSpec::new()
            .eq("dx", a.clone() * x.clone())
            .eq("dy", Expr::Var("dx".to_string()) * x.clone())
            .param("a", 1.5);
        let model = compile(&spec, BuildConfig::default()).unwrap();
        let y = [2.0, 0.3];
        let j = model.jac(0.0, &y).unwrap();
        assert_relative_eq!(j[(0, 0)], 1.5, epsilon = 1e-12);
        assert_relative_eq!(j[(1, 0)], 6.0, epsilon = 1e-12);
        assert_relative_eq!(j[(1, 1)], 0.0, epsilon = 1e-12);
        let tg = model.tgrad(0.0, &y).unwrap();
        assert_relative_eq!(tg[1], 0.0, epsilon = 1e-12);
        let pj = model.paramjac(0.0, &y, &[1.5]).unwrap();
        assert_relative_eq!(pj[(1, 0)], 4.0, epsilon = 1e-12);
        // finite differences against the rhs confirm the closed form
        let h = 1e-6;
        let f_hi = model.rhs(0.0, &[2.0 + h, 0.3]).unwrap();
        let f_lo = model.rhs(0.0, &[2.0 - h, 0.3]).unwrap();
        let fd = (f_hi[1] - f_lo[1]) / (2.0 * h);
        assert_relative_eq!(j[(1, 0)], fd, epsilon = 1e-5);
    }

    #[test]
    fn test_wrong_mass_matrix_shape_confined_to_w_stages() {
        // 3x3 mass on a 2-state system: compilation still succeeds
        let config = BuildConfig::default().with_mass_matrix(DMatrix::zeros(3, 3));
        let model = compile(&lotka_spec(), config).unwrap();
        assert!(model.rhs(0.0, &[1.0, 1.0]).is_ok());
        assert!(model.has_jac());

        // with the W stages enabled, only they fail and keep the diagnostic
        let config = BuildConfig::all().with_mass_matrix(DMatrix::zeros(3, 3));
        let model = compile(&lotka_spec(), config).unwrap();
        assert!(model.jac(0.0, &[1.0, 1.0]).is_ok());
        assert!(model.has_invjac());
        assert!(!model.has_invW());
        assert!(!model.has_invW_t());
        match model.invW(0.0, &[1.0, 1.0], 0.5) {
            Err(ModelError::Invocation(mode, reason)) => {
                assert_eq!(mode, "invW");
                assert!(reason.contains("3x3"));
            }
            other => panic!("expected Invocation error, got {:?}", other),
        }
    }

    #[test]
    fn test_available_modes_listing() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let modes = model.available_modes();
        assert!(modes.contains(&ModeTag::Rhs));
        assert!(modes.contains(&ModeTag::Jac));
        assert!(!modes.contains(&ModeTag::Invjac));
        assert_eq!(ModeTag::InvW.to_string(), "invW");
    }

    #[test]
    fn test_mass_matrix_w_inverse() {
        let mass = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
        let config = BuildConfig::all().with_mass_matrix(mass.clone());
        let model = compile(&lotka_spec(), config).unwrap();
        let (t, y, gamma) = (0.0, [1.3, 0.7], 0.5);
        let j = model.jac(t, &y).unwrap();
        let expected = (mass - gamma * j).try_inverse().unwrap();
        let got = model.invW(t, &y, gamma).unwrap();
        for i in 0..2 {
            for k in 0..2 {
                assert_relative_eq!(got[(i, k)], expected[(i, k)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_invjac_identity_at_random_states() {
        use rand::Rng;
        let _ = simplelog::SimpleLogger::init(
            simplelog::LevelFilter::Warn,
            simplelog::Config::default(),
        );
        let model = compile(&lotka_spec(), BuildConfig::all()).unwrap();
        let mut rng = rand::rng();
        for _ in 0..20 {
            let y = [rng.random_range(0.5..2.5), rng.random_range(2.0..3.0)];
            let j = model.jac(0.0, &y).unwrap();
            let inv = model.invjac(0.0, &y).unwrap();
            let product = inv * j;
            for i in 0..2 {
                for k in 0..2 {
                    let expected = if i == k { 1.0 } else { 0.0 };
                    assert_relative_eq!(product[(i, k)], expected, epsilon = 1e-8);
                }
            }
        }
    }

    #[test]
    fn test_bad_loglevel_rejected() {
        let config = BuildConfig::default().with_loglevel("loud");
        assert!(compile(&lotka_spec(), config).is_err());
    }

    #[test]
    fn test_models_sharing_names_stay_isolated() {
        // same state and parameter names, different equations
        let x = Expr::Var("x".to_string());
        let a = Expr::Var("a".to_string());
        let spec_one = EquationSpec::new().eq("dx", a.clone() * x.clone()).param("a", 2.0);
        let spec_two = EquationSpec::new()
            .eq("dx", a.clone() * x.clone() * x.clone())
            .param("a", 5.0);
        let one = compile(&spec_one, BuildConfig::default()).unwrap();
        let two = compile(&spec_two, BuildConfig::default()).unwrap();
        assert_relative_eq!(one.rhs(0.0, &[3.0]).unwrap()[0], 6.0, epsilon = 1e-12);
        assert_relative_eq!(two.rhs(0.0, &[3.0]).unwrap()[0], 45.0, epsilon = 1e-12);
        // derived artifacts stay separate too: d/dx of a*x vs a*x^2
        assert_relative_eq!(one.jac(0.0, &[3.0]).unwrap()[(0, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(two.jac(0.0, &[3.0]).unwrap()[(0, 0)], 30.0, epsilon = 1e-12);
    }

    #[test]
    fn test_readable_jacobian_uses_user_names() {
        let model = compile(&lotka_spec(), BuildConfig::default()).unwrap();
        let strings = model.readable_jacobian().unwrap();
        assert_eq!(strings.len(), 2);
        assert!(strings[0][0].contains('a'));
        assert!(strings[0][0].contains('y'));
        assert!(!strings[0][0].contains('_'));
        assert_eq!(model.component_exprs().len(), 2);
    }
}
