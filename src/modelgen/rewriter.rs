//! Expression rewriting: turns role-classified equation trees into the two
//! representations the rest of the pipeline consumes.
//!
//! One traversal per equation produces a pair:
//! * a numeric-direction [`NumExpr`] whose leaves are index references into
//!   the runtime state and parameter vectors, evaluated directly with no name
//!   lookup, and
//! * an algebra-direction [`Expr`] in which every surviving identifier is
//!   renamed into a compilation-unique symbol scope, so that two models using
//!   the same variable names can never interfere inside the symbolic engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::modelgen::classifier::{Role, SymbolTable, DERIV_MARKER};
use crate::modelgen::error::ModelError;
use crate::symbolic::symbolic_engine::Expr;

static SCOPE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A compilation-unique namespace for symbolic-engine variable names.
///
/// Every compilation gets a fresh prefix from a process-wide counter. All
/// symbols handed to the algebra layer (states, parameters, the independent
/// variable, the Rosenbrock gamma) are scoped through it, so concurrent or
/// repeated compilations never share a symbol.
#[derive(Debug, Clone)]
pub struct SymbolScope {
    prefix: String,
}

impl SymbolScope {
    pub fn new() -> Self {
        let id = SCOPE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            prefix: format!("m{}_", id),
        }
    }

    pub fn scoped(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Scoped name of the Rosenbrock-W free symbol.
    pub fn gamma(&self) -> String {
        self.scoped("gamma")
    }
}

impl Default for SymbolScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric intermediate representation. Leaves address the call arguments by
/// index, so evaluation is a direct tree walk with no environment.
#[derive(Debug, Clone, PartialEq)]
pub enum NumExpr {
    Const(f64),
    /// `y[i]`
    State(usize),
    /// `p[i]`
    Param(usize),
    /// the independent variable argument
    Time,
    /// the Rosenbrock-W scalar argument
    Gamma,
    /// `dy[i]`, a reference to another component's derivative
    DState(usize),
    Add(Box<NumExpr>, Box<NumExpr>),
    Sub(Box<NumExpr>, Box<NumExpr>),
    Mul(Box<NumExpr>, Box<NumExpr>),
    Div(Box<NumExpr>, Box<NumExpr>),
    Pow(Box<NumExpr>, Box<NumExpr>),
    Exp(Box<NumExpr>),
    Ln(Box<NumExpr>),
    sin(Box<NumExpr>),
    cos(Box<NumExpr>),
    tg(Box<NumExpr>),
    ctg(Box<NumExpr>),
}

impl NumExpr {
    /// Evaluate against the full argument set. Modes that take no `dy` or
    /// `gamma` pass an empty slice and zero.
    pub fn eval(&self, t: f64, y: &[f64], p: &[f64], dy: &[f64], gamma: f64) -> f64 {
        match self {
            NumExpr::Const(c) => *c,
            NumExpr::State(i) => y[*i],
            NumExpr::Param(i) => p[*i],
            NumExpr::Time => t,
            NumExpr::Gamma => gamma,
            NumExpr::DState(i) => dy[*i],
            NumExpr::Add(a, b) => a.eval(t, y, p, dy, gamma) + b.eval(t, y, p, dy, gamma),
            NumExpr::Sub(a, b) => a.eval(t, y, p, dy, gamma) - b.eval(t, y, p, dy, gamma),
            NumExpr::Mul(a, b) => a.eval(t, y, p, dy, gamma) * b.eval(t, y, p, dy, gamma),
            NumExpr::Div(a, b) => a.eval(t, y, p, dy, gamma) / b.eval(t, y, p, dy, gamma),
            NumExpr::Pow(a, b) => a
                .eval(t, y, p, dy, gamma)
                .powf(b.eval(t, y, p, dy, gamma)),
            NumExpr::Exp(a) => a.eval(t, y, p, dy, gamma).exp(),
            NumExpr::Ln(a) => a.eval(t, y, p, dy, gamma).ln(),
            NumExpr::sin(a) => a.eval(t, y, p, dy, gamma).sin(),
            NumExpr::cos(a) => a.eval(t, y, p, dy, gamma).cos(),
            NumExpr::tg(a) => a.eval(t, y, p, dy, gamma).tan(),
            NumExpr::ctg(a) => 1.0 / a.eval(t, y, p, dy, gamma).tan(),
        }
    }

    /// True if the expression references a `DState` leaf anywhere.
    pub fn uses_dstate(&self) -> bool {
        match self {
            NumExpr::DState(_) => true,
            NumExpr::Const(_)
            | NumExpr::State(_)
            | NumExpr::Param(_)
            | NumExpr::Time
            | NumExpr::Gamma => false,
            NumExpr::Add(a, b)
            | NumExpr::Sub(a, b)
            | NumExpr::Mul(a, b)
            | NumExpr::Div(a, b)
            | NumExpr::Pow(a, b) => a.uses_dstate() || b.uses_dstate(),
            NumExpr::Exp(a)
            | NumExpr::Ln(a)
            | NumExpr::sin(a)
            | NumExpr::cos(a)
            | NumExpr::tg(a)
            | NumExpr::ctg(a) => a.uses_dstate(),
        }
    }
}

/// Map from scoped algebra symbol to the numeric leaf it stands for. Used
/// when lowering differentiated algebra expressions back to [`NumExpr`].
pub fn scoped_leaves(table: &SymbolTable, scope: &SymbolScope) -> HashMap<String, NumExpr> {
    let mut map = HashMap::new();
    for (i, name) in table.state_names.iter().enumerate() {
        map.insert(scope.scoped(name), NumExpr::State(i));
        map.insert(
            scope.scoped(&format!("{}{}", DERIV_MARKER, name)),
            NumExpr::DState(i),
        );
    }
    for (i, name) in table.param_names.iter().enumerate() {
        map.insert(scope.scoped(name), NumExpr::Param(i));
    }
    map.insert(scope.scoped(&table.indep_var), NumExpr::Time);
    map.insert(scope.gamma(), NumExpr::Gamma);
    map
}

/// Rewrites classified equation trees into the paired representations.
pub struct Rewriter<'a> {
    pub table: &'a SymbolTable,
    pub scope: &'a SymbolScope,
}

impl<'a> Rewriter<'a> {
    pub fn new(table: &'a SymbolTable, scope: &'a SymbolScope) -> Self {
        Self { table, scope }
    }

    /// One traversal producing `(numeric IR, scoped algebra tree)`.
    ///
    /// Identifier resolution order: state, inlined constant (spliced and
    /// rewritten in place), parameter, the independent variable, then a
    /// derivative-marked reference to a known state. Anything else is an
    /// [`ModelError::UnknownSymbol`] naming the offending identifier and the
    /// equation target.
    pub fn rewrite(&self, expr: &Expr, target: &str) -> Result<(NumExpr, Expr), ModelError> {
        match expr {
            Expr::Const(c) => Ok((NumExpr::Const(*c), Expr::Const(*c))),
            Expr::Var(name) => self.rewrite_var(name, target),
            Expr::Add(a, b) => self.binary(a, b, target, NumExpr::Add, Expr::Add),
            Expr::Sub(a, b) => self.binary(a, b, target, NumExpr::Sub, Expr::Sub),
            Expr::Mul(a, b) => self.binary(a, b, target, NumExpr::Mul, Expr::Mul),
            Expr::Div(a, b) => self.binary(a, b, target, NumExpr::Div, Expr::Div),
            Expr::Pow(a, b) => self.binary(a, b, target, NumExpr::Pow, Expr::Pow),
            Expr::Exp(a) => self.unary(a, target, NumExpr::Exp, Expr::Exp),
            Expr::Ln(a) => self.unary(a, target, NumExpr::Ln, Expr::Ln),
            Expr::sin(a) => self.unary(a, target, NumExpr::sin, Expr::sin),
            Expr::cos(a) => self.unary(a, target, NumExpr::cos, Expr::cos),
            Expr::tg(a) => self.unary(a, target, NumExpr::tg, Expr::tg),
            Expr::ctg(a) => self.unary(a, target, NumExpr::ctg, Expr::ctg),
        }
    }

    fn rewrite_var(&self, name: &str, target: &str) -> Result<(NumExpr, Expr), ModelError> {
        match self.table.role(name) {
            Some(Role::State(i)) => Ok((
                NumExpr::State(*i),
                Expr::Var(self.scope.scoped(name)),
            )),
            Some(Role::Inlined(value)) => {
                // splice the bound expression and keep rewriting inside it
                let value = value.clone();
                self.rewrite(&value, target)
            }
            Some(Role::Parameter(i)) => Ok((
                NumExpr::Param(*i),
                Expr::Var(self.scope.scoped(name)),
            )),
            Some(Role::Independent) => Ok((
                NumExpr::Time,
                Expr::Var(self.scope.scoped(name)),
            )),
            None => {
                if let Some(state) = name.strip_prefix(DERIV_MARKER) {
                    if let Some(Role::State(i)) = self.table.role(state) {
                        return Ok((
                            NumExpr::DState(*i),
                            Expr::Var(self.scope.scoped(name)),
                        ));
                    }
                }
                Err(ModelError::UnknownSymbol(
                    name.to_string(),
                    target.to_string(),
                ))
            }
        }
    }

    fn binary<N, S>(
        &self,
        a: &Expr,
        b: &Expr,
        target: &str,
        num: N,
        sym: S,
    ) -> Result<(NumExpr, Expr), ModelError>
    where
        N: Fn(Box<NumExpr>, Box<NumExpr>) -> NumExpr,
        S: Fn(Box<Expr>, Box<Expr>) -> Expr,
    {
        let (na, sa) = self.rewrite(a, target)?;
        let (nb, sb) = self.rewrite(b, target)?;
        Ok((
            num(Box::new(na), Box::new(nb)),
            sym(Box::new(sa), Box::new(sb)),
        ))
    }

    fn unary<N, S>(
        &self,
        a: &Expr,
        target: &str,
        num: N,
        sym: S,
    ) -> Result<(NumExpr, Expr), ModelError>
    where
        N: Fn(Box<NumExpr>) -> NumExpr,
        S: Fn(Box<Expr>) -> Expr,
    {
        let (na, sa) = self.rewrite(a, target)?;
        Ok((num(Box::new(na)), sym(Box::new(sa))))
    }
}
