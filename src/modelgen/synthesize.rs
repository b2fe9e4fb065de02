//! Function synthesis: lowers derived algebra expressions back into the
//! numeric IR and packages them as callable vector and matrix evaluators.
//!
//! The algebra layer only ever sees scoped symbols, so lowering is a pure
//! leaf substitution through the map built by
//! [`crate::modelgen::rewriter::scoped_leaves`]. Matrix evaluators keep only
//! the symbolically non-zero entries as `(row, col, expr)` triples and write
//! into caller-provided storage.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::modelgen::rewriter::NumExpr;
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_vectors::{ExprMatrix, ExprVector};

/// Lower one algebra expression to the numeric IR. Every variable must be a
/// scoped symbol present in `leaves`; anything else means the derivation
/// produced a symbol this compilation does not own.
pub fn lower(expr: &Expr, leaves: &HashMap<String, NumExpr>) -> Result<NumExpr, String> {
    match expr {
        Expr::Const(c) => Ok(NumExpr::Const(*c)),
        Expr::Var(name) => leaves
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown symbol '{}'", name)),
        Expr::Add(a, b) => Ok(NumExpr::Add(
            Box::new(lower(a, leaves)?),
            Box::new(lower(b, leaves)?),
        )),
        Expr::Sub(a, b) => Ok(NumExpr::Sub(
            Box::new(lower(a, leaves)?),
            Box::new(lower(b, leaves)?),
        )),
        Expr::Mul(a, b) => Ok(NumExpr::Mul(
            Box::new(lower(a, leaves)?),
            Box::new(lower(b, leaves)?),
        )),
        Expr::Div(a, b) => Ok(NumExpr::Div(
            Box::new(lower(a, leaves)?),
            Box::new(lower(b, leaves)?),
        )),
        Expr::Pow(a, b) => Ok(NumExpr::Pow(
            Box::new(lower(a, leaves)?),
            Box::new(lower(b, leaves)?),
        )),
        Expr::Exp(a) => Ok(NumExpr::Exp(Box::new(lower(a, leaves)?))),
        Expr::Ln(a) => Ok(NumExpr::Ln(Box::new(lower(a, leaves)?))),
        Expr::sin(a) => Ok(NumExpr::sin(Box::new(lower(a, leaves)?))),
        Expr::cos(a) => Ok(NumExpr::cos(Box::new(lower(a, leaves)?))),
        Expr::tg(a) => Ok(NumExpr::tg(Box::new(lower(a, leaves)?))),
        Expr::ctg(a) => Ok(NumExpr::ctg(Box::new(lower(a, leaves)?))),
    }
}

/// Dense vector evaluator, one IR tree per component.
#[derive(Debug, Clone)]
pub struct CompiledVector {
    pub entries: Vec<NumExpr>,
}

impl CompiledVector {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every component into `out`. `out` must have matching length.
    pub fn eval_into(
        &self,
        out: &mut DVector<f64>,
        t: f64,
        y: &[f64],
        p: &[f64],
        dy: &[f64],
        gamma: f64,
    ) {
        for (i, e) in self.entries.iter().enumerate() {
            out[i] = e.eval(t, y, p, dy, gamma);
        }
    }

    pub fn eval(&self, t: f64, y: &[f64], p: &[f64], dy: &[f64], gamma: f64) -> DVector<f64> {
        let mut out = DVector::zeros(self.entries.len());
        self.eval_into(&mut out, t, y, p, dy, gamma);
        out
    }
}

/// Sparse matrix evaluator: only the symbolically non-zero entries are kept.
/// Evaluation zero-fills the output first, so structural zeros cost nothing.
#[derive(Debug, Clone)]
pub struct CompiledMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub triples: Vec<(usize, usize, NumExpr)>,
}

impl CompiledMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn eval_into(
        &self,
        out: &mut DMatrix<f64>,
        t: f64,
        y: &[f64],
        p: &[f64],
        dy: &[f64],
        gamma: f64,
    ) {
        out.fill(0.0);
        for (i, j, e) in &self.triples {
            out[(*i, *j)] = e.eval(t, y, p, dy, gamma);
        }
    }

    pub fn eval(&self, t: f64, y: &[f64], p: &[f64], dy: &[f64], gamma: f64) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.nrows, self.ncols);
        self.eval_into(&mut out, t, y, p, dy, gamma);
        out
    }
}

/// Lower a symbolic vector component by component.
pub fn lower_vector(
    v: &ExprVector,
    leaves: &HashMap<String, NumExpr>,
) -> Result<CompiledVector, String> {
    let entries = v
        .iter()
        .map(|e| lower(&e.simplify(), leaves))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledVector { entries })
}

/// Lower a symbolic matrix, dropping entries that simplify to zero.
pub fn lower_matrix(
    m: &ExprMatrix,
    leaves: &HashMap<String, NumExpr>,
) -> Result<CompiledMatrix, String> {
    let mut triples = Vec::new();
    for i in 0..m.nrows {
        for j in 0..m.ncols {
            let e = m[(i, j)].simplify();
            if e.is_zero() {
                continue;
            }
            triples.push((i, j, lower(&e, leaves)?));
        }
    }
    Ok(CompiledMatrix {
        nrows: m.nrows,
        ncols: m.ncols,
        triples,
    })
}
