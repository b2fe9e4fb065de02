#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// # Symbolic engine
/// a module that
/// 1) represents mathematical expressions as symbolic trees
/// 2) computes analytical derivatives of symbolic expressions
/// 3) evaluates symbolic expressions numerically
///# Example#
/// ```
/// use RustedOdeGen::symbolic::symbolic_engine::Expr;
/// let x = Expr::Var("x".to_string());
/// let f = x.clone() * x.clone() + Expr::Const(2.0);
/// let df_dx = f.diff("x").simplify();
/// println!("df_dx = {}", df_dx);
/// assert_eq!(df_dx.eval_expression(&["x"], &[3.0]), 6.0);
/// ```
pub mod symbolic_engine;
pub mod symbolic_derivatives;
///________________________________________________________________________________________
/// deterministic algebraic simplification: constant folding and identity rules
pub mod symbolic_simplify;
///________________________________________________________________________________________
/// symbolic vectors and matrices with a Gauss-Jordan symbolic inverse
///# Example#
/// ```
/// use RustedOdeGen::symbolic::symbolic_engine::Expr;
/// use RustedOdeGen::symbolic::symbolic_vectors::ExprMatrix;
/// let x = Expr::Var("x".to_string());
/// let m = ExprMatrix::new(vec![
///     vec![x.clone(), Expr::Const(0.0)],
///     vec![Expr::Const(0.0), Expr::Const(1.0)],
/// ]);
/// let inv = m.inverse().unwrap();
/// assert_eq!(inv.data[0][0].eval_expression(&["x"], &[4.0]), 0.25);
/// ```
pub mod symbolic_vectors;
