#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// # Model generation
/// the compilation pipeline from an equation block to a callable model:
/// 1) classify every identifier into a role (state, parameter, inlined
///    constant, independent variable)
/// 2) rewrite each equation into a numeric IR and a scoped algebra tree
/// 3) derive the requested artifacts (Jacobian, inverses, time gradient,
///    parameter derivatives) behind per-stage failure boundaries
/// 4) lower the survivors and assemble the dispatch table
///# Example#
/// ```
/// use RustedOdeGen::modelgen::bundle::compile;
/// use RustedOdeGen::modelgen::classifier::EquationSpec;
/// use RustedOdeGen::modelgen::config::BuildConfig;
/// use RustedOdeGen::symbolic::symbolic_engine::Expr;
///
/// let x = Expr::Var("x".to_string());
/// let a = Expr::Var("a".to_string());
/// let spec = EquationSpec::new().eq("dx", a * x).param("a", 2.0);
/// let model = compile(&spec, BuildConfig::default()).unwrap();
/// let f = model.rhs(0.0, &[3.0]).unwrap();
/// assert_eq!(f[0], 6.0);
/// assert!(model.has_jac());
/// ```
pub mod classifier;
pub mod rewriter;
///________________________________________________________________________________________
/// per-stage symbolic derivation with isolated failure boundaries
pub mod derive;
/// lowering of algebra expressions to callable vector and matrix evaluators
pub mod synthesize;
///________________________________________________________________________________________
/// the compiled bundle: dispatch table, typed call surface, parameter store
pub mod bundle;
pub mod config;
pub mod error;
///________________________________________________________________________________________
/// finite-element style synthesis over an explicit argument list
pub mod fem;
