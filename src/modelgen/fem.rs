//! Finite-element style function synthesis.
//!
//! A thinner variant of the ODE pipeline: component expressions over an
//! explicit, caller-chosen argument list, compiled straight to numeric
//! evaluators. Parameters split the same way as in the ODE path, but no
//! derived artifacts exist; there is nothing to differentiate against until
//! the caller assembles the expressions into a system.

use std::collections::HashMap;

use nalgebra::DVector;

use crate::modelgen::classifier::ParamDecl;
use crate::modelgen::error::ModelError;
use crate::modelgen::rewriter::NumExpr;
use crate::modelgen::synthesize::{lower, CompiledVector};
use crate::symbolic::symbolic_engine::Expr;

/// Input to FEM synthesis: component expressions, the positional argument
/// names of the compiled call, and parameter declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct FemSpec {
    pub components: Vec<Expr>,
    pub args: Vec<String>,
    pub params: Vec<ParamDecl>,
}

impl FemSpec {
    pub fn new(args: &[&str]) -> Self {
        Self {
            components: Vec::new(),
            args: args.iter().map(|s| s.to_string()).collect(),
            params: Vec::new(),
        }
    }

    pub fn component(mut self, expr: Expr) -> Self {
        self.components.push(expr);
        self
    }

    pub fn param(mut self, name: &str, default: f64) -> Self {
        self.params.push(ParamDecl::Symbolic {
            name: name.to_string(),
            default,
        });
        self
    }

    pub fn constant(mut self, name: &str, value: Expr) -> Self {
        self.params.push(ParamDecl::Inlined {
            name: name.to_string(),
            value,
        });
        self
    }
}

/// Compiled FEM bundle: a vector evaluator over the declared argument list
/// plus the mutable parameter vector.
pub struct FemModel {
    pub arg_names: Vec<String>,
    pub param_names: Vec<String>,
    params: Vec<f64>,
    funcs: CompiledVector,
}

/// Compile a FEM specification.
///
/// Arguments map to positional slots, symbolic parameters to the parameter
/// vector, inlined constants are spliced at their use sites. Name collisions
/// and unknown identifiers are fatal.
pub fn compile_fem(spec: &FemSpec) -> Result<FemModel, ModelError> {
    let mut leaves: HashMap<String, NumExpr> = HashMap::new();
    for (i, arg) in spec.args.iter().enumerate() {
        if leaves.insert(arg.clone(), NumExpr::State(i)).is_some() {
            return Err(ModelError::Parse(format!(
                "duplicate argument name '{}'",
                arg
            )));
        }
    }

    let mut param_names = Vec::new();
    let mut params = Vec::new();
    for decl in &spec.params {
        if leaves.contains_key(decl.name()) {
            return Err(ModelError::Parse(format!(
                "parameter '{}' collides with an already-declared identifier",
                decl.name()
            )));
        }
        match decl {
            ParamDecl::Symbolic { name, default } => {
                leaves.insert(name.clone(), NumExpr::Param(param_names.len()));
                param_names.push(name.clone());
                params.push(*default);
            }
            ParamDecl::Inlined { name, value } => {
                // earlier declarations are visible inside the bound expression
                let lowered = lower(&value.simplify(), &leaves).map_err(ModelError::Parse)?;
                leaves.insert(name.clone(), lowered);
            }
        }
    }

    let entries = spec
        .components
        .iter()
        .enumerate()
        .map(|(i, e)| {
            lower(&e.simplify(), &leaves)
                .map_err(|reason| ModelError::Parse(format!("{} in component {}", reason, i)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FemModel {
        arg_names: spec.args.clone(),
        param_names,
        params,
        funcs: CompiledVector { entries },
    })
}

impl FemModel {
    pub fn n_components(&self) -> usize {
        self.funcs.len()
    }

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

    /// Evaluate every component against the positional arguments.
    pub fn eval(&self, args: &[f64]) -> Result<DVector<f64>, ModelError> {
        if args.len() != self.arg_names.len() {
            return Err(ModelError::Parse(format!(
                "expected {} arguments, got {}",
                self.arg_names.len(),
                args.len()
            )));
        }
        Ok(self.funcs.eval(0.0, args, &self.params, &[], 0.0))
    }
}
