//! Symbol classification: one pass over the equation block that assigns every
//! declared identifier exactly one role before any rewriting starts.
//!
//! Derivative targets follow the `d<state>` naming convention: the left-hand
//! name of each equation is the derivative of a state variable, so stripping
//! the `d` marker recovers the state name. First-appearance order of the
//! targets defines the dense state index range.

use std::collections::HashMap;

use log::warn;

use crate::modelgen::error::ModelError;
use crate::symbolic::symbolic_engine::Expr;

/// Marker prefix on equation left-hand sides and on in-equation references to
/// another state's derivative.
pub const DERIV_MARKER: &str = "d";

/// A declared parameter.
///
/// `Symbolic` corresponds to a binding declaration (`name => value`): the
/// parameter survives into the compiled model as a mutable value and as an
/// algebra symbol during differentiation. `Inlined` corresponds to an inline
/// declaration (`name = value`): the bound expression is spliced into every
/// use site at compile time and the name never appears in emitted code.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDecl {
    Symbolic { name: String, default: f64 },
    Inlined { name: String, value: Expr },
}

impl ParamDecl {
    pub fn name(&self) -> &str {
        match self {
            ParamDecl::Symbolic { name, .. } => name,
            ParamDecl::Inlined { name, .. } => name,
        }
    }
}

/// Raw input to the compiler: ordered (derivative target, expression) pairs,
/// the independent variable name and the declared parameters. Immutable once
/// built; the compiled model retains a copy for introspection and
/// recompilation.
#[derive(Debug, Clone, PartialEq)]
pub struct EquationSpec {
    pub equations: Vec<(String, Expr)>,
    pub indep_var: String,
    pub params: Vec<ParamDecl>,
}

impl EquationSpec {
    pub fn new() -> Self {
        Self {
            equations: Vec::new(),
            indep_var: "t".to_string(),
            params: Vec::new(),
        }
    }

    /// Adds an equation `d<state> = rhs`. The target must carry the
    /// derivative marker; this is checked during classification.
    pub fn eq(mut self, target: &str, rhs: Expr) -> Self {
        self.equations.push((target.to_string(), rhs));
        self
    }

    /// Declares a symbolic parameter with a default value (`name => value`).
    pub fn param(mut self, name: &str, default: f64) -> Self {
        self.params.push(ParamDecl::Symbolic {
            name: name.to_string(),
            default,
        });
        self
    }

    /// Declares an inlined constant (`name = value`).
    pub fn constant(mut self, name: &str, value: Expr) -> Self {
        self.params.push(ParamDecl::Inlined {
            name: name.to_string(),
            value,
        });
        self
    }

    pub fn indep_var(mut self, name: &str) -> Self {
        self.indep_var = name.to_string();
        self
    }
}

impl Default for EquationSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// The role of one identifier. Assignment is total before rewriting begins;
/// every identifier has at most one role.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// State variable with its dense index.
    State(usize),
    /// Symbolic parameter with its index into the parameter vector.
    Parameter(usize),
    /// Inlined constant carrying the expression it was bound to.
    Inlined(Expr),
    /// The independent variable.
    Independent,
}

/// Identifier-to-role mapping plus the ordered name lists derived from it.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    roles: HashMap<String, Role>,
    pub state_names: Vec<String>,
    pub param_names: Vec<String>,
    pub param_defaults: Vec<f64>,
    pub indep_var: String,
    /// Right-hand sides in state-index order, deduplicated.
    pub components: Vec<Expr>,
}

impl SymbolTable {
    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn n_states(&self) -> usize {
        self.state_names.len()
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }
}

/// Scans the equation block once and partitions every declared identifier.
///
/// Fatal errors: a target without the derivative marker, a parameter name
/// colliding with a state or the independent variable, and duplicate
/// parameter declarations. Re-declaring a state is a no-op: the first
/// equation wins and a warning is logged.
pub fn classify(spec: &EquationSpec) -> Result<SymbolTable, ModelError> {
    let mut roles: HashMap<String, Role> = HashMap::new();
    let mut state_names: Vec<String> = Vec::new();
    let mut components: Vec<Expr> = Vec::new();

    if spec.equations.is_empty() {
        return Err(ModelError::Parse("equation block is empty".to_string()));
    }

    for (target, rhs) in &spec.equations {
        let state = target.strip_prefix(DERIV_MARKER).ok_or_else(|| {
            ModelError::Parse(format!(
                "equation target '{}' does not carry the derivative marker '{}'",
                target, DERIV_MARKER
            ))
        })?;
        if state.is_empty() {
            return Err(ModelError::Parse(format!(
                "equation target '{}' has no state name after the marker",
                target
            )));
        }
        if roles.contains_key(state) {
            warn!(
                "state '{}' re-declared; keeping its first equation",
                state
            );
            continue;
        }
        roles.insert(state.to_string(), Role::State(state_names.len()));
        state_names.push(state.to_string());
        components.push(rhs.clone());
    }

    if roles.contains_key(&spec.indep_var) {
        return Err(ModelError::Parse(format!(
            "independent variable '{}' collides with a state name",
            spec.indep_var
        )));
    }
    roles.insert(spec.indep_var.clone(), Role::Independent);

    let mut param_names: Vec<String> = Vec::new();
    let mut param_defaults: Vec<f64> = Vec::new();
    for decl in &spec.params {
        let name = decl.name();
        if roles.contains_key(name) {
            return Err(ModelError::Parse(format!(
                "parameter '{}' collides with an already-declared identifier",
                name
            )));
        }
        match decl {
            ParamDecl::Symbolic { name, default } => {
                roles.insert(name.clone(), Role::Parameter(param_names.len()));
                param_names.push(name.clone());
                param_defaults.push(*default);
            }
            ParamDecl::Inlined { name, value } => {
                roles.insert(name.clone(), Role::Inlined(value.clone()));
            }
        }
    }

    Ok(SymbolTable {
        roles,
        state_names,
        param_names,
        param_defaults,
        indep_var: spec.indep_var.clone(),
        components,
    })
}
