//! # Symbolic Engine Module
//!
//! Core symbolic expression type for the model compiler. Expressions are
//! ordinary recursive trees (`Box<Expr>`), built either programmatically with
//! the overloaded `std::ops` operators or through the constructor helpers.
//!
//! The engine supports:
//! - symbolic variables and numeric constants
//! - arithmetic (`Add`, `Sub`, `Mul`, `Div`, `Pow`) and elementary functions
//!   (`Exp`, `Ln`, `sin`, `cos`, `tg`, `ctg`)
//! - substitution of variables by constants or whole sub-expressions
//! - renaming of variables (used by the per-compilation symbol scoping)
//!
//! Differentiation lives in `symbolic_derivatives`, simplification in
//! `symbolic_simplify`, vector/matrix containers in `symbolic_vectors`.

#![allow(non_camel_case_types)]

use std::collections::HashMap;
use std::fmt;

/// Symbolic expression tree.
///
/// Trigonometric variants use the mathematical notation `tg`/`ctg` rather
/// than `tan`/`cot`.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Symbolic variable with a name
    Var(String),
    /// Numeric constant
    Const(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    /// base ^ exponent
    Pow(Box<Expr>, Box<Expr>),
    Exp(Box<Expr>),
    Ln(Box<Expr>),
    sin(Box<Expr>),
    cos(Box<Expr>),
    tg(Box<Expr>),
    ctg(Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Const(val) => write!(f, "{}", val),
            Expr::Add(lhs, rhs) => write!(f, "({} + {})", lhs, rhs),
            Expr::Sub(lhs, rhs) => write!(f, "({} - {})", lhs, rhs),
            Expr::Mul(lhs, rhs) => write!(f, "({} * {})", lhs, rhs),
            Expr::Div(lhs, rhs) => write!(f, "({} / {})", lhs, rhs),
            Expr::Pow(base, exp) => write!(f, "({} ^ {})", base, exp),
            Expr::Exp(e) => write!(f, "exp({})", e),
            Expr::Ln(e) => write!(f, "ln({})", e),
            Expr::sin(e) => write!(f, "sin({})", e),
            Expr::cos(e) => write!(f, "cos({})", e),
            Expr::tg(e) => write!(f, "tg({})", e),
            Expr::ctg(e) => write!(f, "ctg({})", e),
        }
    }
}

impl Expr {
    /// Creates multiple symbolic variables from a comma-separated string.
    ///
    /// # Examples
    /// ```rust, ignore
    /// let vars = Expr::Symbols("x, y, z");
    /// assert_eq!(vars.len(), 3);
    /// ```
    pub fn Symbols(symbols: &str) -> Vec<Expr> {
        symbols
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Expr::Var(s.to_string()))
            .collect()
    }

    /// Wraps the expression in a `Box` for building nested trees.
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    pub fn pow(self, rhs: Expr) -> Expr {
        Expr::Pow(self.boxed(), rhs.boxed())
    }

    pub fn exp(self) -> Expr {
        Expr::Exp(self.boxed())
    }

    pub fn ln(self) -> Expr {
        Expr::Ln(self.boxed())
    }

    /// True iff the expression is exactly the constant 0.0.
    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(val) if *val == 0.0)
    }

    /// Rebuilds the node with `f` applied to every direct child.
    ///
    /// Leaves (`Var`, `Const`) are cloned unchanged. The recursive tree
    /// rewrites below are all expressed through this single traversal.
    pub fn map_children<F>(&self, f: F) -> Expr
    where
        F: Fn(&Expr) -> Expr,
    {
        match self {
            Expr::Var(_) | Expr::Const(_) => self.clone(),
            Expr::Add(a, b) => Expr::Add(f(a).boxed(), f(b).boxed()),
            Expr::Sub(a, b) => Expr::Sub(f(a).boxed(), f(b).boxed()),
            Expr::Mul(a, b) => Expr::Mul(f(a).boxed(), f(b).boxed()),
            Expr::Div(a, b) => Expr::Div(f(a).boxed(), f(b).boxed()),
            Expr::Pow(a, b) => Expr::Pow(f(a).boxed(), f(b).boxed()),
            Expr::Exp(e) => Expr::Exp(f(e).boxed()),
            Expr::Ln(e) => Expr::Ln(f(e).boxed()),
            Expr::sin(e) => Expr::sin(f(e).boxed()),
            Expr::cos(e) => Expr::cos(f(e).boxed()),
            Expr::tg(e) => Expr::tg(f(e).boxed()),
            Expr::ctg(e) => Expr::ctg(f(e).boxed()),
        }
    }

    /// Substitutes a variable with a constant value throughout the tree.
    pub fn set_variable(&self, var: &str, value: f64) -> Expr {
        match self {
            Expr::Var(name) if name == var => Expr::Const(value),
            _ => self.map_children(|child| child.set_variable(var, value)),
        }
    }

    /// Substitutes every variable present in the map with its value.
    pub fn set_variable_from_map(&self, var_map: &HashMap<String, f64>) -> Expr {
        match self {
            Expr::Var(name) if var_map.contains_key(name) => Expr::Const(var_map[name]),
            _ => self.map_children(|child| child.set_variable_from_map(var_map)),
        }
    }

    /// Replaces every occurrence of a variable with a whole sub-expression.
    pub fn substitute_variable(&self, var: &str, expr: &Expr) -> Expr {
        match self {
            Expr::Var(name) if name == var => expr.clone(),
            _ => self.map_children(|child| child.substitute_variable(var, expr)),
        }
    }

    /// Renames one variable throughout the tree.
    pub fn rename_variable(&self, old_var: &str, new_var: &str) -> Expr {
        match self {
            Expr::Var(name) if name == old_var => Expr::Var(new_var.to_string()),
            _ => self.map_children(|child| child.rename_variable(old_var, new_var)),
        }
    }

    /// Renames variables from a map (old name -> new name).
    pub fn rename_variables(&self, var_map: &HashMap<String, String>) -> Expr {
        match self {
            Expr::Var(name) if var_map.contains_key(name) => {
                Expr::Var(var_map[name].to_string())
            }
            _ => self.map_children(|child| child.rename_variables(var_map)),
        }
    }

    /// True if the named variable occurs anywhere in the tree.
    pub fn contains_variable(&self, var_name: &str) -> bool {
        match self {
            Expr::Var(name) => name == var_name,
            Expr::Const(_) => false,
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => a.contains_variable(var_name) || b.contains_variable(var_name),
            Expr::Exp(e) | Expr::Ln(e) | Expr::sin(e) | Expr::cos(e) | Expr::tg(e)
            | Expr::ctg(e) => e.contains_variable(var_name),
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Expr::Add(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Sub for Expr {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Expr::Sub(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Mul for Expr {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Expr::Mul(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Div for Expr {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        Expr::Div(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Neg for Expr {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Expr::Mul(Expr::Const(-1.0).boxed(), self.boxed())
    }
}

/// Macro to create symbolic variables from a comma-separated list
/// Usage: symbols!(x, y, z) -> creates variables x, y, z
#[macro_export]
macro_rules! symbols {
    ($($var:ident),+ $(,)?) => {
        {
            let var_names = stringify!($($var),+);
            let vars = Expr::Symbols(var_names);
            let mut iter = vars.into_iter();
            ($(
                {
                    let $var = iter.next().unwrap();
                    $var
                }
            ),+)
        }
    };
}
