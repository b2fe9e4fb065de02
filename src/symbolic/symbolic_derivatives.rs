//! Analytic differentiation, direct evaluation and stringification for
//! [`Expr`]. Differentiation follows the usual recursive rules (product,
//! quotient, chain, power), evaluation resolves variables by position in a
//! caller-supplied name slice.

use crate::symbolic::symbolic_engine::Expr;

impl Expr {
    /// Computes the analytical derivative with respect to `var`.
    ///
    /// For multivariable expressions this is the partial derivative; every
    /// other variable is treated as a constant.
    ///
    /// # Examples
    /// ```rust, ignore
    /// let x = Expr::Var("x".to_string());
    /// let f = x.clone().pow(Expr::Const(2.0)); // x^2
    /// let df_dx = f.diff("x"); // 2*x
    /// ```
    pub fn diff(&self, var: &str) -> Expr {
        match self {
            Expr::Var(name) => {
                if name == var {
                    Expr::Const(1.0)
                } else {
                    Expr::Const(0.0)
                }
            }
            Expr::Const(_) => Expr::Const(0.0),
            Expr::Add(lhs, rhs) => lhs.diff(var) + rhs.diff(var),
            Expr::Sub(lhs, rhs) => lhs.diff(var) - rhs.diff(var),
            // product rule
            Expr::Mul(lhs, rhs) => {
                lhs.diff(var) * (**rhs).clone() + (**lhs).clone() * rhs.diff(var)
            }
            // quotient rule
            Expr::Div(lhs, rhs) => {
                (lhs.diff(var) * (**rhs).clone() - rhs.diff(var) * (**lhs).clone())
                    / ((**rhs).clone() * (**rhs).clone())
            }
            // d(b^e) = e * b^(e-1) * b'   (exponent treated as constant wrt var;
            // general exponents differentiate through the base only, matching
            // the power rule the rest of the pipeline relies on)
            Expr::Pow(base, exp) => {
                (**exp).clone()
                    * (**base).clone().pow((**exp).clone() - Expr::Const(1.0))
                    * base.diff(var)
            }
            Expr::Exp(e) => Expr::Exp(e.clone()) * e.diff(var),
            Expr::Ln(e) => e.diff(var) / (**e).clone(),
            Expr::sin(e) => Expr::cos(e.clone()) * e.diff(var),
            Expr::cos(e) => -(Expr::sin(e.clone()) * e.diff(var)),
            Expr::tg(e) => {
                e.diff(var) / Expr::cos(e.clone()).pow(Expr::Const(2.0))
            }
            Expr::ctg(e) => {
                -(e.diff(var) / Expr::sin(e.clone()).pow(Expr::Const(2.0)))
            }
        }
    }

    /// Collects the names of all variables in the tree, sorted and
    /// deduplicated.
    pub fn all_arguments_are_variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.collect_variables(&mut vars);
        vars.sort();
        vars.dedup();
        vars
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Var(name) => out.push(name.clone()),
            Expr::Const(_) => {}
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expr::Exp(e) | Expr::Ln(e) | Expr::sin(e) | Expr::cos(e) | Expr::tg(e)
            | Expr::ctg(e) => e.collect_variables(out),
        }
    }

    /// Evaluates the expression directly, resolving each variable by its
    /// position in `vars`.
    ///
    /// Unknown variables evaluate to NaN rather than panicking; the model
    /// pipeline guarantees they cannot occur by rewriting first.
    pub fn eval_expression(&self, vars: &[&str], values: &[f64]) -> f64 {
        match self {
            Expr::Var(name) => match vars.iter().position(|v| v == name) {
                Some(idx) => values[idx],
                None => f64::NAN,
            },
            Expr::Const(val) => *val,
            Expr::Add(a, b) => {
                a.eval_expression(vars, values) + b.eval_expression(vars, values)
            }
            Expr::Sub(a, b) => {
                a.eval_expression(vars, values) - b.eval_expression(vars, values)
            }
            Expr::Mul(a, b) => {
                a.eval_expression(vars, values) * b.eval_expression(vars, values)
            }
            Expr::Div(a, b) => {
                a.eval_expression(vars, values) / b.eval_expression(vars, values)
            }
            Expr::Pow(a, b) => a
                .eval_expression(vars, values)
                .powf(b.eval_expression(vars, values)),
            Expr::Exp(e) => e.eval_expression(vars, values).exp(),
            Expr::Ln(e) => e.eval_expression(vars, values).ln(),
            Expr::sin(e) => e.eval_expression(vars, values).sin(),
            Expr::cos(e) => e.eval_expression(vars, values).cos(),
            Expr::tg(e) => e.eval_expression(vars, values).tan(),
            Expr::ctg(e) => 1.0 / e.eval_expression(vars, values).tan(),
        }
    }

    /// Human-readable string form, fully parenthesized.
    pub fn sym_to_str(&self) -> String {
        format!("{}", self)
    }
}
