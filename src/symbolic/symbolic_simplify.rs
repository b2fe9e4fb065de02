//! Algebraic simplification for [`Expr`].
//!
//! Bottom-up, deterministic rewriting: children are simplified first, then a
//! fixed rule set is applied to the node. Two structurally equal inputs
//! always simplify to structurally equal outputs, which the model pipeline
//! relies on for reproducible code generation.

use crate::symbolic::symbolic_engine::Expr;

impl Expr {
    /// Simplifies the expression.
    ///
    /// Applied rules: constant folding of every operator, `x + 0 = x`,
    /// `x - 0 = x`, `x * 0 = 0`, `x * 1 = x`, `0 / x = 0`, `x / 1 = x`,
    /// `x ^ 0 = 1`, `x ^ 1 = x`, `exp(0) = 1`, `ln(1) = 0`.
    pub fn simplify(&self) -> Expr {
        let node = self.map_children(|child| child.simplify());
        match node {
            Expr::Add(a, b) => match (*a, *b) {
                (Expr::Const(x), Expr::Const(y)) => Expr::Const(x + y),
                (Expr::Const(c), other) if c == 0.0 => other,
                (other, Expr::Const(c)) if c == 0.0 => other,
                (a, b) => Expr::Add(a.boxed(), b.boxed()),
            },
            Expr::Sub(a, b) => match (*a, *b) {
                (Expr::Const(x), Expr::Const(y)) => Expr::Const(x - y),
                (other, Expr::Const(c)) if c == 0.0 => other,
                (a, b) => {
                    if a == b {
                        Expr::Const(0.0)
                    } else {
                        Expr::Sub(a.boxed(), b.boxed())
                    }
                }
            },
            Expr::Mul(a, b) => match (*a, *b) {
                (Expr::Const(x), Expr::Const(y)) => Expr::Const(x * y),
                (Expr::Const(c), _) | (_, Expr::Const(c)) if c == 0.0 => Expr::Const(0.0),
                (Expr::Const(c), other) if c == 1.0 => other,
                (other, Expr::Const(c)) if c == 1.0 => other,
                (a, b) => Expr::Mul(a.boxed(), b.boxed()),
            },
            Expr::Div(a, b) => match (*a, *b) {
                // 0/0 stays symbolic rather than folding to a number
                (Expr::Const(x), Expr::Const(y)) if y != 0.0 => Expr::Const(x / y),
                (Expr::Const(c), other) if c == 0.0 && !other.is_zero() => Expr::Const(0.0),
                (other, Expr::Const(c)) if c == 1.0 => other,
                (a, b) => Expr::Div(a.boxed(), b.boxed()),
            },
            Expr::Pow(base, exp) => match (*base, *exp) {
                (Expr::Const(x), Expr::Const(y)) => Expr::Const(x.powf(y)),
                (_, Expr::Const(c)) if c == 0.0 => Expr::Const(1.0),
                (other, Expr::Const(c)) if c == 1.0 => other,
                (base, exp) => Expr::Pow(base.boxed(), exp.boxed()),
            },
            Expr::Exp(e) => match *e {
                Expr::Const(c) if c == 0.0 => Expr::Const(1.0),
                e => Expr::Exp(e.boxed()),
            },
            Expr::Ln(e) => match *e {
                Expr::Const(c) if c == 1.0 => Expr::Const(0.0),
                e => Expr::Ln(e.boxed()),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let e = Expr::Const(2.0) * Expr::Const(3.0) + Expr::Const(4.0);
        assert_eq!(e.simplify(), Expr::Const(10.0));
    }

    #[test]
    fn test_identity_rules() {
        let x = Expr::Var("x".to_string());
        assert_eq!((x.clone() + Expr::Const(0.0)).simplify(), x);
        assert_eq!((x.clone() * Expr::Const(1.0)).simplify(), x);
        assert_eq!((x.clone() * Expr::Const(0.0)).simplify(), Expr::Const(0.0));
        assert_eq!((x.clone() / Expr::Const(1.0)).simplify(), x);
        assert_eq!(x.clone().pow(Expr::Const(0.0)).simplify(), Expr::Const(1.0));
        assert_eq!(x.clone().pow(Expr::Const(1.0)).simplify(), x);
    }

    #[test]
    fn test_self_subtraction() {
        let x = Expr::Var("x".to_string());
        assert_eq!((x.clone() - x).simplify(), Expr::Const(0.0));
    }

    #[test]
    fn test_nested_simplification() {
        // (x*1 + 0) * (2*3) -> x * 6
        let x = Expr::Var("x".to_string());
        let e = (x.clone() * Expr::Const(1.0) + Expr::Const(0.0))
            * (Expr::Const(2.0) * Expr::Const(3.0));
        assert_eq!(e.simplify(), x * Expr::Const(6.0));
    }

    #[test]
    fn test_determinism() {
        let x = Expr::Var("x".to_string());
        let build = || {
            (x.clone() * Expr::Const(1.0) + Expr::Const(0.0))
                .pow(Expr::Const(2.0))
                .simplify()
        };
        assert_eq!(build(), build());
    }
}
