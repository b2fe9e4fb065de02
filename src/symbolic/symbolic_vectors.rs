//! Symbolic vector and matrix containers over [`Expr`], plus the symbolic
//! matrix inverse used for the inverse-Jacobian and Rosenbrock-W artifacts.

use crate::symbolic::symbolic_engine::Expr;

use nalgebra::{DMatrix, DVector};
use std::ops::{Index, IndexMut, Mul, Sub};

/// Symbolic vector
#[derive(Clone, Debug, PartialEq)]
pub struct ExprVector {
    pub data: Vec<Expr>,
}

impl ExprVector {
    pub fn new(data: Vec<Expr>) -> Self {
        Self { data }
    }

    pub fn zeros(size: usize) -> Self {
        Self {
            data: vec![Expr::Const(0.0); size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Expr> {
        self.data.iter()
    }

    /// Differentiate every component with respect to `var`.
    pub fn diff(&self, var: &str) -> ExprVector {
        ExprVector {
            data: self.data.iter().map(|e| e.diff(var).simplify()).collect(),
        }
    }

    pub fn simplify(&self) -> ExprVector {
        ExprVector {
            data: self.data.iter().map(|e| e.simplify()).collect(),
        }
    }

    /// Evaluate numerically, resolving variables by position in `vars`.
    pub fn evaluate(&self, vars: &[&str], values: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.data.len(),
            self.data.iter().map(|e| e.eval_expression(vars, values)),
        )
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.data.iter().map(|e| e.to_string()).collect()
    }
}

impl Index<usize> for ExprVector {
    type Output = Expr;
    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<usize> for ExprVector {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}

///////////////////////////////////////////////////////////////////////////
// Matrix
///////////////////////////////////////////////////////////////////////////

/// Symbolic dense matrix, row-major `Vec<Vec<Expr>>`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprMatrix {
    pub data: Vec<Vec<Expr>>,
    pub nrows: usize,
    pub ncols: usize,
}

impl ExprMatrix {
    pub fn new(data: Vec<Vec<Expr>>) -> Self {
        let nrows = data.len();
        let ncols = if nrows > 0 { data[0].len() } else { 0 };
        for row in &data {
            assert_eq!(row.len(), ncols, "All rows must have the same length");
        }
        Self { data, nrows, ncols }
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![vec![Expr::Const(0.0); ncols]; nrows],
            nrows,
            ncols,
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.data[i][i] = Expr::Const(1.0);
        }
        m
    }

    /// Lift a constant numeric matrix into symbolic form.
    pub fn from_dmatrix(m: &DMatrix<f64>) -> Self {
        let data = (0..m.nrows())
            .map(|i| (0..m.ncols()).map(|j| Expr::Const(m[(i, j)])).collect())
            .collect();
        Self::new(data)
    }

    pub fn from_rows(rows: Vec<ExprVector>) -> Self {
        Self::new(rows.into_iter().map(|r| r.data).collect())
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    /// Element-wise map.
    pub fn map<F>(&self, f: F) -> ExprMatrix
    where
        F: Fn(&Expr) -> Expr,
    {
        ExprMatrix::new(
            self.data
                .iter()
                .map(|row| row.iter().map(&f).collect())
                .collect(),
        )
    }

    pub fn simplify(&self) -> ExprMatrix {
        self.map(|e| e.simplify())
    }

    /// Multiply every entry by a symbolic scalar.
    pub fn scale(&self, scalar: &Expr) -> ExprMatrix {
        self.map(|e| (scalar.clone() * e.clone()).simplify())
    }

    /// Evaluate numerically, resolving variables by position in `vars`.
    pub fn evaluate(&self, vars: &[&str], values: &[f64]) -> DMatrix<f64> {
        let mut result = DMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                result[(i, j)] = self.data[i][j].eval_expression(vars, values);
            }
        }
        result
    }

    pub fn to_strings(&self) -> Vec<Vec<String>> {
        self.data
            .iter()
            .map(|row| row.iter().map(|e| e.to_string()).collect())
            .collect()
    }

    /// Symbolic matrix inverse via Gauss-Jordan elimination.
    ///
    /// Pivot selection searches the column for an entry that does not
    /// simplify to the constant zero; if none is found the matrix is reported
    /// singular (or not invertible within this engine's capability, which is
    /// the same thing from the caller's point of view). Entries are
    /// simplified after every elimination step to keep expression growth in
    /// check.
    pub fn inverse(&self) -> Result<ExprMatrix, String> {
        if !self.is_square() {
            return Err(format!(
                "cannot invert a {}x{} matrix",
                self.nrows, self.ncols
            ));
        }
        let n = self.nrows;
        let mut work = self.simplify();
        let mut inv = ExprMatrix::identity(n);

        for col in 0..n {
            // pivot: first row at or below the diagonal with a symbolically
            // non-zero entry in this column
            let pivot_row = (col..n).find(|&r| !work.data[r][col].is_zero());
            let pivot_row = match pivot_row {
                Some(r) => r,
                None => {
                    return Err(format!(
                        "matrix is singular or not symbolically invertible (column {})",
                        col
                    ));
                }
            };
            if pivot_row != col {
                work.data.swap(pivot_row, col);
                inv.data.swap(pivot_row, col);
            }

            let pivot = work.data[col][col].clone();
            for j in 0..n {
                work.data[col][j] =
                    (work.data[col][j].clone() / pivot.clone()).simplify();
                inv.data[col][j] = (inv.data[col][j].clone() / pivot.clone()).simplify();
            }

            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = work.data[row][col].clone();
                if factor.is_zero() {
                    continue;
                }
                for j in 0..n {
                    work.data[row][j] = (work.data[row][j].clone()
                        - factor.clone() * work.data[col][j].clone())
                    .simplify();
                    inv.data[row][j] = (inv.data[row][j].clone()
                        - factor.clone() * inv.data[col][j].clone())
                    .simplify();
                }
            }
        }
        Ok(inv)
    }
}

impl Index<(usize, usize)> for ExprMatrix {
    type Output = Expr;
    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        &self.data[i][j]
    }
}

impl IndexMut<(usize, usize)> for ExprMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut Self::Output {
        &mut self.data[i][j]
    }
}

impl Sub for ExprMatrix {
    type Output = Self;
    fn sub(self, other: Self) -> Self::Output {
        assert_eq!(self.shape(), other.shape(), "Matrix dimensions must match");
        let data = self
            .data
            .into_iter()
            .zip(other.data)
            .map(|(ra, rb)| {
                ra.into_iter()
                    .zip(rb)
                    .map(|(a, b)| (a - b).simplify())
                    .collect()
            })
            .collect();
        ExprMatrix::new(data)
    }
}

impl Mul for ExprMatrix {
    type Output = Self;
    fn mul(self, other: Self) -> Self::Output {
        assert_eq!(
            self.ncols, other.nrows,
            "Matrix dimensions incompatible for multiplication"
        );
        let mut result = ExprMatrix::zeros(self.nrows, other.ncols);
        for i in 0..self.nrows {
            for j in 0..other.ncols {
                let mut sum = Expr::Const(0.0);
                for k in 0..self.ncols {
                    sum = sum + self.data[i][k].clone() * other.data[k][j].clone();
                }
                result.data[i][j] = sum.simplify();
            }
        }
        result
    }
}
