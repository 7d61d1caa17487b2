//! Dense linear solves.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Solve a linear system Ax = b using LU decomposition.
pub fn solve_dense(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    check_dims(a, b.len())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

/// Solve AX = B for several right-hand sides with one factorization.
pub fn solve_dense_multi(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_dims(a, b.nrows())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

fn check_dims(a: &DMatrix<f64>, rhs_rows: usize) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    if a.nrows() != rhs_rows {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: rhs_rows,
        });
    }
    Ok(())
}
