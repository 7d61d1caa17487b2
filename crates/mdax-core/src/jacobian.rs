//! Derivative blocks.

use nalgebra::DMatrix;

use crate::declarations::Sparsity;
use crate::error::{Error, Result};

/// One `(of, wrt)` block of a Jacobian, shaped `(size(of), size(wrt))`.
#[derive(Debug, Clone, PartialEq)]
pub enum JacBlock {
    Dense(DMatrix<f64>),
    /// Values at declared `(rows[k], cols[k])` coordinates.
    Sparse {
        rows: Vec<usize>,
        cols: Vec<usize>,
        values: Vec<f64>,
        shape: (usize, usize),
    },
}

impl JacBlock {
    pub fn zeros(shape: (usize, usize), sparsity: Option<&Sparsity>) -> Self {
        match sparsity {
            Some(s) => JacBlock::Sparse {
                rows: s.rows.clone(),
                cols: s.cols.clone(),
                values: vec![0.0; s.nnz()],
                shape,
            },
            None => JacBlock::Dense(DMatrix::zeros(shape.0, shape.1)),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            JacBlock::Dense(m) => m.shape(),
            JacBlock::Sparse { shape, .. } => *shape,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, JacBlock::Sparse { .. })
    }

    /// Overwrite from a flat slice: row-major for dense blocks, declared order for sparse ones.
    pub fn set_values(&mut self, flat: &[f64]) -> Result<()> {
        match self {
            JacBlock::Dense(m) => {
                let (nr, nc) = m.shape();
                if flat.len() != nr * nc {
                    return Err(Error::ShapeMismatch {
                        name: "partials block".to_string(),
                        expected: nr * nc,
                        actual: flat.len(),
                    });
                }
                *m = DMatrix::from_row_slice(nr, nc, flat);
            }
            JacBlock::Sparse { values, .. } => {
                if flat.len() != values.len() {
                    return Err(Error::ShapeMismatch {
                        name: "sparse partials block".to_string(),
                        expected: values.len(),
                        actual: flat.len(),
                    });
                }
                values.copy_from_slice(flat);
            }
        }
        Ok(())
    }

    /// Entry at `(row, col)`; zero outside a sparse pattern.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            JacBlock::Dense(m) => m[(row, col)],
            JacBlock::Sparse {
                rows, cols, values, ..
            } => rows
                .iter()
                .zip(cols)
                .zip(values)
                .filter(|((r, c), _)| **r == row && **c == col)
                .map(|(_, v)| *v)
                .sum(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            JacBlock::Dense(m) => m.clone(),
            JacBlock::Sparse {
                rows,
                cols,
                values,
                shape,
            } => {
                let mut m = DMatrix::zeros(shape.0, shape.1);
                for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
                    m[(r, c)] += v;
                }
                m
            }
        }
    }

    /// Apply variable scaling: `J * ref_wrt / ref_of`.
    pub fn scaled(&self, ref_of: f64, ref_wrt: f64) -> JacBlock {
        let factor = ref_wrt / ref_of;
        match self {
            JacBlock::Dense(m) => JacBlock::Dense(m * factor),
            JacBlock::Sparse {
                rows,
                cols,
                values,
                shape,
            } => JacBlock::Sparse {
                rows: rows.clone(),
                cols: cols.clone(),
                values: values.iter().map(|v| v * factor).collect(),
                shape: *shape,
            },
        }
    }

    /// Add `self` into `target` with its top-left corner at `(row0, col0)`.
    pub fn add_into(&self, target: &mut DMatrix<f64>, row0: usize, col0: usize, factor: f64) {
        match self {
            JacBlock::Dense(m) => {
                let mut view = target.view_mut((row0, col0), m.shape());
                view += m * factor;
            }
            JacBlock::Sparse {
                rows, cols, values, ..
            } => {
                for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
                    target[(row0 + r, col0 + c)] += factor * v;
                }
            }
        }
    }
}
