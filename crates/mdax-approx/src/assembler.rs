//! Assembly of approximated Jacobian blocks from perturbation results.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::Serialize;

use mdax_core::{JacBlock, Sparsity};

use crate::error::{Error, Result};
use crate::plan::{PerturbationDirection, PerturbationPlan};
use crate::request::{PartialRequest, Sizes};

/// Default magnitude above which an entry outside a sparsity pattern counts as non-zero.
pub const DEFAULT_SPARSITY_TOL: f64 = 1e-16;

/// Approximated blocks keyed by `(of, wrt)`.
pub type ApproxJacobian = IndexMap<(String, String), JacBlock>;

/// Entries of a block found non-zero outside its declared pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparsityMismatch {
    pub of: String,
    pub wrt: String,
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub max_magnitude: f64,
}

/// Entries of `block` outside `sparsity` whose magnitude exceeds `tol`,
/// as `(rows, cols, max magnitude)` in column-major order.
pub fn pattern_violations(
    block: &DMatrix<f64>,
    sparsity: &Sparsity,
    tol: f64,
) -> Option<(Vec<usize>, Vec<usize>, f64)> {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut max = 0.0f64;
    for c in 0..block.ncols() {
        for r in 0..block.nrows() {
            let v = block[(r, c)].abs();
            if v > tol && !sparsity.contains(r, c) {
                rows.push(r);
                cols.push(c);
                max = max.max(v);
            }
        }
    }
    (!rows.is_empty()).then_some((rows, cols, max))
}

/// Collects the columns produced by each direction into blocks.
///
/// Each rank of a partitioned computation fills its own assembler; they are
/// merged before the result is taken with [`JacobianAssembler::finish`].
#[derive(Debug, Clone)]
pub struct JacobianAssembler {
    keys: Vec<(String, String)>,
    blocks: Vec<JacBlock>,
    /// Entries of `of` forming each request's block rows.
    rows: Vec<Vec<usize>>,
    deposited: Vec<bool>,
    sparsity_tol: f64,
    violations: BTreeMap<usize, BTreeMap<(usize, usize), f64>>,
}

impl JacobianAssembler {
    pub fn new(requests: &[PartialRequest], sizes: &Sizes, plan: &PerturbationPlan) -> Result<Self> {
        let mut keys = Vec::with_capacity(requests.len());
        let mut blocks = Vec::with_capacity(requests.len());
        let mut rows = Vec::with_capacity(requests.len());
        for req in requests {
            keys.push((req.of.clone(), req.wrt.clone()));
            blocks.push(JacBlock::zeros(req.shape(sizes)?, req.sparsity.as_ref()));
            rows.push(req.rows(sizes)?);
        }
        Ok(Self {
            keys,
            blocks,
            rows,
            deposited: vec![false; plan.len()],
            sparsity_tol: DEFAULT_SPARSITY_TOL,
            violations: BTreeMap::new(),
        })
    }

    pub fn with_sparsity_tol(mut self, tol: f64) -> Self {
        self.sparsity_tol = tol;
        self
    }

    /// Write the columns of direction `index`.
    ///
    /// `numerators` holds the stencil result per `of` variable, `steps` the
    /// step of each seed; column values are `numerator / step`.
    pub fn deposit(
        &mut self,
        index: usize,
        direction: &PerturbationDirection,
        steps: &[f64],
        numerators: &IndexMap<String, Vec<f64>>,
    ) -> Result<()> {
        let check = !direction.is_colored();
        for (seed, &h) in direction.seeds.iter().zip(steps) {
            for entry in &seed.columns {
                let r = entry.request;
                let c = entry.col;
                let of = &self.keys[r].0;
                let numer = numerators
                    .get(of)
                    .ok_or_else(|| Error::UnknownVariable(of.clone()))?;
                let rows = &self.rows[r];
                match &mut self.blocks[r] {
                    JacBlock::Dense(m) => {
                        for (k, &row) in rows.iter().enumerate() {
                            m[(k, c)] = numer[row] / h;
                        }
                    }
                    JacBlock::Sparse {
                        rows: prow,
                        cols: pcol,
                        values,
                        ..
                    } => {
                        let mut declared = vec![false; rows.len()];
                        for j in 0..values.len() {
                            if pcol[j] == c {
                                values[j] = numer[rows[prow[j]]] / h;
                                declared[prow[j]] = true;
                            }
                        }
                        if check {
                            for (k, &row) in rows.iter().enumerate() {
                                let v = (numer[row] / h).abs();
                                if v > self.sparsity_tol && !declared[k] {
                                    self.violations.entry(r).or_default().insert((k, c), v);
                                }
                            }
                        }
                    }
                }
            }
        }
        self.deposited[index] = true;
        Ok(())
    }

    /// Add the contributions of another rank. Directions must be disjoint.
    pub fn merge(&mut self, other: JacobianAssembler) -> Result<()> {
        if other.blocks.len() != self.blocks.len() || other.deposited.len() != self.deposited.len() {
            return Err(Error::InvalidConfiguration(
                "cannot merge assemblers built from different plans".to_string(),
            ));
        }
        for (mine, theirs) in self.blocks.iter_mut().zip(other.blocks) {
            match (mine, theirs) {
                (JacBlock::Dense(a), JacBlock::Dense(b)) => *a += b,
                (JacBlock::Sparse { values: a, .. }, JacBlock::Sparse { values: b, .. }) => {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                }
                _ => {
                    return Err(Error::InvalidConfiguration(
                        "cannot merge dense and sparse blocks".to_string(),
                    ));
                }
            }
        }
        for (mine, theirs) in self.deposited.iter_mut().zip(other.deposited) {
            *mine |= theirs;
        }
        for (r, entries) in other.violations {
            self.violations.entry(r).or_default().extend(entries);
        }
        Ok(())
    }

    /// Number of directions deposited so far.
    pub fn completed(&self) -> usize {
        self.deposited.iter().filter(|&&d| d).count()
    }

    /// The finished blocks and any sparsity mismatches seen while assembling.
    pub fn finish(self) -> Result<(ApproxJacobian, Vec<SparsityMismatch>)> {
        let done = self.completed();
        if done != self.deposited.len() {
            return Err(Error::IncompleteAssembly {
                done,
                total: self.deposited.len(),
            });
        }

        let mut mismatches = Vec::new();
        for (r, entries) in &self.violations {
            let (of, wrt) = &self.keys[*r];
            let mut ordered: Vec<(&(usize, usize), &f64)> = entries.iter().collect();
            ordered.sort_by_key(|((row, col), _)| (*col, *row));
            mismatches.push(SparsityMismatch {
                of: of.clone(),
                wrt: wrt.clone(),
                rows: ordered.iter().map(|((row, _), _)| *row).collect(),
                cols: ordered.iter().map(|((_, col), _)| *col).collect(),
                max_magnitude: ordered.iter().fold(0.0, |m: f64, (_, v)| m.max(**v)),
            });
        }

        let jac = self.keys.into_iter().zip(self.blocks).collect();
        Ok((jac, mismatches))
    }
}

/// Scale every block by `ref(wrt) / ref(of)`. Variables without a reference are unscaled.
pub fn apply_scaling(jac: &mut ApproxJacobian, refs: &IndexMap<String, f64>) {
    for ((of, wrt), block) in jac.iter_mut() {
        let ref_of = refs.get(of).copied().unwrap_or(1.0);
        let ref_wrt = refs.get(wrt).copied().unwrap_or(1.0);
        *block = block.scaled(ref_of, ref_wrt);
    }
}
