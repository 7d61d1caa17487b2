//! Requests for approximated derivative blocks.

use indexmap::IndexMap;

use mdax_core::{ApproxOptions, Sparsity};

use crate::error::{Error, Result};

/// Flat sizes of the variables a scheme touches, by name.
pub type Sizes = IndexMap<String, usize>;

/// One `(of, wrt)` block to approximate.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRequest {
    pub of: String,
    pub wrt: String,
    pub options: ApproxOptions,
    /// Declared non-zero pattern in block coordinates.
    pub sparsity: Option<Sparsity>,
    /// Subset of `of` entries forming the block rows.
    pub of_indices: Option<Vec<usize>>,
    /// Subset of `wrt` entries forming the block columns.
    pub wrt_indices: Option<Vec<usize>>,
    /// Came from an all-to-all declaration.
    pub wildcard: bool,
}

impl PartialRequest {
    pub fn new(of: impl Into<String>, wrt: impl Into<String>, options: ApproxOptions) -> Self {
        Self {
            of: of.into(),
            wrt: wrt.into(),
            options,
            sparsity: None,
            of_indices: None,
            wrt_indices: None,
            wildcard: false,
        }
    }

    pub fn with_sparsity(mut self, sparsity: Option<Sparsity>) -> Self {
        self.sparsity = sparsity;
        self
    }

    pub fn with_of_indices(mut self, indices: Option<Vec<usize>>) -> Self {
        self.of_indices = indices;
        self
    }

    pub fn with_wrt_indices(mut self, indices: Option<Vec<usize>>) -> Self {
        self.wrt_indices = indices;
        self
    }

    pub fn with_wildcard(mut self, wildcard: bool) -> Self {
        self.wildcard = wildcard;
        self
    }

    /// Entries of `of` that form the block rows.
    pub fn rows(&self, sizes: &Sizes) -> Result<Vec<usize>> {
        Self::selection(&self.of, self.of_indices.as_deref(), sizes)
    }

    /// Entries of `wrt` that form the block columns.
    pub fn cols(&self, sizes: &Sizes) -> Result<Vec<usize>> {
        Self::selection(&self.wrt, self.wrt_indices.as_deref(), sizes)
    }

    /// Block shape `(rows, cols)`.
    pub fn shape(&self, sizes: &Sizes) -> Result<(usize, usize)> {
        Ok((self.rows(sizes)?.len(), self.cols(sizes)?.len()))
    }

    fn selection(name: &str, indices: Option<&[usize]>, sizes: &Sizes) -> Result<Vec<usize>> {
        let size = *sizes
            .get(name)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
        match indices {
            Some(idx) => {
                if let Some(&bad) = idx.iter().find(|&&i| i >= size) {
                    return Err(Error::InvalidConfiguration(format!(
                        "index {bad} out of range for '{name}' of size {size}"
                    )));
                }
                Ok(idx.to_vec())
            }
            None => Ok((0..size).collect()),
        }
    }

    pub(crate) fn validate(&self, sizes: &Sizes) -> Result<()> {
        self.options.validate()?;
        let (nr, nc) = self.shape(sizes)?;
        if let Some(s) = &self.sparsity {
            if s.rows.len() != s.cols.len()
                || s.rows.iter().any(|&r| r >= nr)
                || s.cols.iter().any(|&c| c >= nc)
            {
                return Err(Error::InvalidConfiguration(format!(
                    "sparsity of '{}' wrt '{}' does not fit a ({nr}, {nc}) block",
                    self.of, self.wrt
                )));
            }
        }
        Ok(())
    }
}
