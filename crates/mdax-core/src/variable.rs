//! Variable metadata.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether a variable is consumed or produced by its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarKind {
    Input,
    Output,
}

/// Shape, default value and scaling of a variable, as declared by its component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarSpec {
    pub shape: Vec<usize>,
    pub value: Vec<f64>,
    /// Scaling reference. Scaled derivatives are `J * ref(wrt) / ref(of)`.
    pub reference: f64,
}

impl VarSpec {
    /// A scalar variable.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: vec![1],
            value: vec![value],
            reference: 1.0,
        }
    }

    /// A flat vector variable.
    pub fn vector(values: &[f64]) -> Self {
        Self {
            shape: vec![values.len()],
            value: values.to_vec(),
            reference: 1.0,
        }
    }

    /// A flat vector variable filled with zeros.
    pub fn zeros(size: usize) -> Self {
        Self::vector(&vec![0.0; size])
    }

    /// Reshape; the total size must match the number of values.
    pub fn with_shape(mut self, shape: &[usize]) -> Self {
        self.shape = shape.to_vec();
        self
    }

    pub fn with_ref(mut self, reference: f64) -> Self {
        self.reference = reference;
        self
    }

    /// Flat number of entries implied by the shape.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.size() != self.value.len() {
            return Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: self.size(),
                actual: self.value.len(),
            });
        }
        if self.size() == 0 {
            return Err(Error::InvalidModel(format!("variable '{name}' has zero size")));
        }
        if !self.reference.is_finite() || self.reference == 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "ref of '{name}' must be finite and non-zero, got {}",
                self.reference
            )));
        }
        Ok(())
    }
}

/// A variable after setup, addressed by its absolute dotted name.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Absolute name, e.g. `cycle.d1.y1`.
    pub name: String,
    /// Name local to the owning component, e.g. `y1`.
    pub local: String,
    pub kind: VarKind,
    /// Index of the owning component in execution order.
    pub owner: usize,
    pub shape: Vec<usize>,
    pub size: usize,
    /// Offset into the input or output vector.
    pub offset: usize,
    pub default: Vec<f64>,
    pub reference: f64,
}

impl Variable {
    /// Range of this variable's entries in its vector.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}
