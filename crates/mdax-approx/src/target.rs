//! The interface a model scope exposes to an approximation scheme.

use mdax_core::DependencyGraph;

use crate::error::Result;
use crate::relevance::ActiveSet;

/// Which part of a value to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Real,
    Imag,
}

/// Arithmetic used for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Real,
    Complex,
}

/// A perturbation added to one entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    Real(f64),
    Imag(f64),
}

/// A model scope whose derivatives can be approximated: a single component
/// or a group of components.
pub trait ApproxTarget {
    /// Saved state that [`ApproxTarget::restore`] returns to exactly.
    type Checkpoint;

    /// Name used in diagnostics and errors.
    fn scope(&self) -> &str;

    /// Flat size of a variable.
    fn size(&self, var: &str) -> Result<usize>;

    /// Current values of a variable.
    fn values(&self, var: &str, part: Part) -> Result<Vec<f64>>;

    /// Add `delta` to entry `index` of `var`.
    fn perturb(&mut self, var: &str, index: usize, delta: Delta) -> Result<()>;

    /// Run the components in `active` (or everything) in the given mode.
    fn evaluate(&mut self, active: &ActiveSet, mode: EvalMode) -> Result<()>;

    fn checkpoint(&self) -> Self::Checkpoint;

    /// Return to `checkpoint`: real parts bit-exact, imaginary parts zero.
    fn restore(&mut self, checkpoint: &Self::Checkpoint);

    /// Whether the scope can be evaluated with complex arithmetic.
    fn complex_capable(&self) -> bool;

    /// Whether an enclosing complex step is already in progress.
    fn complex_step_active(&self) -> bool;

    fn enter_complex_step(&mut self, owner: &str, step: f64);

    fn exit_complex_step(&mut self);

    /// Dependency graph used to prune evaluations; `None` evaluates everything.
    fn graph(&self) -> Option<&DependencyGraph> {
        None
    }
}
