//! Complex-step evaluation and the scoped complex-step state.

use indexmap::IndexMap;

use crate::error::Result;
use crate::fd::Perturbation;
use crate::relevance::ActiveSet;
use crate::target::{ApproxTarget, Delta, EvalMode, Part};

/// One complex-step activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    /// Scope that started the complex step.
    pub owner: String,
    pub step: f64,
}

/// Stack of complex-step activations owned by a model.
///
/// A non-empty stack means the model is currently evaluated with an
/// imaginary perturbation applied; anything approximating derivatives
/// underneath must not start another complex step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplexStepState {
    stack: Vec<Activation>,
}

impl ComplexStepState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, owner: &str, step: f64) {
        self.stack.push(Activation {
            owner: owner.to_string(),
            step,
        });
    }

    pub fn pop(&mut self) -> Option<Activation> {
        self.stack.pop()
    }

    pub fn is_active(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Innermost activation.
    pub fn current(&self) -> Option<&Activation> {
        self.stack.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Perturbed,
    Captured,
}

/// Drives one complex-step direction at a time.
///
/// `begin` moves from `Idle` to `Perturbed`, `capture` to `Captured` and
/// `end` back to `Idle`. Starting a direction while another one is still
/// applied is a contract violation and panics.
#[derive(Debug)]
pub struct ComplexStepEngine<C> {
    phase: Phase,
    checkpoint: Option<C>,
}

impl<C> Default for ComplexStepEngine<C> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            checkpoint: None,
        }
    }
}

impl<C> ComplexStepEngine<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Save the state, activate complex step and apply `i*h` to each entry.
    pub fn begin<T>(&mut self, target: &mut T, owner: &str, perturbations: &[Perturbation]) -> Result<()>
    where
        T: ApproxTarget<Checkpoint = C>,
    {
        assert_eq!(
            self.phase,
            Phase::Idle,
            "complex step applied before the previous direction was undone"
        );
        self.checkpoint = Some(target.checkpoint());
        let step = perturbations.iter().fold(0.0, |m: f64, p| m.max(p.step));
        target.enter_complex_step(owner, step);
        self.phase = Phase::Perturbed;
        for p in perturbations {
            target.perturb(&p.var, p.index, Delta::Imag(p.step))?;
        }
        Ok(())
    }

    /// Evaluate once in complex mode and read the imaginary parts of `of`.
    pub fn capture<T>(
        &mut self,
        target: &mut T,
        active: &ActiveSet,
        of: &[&str],
    ) -> Result<IndexMap<String, Vec<f64>>>
    where
        T: ApproxTarget<Checkpoint = C>,
    {
        assert_eq!(self.phase, Phase::Perturbed, "capture without an applied perturbation");
        target.evaluate(active, EvalMode::Complex)?;
        let mut out = IndexMap::with_capacity(of.len());
        for name in of {
            out.insert(name.to_string(), target.values(name, Part::Imag)?);
        }
        self.phase = Phase::Captured;
        Ok(out)
    }

    /// Restore the saved state and deactivate complex step.
    pub fn end<T>(&mut self, target: &mut T)
    where
        T: ApproxTarget<Checkpoint = C>,
    {
        assert_ne!(self.phase, Phase::Idle, "no complex step to undo");
        if let Some(cp) = self.checkpoint.take() {
            target.restore(&cp);
        }
        target.exit_complex_step();
        self.phase = Phase::Idle;
    }

    /// One full direction. The state is restored whether or not evaluation succeeded.
    pub fn run<T>(
        &mut self,
        target: &mut T,
        owner: &str,
        perturbations: &[Perturbation],
        active: &ActiveSet,
        of: &[&str],
    ) -> Result<IndexMap<String, Vec<f64>>>
    where
        T: ApproxTarget<Checkpoint = C>,
    {
        let result = self
            .begin(target, owner, perturbations)
            .and_then(|()| self.capture(target, active, of));
        self.end(target);
        result
    }
}
