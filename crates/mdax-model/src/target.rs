//! Approximation targets over a single component or a group of the model.

use mdax_approx::{
    ActiveSet, ApproxTarget, ComplexStepState, Delta, EvalMode, Part, Result as ApproxResult,
};
use mdax_core::{Component, DependencyGraph, LocalLayout, VarKind, Vector};

use crate::model::{Model, evaluate_component};

type ApproxError = mdax_approx::Error;

fn no_shadow(scope: &str) -> ApproxError {
    ApproxError::InvalidConfiguration(format!(
        "{scope}: complex step requires complex storage"
    ))
}

/// One component evaluated on private copies of its inputs and outputs.
///
/// The copies start from the real part of the model state, so approximating
/// a component's partials never disturbs the model vectors.
pub(crate) struct ComponentTarget<'a> {
    path: &'a str,
    component: &'a mut dyn Component,
    layout: &'a LocalLayout,
    exec_count: &'a mut usize,
    inputs: Vector,
    outputs: Vector,
    complex: bool,
    /// An enclosing model-level complex step is in progress.
    outer_active: bool,
    state: ComplexStepState,
}

impl<'a> ComponentTarget<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        path: &'a str,
        component: &'a mut dyn Component,
        layout: &'a LocalLayout,
        exec_count: &'a mut usize,
        x: &[f64],
        y: &[f64],
        complex: bool,
        outer_active: bool,
    ) -> Self {
        let mut inputs = Vector::zeros(x.len(), complex);
        inputs.real_mut().copy_from_slice(x);
        let mut outputs = Vector::zeros(y.len(), complex);
        outputs.real_mut().copy_from_slice(y);
        Self {
            path,
            component,
            layout,
            exec_count,
            inputs,
            outputs,
            complex,
            outer_active,
            state: ComplexStepState::new(),
        }
    }

    fn locate(&self, var: &str) -> ApproxResult<(VarKind, std::ops::Range<usize>)> {
        if let Some(r) = self.layout.inputs.get(var) {
            return Ok((VarKind::Input, r.clone()));
        }
        if let Some(r) = self.layout.outputs.get(var) {
            return Ok((VarKind::Output, r.clone()));
        }
        Err(ApproxError::UnknownVariable(format!("{}.{var}", self.path)))
    }

    fn vector_mut(&mut self, kind: VarKind) -> &mut Vector {
        match kind {
            VarKind::Input => &mut self.inputs,
            VarKind::Output => &mut self.outputs,
        }
    }
}

impl ApproxTarget for ComponentTarget<'_> {
    type Checkpoint = (Vector, Vector);

    fn scope(&self) -> &str {
        self.path
    }

    fn size(&self, var: &str) -> ApproxResult<usize> {
        Ok(self.locate(var)?.1.len())
    }

    fn values(&self, var: &str, part: Part) -> ApproxResult<Vec<f64>> {
        let (kind, range) = self.locate(var)?;
        let v = match kind {
            VarKind::Input => &self.inputs,
            VarKind::Output => &self.outputs,
        };
        Ok(match part {
            Part::Real => v.real()[range].to_vec(),
            Part::Imag => v
                .imag()
                .map_or_else(|| vec![0.0; range.len()], |im| im[range.clone()].to_vec()),
        })
    }

    fn perturb(&mut self, var: &str, index: usize, delta: Delta) -> ApproxResult<()> {
        let (kind, range) = self.locate(var)?;
        let i = range.start + index;
        match delta {
            Delta::Real(h) => self.vector_mut(kind).real_mut()[i] += h,
            Delta::Imag(h) => {
                if !self.vector_mut(kind).add_imag(i, h) {
                    return Err(no_shadow(self.path));
                }
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, _active: &ActiveSet, mode: EvalMode) -> ApproxResult<()> {
        *self.exec_count += 1;
        let n_in = self.inputs.len();
        let n_out = self.outputs.len();
        evaluate_component(
            &mut *self.component,
            self.layout,
            &self.inputs,
            0..n_in,
            &mut self.outputs,
            0..n_out,
            mode == EvalMode::Complex && self.complex,
        )
        .map_err(|e| ApproxError::evaluation(self.path, e))
    }

    fn checkpoint(&self) -> Self::Checkpoint {
        (self.inputs.clone(), self.outputs.clone())
    }

    fn restore(&mut self, checkpoint: &Self::Checkpoint) {
        self.inputs.restore_from(&checkpoint.0);
        self.outputs.restore_from(&checkpoint.1);
    }

    fn complex_capable(&self) -> bool {
        self.complex
    }

    fn complex_step_active(&self) -> bool {
        self.outer_active || self.state.is_active()
    }

    fn enter_complex_step(&mut self, owner: &str, step: f64) {
        self.state.push(owner, step);
    }

    fn exit_complex_step(&mut self) {
        self.state.pop();
    }
}

/// Saved model vectors.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    inputs: Vector,
    outputs: Vector,
    residuals: Vector,
}

/// A group of the model, evaluated in place with its own solver.
pub(crate) struct GroupTarget<'a> {
    model: &'a mut Model,
    group: usize,
    label: String,
}

impl<'a> GroupTarget<'a> {
    pub(crate) fn new(model: &'a mut Model, group: usize) -> Self {
        let label = model.groups[group].label().to_string();
        Self { model, group, label }
    }

    fn locate(&self, var: &str) -> ApproxResult<(VarKind, std::ops::Range<usize>)> {
        self.model
            .variables
            .get(var)
            .map(|v| (v.kind, v.range()))
            .ok_or_else(|| ApproxError::UnknownVariable(var.to_string()))
    }
}

impl ApproxTarget for GroupTarget<'_> {
    type Checkpoint = Snapshot;

    fn scope(&self) -> &str {
        &self.label
    }

    fn size(&self, var: &str) -> ApproxResult<usize> {
        Ok(self.locate(var)?.1.len())
    }

    fn values(&self, var: &str, part: Part) -> ApproxResult<Vec<f64>> {
        let (kind, range) = self.locate(var)?;
        let v = self.model.vector(kind);
        Ok(match part {
            Part::Real => v.real()[range].to_vec(),
            Part::Imag => v
                .imag()
                .map_or_else(|| vec![0.0; range.len()], |im| im[range.clone()].to_vec()),
        })
    }

    fn perturb(&mut self, var: &str, index: usize, delta: Delta) -> ApproxResult<()> {
        let (kind, range) = self.locate(var)?;
        let i = range.start + index;
        let v = self.model.vector_mut(kind);
        match delta {
            Delta::Real(h) => v.real_mut()[i] += h,
            Delta::Imag(h) => {
                if !v.add_imag(i, h) {
                    return Err(no_shadow(&self.label));
                }
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, active: &ActiveSet, mode: EvalMode) -> ApproxResult<()> {
        let scope = self.model.groups[self.group].components.clone();
        self.model
            .solve_group(self.group, active, mode, &scope)
            .map_err(|e| ApproxError::evaluation(&self.label, e))
    }

    fn checkpoint(&self) -> Self::Checkpoint {
        Snapshot {
            inputs: self.model.inputs.clone(),
            outputs: self.model.outputs.clone(),
            residuals: self.model.residuals.clone(),
        }
    }

    fn restore(&mut self, checkpoint: &Self::Checkpoint) {
        self.model.inputs.restore_from(&checkpoint.inputs);
        self.model.outputs.restore_from(&checkpoint.outputs);
        self.model.residuals.restore_from(&checkpoint.residuals);
    }

    fn complex_capable(&self) -> bool {
        self.model.complex
            && self.model.groups[self.group]
                .components
                .clone()
                .all(|c| self.model.components[c].complex_safe)
    }

    fn complex_step_active(&self) -> bool {
        self.model.cs_state.is_active()
    }

    fn enter_complex_step(&mut self, owner: &str, step: f64) {
        self.model.cs_state.push(owner, step);
    }

    fn exit_complex_step(&mut self) {
        self.model.cs_state.pop();
    }

    fn graph(&self) -> Option<&DependencyGraph> {
        Some(&self.model.graph)
    }
}
