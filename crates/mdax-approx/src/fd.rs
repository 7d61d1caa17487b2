//! Finite-difference evaluation of one perturbation direction.

use indexmap::IndexMap;

use mdax_core::FdForm;

use crate::error::{Error, Result};
use crate::relevance::ActiveSet;
use crate::target::{ApproxTarget, Delta, EvalMode, Part};

/// Difference weights in units of the step.
///
/// The derivative is `(baseline * f(x) + sum(weights[k] * f(x + offsets[k] * h))) / (denominator * h)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stencil {
    pub offsets: &'static [f64],
    pub weights: &'static [f64],
    pub baseline: f64,
    pub denominator: f64,
}

impl Stencil {
    pub fn new(form: FdForm, order: u8) -> Result<Self> {
        let stencil = match (form, order) {
            (FdForm::Forward, 1) => Stencil {
                offsets: &[1.0],
                weights: &[1.0],
                baseline: -1.0,
                denominator: 1.0,
            },
            (FdForm::Forward, 2) => Stencil {
                offsets: &[1.0, 2.0],
                weights: &[4.0, -1.0],
                baseline: -3.0,
                denominator: 2.0,
            },
            (FdForm::Backward, 1) => Stencil {
                offsets: &[-1.0],
                weights: &[-1.0],
                baseline: 1.0,
                denominator: 1.0,
            },
            (FdForm::Backward, 2) => Stencil {
                offsets: &[-1.0, -2.0],
                weights: &[-4.0, 1.0],
                baseline: 3.0,
                denominator: 2.0,
            },
            (FdForm::Central, 2) => Stencil {
                offsets: &[1.0, -1.0],
                weights: &[1.0, -1.0],
                baseline: 0.0,
                denominator: 2.0,
            },
            (FdForm::Central, 4) => Stencil {
                offsets: &[2.0, 1.0, -1.0, -2.0],
                weights: &[-1.0, 8.0, -8.0, 1.0],
                baseline: 0.0,
                denominator: 12.0,
            },
            _ => {
                return Err(Error::InvalidConfiguration(format!(
                    "order {order} is not available for '{form}' differences"
                )));
            }
        };
        Ok(stencil)
    }

    /// Model evaluations per direction.
    pub fn evaluations(&self) -> usize {
        self.offsets.len()
    }
}

/// An entry to perturb and its step.
#[derive(Debug, Clone, PartialEq)]
pub struct Perturbation {
    pub var: String,
    pub index: usize,
    pub step: f64,
}

/// Evaluate the stencil around the current point.
///
/// Returns, for every variable in `of`, the weighted difference divided by
/// the stencil denominator but not yet by the step. `baseline` holds `f(x)`
/// read from the converged state; it is not re-evaluated. The target is
/// restored after every stencil point, including when evaluation fails.
pub fn difference<T: ApproxTarget>(
    target: &mut T,
    stencil: &Stencil,
    perturbations: &[Perturbation],
    active: &ActiveSet,
    of: &[&str],
    baseline: &IndexMap<String, Vec<f64>>,
) -> Result<IndexMap<String, Vec<f64>>> {
    let mut result: IndexMap<String, Vec<f64>> = IndexMap::with_capacity(of.len());
    for name in of {
        let f0 = baseline
            .get(*name)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
        result.insert(
            name.to_string(),
            f0.iter().map(|v| stencil.baseline * v).collect(),
        );
    }

    let checkpoint = target.checkpoint();
    for (&offset, &weight) in stencil.offsets.iter().zip(stencil.weights) {
        let point = evaluate_point(target, perturbations, offset, active, of);
        target.restore(&checkpoint);
        for (name, values) in point? {
            if let Some(acc) = result.get_mut(&name) {
                for (a, v) in acc.iter_mut().zip(values) {
                    *a += weight * v;
                }
            }
        }
    }

    for values in result.values_mut() {
        for v in values.iter_mut() {
            *v /= stencil.denominator;
        }
    }
    Ok(result)
}

fn evaluate_point<T: ApproxTarget>(
    target: &mut T,
    perturbations: &[Perturbation],
    offset: f64,
    active: &ActiveSet,
    of: &[&str],
) -> Result<Vec<(String, Vec<f64>)>> {
    for p in perturbations {
        target.perturb(&p.var, p.index, Delta::Real(offset * p.step))?;
    }
    target.evaluate(active, EvalMode::Real)?;
    of.iter()
        .map(|name| Ok((name.to_string(), target.values(name, Part::Real)?)))
        .collect()
}
