//! Step-size policy.
//!
//! Turns a base step, a step calculation mode and the nominal values of a
//! perturbed variable into the actual step used per entry.

use serde::{Deserialize, Serialize};

use mdax_core::options::{ApproxOptions, DEFAULT_FD_STEP, FdForm, Method, StepCalc};

/// Actual step to apply for each entry of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum StepVector {
    Uniform(f64),
    PerElement(Vec<f64>),
}

impl StepVector {
    /// Step for entry `index`.
    pub fn at(&self, index: usize) -> f64 {
        match self {
            StepVector::Uniform(h) => *h,
            StepVector::PerElement(hs) => hs[index],
        }
    }
}

/// Compute the step for every entry of a variable with values `nominal`.
///
/// Relative modes never return a step below `minimum_step`, and a step of
/// exactly zero is replaced by `minimum_step` in every mode.
pub fn compute_step(
    nominal: &[f64],
    step_calc: StepCalc,
    base_step: f64,
    minimum_step: f64,
) -> StepVector {
    let floor = |h: f64| {
        let h = h.max(minimum_step);
        if h == 0.0 { minimum_step } else { h }
    };
    match step_calc {
        StepCalc::Abs => StepVector::Uniform(if base_step == 0.0 { minimum_step } else { base_step }),
        StepCalc::Rel | StepCalc::RelLegacy => {
            let norm = nominal.iter().map(|v| v * v).sum::<f64>().sqrt();
            StepVector::Uniform(floor(base_step * norm))
        }
        StepCalc::RelAvg => {
            let mean = if nominal.is_empty() {
                0.0
            } else {
                nominal.iter().map(|v| v.abs()).sum::<f64>() / nominal.len() as f64
            };
            StepVector::Uniform(floor(base_step * mean))
        }
        StepCalc::RelElement => {
            StepVector::PerElement(nominal.iter().map(|v| floor(base_step * v.abs())).collect())
        }
    }
}

/// Default base steps, used when a request does not carry its own step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDefaults {
    /// Forward and backward differences.
    pub fd_one_sided: f64,
    /// Central differences.
    pub fd_central: f64,
    /// Complex step on a component's own partials.
    pub cs_local: f64,
    /// Complex step across a group or the whole model.
    pub cs_global: f64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            fd_one_sided: DEFAULT_FD_STEP,
            fd_central: DEFAULT_FD_STEP,
            cs_local: 1e-20,
            cs_global: 1e-40,
        }
    }
}

impl StepDefaults {
    pub fn with_fd_one_sided(mut self, step: f64) -> Self {
        self.fd_one_sided = step;
        self
    }

    pub fn with_fd_central(mut self, step: f64) -> Self {
        self.fd_central = step;
        self
    }

    pub fn with_cs_local(mut self, step: f64) -> Self {
        self.cs_local = step;
        self
    }

    pub fn with_cs_global(mut self, step: f64) -> Self {
        self.cs_global = step;
        self
    }
}

/// Where an approximation happens, which decides the default complex step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepContext {
    /// A component approximating its own partials.
    Local,
    /// A group or the whole model approximating its totals.
    Global,
    /// A check pass with its own defaults.
    Check { defaults: StepDefaults, global: bool },
}

impl StepContext {
    /// Base step for `options`: an explicit step wins, then the context default.
    pub fn base_step(&self, options: &ApproxOptions) -> f64 {
        if let Some(step) = options.step {
            return step;
        }
        let defaults = match self {
            StepContext::Check { defaults, .. } => defaults.clone(),
            _ => StepDefaults::default(),
        };
        let global = match self {
            StepContext::Local => false,
            StepContext::Global => true,
            StepContext::Check { global, .. } => *global,
        };
        match options.method {
            Method::Fd => match options.form {
                FdForm::Central => defaults.fd_central,
                FdForm::Forward | FdForm::Backward => defaults.fd_one_sided,
            },
            Method::Cs if global => defaults.cs_global,
            Method::Cs => defaults.cs_local,
        }
    }
}
