//! Driver-facing entry point: set up a model, run it and take derivatives.

use serde::{Deserialize, Serialize};

use mdax_approx::Diagnostics;
use mdax_core::SparsityBehavior;

use crate::check::CheckOptions;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::report::CheckReport;
use crate::system::Group;
use crate::totals::{DriverVar, Totals};

/// Settings applied when the model is set up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupOptions {
    /// Allocate complex storage even when no complex step is declared.
    pub force_alloc_complex: bool,
    /// What to do when an approximation finds entries outside a declared sparsity.
    pub sparsity_behavior: SparsityBehavior,
}

impl SetupOptions {
    pub fn with_force_alloc_complex(mut self, force: bool) -> Self {
        self.force_alloc_complex = force;
        self
    }

    pub fn with_sparsity_behavior(mut self, behavior: SparsityBehavior) -> Self {
        self.sparsity_behavior = behavior;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A model together with the design variables and responses of its driver.
#[derive(Debug, Default)]
pub struct Problem {
    group: Option<Group>,
    model: Option<Model>,
    design_vars: Vec<DriverVar>,
    objectives: Vec<DriverVar>,
    constraints: Vec<DriverVar>,
}

impl Problem {
    pub fn new(model: Group) -> Self {
        Self {
            group: Some(model),
            ..Default::default()
        }
    }

    pub fn add_design_var(&mut self, var: impl Into<DriverVar>) -> &mut Self {
        self.design_vars.push(var.into());
        self
    }

    pub fn add_objective(&mut self, var: impl Into<DriverVar>) -> &mut Self {
        self.objectives.push(var.into());
        self
    }

    pub fn add_constraint(&mut self, var: impl Into<DriverVar>) -> &mut Self {
        self.constraints.push(var.into());
        self
    }

    pub fn design_vars(&self) -> &[DriverVar] {
        &self.design_vars
    }

    /// Objectives followed by constraints.
    pub fn responses(&self) -> Vec<DriverVar> {
        self.objectives.iter().chain(&self.constraints).cloned().collect()
    }

    /// Flatten the model and allocate storage. Can be called once.
    pub fn setup(&mut self, options: SetupOptions) -> Result<&mut Self> {
        let group = self
            .group
            .take()
            .ok_or_else(|| Error::Setup("problem is already set up".to_string()))?;
        let model = Model::build(group, &options)?;
        for var in self.design_vars.iter().chain(&self.objectives).chain(&self.constraints) {
            model.selection(var)?;
        }
        log::info!(
            "problem set up: {} components, {} design variables",
            model.num_components(),
            self.design_vars.len()
        );
        self.model = Some(model);
        Ok(self)
    }

    pub fn model(&self) -> Result<&Model> {
        self.model.as_ref().ok_or(Error::NotSetUp)
    }

    pub fn model_mut(&mut self) -> Result<&mut Model> {
        self.model.as_mut().ok_or(Error::NotSetUp)
    }

    pub fn set_val(&mut self, name: &str, values: &[f64]) -> Result<()> {
        self.model_mut()?.set_value(name, values)
    }

    pub fn get_val(&self, name: &str) -> Result<Vec<f64>> {
        self.model()?.value(name)
    }

    pub fn run_model(&mut self) -> Result<()> {
        self.model_mut()?.run()
    }

    /// Named variables, or the driver's registered ones when `names` is empty.
    /// Registered indices and references carry over to matching names.
    fn driver_vars(names: &[&str], registered: &[DriverVar]) -> Vec<DriverVar> {
        if names.is_empty() {
            return registered.to_vec();
        }
        names
            .iter()
            .map(|&name| {
                registered
                    .iter()
                    .find(|v| v.name == name)
                    .cloned()
                    .unwrap_or_else(|| DriverVar::new(name))
            })
            .collect()
    }

    fn resolve_vars(&self, of: &[&str], wrt: &[&str]) -> (Vec<DriverVar>, Vec<DriverVar>) {
        (
            Self::driver_vars(of, &self.responses()),
            Self::driver_vars(wrt, &self.design_vars),
        )
    }

    /// Total derivatives at the current state. Empty `of` or `wrt` select the
    /// driver's responses or design variables.
    pub fn compute_totals(&mut self, of: &[&str], wrt: &[&str]) -> Result<Totals> {
        let (of, wrt) = self.resolve_vars(of, wrt);
        self.model_mut()?.compute_totals(&of, &wrt)
    }

    /// Totals in scaled units, `d(of/ref_of) / d(wrt/ref_wrt)`.
    pub fn compute_totals_scaled(&mut self, of: &[&str], wrt: &[&str]) -> Result<Totals> {
        let (of, wrt) = self.resolve_vars(of, wrt);
        self.model_mut()?.compute_totals_scaled(&of, &wrt)
    }

    pub fn check_partials(&mut self, options: &CheckOptions) -> Result<CheckReport> {
        self.model_mut()?.check_partials(options)
    }

    pub fn check_totals(&mut self, of: &[&str], wrt: &[&str], options: &CheckOptions) -> Result<CheckReport> {
        let (of, wrt) = self.resolve_vars(of, wrt);
        self.model_mut()?.check_totals(&of, &wrt, options)
    }

    pub fn diagnostics(&self) -> Result<&Diagnostics> {
        Ok(self.model()?.diagnostics())
    }

    pub fn exec_count(&self, path: &str) -> Result<usize> {
        self.model()?
            .exec_count(path)
            .ok_or_else(|| Error::UnknownVariable(path.to_string()))
    }

    pub fn imaginary_norm(&self) -> Result<f64> {
        Ok(self.model()?.imaginary_norm())
    }
}
