//! Checking computed derivatives against a fresh approximation.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use mdax_approx::assembler::DEFAULT_SPARSITY_TOL;
use mdax_approx::{
    ApproximationScheme, Diagnostics, PartialRequest, SparsityMismatch, StepContext, StepDefaults,
    pattern_violations,
};
use mdax_core::{ApproxOptions, FdForm, Method, ResolvedPartial, SparsityBehavior, StepCalc};

use crate::error::{Error, Result};
use crate::model::{Model, ROOT_NAME};
use crate::report::{CheckReport, PartialComparison, ScopeCheck};
use crate::target::{ComponentTarget, GroupTarget};
use crate::totals::DriverVar;

/// Settings for a check pass. Fields left `None` fall back to the
/// component's check options, then to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    pub method: Option<Method>,
    pub step: Option<f64>,
    pub form: Option<FdForm>,
    pub step_calc: Option<StepCalc>,
    /// Base steps used when neither the call nor the component sets one.
    pub defaults: StepDefaults,
    /// Component paths to check; all when `None`.
    pub includes: Option<Vec<String>>,
}

impl CheckOptions {
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_form(mut self, form: FdForm) -> Self {
        self.form = Some(form);
        self
    }

    pub fn with_step_calc(mut self, step_calc: StepCalc) -> Self {
        self.step_calc = Some(step_calc);
        self
    }

    pub fn with_defaults(mut self, defaults: StepDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_includes(mut self, paths: &[&str]) -> Self {
        self.includes = Some(paths.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Options for one scope: call settings over `scope_options` over defaults.
    pub fn resolve(&self, scope_options: Option<&ApproxOptions>) -> ApproxOptions {
        let mut options = scope_options.cloned().unwrap_or_default();
        if let Some(method) = self.method {
            options.method = method;
        }
        if let Some(step) = self.step {
            options.step = Some(step);
        }
        if let Some(form) = self.form {
            options.form = form;
            options.order = None;
        }
        if let Some(step_calc) = self.step_calc {
            options.step_calc = step_calc;
        }
        options
    }

    fn context(&self, global: bool) -> StepContext {
        StepContext::Check {
            defaults: self.defaults.clone(),
            global,
        }
    }

    fn includes(&self, path: &str) -> bool {
        self.includes
            .as_ref()
            .is_none_or(|paths| paths.iter().any(|p| p == path))
    }
}

/// Whether checking with `check` would reproduce the computation `computed`.
fn same_approximation(
    computed: &ApproxOptions,
    computed_ctx: &StepContext,
    check: &ApproxOptions,
    check_ctx: &StepContext,
) -> bool {
    if computed.method != check.method {
        return false;
    }
    if computed_ctx.base_step(computed) != check_ctx.base_step(check) {
        return false;
    }
    match check.method {
        Method::Cs => true,
        Method::Fd => computed.form == check.form && computed.step_calc == check.step_calc,
    }
}

fn same_method_error(scope: &str, wrt: &str) -> Error {
    Error::InvalidConfiguration(format!(
        "{scope}: Checking partials with respect to variable '{wrt}' using the same method and \
         options as are used to compute the partials will not provide any relevant information \
         on the accuracy."
    ))
}

fn compare(
    of: &str,
    wrt: &str,
    calc: &DMatrix<f64>,
    check: &DMatrix<f64>,
    sparsity: Option<SparsityMismatch>,
) -> PartialComparison {
    let calc_norm = calc.norm();
    let check_norm = check.norm();
    let abs_error = (calc - check).norm();
    let rel_error = if check_norm == 0.0 { f64::NAN } else { abs_error / check_norm };
    PartialComparison {
        of: of.to_string(),
        wrt: wrt.to_string(),
        calc_norm,
        check_norm,
        abs_error,
        rel_error,
        sparsity,
    }
}

fn sparsity_violation(partial: &ResolvedPartial, check: &DMatrix<f64>) -> Option<SparsityMismatch> {
    let pattern = partial.sparsity.as_ref()?;
    let (rows, cols, max_magnitude) = pattern_violations(check, pattern, DEFAULT_SPARSITY_TOL)?;
    Some(SparsityMismatch {
        of: partial.of.clone(),
        wrt: partial.wrt.clone(),
        rows,
        cols,
        max_magnitude,
    })
}

impl Model {
    /// Compare every component's partials at the current state with a
    /// fresh approximation.
    pub fn check_partials(&mut self, options: &CheckOptions) -> Result<CheckReport> {
        let mut scopes = Vec::new();
        for c in 0..self.components.len() {
            if !options.includes(&self.components[c].path) {
                continue;
            }
            if let Some(scope) = self.check_component(c, options)? {
                scopes.push(scope);
            }
        }
        Ok(CheckReport {
            scopes,
            sparsity_tol: DEFAULT_SPARSITY_TOL,
        })
    }

    fn check_component(&mut self, c: usize, options: &CheckOptions) -> Result<Option<ScopeCheck>> {
        let entry = &self.components[c];
        if entry.layout.inputs.is_empty() || entry.layout.outputs.is_empty() {
            return Ok(None);
        }
        let check = options.resolve(entry.check_options.as_ref());
        check.validate()?;
        let check_ctx = options.context(false);
        for p in &entry.resolved {
            if let Some(computed) = &p.approx {
                if same_approximation(computed, &StepContext::Local, &check, &check_ctx) {
                    return Err(same_method_error(&entry.path, &p.wrt));
                }
            }
        }

        self.linearize(c, None)?;

        let complex = self.complex;
        let outer_active = self.cs_state.is_active();
        let entry = &mut self.components[c];
        let step = check_ctx.base_step(&check);
        log::debug!("{}: checking partials with {} (step {step:e})", entry.path, check.method);

        let mut scheme = ApproximationScheme::new(&entry.path, check_ctx)
            .with_sparsity_behavior(SparsityBehavior::Ignore);
        for of in entry.layout.outputs.keys() {
            for wrt in entry.layout.inputs.keys() {
                scheme.add_request(PartialRequest::new(of, wrt, check.clone()))?;
            }
        }

        let x = self.inputs.real()[entry.inputs.clone()].to_vec();
        let y = self.outputs.real()[entry.outputs.clone()].to_vec();
        let mut diagnostics = Diagnostics::new();
        let jac = {
            let mut target = ComponentTarget::new(
                &entry.path,
                entry.component.as_mut(),
                &entry.layout,
                &mut entry.exec_count,
                &x,
                &y,
                complex && entry.complex_safe,
                outer_active,
            );
            scheme.compute_approx_jacobian(&mut target, &mut diagnostics)
        };
        self.diagnostics.extend(diagnostics);
        let jac = jac?;

        let entry = &self.components[c];
        let mut comparisons = Vec::with_capacity(jac.len());
        for ((of, wrt), block) in &jac {
            let check_block = block.to_dense();
            let resolved = entry.resolved.iter().find(|p| &p.of == of && &p.wrt == wrt);
            let calc = entry
                .partials
                .get(of, wrt)
                .map(|b| b.to_dense())
                .unwrap_or_else(|| DMatrix::zeros(check_block.nrows(), check_block.ncols()));
            let sparsity = resolved.and_then(|p| sparsity_violation(p, &check_block));
            if let Some(m) = &sparsity {
                log::warn!(
                    "{}: sparsity of '{of}' wrt '{wrt}' excludes {} non-zero entries",
                    entry.path,
                    m.rows.len()
                );
            }
            comparisons.push(compare(of, wrt, &calc, &check_block, sparsity));
        }

        Ok(Some(ScopeCheck {
            scope: entry.path.clone(),
            method: check.method,
            step,
            comparisons,
        }))
    }

    /// Compare `compute_totals(of, wrt)` with a fresh model-level approximation.
    pub fn check_totals(
        &mut self,
        of: &[DriverVar],
        wrt: &[DriverVar],
        options: &CheckOptions,
    ) -> Result<CheckReport> {
        let check = options.resolve(None);
        check.validate()?;
        let check_ctx = options.context(true);
        if let Some(computed) = &self.groups[0].approx {
            if same_approximation(computed, &StepContext::Global, &check, &check_ctx) {
                let name = wrt.first().map_or("", |w| w.name.as_str());
                return Err(same_method_error(ROOT_NAME, name));
            }
        }

        let totals = self.compute_totals(of, wrt)?;

        let step = check_ctx.base_step(&check);
        let requests = self.total_requests(of, wrt, &check)?;
        let mut scheme = ApproximationScheme::new(ROOT_NAME, check_ctx)
            .with_sparsity_behavior(SparsityBehavior::Ignore);
        for req in &requests {
            scheme.add_request(req.clone())?;
        }
        let mut diagnostics = Diagnostics::new();
        let jac = scheme.compute_approx_jacobian(&mut GroupTarget::new(self, 0), &mut diagnostics);
        self.diagnostics.extend(diagnostics);
        let jac = jac?;

        let mut comparisons = Vec::with_capacity(requests.len());
        let pairs = of.iter().flat_map(|o| wrt.iter().map(move |w| (o, w)));
        for ((o, w), req) in pairs.zip(&requests) {
            let Some(block) = jac.get(&(req.of.clone(), req.wrt.clone())) else {
                continue;
            };
            let check_block = block.to_dense();
            let calc = totals
                .get(&o.name, &w.name)
                .cloned()
                .unwrap_or_else(|| DMatrix::zeros(check_block.nrows(), check_block.ncols()));
            comparisons.push(compare(&o.name, &w.name, &calc, &check_block, None));
        }

        Ok(CheckReport {
            scopes: vec![ScopeCheck {
                scope: ROOT_NAME.to_string(),
                method: check.method,
                step,
                comparisons,
            }],
            sparsity_tol: DEFAULT_SPARSITY_TOL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_precedence() {
        let component = ApproxOptions::cs().with_step(1e-30);
        let opts = CheckOptions::default();
        assert_eq!(opts.resolve(Some(&component)).method, Method::Cs);
        assert_eq!(opts.resolve(None).method, Method::Fd);

        let opts = CheckOptions::default().with_method(Method::Fd).with_form(FdForm::Central);
        let resolved = opts.resolve(Some(&component));
        assert_eq!(resolved.method, Method::Fd);
        assert_eq!(resolved.form, FdForm::Central);
        assert_eq!(resolved.step, Some(1e-30));
    }

    #[test]
    fn test_same_approximation_compares_effective_steps() {
        let ctx = CheckOptions::default().context(false);
        assert!(same_approximation(&ApproxOptions::fd(), &StepContext::Local, &ApproxOptions::fd(), &ctx));
        assert!(!same_approximation(
            &ApproxOptions::fd(),
            &StepContext::Local,
            &ApproxOptions::fd().with_form(FdForm::Central).with_step(1e-6),
            &ctx
        ));
        assert!(!same_approximation(&ApproxOptions::cs(), &StepContext::Local, &ApproxOptions::fd(), &ctx));

        let ctx = CheckOptions::default()
            .with_defaults(StepDefaults::default().with_fd_one_sided(1e-7))
            .context(false);
        assert!(!same_approximation(&ApproxOptions::fd(), &StepContext::Local, &ApproxOptions::fd(), &ctx));
    }

    #[test]
    fn test_zero_check_gives_nan_relative_error() {
        let z = DMatrix::zeros(2, 2);
        let c = compare("y", "x", &z, &z, None);
        assert!(c.rel_error.is_nan());
        assert_eq!(c.abs_error, 0.0);
    }

    #[test]
    fn test_options_from_json() {
        let opts = CheckOptions::from_json(r#"{"method": "cs", "includes": ["comp"]}"#).unwrap();
        assert_eq!(opts.method, Some(Method::Cs));
        assert!(opts.includes("comp"));
        assert!(!opts.includes("other"));
        assert!(CheckOptions::from_json(r#"{"method": "spline"}"#).is_err());
    }
}
